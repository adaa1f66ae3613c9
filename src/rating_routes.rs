//! Handlers under `/api/ratings`

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::app::SharedState;
use crate::auth::{AdminUser, RequireUser};
use crate::error::{ApiJson, Result};
use crate::popup_routes::RequestContext;
use crate::rating::{RatingInput, RatingRecord, RatingUpdate};
use crate::service::TestimonialFilter;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuery {
    pub limit: Option<usize>,
    pub industry: Option<String>,
    pub min_rating: Option<u8>,
}

pub async fn public_ratings(
    State(state): State<SharedState>,
    Query(query): Query<PublicQuery>,
) -> Result<Json<Value>> {
    let defaults = TestimonialFilter::default();
    let filter = TestimonialFilter {
        limit: query.limit.unwrap_or(defaults.limit),
        industry: query.industry.filter(|i| !i.is_empty()),
        min_rating: query.min_rating.unwrap_or(defaults.min_rating),
    };

    let testimonials = state.service.public_testimonials(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "meta": {
            "total": testimonials.len(),
            "filters": { "industry": filter.industry, "minRating": filter.min_rating },
        },
        "data": testimonials,
    })))
}

pub async fn rating_stats(State(state): State<SharedState>) -> Result<Json<Value>> {
    let stats = state.service.rating_stats().await?;
    Ok(Json(json!({ "success": true, "data": stats })))
}

fn brief(rating: &RatingRecord) -> Value {
    json!({
        "id": rating.id,
        "rating": rating.rating,
        "title": rating.title,
        "status": rating.status,
    })
}

pub async fn submit_rating(
    State(state): State<SharedState>,
    RequireUser(user): RequireUser,
    context: RequestContext,
    ApiJson(input): ApiJson<RatingInput>,
) -> Result<(StatusCode, Json<Value>)> {
    let rating = state
        .service
        .submit_rating(&user, input, context.client_info())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Rating submitted successfully",
            "data": brief(&rating),
        })),
    ))
}

pub async fn update_rating(
    State(state): State<SharedState>,
    RequireUser(user): RequireUser,
    ApiJson(update): ApiJson<RatingUpdate>,
) -> Result<Json<Value>> {
    let rating = state.service.update_rating(&user, update).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Rating updated successfully",
        "data": brief(&rating),
    })))
}

pub async fn my_rating(
    State(state): State<SharedState>,
    RequireUser(user): RequireUser,
) -> Result<Json<Value>> {
    let Some(rating) = state.service.my_rating(&user).await? else {
        return Ok(Json(json!({
            "success": true,
            "data": null,
            "message": "No rating found",
        })));
    };

    Ok(Json(json!({
        "success": true,
        "data": {
            "id": rating.id,
            "rating": rating.rating,
            "title": rating.title,
            "review": rating.review,
            "categories": rating.categories,
            "usageContext": rating.usage_context,
            "isPublic": rating.is_public,
            "status": rating.status,
            "helpfulVotes": rating.helpful_votes,
            "avgCategoryRating": rating.avg_category_rating(),
            "createdAt": rating.created_at,
            "updatedAt": rating.updated_at,
        },
    })))
}

pub async fn mark_helpful(
    State(state): State<SharedState>,
    RequireUser(user): RequireUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    let rating = state.service.mark_helpful(&user, id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Rating marked as helpful",
        "data": { "helpfulVotes": rating.helpful_votes },
    })))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default = "page_size")]
    pub limit: usize,
}

fn first_page() -> usize {
    1
}

fn page_size() -> usize {
    20
}

pub async fn pending_ratings(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>> {
    let page = state.service.pending_ratings(query.page, query.limit).await?;
    Ok(Json(json!({
        "success": true,
        "data": page.items,
        "meta": {
            "total": page.total,
            "page": page.page,
            "limit": page.limit,
            "totalPages": page.total_pages,
        },
    })))
}

pub async fn approve_rating(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.service.approve_rating(&admin, id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Rating approved successfully",
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    pub reason: Option<String>,
}

pub async fn reject_rating(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectBody>>,
) -> Result<Json<Value>> {
    let reason = body.and_then(|Json(body)| body.reason);
    state.service.reject_rating(&admin, id, reason).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Rating rejected successfully",
    })))
}
