//! Handlers under `/api/review-popup`

use axum::{
    Json,
    extract::{FromRequestParts, Query, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;

use crate::app::SharedState;
use crate::auth::{MaybeUser, RequireUser};
use crate::error::{ApiJson, AppError, Result};
use crate::identity::{RequestMeta, resolve_subject};
use crate::preference::{Activity, ActivityKind, Preference};
use crate::rate_limit::client_ip;
use crate::rating::RatingInput;
use crate::service::{ClientInfo, PopupStats};

/// Metadata of the calling device, extracted from the request headers
pub struct RequestContext(pub RequestMeta);

impl RequestContext {
    pub fn client_info(&self) -> ClientInfo {
        let meta = &self.0;
        ClientInfo {
            ip: Some(meta.ip.clone()),
            user_agent: (!meta.user_agent.is_empty()).then(|| meta.user_agent.clone()),
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header_value = |name: header::HeaderName| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        Ok(RequestContext(RequestMeta {
            user_agent: header_value(header::USER_AGENT),
            accept_language: header_value(header::ACCEPT_LANGUAGE),
            ip: client_ip(&parts.headers, &parts.extensions),
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub anonymous_id: Option<String>,
}

pub async fn status(
    State(state): State<SharedState>,
    MaybeUser(user): MaybeUser,
    RequestContext(meta): RequestContext,
    Query(query): Query<StatusQuery>,
) -> Response {
    let subject = resolve_subject(
        user.as_ref().map(|u| u.id.as_str()),
        query.anonymous_id.as_deref(),
        &meta,
    );

    match state.service.status(&subject).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            log::error!("error checking review popup status: {}", e);
            // The client treats any failure as "do not show"
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to check popup status", "shouldShow": false })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityData {
    pub minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackActivityBody {
    pub anonymous_id: Option<String>,
    pub activity_type: Option<String>,
    pub data: Option<ActivityData>,
}

pub async fn track_activity(
    State(state): State<SharedState>,
    MaybeUser(user): MaybeUser,
    RequestContext(meta): RequestContext,
    ApiJson(body): ApiJson<TrackActivityBody>,
) -> Result<Json<serde_json::Value>> {
    let name = body
        .activity_type
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::BadRequest("Activity type is required".to_string()))?;

    let kind = ActivityKind::from_name(&name);
    if !kind.is_recognized() {
        return Err(AppError::BadRequest("Invalid activity type".to_string()));
    }

    let activity = Activity {
        kind,
        minutes: body.data.and_then(|data| data.minutes),
    };
    let subject = resolve_subject(
        user.as_ref().map(|u| u.id.as_str()),
        body.anonymous_id.as_deref(),
        &meta,
    );

    let record = state.service.track_activity(&subject, activity).await?;

    Ok(Json(json!({
        "success": true,
        "activityCount": record.activity_count,
        "meaningfulActions": record.meaningful_actions,
        "pageViewCount": record.page_view_count,
        "activeTimeMinutes": record.active_time_minutes,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreferenceBody {
    pub preference: Option<String>,
    pub anonymous_id: Option<String>,
    pub remind_days: Option<i64>,
}

pub async fn set_preference(
    State(state): State<SharedState>,
    MaybeUser(user): MaybeUser,
    RequestContext(meta): RequestContext,
    ApiJson(body): ApiJson<PreferenceBody>,
) -> Result<Json<serde_json::Value>> {
    let preference = body
        .preference
        .as_deref()
        .and_then(Preference::parse)
        .ok_or_else(|| AppError::validation("preference", "Invalid preference"))?;

    if let Some(days) = body.remind_days {
        if !(1..=365).contains(&days) {
            return Err(AppError::validation(
                "remindDays",
                "Remind days must be between 1 and 365",
            ));
        }
    }

    let subject = resolve_subject(
        user.as_ref().map(|u| u.id.as_str()),
        body.anonymous_id.as_deref(),
        &meta,
    );
    let record = state
        .service
        .set_preference(&subject, preference, body.remind_days)
        .await?;

    Ok(Json(json!({
        "success": true,
        "preference": record.preference,
        "remindAt": record.remind_at,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    #[serde(flatten)]
    pub input: RatingInput,
    #[serde(default)]
    pub anonymous_id: Option<String>,
}

pub async fn submit(
    State(state): State<SharedState>,
    RequireUser(user): RequireUser,
    context: RequestContext,
    ApiJson(body): ApiJson<SubmitBody>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let subject = resolve_subject(
        Some(user.id.as_str()),
        body.anonymous_id.as_deref(),
        &context.0,
    );

    let rating = state
        .service
        .submit_popup_review(&user, &subject, body.input, context.client_info())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Review submitted successfully! It will be published after approval.",
            "reviewId": rating.id,
        })),
    ))
}

pub async fn stats(State(state): State<SharedState>) -> Result<Json<PopupStats>> {
    Ok(Json(state.service.popup_stats().await?))
}
