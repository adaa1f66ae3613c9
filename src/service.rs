//! Review service: everything the HTTP handlers ask of the popup and ratings
//! features, on top of the stores and the eligibility engine.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::eligibility::{self, EligibilityPolicy, Progress, ReasonCode};
use crate::error::{AppError, Result, StoreError};
use crate::identity::{Subject, generate_anonymous_id};
use crate::preference::{Activity, Preference, PreferenceRecord};
use crate::rating::{
    Author, CategoryRatings, LengthRules, RatingInput, RatingRecord, RatingSource, RatingStatus,
    RatingSummary, RatingUpdate, UsageDuration, excerpt, summarize,
};
use crate::store::{
    MemoryStore, PreferenceStore, RatingEdit, RatingOrder, RatingQuery, RatingStore,
};

/// Featured reviews shown next to the popup
pub const DEFAULT_FEATURED_LIMIT: usize = 3;
/// Window counted as "recent" in rating statistics
pub const RECENT_WINDOW_DAYS: i64 = 30;
/// Largest page the moderation queue returns
pub const MAX_PAGE_SIZE: usize = 100;

/// Where a submission came from, for moderation
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub should_show: bool,
    pub reason: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference: Option<PreferenceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub has_review: bool,
    pub anonymous_id: String,
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedReview {
    pub id: Uuid,
    pub rating: u8,
    pub title: String,
    pub review: String,
    pub user_name: String,
    pub user_initials: String,
    pub created_at: DateTime<Utc>,
    pub helpful_votes: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupStats {
    #[serde(flatten)]
    pub summary: RatingSummary,
    pub featured_reviews: Vec<FeaturedReview>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Testimonial {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub content: String,
    pub rating: u8,
    pub company: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub helpful_votes: u32,
    pub usage_duration: Option<UsageDuration>,
    pub categories: Option<CategoryRatings>,
    pub is_verified: bool,
}

impl From<RatingRecord> for Testimonial {
    fn from(rating: RatingRecord) -> Self {
        let context = rating.usage_context.clone().unwrap_or_default();
        Self {
            id: rating.id,
            name: rating.author.display_name(),
            title: rating.title,
            content: rating.review,
            rating: rating.rating,
            company: context
                .industry
                .unwrap_or_else(|| "Technology Company".to_string()),
            role: context
                .primary_use_case
                .unwrap_or_else(|| "Data Professional".to_string()),
            created_at: rating.created_at,
            helpful_votes: rating.helpful_votes,
            usage_duration: context.usage_duration,
            categories: rating.categories,
            is_verified: rating.is_verified,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingStats {
    #[serde(flatten)]
    pub summary: RatingSummary,
    pub recent_ratings: usize,
    pub verified_ratings: usize,
    pub last_updated: DateTime<Utc>,
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

/// Filters for the public testimonials feed
#[derive(Debug, Clone)]
pub struct TestimonialFilter {
    pub limit: usize,
    pub industry: Option<String>,
    pub min_rating: u8,
}

impl Default for TestimonialFilter {
    fn default() -> Self {
        Self {
            limit: 6,
            industry: None,
            min_rating: 4,
        }
    }
}

pub struct ReviewService {
    preferences: Arc<dyn PreferenceStore>,
    ratings: Arc<dyn RatingStore>,
    policy: EligibilityPolicy,
    featured_limit: usize,
}

impl ReviewService {
    pub fn new(preferences: Arc<dyn PreferenceStore>, ratings: Arc<dyn RatingStore>) -> Self {
        Self {
            preferences,
            ratings,
            policy: EligibilityPolicy::default(),
            featured_limit: DEFAULT_FEATURED_LIMIT,
        }
    }

    /// Service backed by a single [`MemoryStore`]
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        let preferences: Arc<dyn PreferenceStore> = store.clone();
        let ratings: Arc<dyn RatingStore> = store;
        Self::new(preferences, ratings)
    }

    pub fn with_policy(mut self, policy: EligibilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_featured_limit(mut self, limit: usize) -> Self {
        self.featured_limit = limit;
        self
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    // ----- review popup -----

    /// Should the popup be shown to `subject` right now?
    pub async fn status(&self, subject: &Subject) -> Result<StatusReport> {
        let anonymous_id = subject
            .anonymous_id
            .clone()
            .unwrap_or_else(generate_anonymous_id);

        let has_review = match &subject.user_id {
            Some(user_id) => self.ratings.find_rating_by_user(user_id).await?.is_some(),
            None => false,
        };

        // An existing review settles it without touching the preference store
        let record = if has_review {
            None
        } else {
            self.preferences.find_preference(&subject.filter()).await?
        };

        let decision = eligibility::decide(record.as_ref(), has_review, Utc::now(), &self.policy);
        log::debug!(
            "popup status for {:?}: {}",
            subject.filter(),
            decision.reason.as_str()
        );

        Ok(StatusReport {
            should_show: decision.should_show,
            reason: decision.reason,
            preference: record,
            progress: decision.progress,
            has_review,
            anonymous_id,
            device_fingerprint: subject.device_fingerprint.clone(),
        })
    }

    pub async fn track_activity(
        &self,
        subject: &Subject,
        activity: Activity,
    ) -> Result<PreferenceRecord> {
        let record = self
            .preferences
            .record_activity(subject, activity, Utc::now())
            .await?;
        Ok(record)
    }

    pub async fn set_preference(
        &self,
        subject: &Subject,
        preference: Preference,
        remind_days: Option<i64>,
    ) -> Result<PreferenceRecord> {
        let record = self
            .preferences
            .set_preference(subject, preference, remind_days, Utc::now())
            .await?;
        log::info!(
            "review popup preference set to {} for {:?}",
            preference.as_str(),
            subject.filter()
        );
        Ok(record)
    }

    /// Store a review written in the popup and stop prompting its author
    pub async fn submit_popup_review(
        &self,
        user: &AuthUser,
        subject: &Subject,
        input: RatingInput,
        client: ClientInfo,
    ) -> Result<RatingRecord> {
        input.validate(LengthRules::POPUP)?;

        if self.ratings.find_rating_by_user(&user.id).await?.is_some() {
            return Err(AppError::conflict_bad_request(
                "You have already submitted a review. You can update it from your profile.",
            ));
        }

        let now = Utc::now();
        let mut rating = RatingRecord::new(&user.id, author_of(user), input, now);
        rating.source = RatingSource::Popup;
        rating.ip_address = client.ip;
        rating.user_agent = client.user_agent;

        let rating = match self.ratings.insert_rating(rating).await {
            Ok(rating) => rating,
            Err(StoreError::DuplicateRating(_)) => {
                return Err(AppError::conflict_bad_request(
                    "You have already submitted a review.",
                ));
            }
            Err(e) => return Err(e.into()),
        };

        self.preferences
            .set_preference(subject, Preference::Never, None, now)
            .await?;

        log::info!("popup review {} submitted by user {}", rating.id, user.id);
        Ok(rating)
    }

    pub async fn popup_stats(&self) -> Result<PopupStats> {
        let published = self.ratings.list_ratings(&RatingQuery::published()).await?;
        let summary = summarize(&published);

        let featured_query = RatingQuery {
            min_rating: Some(4),
            order: RatingOrder::Helpfulness,
            limit: Some(self.featured_limit),
            ..RatingQuery::published()
        };
        let featured_reviews = self
            .ratings
            .list_ratings(&featured_query)
            .await?
            .into_iter()
            .map(|rating| FeaturedReview {
                id: rating.id,
                rating: rating.rating,
                title: rating.title.clone(),
                review: excerpt(&rating.review),
                user_name: rating.author.display_name(),
                user_initials: rating.author.initials(),
                created_at: rating.created_at,
                helpful_votes: rating.helpful_votes,
            })
            .collect();

        Ok(PopupStats {
            summary,
            featured_reviews,
        })
    }

    // ----- ratings -----

    pub async fn public_testimonials(&self, filter: &TestimonialFilter) -> Result<Vec<Testimonial>> {
        let query = RatingQuery {
            min_rating: Some(filter.min_rating),
            industry: filter.industry.clone(),
            limit: Some(filter.limit),
            order: RatingOrder::Helpfulness,
            ..RatingQuery::published()
        };
        let ratings = self.ratings.list_ratings(&query).await?;
        Ok(ratings.into_iter().map(Testimonial::from).collect())
    }

    pub async fn rating_stats(&self) -> Result<RatingStats> {
        let now = Utc::now();
        let published = self.ratings.list_ratings(&RatingQuery::published()).await?;

        let recent = RatingQuery {
            created_since: Some(now - Duration::days(RECENT_WINDOW_DAYS)),
            ..RatingQuery::published()
        };
        let verified = RatingQuery {
            verified_only: true,
            ..RatingQuery::published()
        };

        Ok(RatingStats {
            summary: summarize(&published),
            recent_ratings: self.ratings.count_ratings(&recent).await?,
            verified_ratings: self.ratings.count_ratings(&verified).await?,
            last_updated: now,
        })
    }

    pub async fn submit_rating(
        &self,
        user: &AuthUser,
        input: RatingInput,
        client: ClientInfo,
    ) -> Result<RatingRecord> {
        input.validate(LengthRules::WEB)?;

        if self.ratings.find_rating_by_user(&user.id).await?.is_some() {
            return Err(AppError::conflict(
                "You have already submitted a rating. You can update it instead.",
            ));
        }

        let mut rating = RatingRecord::new(&user.id, author_of(user), input, Utc::now());
        rating.ip_address = client.ip;
        rating.user_agent = client.user_agent;

        let rating = self.ratings.insert_rating(rating).await?;
        log::info!(
            "user {} submitted {}-star rating: {}",
            user.id,
            rating.rating,
            rating.title
        );
        Ok(rating)
    }

    /// Edit the caller's rating; edited ratings go back to moderation
    pub async fn update_rating(&self, user: &AuthUser, update: RatingUpdate) -> Result<RatingRecord> {
        update.validate()?;

        let existing = self
            .ratings
            .find_rating_by_user(&user.id)
            .await?
            .ok_or_else(|| AppError::NotFound("No existing rating found to update".to_string()))?;

        self.ratings
            .edit_rating(existing.id, RatingEdit::Update(update), Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound("No existing rating found to update".to_string()))
    }

    pub async fn my_rating(&self, user: &AuthUser) -> Result<Option<RatingRecord>> {
        Ok(self.ratings.find_rating_by_user(&user.id).await?)
    }

    pub async fn mark_helpful(&self, user: &AuthUser, id: Uuid) -> Result<RatingRecord> {
        let rating = self
            .ratings
            .find_rating(id)
            .await?
            .ok_or_else(rating_not_found)?;

        if rating.user_id == user.id {
            return Err(AppError::BadRequest(
                "You cannot mark your own rating as helpful".to_string(),
            ));
        }

        self.ratings
            .edit_rating(id, RatingEdit::MarkHelpful, Utc::now())
            .await?
            .ok_or_else(rating_not_found)
    }

    /// Pending ratings for moderation, newest first. `page` starts at 1.
    /// One page of the moderation queue, newest first
    ///
    /// `page` starts at 1 and `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn pending_ratings(&self, page: usize, limit: usize) -> Result<Page<RatingRecord>> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let query = RatingQuery {
            status: Some(RatingStatus::Pending),
            order: RatingOrder::Newest,
            skip: (page - 1).saturating_mul(limit),
            limit: Some(limit),
            ..RatingQuery::default()
        };
        let items = self.ratings.list_ratings(&query).await?;
        let total = self.ratings.count_ratings(&query).await?;

        Ok(Page {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    pub async fn approve_rating(&self, admin: &AuthUser, id: Uuid) -> Result<RatingRecord> {
        let edit = RatingEdit::Approve {
            admin_id: admin.id.clone(),
        };
        let rating = self
            .ratings
            .edit_rating(id, edit, Utc::now())
            .await?
            .ok_or_else(rating_not_found)?;
        log::info!("rating {} approved by {}", id, admin.id);
        Ok(rating)
    }

    pub async fn reject_rating(
        &self,
        admin: &AuthUser,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<RatingRecord> {
        let edit = RatingEdit::Reject {
            admin_id: admin.id.clone(),
            reason,
        };
        let rating = self
            .ratings
            .edit_rating(id, edit, Utc::now())
            .await?
            .ok_or_else(rating_not_found)?;
        log::info!("rating {} rejected by {}", id, admin.id);
        Ok(rating)
    }
}

fn author_of(user: &AuthUser) -> Author {
    Author {
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    }
}

fn rating_not_found() -> AppError {
    AppError::NotFound("The specified rating does not exist".to_string())
}
