//! Product ratings, testimonials and their moderation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{AppError, FieldError};

pub const TITLE_MAX: usize = 100;
pub const REVIEW_MAX: usize = 1000;
/// Popup submissions are held to stricter minimum lengths
pub const POPUP_TITLE_MIN: usize = 3;
pub const POPUP_REVIEW_MIN: usize = 10;
/// Featured review excerpts are cut to this many characters
pub const EXCERPT_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RatingStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Flagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RatingSource {
    #[default]
    Web,
    Popup,
    Mobile,
    EmailSurvey,
    AdminImport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanySize {
    Startup,
    Small,
    Medium,
    Large,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageDuration {
    #[serde(rename = "less_than_month")]
    LessThanMonth,
    #[serde(rename = "1-3_months")]
    OneToThreeMonths,
    #[serde(rename = "3-6_months")]
    ThreeToSixMonths,
    #[serde(rename = "6-12_months")]
    SixToTwelveMonths,
    #[serde(rename = "over_year")]
    OverYear,
}

/// Optional per-category sub-ratings, each 1 to 5
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRatings {
    pub usability: Option<u8>,
    pub performance: Option<u8>,
    pub features: Option<u8>,
    pub support: Option<u8>,
    pub value: Option<u8>,
}

impl CategoryRatings {
    fn entries(&self) -> [(&'static str, Option<u8>); 5] {
        [
            ("usability", self.usability),
            ("performance", self.performance),
            ("features", self.features),
            ("support", self.support),
            ("value", self.value),
        ]
    }

    /// Mean of the categories that were rated, rounded to one decimal
    pub fn average(&self) -> Option<f64> {
        let rated: Vec<u8> = self
            .entries()
            .iter()
            .filter_map(|(_, r)| *r)
            .filter(|r| *r > 0)
            .collect();
        if rated.is_empty() {
            return None;
        }
        let mean = rated.iter().map(|r| *r as f64).sum::<f64>() / rated.len() as f64;
        Some(round1(mean))
    }

    fn validate(&self, errors: &mut Vec<FieldError>) {
        for (name, value) in self.entries() {
            if let Some(v) = value {
                if !(1..=5).contains(&v) {
                    errors.push(FieldError::new(
                        format!("categories.{}", name),
                        "Category ratings must be between 1 and 5",
                    ));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageContext {
    pub industry: Option<String>,
    pub company_size: Option<CompanySize>,
    pub usage_duration: Option<UsageDuration>,
    pub primary_use_case: Option<String>,
}

/// Display name of the rating's author, captured at submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub first_name: String,
    pub last_name: String,
}

impl Author {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn initials(&self) -> String {
        self.first_name
            .chars()
            .take(1)
            .chain(self.last_name.chars().take(1))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRecord {
    pub id: Uuid,
    pub user_id: String,
    pub author: Author,
    pub rating: u8,
    pub title: String,
    pub review: String,
    pub categories: Option<CategoryRatings>,
    pub usage_context: Option<UsageContext>,
    pub is_verified: bool,
    pub is_public: bool,
    pub status: RatingStatus,
    pub helpful_votes: u32,
    pub report_count: u32,
    pub admin_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub source: RatingSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RatingRecord {
    pub fn new(user_id: &str, author: Author, input: RatingInput, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            author,
            rating: stars(input.rating),
            title: input.title.trim().to_string(),
            review: input.review.trim().to_string(),
            categories: input.categories,
            usage_context: input.usage_context,
            is_verified: false,
            is_public: input.is_public.unwrap_or(true),
            status: RatingStatus::Pending,
            helpful_votes: 0,
            report_count: 0,
            admin_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            ip_address: None,
            user_agent: None,
            source: RatingSource::Web,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == RatingStatus::Approved && self.is_public
    }

    pub fn avg_category_rating(&self) -> Option<f64> {
        self.categories.as_ref().and_then(CategoryRatings::average)
    }

    pub fn approve(&mut self, admin_id: &str, now: DateTime<Utc>) {
        self.status = RatingStatus::Approved;
        self.reviewed_by = Some(admin_id.to_string());
        self.reviewed_at = Some(now);
        self.updated_at = now;
    }

    pub fn reject(&mut self, admin_id: &str, reason: Option<String>, now: DateTime<Utc>) {
        self.status = RatingStatus::Rejected;
        self.reviewed_by = Some(admin_id.to_string());
        self.reviewed_at = Some(now);
        self.admin_notes = reason;
        self.updated_at = now;
    }

    /// Apply a partial edit and send the rating back to moderation
    pub fn apply_update(&mut self, update: RatingUpdate, now: DateTime<Utc>) {
        if let Some(rating) = update.rating {
            self.rating = stars(rating);
        }
        if let Some(title) = update.title {
            self.title = title.trim().to_string();
        }
        if let Some(review) = update.review {
            self.review = review.trim().to_string();
        }
        if update.categories.is_some() {
            self.categories = update.categories;
        }
        if update.usage_context.is_some() {
            self.usage_context = update.usage_context;
        }
        if let Some(is_public) = update.is_public {
            self.is_public = is_public;
        }

        self.status = RatingStatus::Pending;
        self.reviewed_by = None;
        self.reviewed_at = None;
        self.updated_at = now;
    }
}

/// Star value of an already validated rating
fn stars(rating: i64) -> u8 {
    rating.clamp(1, 5) as u8
}

/// Fields a user supplies when rating the product
///
/// Missing fields deserialize to empty values so that [`RatingInput::validate`]
/// can report them per field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RatingInput {
    /// Kept wide so out-of-range numbers reach [`RatingInput::validate`]
    pub rating: i64,
    pub title: String,
    pub review: String,
    pub categories: Option<CategoryRatings>,
    pub usage_context: Option<UsageContext>,
    pub is_public: Option<bool>,
}

/// Length rules for a submission path
#[derive(Debug, Clone, Copy)]
pub struct LengthRules {
    pub title_min: usize,
    pub review_min: usize,
}

impl LengthRules {
    /// The ratings page only requires non-empty text
    pub const WEB: LengthRules = LengthRules {
        title_min: 1,
        review_min: 1,
    };

    pub const POPUP: LengthRules = LengthRules {
        title_min: POPUP_TITLE_MIN,
        review_min: POPUP_REVIEW_MIN,
    };
}

impl RatingInput {
    pub fn validate(&self, rules: LengthRules) -> Result<(), AppError> {
        let mut errors = Vec::new();

        if !(1..=5).contains(&self.rating) {
            errors.push(FieldError::new("rating", "Rating must be between 1 and 5"));
        }
        check_length(
            "title",
            &self.title,
            rules.title_min,
            TITLE_MAX,
            &mut errors,
        );
        check_length(
            "review",
            &self.review,
            rules.review_min,
            REVIEW_MAX,
            &mut errors,
        );
        if let Some(categories) = &self.categories {
            categories.validate(&mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

fn check_length(field: &str, value: &str, min: usize, max: usize, errors: &mut Vec<FieldError>) {
    let len = value.trim().chars().count();
    if len < min || len > max {
        let label = capitalize(field);
        let message = if min <= 1 {
            format!("{} is required and must be at most {} characters", label, max)
        } else {
            format!("{} must be between {} and {} characters", label, min, max)
        };
        errors.push(FieldError::new(field, message));
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Partial edit of an existing rating
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingUpdate {
    pub rating: Option<i64>,
    pub title: Option<String>,
    pub review: Option<String>,
    pub categories: Option<CategoryRatings>,
    pub usage_context: Option<UsageContext>,
    pub is_public: Option<bool>,
}

impl RatingUpdate {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                errors.push(FieldError::new("rating", "Rating must be between 1 and 5"));
            }
        }
        if let Some(title) = &self.title {
            check_length("title", title, 1, TITLE_MAX, &mut errors);
        }
        if let Some(review) = &self.review {
            check_length("review", review, 1, REVIEW_MAX, &mut errors);
        }
        if let Some(categories) = &self.categories {
            categories.validate(&mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

/// Aggregate over published ratings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub avg_rating: f64,
    pub total_ratings: usize,
    /// Star value to count; always carries keys 1 through 5 when non-empty
    pub distribution: BTreeMap<u8, usize>,
}

/// Average, count and star distribution over approved public ratings
pub fn summarize<'a>(ratings: impl IntoIterator<Item = &'a RatingRecord>) -> RatingSummary {
    let published: Vec<&RatingRecord> = ratings.into_iter().filter(|r| r.is_published()).collect();

    if published.is_empty() {
        return RatingSummary {
            avg_rating: 0.0,
            total_ratings: 0,
            distribution: BTreeMap::new(),
        };
    }

    let mut distribution: BTreeMap<u8, usize> = (1..=5).map(|star| (star, 0)).collect();
    let mut sum = 0u64;
    for rating in &published {
        *distribution.entry(rating.rating).or_insert(0) += 1;
        sum += rating.rating as u64;
    }

    RatingSummary {
        avg_rating: round1(sum as f64 / published.len() as f64),
        total_ratings: published.len(),
        distribution,
    }
}

/// Order used for testimonials: most helpful first, then newest
pub fn by_helpfulness(a: &RatingRecord, b: &RatingRecord) -> std::cmp::Ordering {
    b.helpful_votes
        .cmp(&a.helpful_votes)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Cut review text for the popup teaser
pub fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_LEN {
        let cut: String = text.chars().take(EXCERPT_LEN).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input(rating: u8, title: &str, review: &str) -> RatingInput {
        RatingInput {
            rating: rating.into(),
            title: title.to_string(),
            review: review.to_string(),
            ..RatingInput::default()
        }
    }

    fn approved(rating: u8) -> RatingRecord {
        let mut record = RatingRecord::new(
            &Uuid::new_v4().to_string(),
            Author::default(),
            input(rating, "Title", "Some review text"),
            Utc::now(),
        );
        record.approve("admin", Utc::now());
        record
    }

    #[test]
    fn popup_rules_require_minimum_lengths() {
        let err = input(5, "ok", "too short").validate(LengthRules::POPUP).unwrap_err();
        match err {
            AppError::Validation(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["title", "review"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(input(5, "ok", "too short").validate(LengthRules::WEB).is_ok());
    }

    #[test]
    fn rating_out_of_range_is_rejected() {
        assert!(input(0, "Great", "Really great tool").validate(LengthRules::WEB).is_err());
        assert!(input(6, "Great", "Really great tool").validate(LengthRules::WEB).is_err());
    }

    #[test]
    fn whitespace_only_title_is_empty() {
        assert!(input(4, "   ", "Fine").validate(LengthRules::WEB).is_err());
    }

    #[test]
    fn category_average_ignores_missing() {
        let categories = CategoryRatings {
            usability: Some(5),
            performance: Some(4),
            features: None,
            support: Some(4),
            value: None,
        };
        assert_eq!(categories.average(), Some(4.3));
        assert_eq!(CategoryRatings::default().average(), None);
    }

    #[test]
    fn summary_counts_only_published() {
        let mut hidden = approved(1);
        hidden.is_public = false;
        let pending = RatingRecord::new("u", Author::default(), input(2, "t", "r"), Utc::now());
        let ratings = vec![approved(5), approved(4), approved(4), hidden, pending];

        let summary = summarize(&ratings);
        assert_eq!(summary.total_ratings, 3);
        assert_eq!(summary.avg_rating, 4.3);
        assert_eq!(summary.distribution[&4], 2);
        assert_eq!(summary.distribution[&1], 0);
    }

    #[test]
    fn empty_summary_has_no_distribution() {
        let summary = summarize(std::iter::empty());
        assert_eq!(summary.total_ratings, 0);
        assert!(summary.distribution.is_empty());
    }

    #[test]
    fn update_resets_moderation() {
        let mut record = approved(3);
        record.apply_update(
            RatingUpdate {
                rating: Some(5),
                title: Some("  Better now ".into()),
                ..RatingUpdate::default()
            },
            Utc::now(),
        );
        assert_eq!(record.status, RatingStatus::Pending);
        assert_eq!(record.reviewed_by, None);
        assert_eq!(record.title, "Better now");
        assert_eq!(record.rating, 5);
    }

    #[test]
    fn helpful_then_newest_ordering() {
        let now = Utc::now();
        let mut older = approved(5);
        older.created_at = now - Duration::days(2);
        let mut newer = approved(5);
        newer.created_at = now;
        let mut helpful = approved(4);
        helpful.helpful_votes = 3;

        let mut list = vec![older.clone(), newer.clone(), helpful.clone()];
        list.sort_by(by_helpfulness);
        assert_eq!(list[0].id, helpful.id);
        assert_eq!(list[1].id, newer.id);
        assert_eq!(list[2].id, older.id);
    }

    #[test]
    fn excerpt_appends_ellipsis_past_limit() {
        assert_eq!(excerpt("short"), "short");
        let long = "x".repeat(120);
        let cut = excerpt(&long);
        assert_eq!(cut.len(), 103);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn author_initials() {
        let author = Author {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        };
        assert_eq!(author.initials(), "AL");
        assert_eq!(author.display_name(), "Ada Lovelace");
    }

    #[test]
    fn usage_duration_uses_wire_names() {
        let ctx: UsageContext =
            serde_json::from_str(r#"{"usageDuration":"1-3_months","companySize":"small"}"#).unwrap();
        assert_eq!(ctx.usage_duration, Some(UsageDuration::OneToThreeMonths));
        assert_eq!(ctx.company_size, Some(CompanySize::Small));
    }
}
