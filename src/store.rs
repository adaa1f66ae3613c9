//! Persistence for popup preferences and ratings
//!
//! The service talks to storage through [`PreferenceStore`] and
//! [`RatingStore`]. [`MemoryStore`] implements both over mutex-guarded
//! collections and can mirror them to JSON snapshots in a database
//! directory. Every mutation, including the snapshot write, happens inside
//! one critical section, so concurrent increments for the same subject are
//! never lost. Changes are staged on a copy and only become visible once
//! the snapshot is written, so memory never runs ahead of disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, create_dir_all};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::identity::{Subject, SubjectFilter};
use crate::preference::{Activity, Preference, PreferenceRecord};
use crate::rating::{RatingRecord, RatingStatus, RatingUpdate, by_helpfulness};

const PREFERENCES_FILE: &str = "preferences.json";
const RATINGS_FILE: &str = "ratings.json";

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// First record matching `filter`, if any
    async fn find_preference(
        &self,
        filter: &SubjectFilter,
    ) -> Result<Option<PreferenceRecord>, StoreError>;

    /// Atomically count one activity, creating the record if needed
    async fn record_activity(
        &self,
        subject: &Subject,
        activity: Activity,
        now: DateTime<Utc>,
    ) -> Result<PreferenceRecord, StoreError>;

    /// Atomically store an explicit popup choice, creating the record if needed
    async fn set_preference(
        &self,
        subject: &Subject,
        preference: Preference,
        remind_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<PreferenceRecord, StoreError>;
}

/// Edits applied to a stored rating inside the store's critical section
#[derive(Debug, Clone)]
pub enum RatingEdit {
    Update(RatingUpdate),
    Approve { admin_id: String },
    Reject { admin_id: String, reason: Option<String> },
    MarkHelpful,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RatingOrder {
    /// Most helpful first, ties broken by newest
    #[default]
    Helpfulness,
    Newest,
}

/// Selection over the ratings collection
#[derive(Debug, Clone, Default)]
pub struct RatingQuery {
    pub status: Option<RatingStatus>,
    pub public_only: bool,
    pub verified_only: bool,
    pub min_rating: Option<u8>,
    pub industry: Option<String>,
    pub created_since: Option<DateTime<Utc>>,
    pub order: RatingOrder,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl RatingQuery {
    /// Approved and public
    pub fn published() -> Self {
        Self {
            status: Some(RatingStatus::Approved),
            public_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, rating: &RatingRecord) -> bool {
        if let Some(status) = self.status {
            if rating.status != status {
                return false;
            }
        }
        if self.public_only && !rating.is_public {
            return false;
        }
        if self.verified_only && !rating.is_verified {
            return false;
        }
        if let Some(min) = self.min_rating {
            if rating.rating < min {
                return false;
            }
        }
        if let Some(industry) = &self.industry {
            let matches_industry = rating
                .usage_context
                .as_ref()
                .and_then(|ctx| ctx.industry.as_deref())
                == Some(industry.as_str());
            if !matches_industry {
                return false;
            }
        }
        if let Some(since) = self.created_since {
            if rating.created_at < since {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn find_rating_by_user(&self, user_id: &str) -> Result<Option<RatingRecord>, StoreError>;

    async fn find_rating(&self, id: Uuid) -> Result<Option<RatingRecord>, StoreError>;

    /// Insert a new rating. Fails with [`StoreError::DuplicateRating`] when
    /// the user already has one.
    async fn insert_rating(&self, rating: RatingRecord) -> Result<RatingRecord, StoreError>;

    /// Apply `edit` to the rating with `id`; `None` when it does not exist
    async fn edit_rating(
        &self,
        id: Uuid,
        edit: RatingEdit,
        now: DateTime<Utc>,
    ) -> Result<Option<RatingRecord>, StoreError>;

    async fn list_ratings(&self, query: &RatingQuery) -> Result<Vec<RatingRecord>, StoreError>;

    /// Number of ratings matching the query, ignoring `skip`/`limit`
    async fn count_ratings(&self, query: &RatingQuery) -> Result<usize, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collections {
    preferences: Vec<PreferenceRecord>,
    ratings: Vec<RatingRecord>,
}

/// In-process store with optional JSON snapshots
pub struct MemoryStore {
    data: Mutex<Collections>,
    dir: Option<PathBuf>,
}

impl MemoryStore {
    /// Store that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            data: Mutex::new(Collections::default()),
            dir: None,
        }
    }

    /// Open (creating if needed) a snapshot directory
    ///
    /// Loads `preferences.json` and `ratings.json` from `dir` and rewrites
    /// the touched file after each mutation.
    ///
    /// # Errors
    /// * Returns an error if the directory cannot be created or a snapshot
    ///   cannot be read or parsed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            create_dir_all(&dir)?;
        }

        let preferences = load_snapshot(&dir.join(PREFERENCES_FILE))?;
        let ratings = load_snapshot(&dir.join(RATINGS_FILE))?;
        log::info!(
            "opened store at {} ({} preference records, {} ratings)",
            dir.display(),
            preferences.len(),
            ratings.len()
        );

        Ok(Self {
            data: Mutex::new(Collections {
                preferences,
                ratings,
            }),
            dir: Some(dir),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, StoreError> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Write `items` to a temporary file and rename it over the snapshot
    fn persist<T: Serialize>(&self, file: &str, items: &[T]) -> Result<(), StoreError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(items)?;
        let target = dir.join(file);
        let staging = dir.join(format!("{}.tmp", file));
        {
            let mut out = File::create(&staging)?;
            out.write_all(json.as_bytes())?;
            out.sync_all()?;
        }
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    /// Run `change` against `items` and keep the result only if the
    /// snapshot write succeeds
    fn commit<T, R>(
        &self,
        file: &str,
        items: &mut Vec<T>,
        change: impl FnOnce(&mut Vec<T>) -> R,
    ) -> Result<R, StoreError>
    where
        T: Clone + Serialize,
    {
        if self.dir.is_none() {
            return Ok(change(items));
        }

        let mut staged = items.clone();
        let out = change(&mut staged);
        self.persist(file, &staged)?;
        *items = staged;
        Ok(out)
    }

    /// Locate or create the record for `subject` and mutate it
    ///
    /// An authenticated subject without a record of its own adopts an
    /// unclaimed record matching its anonymous id or fingerprint, so activity
    /// from before login is carried into the account.
    fn upsert_preference(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
        refresh_keys: bool,
        apply: impl FnOnce(&mut PreferenceRecord),
    ) -> Result<PreferenceRecord, StoreError> {
        let mut data = self.lock()?;
        let filter = subject.filter();

        self.commit(PREFERENCES_FILE, &mut data.preferences, |preferences| {
            let mut index = preferences.iter().position(|r| filter.matches(r));
            if index.is_none() && subject.is_authenticated() {
                let anonymous = subject.anonymous_filter();
                index = preferences
                    .iter()
                    .position(|r| r.user_id.is_none() && anonymous.matches(r));
                if let Some(i) = index {
                    log::info!(
                        "linking anonymous preference record to user {}",
                        subject.user_id.as_deref().unwrap_or_default()
                    );
                    preferences[i].user_id = subject.user_id.clone();
                }
            }

            let index = match index {
                Some(i) => {
                    if refresh_keys {
                        preferences[i].refresh_keys(subject);
                    }
                    i
                }
                None => {
                    preferences.push(PreferenceRecord::for_subject(subject, now));
                    preferences.len() - 1
                }
            };

            let record = &mut preferences[index];
            apply(record);
            record.clone()
        })
    }
}

fn load_snapshot<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn find_preference(
        &self,
        filter: &SubjectFilter,
    ) -> Result<Option<PreferenceRecord>, StoreError> {
        let data = self.lock()?;
        Ok(data.preferences.iter().find(|r| filter.matches(r)).cloned())
    }

    async fn record_activity(
        &self,
        subject: &Subject,
        activity: Activity,
        now: DateTime<Utc>,
    ) -> Result<PreferenceRecord, StoreError> {
        self.upsert_preference(subject, now, false, |record| {
            record.apply_activity(&activity, now)
        })
    }

    async fn set_preference(
        &self,
        subject: &Subject,
        preference: Preference,
        remind_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<PreferenceRecord, StoreError> {
        self.upsert_preference(subject, now, true, |record| {
            record.apply_preference(preference, remind_days, now)
        })
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn find_rating_by_user(&self, user_id: &str) -> Result<Option<RatingRecord>, StoreError> {
        let data = self.lock()?;
        Ok(data.ratings.iter().find(|r| r.user_id == user_id).cloned())
    }

    async fn find_rating(&self, id: Uuid) -> Result<Option<RatingRecord>, StoreError> {
        let data = self.lock()?;
        Ok(data.ratings.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_rating(&self, rating: RatingRecord) -> Result<RatingRecord, StoreError> {
        let mut data = self.lock()?;
        if data.ratings.iter().any(|r| r.user_id == rating.user_id) {
            return Err(StoreError::DuplicateRating(rating.user_id));
        }
        self.commit(RATINGS_FILE, &mut data.ratings, |ratings| {
            ratings.push(rating.clone());
            rating
        })
    }

    async fn edit_rating(
        &self,
        id: Uuid,
        edit: RatingEdit,
        now: DateTime<Utc>,
    ) -> Result<Option<RatingRecord>, StoreError> {
        let mut data = self.lock()?;
        let Some(index) = data.ratings.iter().position(|r| r.id == id) else {
            return Ok(None);
        };

        self.commit(RATINGS_FILE, &mut data.ratings, |ratings| {
            let rating = &mut ratings[index];
            match edit {
                RatingEdit::Update(update) => rating.apply_update(update, now),
                RatingEdit::Approve { admin_id } => rating.approve(&admin_id, now),
                RatingEdit::Reject { admin_id, reason } => rating.reject(&admin_id, reason, now),
                RatingEdit::MarkHelpful => {
                    rating.helpful_votes = rating.helpful_votes.saturating_add(1);
                    rating.updated_at = now;
                }
            }
            Some(rating.clone())
        })
    }

    async fn list_ratings(&self, query: &RatingQuery) -> Result<Vec<RatingRecord>, StoreError> {
        let data = self.lock()?;
        let mut selected: Vec<RatingRecord> = data
            .ratings
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        drop(data);

        match query.order {
            RatingOrder::Helpfulness => selected.sort_by(by_helpfulness),
            RatingOrder::Newest => selected.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(selected.into_iter().skip(query.skip).take(limit).collect())
    }

    async fn count_ratings(&self, query: &RatingQuery) -> Result<usize, StoreError> {
        let data = self.lock()?;
        Ok(data.ratings.iter().filter(|r| query.matches(r)).count())
    }
}
