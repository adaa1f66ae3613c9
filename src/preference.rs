//! Per-subject review-popup preference record and the mutations applied to it.

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::Subject;

/// Default number of tracked activities before a subject stops being "too new"
pub const DEFAULT_TARGET_ACTIVITY_COUNT: u32 = 10;

/// Default snooze for the "remind me later" choice, in days
pub const DEFAULT_REMIND_DAYS: i64 = 7;

/// Explicit popup choice. `None` on the record means the user never chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    Never,
    Later,
    Dismissed,
}

impl Preference {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "never" => Some(Preference::Never),
            "later" => Some(Preference::Later),
            "dismissed" => Some(Preference::Dismissed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Preference::Never => "never",
            Preference::Later => "later",
            Preference::Dismissed => "dismissed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeaningfulActions {
    pub file_uploads: u32,
    pub charts_generated: u32,
    pub reports_analyzed: u32,
}

impl MeaningfulActions {
    pub fn total(&self) -> u32 {
        self.file_uploads
            .saturating_add(self.charts_generated)
            .saturating_add(self.reports_analyzed)
    }
}

/// One stored preference document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub device_fingerprint: Option<String>,
    pub preference: Option<Preference>,
    pub remind_at: Option<DateTime<Utc>>,
    pub last_shown: Option<DateTime<Utc>>,
    pub activity_count: u32,
    pub target_activity_count: u32,
    pub page_view_count: u32,
    pub active_time_minutes: u32,
    pub meaningful_actions: MeaningfulActions,
    pub session_start_time: DateTime<Utc>,
    pub total_sessions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for PreferenceRecord {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            user_id: None,
            anonymous_id: None,
            device_fingerprint: None,
            preference: None,
            remind_at: None,
            last_shown: None,
            activity_count: 0,
            target_activity_count: DEFAULT_TARGET_ACTIVITY_COUNT,
            page_view_count: 0,
            active_time_minutes: 0,
            meaningful_actions: MeaningfulActions::default(),
            session_start_time: now,
            total_sessions: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

impl PreferenceRecord {
    /// Fresh record keyed by every identifier the subject carries
    pub fn for_subject(subject: &Subject, now: DateTime<Utc>) -> Self {
        Self {
            user_id: subject.user_id.clone(),
            anonymous_id: subject.anonymous_id.clone(),
            device_fingerprint: subject.device_fingerprint.clone(),
            session_start_time: now,
            created_at: now,
            updated_at: now,
            ..Self::default()
        }
    }

    pub fn total_meaningful_actions(&self) -> u32 {
        self.meaningful_actions.total()
    }

    /// Overwrite the identity keys with whichever ones the subject carries
    pub fn refresh_keys(&mut self, subject: &Subject) {
        if subject.user_id.is_some() {
            self.user_id = subject.user_id.clone();
        }
        if subject.anonymous_id.is_some() {
            self.anonymous_id = subject.anonymous_id.clone();
        }
        if subject.device_fingerprint.is_some() {
            self.device_fingerprint = subject.device_fingerprint.clone();
        }
    }

    /// Count one activity
    ///
    /// The base counter always moves; recognised kinds also bump their own
    /// sub-counter. Counters saturate instead of wrapping.
    pub fn apply_activity(&mut self, activity: &Activity, now: DateTime<Utc>) {
        self.activity_count = self.activity_count.saturating_add(1);

        let actions = &mut self.meaningful_actions;
        match activity.kind {
            ActivityKind::FileUpload => actions.file_uploads = actions.file_uploads.saturating_add(1),
            ActivityKind::ChartGenerated => {
                actions.charts_generated = actions.charts_generated.saturating_add(1)
            }
            ActivityKind::ReportAnalyzed => {
                actions.reports_analyzed = actions.reports_analyzed.saturating_add(1)
            }
            ActivityKind::PageView => self.page_view_count = self.page_view_count.saturating_add(1),
            ActivityKind::ActiveTime => {
                self.active_time_minutes =
                    self.active_time_minutes.saturating_add(activity.minutes_or_default())
            }
            ActivityKind::Unrecognized => {}
        }

        self.updated_at = now;
    }

    /// Record an explicit popup choice
    ///
    /// `remind_at` survives only for [`Preference::Later`].
    pub fn apply_preference(
        &mut self,
        preference: Preference,
        remind_days: Option<i64>,
        now: DateTime<Utc>,
    ) {
        self.preference = Some(preference);
        self.last_shown = Some(now);
        self.remind_at = match preference {
            Preference::Later => {
                Some(now + Duration::days(remind_days.unwrap_or(DEFAULT_REMIND_DAYS)))
            }
            _ => None,
        };
        self.updated_at = now;
    }
}

/// Kind of engagement event reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    FileUpload,
    ChartGenerated,
    ReportAnalyzed,
    PageView,
    ActiveTime,
    /// Anything else: counts toward the base counter only
    Unrecognized,
}

lazy_static! {
    static ref ACTIVITY_NAMES: HashMap<&'static str, ActivityKind> = {
        let mut names = HashMap::new();
        names.insert("file_upload", ActivityKind::FileUpload);
        names.insert("chart_generated", ActivityKind::ChartGenerated);
        names.insert("report_analyzed", ActivityKind::ReportAnalyzed);
        names.insert("page_view", ActivityKind::PageView);
        names.insert("active_time", ActivityKind::ActiveTime);
        names
    };
}

impl ActivityKind {
    pub fn from_name(name: &str) -> Self {
        ACTIVITY_NAMES
            .get(name)
            .copied()
            .unwrap_or(ActivityKind::Unrecognized)
    }

    pub fn is_recognized(&self) -> bool {
        *self != ActivityKind::Unrecognized
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::FileUpload => "file_upload",
            ActivityKind::ChartGenerated => "chart_generated",
            ActivityKind::ReportAnalyzed => "report_analyzed",
            ActivityKind::PageView => "page_view",
            ActivityKind::ActiveTime => "active_time",
            ActivityKind::Unrecognized => "unrecognized",
        }
    }
}

/// A tracked activity with its optional payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub minutes: Option<u32>,
}

impl Activity {
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            minutes: None,
        }
    }

    pub fn active_minutes(minutes: u32) -> Self {
        Self {
            kind: ActivityKind::ActiveTime,
            minutes: Some(minutes),
        }
    }

    /// Zero or missing minutes count as one
    pub fn minutes_or_default(&self) -> u32 {
        match self.minutes {
            Some(m) if m > 0 => m,
            _ => 1,
        }
    }
}
