//! Review-popup eligibility engine
//!
//! Decides whether a subject should be asked for a review right now. The
//! decision is the first suppression rule that fires, taken from [`RULES`]
//! in priority order: explicit opt-outs, then snoozes, then engagement
//! thresholds, then the weekly rate limit. A subject that passes every rule
//! is shown the popup with reason [`ReasonCode::CriteriaMet`].
//!
//! The engine only reads. Recording that the popup was shown, or that the
//! user picked an option, is the caller's job.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::preference::{Preference, PreferenceRecord};

/// Machine-readable outcome of an eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    AlreadyReviewed,
    NewUser,
    NeverPreference,
    DismissedThisSession,
    RemindLaterNotReady,
    ActivityThresholdNotMet,
    TooSoonSinceLastShown,
    CriteriaMet,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::AlreadyReviewed => "already_reviewed",
            ReasonCode::NewUser => "new_user",
            ReasonCode::NeverPreference => "never_preference",
            ReasonCode::DismissedThisSession => "dismissed_this_session",
            ReasonCode::RemindLaterNotReady => "remind_later_not_ready",
            ReasonCode::ActivityThresholdNotMet => "activity_threshold_not_met",
            ReasonCode::TooSoonSinceLastShown => "too_soon_since_last_shown",
            ReasonCode::CriteriaMet => "criteria_met",
        }
    }
}

/// Thresholds and cool-downs applied by the rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityPolicy {
    /// How long a dismissal keeps the popup hidden
    pub dismiss_cooldown: Duration,
    /// Minimum gap between two prompts
    pub reshow_interval: Duration,
    pub meaningful_actions_threshold: u32,
    pub page_view_threshold: u32,
    pub active_minutes_threshold: u32,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            dismiss_cooldown: Duration::hours(4),
            reshow_interval: Duration::days(7),
            meaningful_actions_threshold: 3,
            page_view_threshold: 15,
            active_minutes_threshold: 30,
        }
    }
}

/// Engagement snapshot attached to `activity_threshold_not_met`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub activity_count: u32,
    pub target_activity_count: u32,
    pub meaningful_actions: u32,
    pub target_meaningful_actions: u32,
    pub page_view_count: u32,
    pub target_page_view_count: u32,
    pub active_time_minutes: u32,
    pub target_active_time_minutes: u32,
}

impl Progress {
    fn snapshot(record: &PreferenceRecord, policy: &EligibilityPolicy) -> Self {
        Self {
            activity_count: record.activity_count,
            target_activity_count: record.target_activity_count,
            meaningful_actions: record.total_meaningful_actions(),
            target_meaningful_actions: policy.meaningful_actions_threshold,
            page_view_count: record.page_view_count,
            target_page_view_count: policy.page_view_threshold,
            active_time_minutes: record.active_time_minutes,
            target_active_time_minutes: policy.active_minutes_threshold,
        }
    }
}

/// Result of [`decide`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub should_show: bool,
    pub reason: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl Decision {
    fn suppress(reason: ReasonCode, progress: Option<Progress>) -> Self {
        Self {
            should_show: false,
            reason,
            progress,
        }
    }

    fn show() -> Self {
        Self {
            should_show: true,
            reason: ReasonCode::CriteriaMet,
            progress: None,
        }
    }
}

/// Inputs shared by every rule
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub record: Option<&'a PreferenceRecord>,
    pub has_review: bool,
    pub now: DateTime<Utc>,
    pub policy: &'a EligibilityPolicy,
}

/// What a single rule says about the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Suppress(Option<Progress>),
}

pub type RulePredicate = fn(&RuleContext<'_>) -> Verdict;

/// Suppression rules in priority order. The first one that suppresses wins.
pub const RULES: &[(ReasonCode, RulePredicate)] = &[
    (ReasonCode::AlreadyReviewed, already_reviewed),
    (ReasonCode::NewUser, new_user),
    (ReasonCode::NeverPreference, never_preference),
    (ReasonCode::DismissedThisSession, dismissed_this_session),
    (ReasonCode::RemindLaterNotReady, remind_later_not_ready),
    (ReasonCode::ActivityThresholdNotMet, activity_threshold_not_met),
    (ReasonCode::TooSoonSinceLastShown, too_soon_since_last_shown),
];

/// Evaluate [`RULES`] top to bottom
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use reviews::eligibility::{decide, EligibilityPolicy, ReasonCode};
///
/// let decision = decide(None, false, Utc::now(), &EligibilityPolicy::default());
/// assert!(!decision.should_show);
/// assert_eq!(decision.reason, ReasonCode::NewUser);
/// ```
pub fn decide(
    record: Option<&PreferenceRecord>,
    has_review: bool,
    now: DateTime<Utc>,
    policy: &EligibilityPolicy,
) -> Decision {
    let ctx = RuleContext {
        record,
        has_review,
        now,
        policy,
    };

    for (reason, rule) in RULES {
        if let Verdict::Suppress(progress) = rule(&ctx) {
            return Decision::suppress(*reason, progress);
        }
    }

    Decision::show()
}

fn suppress_if(condition: bool) -> Verdict {
    if condition {
        Verdict::Suppress(None)
    } else {
        Verdict::Pass
    }
}

pub fn already_reviewed(ctx: &RuleContext<'_>) -> Verdict {
    suppress_if(ctx.has_review)
}

pub fn new_user(ctx: &RuleContext<'_>) -> Verdict {
    suppress_if(ctx.record.is_none())
}

pub fn never_preference(ctx: &RuleContext<'_>) -> Verdict {
    suppress_if(ctx.record.is_some_and(|r| r.preference == Some(Preference::Never)))
}

pub fn dismissed_this_session(ctx: &RuleContext<'_>) -> Verdict {
    suppress_if(ctx.record.is_some_and(|r| {
        r.preference == Some(Preference::Dismissed)
            && r.last_shown
                .is_some_and(|shown| ctx.now - shown < ctx.policy.dismiss_cooldown)
    }))
}

pub fn remind_later_not_ready(ctx: &RuleContext<'_>) -> Verdict {
    suppress_if(ctx.record.is_some_and(|r| {
        r.preference == Some(Preference::Later) && r.remind_at.is_some_and(|at| ctx.now < at)
    }))
}

pub fn activity_threshold_not_met(ctx: &RuleContext<'_>) -> Verdict {
    let Some(record) = ctx.record else {
        return Verdict::Pass;
    };
    let policy = ctx.policy;

    let engaged = record.activity_count >= record.target_activity_count
        || record.total_meaningful_actions() >= policy.meaningful_actions_threshold
        || record.page_view_count >= policy.page_view_threshold
        || record.active_time_minutes >= policy.active_minutes_threshold;

    if engaged {
        Verdict::Pass
    } else {
        Verdict::Suppress(Some(Progress::snapshot(record, policy)))
    }
}

pub fn too_soon_since_last_shown(ctx: &RuleContext<'_>) -> Verdict {
    suppress_if(ctx.record.is_some_and(|r| {
        r.last_shown
            .is_some_and(|shown| ctx.now - shown < ctx.policy.reshow_interval)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preference::MeaningfulActions;

    fn engaged_record() -> PreferenceRecord {
        PreferenceRecord {
            page_view_count: 15,
            ..PreferenceRecord::default()
        }
    }

    fn ctx<'a>(
        record: Option<&'a PreferenceRecord>,
        now: DateTime<Utc>,
        policy: &'a EligibilityPolicy,
    ) -> RuleContext<'a> {
        RuleContext {
            record,
            has_review: false,
            now,
            policy,
        }
    }

    #[test]
    fn rule_order_is_fixed() {
        let order: Vec<ReasonCode> = RULES.iter().map(|(reason, _)| *reason).collect();
        assert_eq!(
            order,
            vec![
                ReasonCode::AlreadyReviewed,
                ReasonCode::NewUser,
                ReasonCode::NeverPreference,
                ReasonCode::DismissedThisSession,
                ReasonCode::RemindLaterNotReady,
                ReasonCode::ActivityThresholdNotMet,
                ReasonCode::TooSoonSinceLastShown,
            ]
        );
    }

    #[test]
    fn dismissed_rule_respects_cooldown() {
        let policy = EligibilityPolicy::default();
        let now = Utc::now();
        let mut record = engaged_record();
        record.preference = Some(Preference::Dismissed);

        record.last_shown = Some(now - Duration::hours(3));
        assert_eq!(
            dismissed_this_session(&ctx(Some(&record), now, &policy)),
            Verdict::Suppress(None)
        );

        record.last_shown = Some(now - Duration::hours(5));
        assert_eq!(dismissed_this_session(&ctx(Some(&record), now, &policy)), Verdict::Pass);
    }

    #[test]
    fn remind_later_without_date_passes() {
        let policy = EligibilityPolicy::default();
        let mut record = engaged_record();
        record.preference = Some(Preference::Later);
        record.remind_at = None;
        assert_eq!(
            remind_later_not_ready(&ctx(Some(&record), Utc::now(), &policy)),
            Verdict::Pass
        );
    }

    #[test]
    fn remind_at_ignored_unless_later() {
        let policy = EligibilityPolicy::default();
        let now = Utc::now();
        let mut record = engaged_record();
        record.preference = None;
        record.remind_at = Some(now + Duration::days(3));
        assert_eq!(remind_later_not_ready(&ctx(Some(&record), now, &policy)), Verdict::Pass);
    }

    #[test]
    fn each_threshold_alone_is_enough() {
        let policy = EligibilityPolicy::default();
        let now = Utc::now();

        let by_activity = PreferenceRecord {
            activity_count: 10,
            ..PreferenceRecord::default()
        };
        let by_actions = PreferenceRecord {
            meaningful_actions: MeaningfulActions {
                file_uploads: 1,
                charts_generated: 1,
                reports_analyzed: 1,
            },
            ..PreferenceRecord::default()
        };
        let by_minutes = PreferenceRecord {
            active_time_minutes: 30,
            ..PreferenceRecord::default()
        };

        for record in [by_activity, by_actions, by_minutes, engaged_record()] {
            assert_eq!(
                activity_threshold_not_met(&ctx(Some(&record), now, &policy)),
                Verdict::Pass
            );
        }
    }

    #[test]
    fn custom_target_activity_count_is_used() {
        let policy = EligibilityPolicy::default();
        let record = PreferenceRecord {
            activity_count: 4,
            target_activity_count: 4,
            ..PreferenceRecord::default()
        };
        assert_eq!(
            activity_threshold_not_met(&ctx(Some(&record), Utc::now(), &policy)),
            Verdict::Pass
        );
    }

    #[test]
    fn already_reviewed_beats_everything() {
        let record = engaged_record();
        let decision = decide(Some(&record), true, Utc::now(), &EligibilityPolicy::default());
        assert_eq!(decision.reason, ReasonCode::AlreadyReviewed);
        assert!(!decision.should_show);
    }

    #[test]
    fn reason_codes_serialize_as_snake_case() {
        for (reason, _) in RULES {
            let json = serde_json::to_value(reason).unwrap();
            assert_eq!(json, reason.as_str());
        }
        assert_eq!(
            serde_json::to_value(ReasonCode::CriteriaMet).unwrap(),
            "criteria_met"
        );
    }
}
