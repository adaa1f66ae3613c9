//! Client-side engagement tracking and popup scheduling
//!
//! [`ActivityTracker`] reports what the user does, [`ReviewPopupManager`]
//! periodically asks whether the review popup should be shown. Both talk to the
//! backend through [`PopupApi`]; [`LocalPopupApi`] calls a [`ReviewService`]
//! in-process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};

use crate::error::Result;
use crate::identity::{RequestMeta, generate_anonymous_id, resolve_subject};
use crate::preference::{Activity, ActivityKind, Preference, PreferenceRecord};
use crate::rating::RatingInput;
use crate::service::{ReviewService, StatusReport};

/// Interval between active-time heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
/// Delay before the first popup check
pub const FIRST_CHECK_DELAY: Duration = Duration::from_secs(10);
/// Interval between popup checks
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Backend calls made by the client components
#[async_trait]
pub trait PopupApi: Send + Sync {
    async fn track_activity(&self, anonymous_id: &str, activity: Activity) -> Result<PreferenceRecord>;

    async fn status(&self, anonymous_id: &str) -> Result<StatusReport>;
}

/// [`PopupApi`] backed directly by a [`ReviewService`]
pub struct LocalPopupApi {
    service: Arc<ReviewService>,
    user_id: Option<String>,
    meta: RequestMeta,
}

impl LocalPopupApi {
    pub fn new(service: Arc<ReviewService>, meta: RequestMeta) -> Self {
        Self {
            service,
            user_id: None,
            meta,
        }
    }

    /// Act on behalf of a logged-in user
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }
}

#[async_trait]
impl PopupApi for LocalPopupApi {
    async fn track_activity(&self, anonymous_id: &str, activity: Activity) -> Result<PreferenceRecord> {
        let subject = resolve_subject(self.user_id.as_deref(), Some(anonymous_id), &self.meta);
        self.service.track_activity(&subject, activity).await
    }

    async fn status(&self, anonymous_id: &str) -> Result<StatusReport> {
        let subject = resolve_subject(self.user_id.as_deref(), Some(anonymous_id), &self.meta);
        self.service.status(&subject).await
    }
}

/// Snapshot of the tracker's local counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub session_duration: Duration,
    pub active_time_minutes: u32,
    pub page_view_count: u32,
    pub anonymous_id: String,
}

struct TrackerState {
    last_interaction: Instant,
    visible: bool,
    active_time_minutes: u32,
    page_view_count: u32,
}

struct TrackerInner {
    api: Arc<dyn PopupApi>,
    anonymous_id: String,
    started_at: Instant,
    state: Mutex<TrackerState>,
}

impl TrackerInner {
    async fn send(&self, activity: Activity) -> Option<PreferenceRecord> {
        match self.api.track_activity(&self.anonymous_id, activity).await {
            Ok(record) => Some(record),
            Err(e) => {
                log::error!("error tracking {} activity: {}", activity.kind.as_str(), e);
                None
            }
        }
    }

    /// Count a minute if the user interacted recently and the page is visible
    fn claim_active_minute(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.visible && state.last_interaction.elapsed() < HEARTBEAT_INTERVAL {
            state.active_time_minutes += 1;
            true
        } else {
            false
        }
    }
}

/// Reports user engagement for one app session
pub struct ActivityTracker {
    inner: Arc<TrackerInner>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityTracker {
    /// Tracker for `anonymous_id`, or a fresh id when none was stored yet
    pub fn new(api: Arc<dyn PopupApi>, anonymous_id: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(TrackerInner {
                api,
                anonymous_id: anonymous_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(generate_anonymous_id),
                started_at: now,
                state: Mutex::new(TrackerState {
                    last_interaction: now,
                    visible: true,
                    active_time_minutes: 0,
                    page_view_count: 0,
                }),
            }),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn anonymous_id(&self) -> &str {
        &self.inner.anonymous_id
    }

    /// Report the landing page view and start the active-time heartbeat
    pub async fn start(&self) {
        self.inner.send(Activity::new(ActivityKind::PageView)).await;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
            loop {
                ticks.tick().await;
                if inner.claim_active_minute() {
                    inner.send(Activity::active_minutes(1)).await;
                }
            }
        });

        if let Some(previous) = self.lock_heartbeat().replace(handle) {
            previous.abort();
        }
    }

    /// Any input event: mouse, key, scroll, touch
    pub fn note_interaction(&self) {
        self.with_state(|state| {
            state.last_interaction = Instant::now();
            state.visible = true;
        });
    }

    pub fn set_visible(&self, visible: bool) {
        self.with_state(|state| state.visible = visible);
    }

    pub async fn track_file_upload(&self) -> Option<PreferenceRecord> {
        self.inner.send(Activity::new(ActivityKind::FileUpload)).await
    }

    pub async fn track_chart_generated(&self) -> Option<PreferenceRecord> {
        self.inner.send(Activity::new(ActivityKind::ChartGenerated)).await
    }

    pub async fn track_report_analyzed(&self) -> Option<PreferenceRecord> {
        self.inner.send(Activity::new(ActivityKind::ReportAnalyzed)).await
    }

    pub async fn track_page_view(&self) -> Option<PreferenceRecord> {
        self.with_state(|state| state.page_view_count += 1);
        self.inner.send(Activity::new(ActivityKind::PageView)).await
    }

    pub fn session_stats(&self) -> SessionStats {
        let (active_time_minutes, page_view_count) =
            self.with_state(|state| (state.active_time_minutes, state.page_view_count));
        SessionStats {
            session_duration: self.inner.started_at.elapsed(),
            active_time_minutes,
            page_view_count,
            anonymous_id: self.inner.anonymous_id.clone(),
        }
    }

    /// Stop the heartbeat
    pub fn stop(&self) {
        if let Some(handle) = self.lock_heartbeat().take() {
            handle.abort();
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TrackerState) -> T) -> T {
        let mut state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    fn lock_heartbeat(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.heartbeat.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ActivityTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// UI hooks fired by [`ReviewPopupManager`]
pub trait PopupListener: Send + Sync {
    fn on_show(&self) {}

    fn on_hide(&self) {}

    fn on_submit(&self, _review: &RatingInput) {}

    fn on_preference(&self, _preference: Preference) {}
}

struct ManagerInner {
    api: Arc<dyn PopupApi>,
    anonymous_id: String,
    visible: AtomicBool,
    listener: Arc<dyn PopupListener>,
}

impl ManagerInner {
    async fn check_and_show(&self) -> bool {
        if self.visible.load(Ordering::SeqCst) {
            return false;
        }

        match self.api.status(&self.anonymous_id).await {
            Ok(report) if report.should_show && !report.has_review => self.show(),
            Ok(report) => {
                log::debug!("review popup not shown: {}", report.reason.as_str());
                false
            }
            Err(e) => {
                log::error!("error checking review popup status: {}", e);
                false
            }
        }
    }

    fn show(&self) -> bool {
        if self.visible.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.listener.on_show();
        true
    }
}

/// Decides when the review popup appears
pub struct ReviewPopupManager {
    inner: Arc<ManagerInner>,
    checks: Mutex<Option<JoinHandle<()>>>,
}

impl ReviewPopupManager {
    pub fn new(api: Arc<dyn PopupApi>, anonymous_id: &str, listener: Arc<dyn PopupListener>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                api,
                anonymous_id: anonymous_id.to_string(),
                visible: AtomicBool::new(false),
                listener,
            }),
            checks: Mutex::new(None),
        }
    }

    /// Check once after [`FIRST_CHECK_DELAY`], then every [`CHECK_INTERVAL`]
    pub fn start(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            sleep(FIRST_CHECK_DELAY).await;
            inner.check_and_show().await;

            let mut ticks = interval_at(started + CHECK_INTERVAL, CHECK_INTERVAL);
            loop {
                ticks.tick().await;
                inner.check_and_show().await;
            }
        });

        if let Some(previous) = self.lock_checks().replace(handle) {
            previous.abort();
        }
    }

    /// Ask the backend and show the popup if it says so; true if it was shown
    pub async fn check_and_show(&self) -> bool {
        self.inner.check_and_show().await
    }

    pub fn show_popup(&self) -> bool {
        self.inner.show()
    }

    pub fn hide_popup(&self) {
        self.inner.visible.store(false, Ordering::SeqCst);
        self.inner.listener.on_hide();
    }

    pub fn handle_submit(&self, review: &RatingInput) {
        self.inner.visible.store(false, Ordering::SeqCst);
        self.inner.listener.on_submit(review);
    }

    pub fn handle_preference(&self, preference: Preference) {
        self.inner.visible.store(false, Ordering::SeqCst);
        self.inner.listener.on_preference(preference);
    }

    /// Show regardless of eligibility
    pub fn force_show(&self) -> bool {
        self.show_popup()
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if let Some(handle) = self.lock_checks().take() {
            handle.abort();
        }
    }

    fn lock_checks(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.checks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ReviewPopupManager {
    fn drop(&mut self) {
        self.stop();
    }
}
