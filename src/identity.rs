//! Identity resolution for review-popup subjects
//!
//! A subject is whoever the popup counters belong to: an authenticated user,
//! or an anonymous visitor identified by a client-generated id and a coarse
//! device fingerprint. The fingerprint is an engagement heuristic only; users
//! behind the same NAT with the same browser setup share one.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::preference::PreferenceRecord;

/// Length of the device fingerprint in characters
pub const FINGERPRINT_LEN: usize = 32;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Derive a device fingerprint from request metadata
///
/// The fingerprint is the base64 encoding of `user_agent + accept_language + ip`
/// truncated to [`FINGERPRINT_LEN`] characters. Same inputs always give the
/// same fingerprint.
///
/// # Examples
/// ```
/// use reviews::identity::device_fingerprint;
///
/// let a = device_fingerprint("Mozilla/5.0", "en-US", "10.0.0.1");
/// let b = device_fingerprint("Mozilla/5.0", "en-US", "10.0.0.1");
/// assert_eq!(a, b);
/// assert!(a.len() <= 32);
/// ```
pub fn device_fingerprint(user_agent: &str, accept_language: &str, ip: &str) -> String {
    let raw = format!("{}{}{}", user_agent, accept_language, ip);
    let mut encoded = STANDARD.encode(raw.as_bytes());
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Generate an anonymous visitor id
///
/// Random base-36 characters followed by the current millisecond timestamp in
/// base 36.
pub fn generate_anonymous_id() -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..11)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();

    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    format!("{}{}", random, to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Request metadata the fingerprint is derived from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub user_agent: String,
    pub accept_language: String,
    pub ip: String,
}

impl RequestMeta {
    pub fn fingerprint(&self) -> String {
        device_fingerprint(&self.user_agent, &self.accept_language, &self.ip)
    }
}

/// Resolve the subject of a request
///
/// Pure function of its inputs: the authenticated id (if any), the
/// client-supplied anonymous id (if any) and the request metadata.
pub fn resolve_subject(
    user_id: Option<&str>,
    anonymous_id: Option<&str>,
    meta: &RequestMeta,
) -> Subject {
    Subject::new(
        user_id.map(str::to_string),
        anonymous_id.map(str::to_string),
        Some(meta.fingerprint()),
    )
}

/// Every identifier known for the current request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub user_id: Option<String>,
    pub anonymous_id: Option<String>,
    pub device_fingerprint: Option<String>,
}

impl Subject {
    /// Build a subject, discarding empty identifiers
    pub fn new(
        user_id: Option<String>,
        anonymous_id: Option<String>,
        device_fingerprint: Option<String>,
    ) -> Self {
        Self {
            user_id: non_empty(user_id),
            anonymous_id: non_empty(anonymous_id),
            device_fingerprint: non_empty(device_fingerprint),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Canonical lookup filter for the preference store
    ///
    /// An authenticated id is authoritative and is matched alone. Anonymous
    /// subjects match on any of their remaining keys.
    pub fn filter(&self) -> SubjectFilter {
        match &self.user_id {
            Some(user_id) => SubjectFilter::User(user_id.clone()),
            None => self.anonymous_filter(),
        }
    }

    /// Filter over the anonymous keys only, regardless of authentication
    pub fn anonymous_filter(&self) -> SubjectFilter {
        SubjectFilter::AnyKey {
            anonymous_id: self.anonymous_id.clone(),
            device_fingerprint: self.device_fingerprint.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Lookup filter over preference records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectFilter {
    User(String),
    AnyKey {
        anonymous_id: Option<String>,
        device_fingerprint: Option<String>,
    },
}

impl SubjectFilter {
    /// Whether `record` resolves for this filter
    ///
    /// Absent keys never match, so a visitor without an anonymous id does not
    /// pick up every other record that also lacks one.
    pub fn matches(&self, record: &PreferenceRecord) -> bool {
        match self {
            SubjectFilter::User(user_id) => record.user_id.as_deref() == Some(user_id.as_str()),
            SubjectFilter::AnyKey {
                anonymous_id,
                device_fingerprint,
            } => {
                let by_anonymous = anonymous_id.is_some() && record.anonymous_id == *anonymous_id;
                let by_device =
                    device_fingerprint.is_some() && record.device_fingerprint == *device_fingerprint;
                by_anonymous || by_device
            }
        }
    }
}
