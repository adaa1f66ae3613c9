//! Session validation for the review endpoints
//!
//! Logins happen in the platform's account service; this module only knows
//! how to check the bearer token or `session` cookie it issued. Known tokens
//! are registered through [`SessionStore::insert_session`] or loaded from a
//! JSON tokens file at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Default lifetime of a session (24 hours)
pub const SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Authenticated caller as vouched for by the account service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// Stable user identifier
    pub id: String,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    /// Grants access to the moderation endpoints
    #[serde(default)]
    pub is_admin: bool,
}

impl AuthUser {
    pub fn new(id: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            is_admin: false,
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// Active session
#[derive(Debug, Clone)]
pub struct Session {
    pub user: AuthUser,
    /// `None` for tokens whose lifetime the account service manages
    pub expires_at: Option<SystemTime>,
}

impl Session {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// One entry of the tokens file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenEntry {
    #[serde(flatten)]
    user: AuthUser,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Thread-safe map of session tokens
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `user` and return its token
    pub fn create_session(&self, user: AuthUser) -> String {
        let token = Uuid::new_v4().to_string();
        self.insert_session(&token, user, SESSION_DURATION);
        token
    }

    /// Register a token issued elsewhere
    pub fn insert_session(&self, token: &str, user: AuthUser, ttl: Duration) {
        self.insert_session_until(token, user, Some(SystemTime::now() + ttl));
    }

    /// Register a token with an absolute expiry, or none at all
    ///
    /// Expired sessions are pruned on every insert.
    pub fn insert_session_until(&self, token: &str, user: AuthUser, expires_at: Option<SystemTime>) {
        let now = SystemTime::now();
        let mut sessions = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.retain(|_, session| !session.is_expired(now));
        sessions.insert(token.to_string(), Session { user, expires_at });
    }

    /// User behind `token` if the session exists and has not expired
    ///
    /// An expired session is removed when it is looked up.
    pub fn validate_session(&self, token: &str) -> Option<AuthUser> {
        let now = SystemTime::now();
        {
            let sessions = self.sessions.read().ok()?;
            let session = sessions.get(token)?;
            if !session.is_expired(now) {
                return Some(session.user.clone());
            }
        }

        self.revoke_session(token);
        None
    }

    /// Drop every expired session; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = SystemTime::now();
        let Ok(mut sessions) = self.sessions.write() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revoke_session(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(token);
        }
    }

    /// Load `{ "<token>": { "id": ..., "firstName": ..., "expiresAt": ... } }`
    /// from disk
    ///
    /// Tokens expire at their optional RFC 3339 `expiresAt`; tokens without
    /// one stay valid until revoked. Entries already past their expiry are
    /// skipped. Returns the number of sessions registered.
    ///
    /// # Errors
    /// * Returns an error if the file cannot be opened, read, or parsed
    pub fn load_tokens_file(&self, path: &Path) -> Result<usize, String> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(_) => return Err(format!("Failed to open tokens file {}", path.display())),
        };

        let mut contents = String::new();
        if file.read_to_string(&mut contents).is_err() {
            return Err("Failed to read tokens file".to_string());
        }

        let tokens: HashMap<String, TokenEntry> = match serde_json::from_str(&contents) {
            Ok(tokens) => tokens,
            Err(e) => return Err(format!("Failed to parse tokens file: {}", e)),
        };

        let now = Utc::now();
        let mut count = 0;
        for (token, entry) in tokens {
            if entry.expires_at.is_some_and(|at| at <= now) {
                log::warn!("skipping expired token for user {}", entry.user.id);
                continue;
            }
            let expires_at = entry.expires_at.map(SystemTime::from);
            self.insert_session_until(&token, entry.user, expires_at);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(feature = "web")]
pub use extract::{AdminUser, MaybeUser, RequireUser};

#[cfg(feature = "web")]
mod extract {
    use super::{AuthUser, SESSION_COOKIE};
    use crate::app::SharedState;
    use crate::error::AppError;
    use axum::{
        async_trait,
        extract::FromRequestParts,
        http::{header, request::Parts},
    };
    use axum_extra::extract::cookie::CookieJar;

    fn session_token(parts: &Parts) -> Option<String> {
        if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
            if let Ok(value) = value.to_str() {
                if let Some(token) = value.strip_prefix("Bearer ") {
                    return Some(token.trim().to_string());
                }
            }
        }

        let jar = CookieJar::from_headers(&parts.headers);
        jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string())
    }

    fn resolve(parts: &Parts, state: &SharedState) -> Option<AuthUser> {
        let token = session_token(parts)?;
        state.sessions.validate_session(&token)
    }

    /// Optional authentication: anonymous callers proceed with `None`
    pub struct MaybeUser(pub Option<AuthUser>);

    /// Rejects with 401 unless a valid session is present
    pub struct RequireUser(pub AuthUser);

    /// Rejects with 401/403 unless the caller is an admin
    pub struct AdminUser(pub AuthUser);

    #[async_trait]
    impl FromRequestParts<SharedState> for MaybeUser {
        type Rejection = AppError;

        async fn from_request_parts(
            parts: &mut Parts,
            state: &SharedState,
        ) -> Result<Self, Self::Rejection> {
            Ok(MaybeUser(resolve(parts, state)))
        }
    }

    #[async_trait]
    impl FromRequestParts<SharedState> for RequireUser {
        type Rejection = AppError;

        async fn from_request_parts(
            parts: &mut Parts,
            state: &SharedState,
        ) -> Result<Self, Self::Rejection> {
            resolve(parts, state)
                .map(RequireUser)
                .ok_or(AppError::Unauthorized)
        }
    }

    #[async_trait]
    impl FromRequestParts<SharedState> for AdminUser {
        type Rejection = AppError;

        async fn from_request_parts(
            parts: &mut Parts,
            state: &SharedState,
        ) -> Result<Self, Self::Rejection> {
            let user = resolve(parts, state).ok_or(AppError::Unauthorized)?;
            if !user.is_admin {
                return Err(AppError::Forbidden);
            }
            Ok(AdminUser(user))
        }
    }
}
