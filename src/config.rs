//! Command line / environment configuration for the web server

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Review and rating service for the Excel Analytics Platform
#[derive(Parser, Debug, Clone)]
#[command(name = "website")]
#[command(about = "Review popup and ratings API for the Excel Analytics Platform")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Directory holding the JSON snapshots; in-memory only when omitted
    #[arg(long, env = "DATABASE_DIR")]
    pub database_dir: Option<PathBuf>,

    /// JSON file of session tokens issued by the account service
    #[arg(long, env = "AUTH_TOKENS_FILE")]
    pub auth_tokens_file: Option<PathBuf>,

    /// Directory of pre-built frontend assets served under /static
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Allowed CORS origin (any origin when omitted)
    #[arg(long, env = "CLIENT_ORIGIN")]
    pub client_origin: Option<String>,

    /// Preference and activity calls allowed per client per minute
    #[arg(long, env = "PREFERENCE_RATE_LIMIT", default_value_t = 10)]
    pub preference_rate_limit: usize,

    /// Review submissions allowed per client per hour
    #[arg(long, env = "REVIEW_RATE_LIMIT", default_value_t = 3)]
    pub review_rate_limit: usize,

    /// Key rate limits on the first `X-Forwarded-For` hop. Only enable
    /// behind a reverse proxy that overwrites the header.
    #[arg(long, env = "TRUST_PROXY")]
    pub trust_proxy: bool,

    /// Number of featured reviews returned with popup statistics
    #[arg(long, env = "FEATURED_REVIEWS", default_value_t = 3)]
    pub featured_reviews: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.preference_rate_limit == 0 {
            return Err("PREFERENCE_RATE_LIMIT must be at least 1".to_string());
        }
        if self.review_rate_limit == 0 {
            return Err("REVIEW_RATE_LIMIT must be at least 1".to_string());
        }
        if let Some(file) = &self.auth_tokens_file {
            if !file.exists() {
                return Err(format!("AUTH_TOKENS_FILE {} does not exist", file.display()));
            }
        }
        Ok(())
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database_dir: None,
            auth_tokens_file: None,
            static_dir: None,
            client_origin: None,
            preference_rate_limit: 10,
            review_rate_limit: 3,
            trust_proxy: false,
            featured_reviews: 3,
            log_level: "info".to_string(),
        }
    }
}
