use axum::{
    Extension, Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::auth::SessionStore;
use crate::config::Args;
use crate::popup_routes;
use crate::rate_limit::{self, ForwardedTrust, RateLimiter};
use crate::rating_routes;
use crate::service::ReviewService;
use crate::store::MemoryStore;

const LIMITER_CLEANUP_PERIOD: Duration = Duration::from_secs(60);

/// State shared by every handler
pub struct AppState {
    pub service: ReviewService,
    pub sessions: SessionStore,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(service: ReviewService, sessions: SessionStore) -> SharedState {
        Arc::new(Self { service, sessions })
    }
}

/// Rate limiters guarding the popup write endpoints
#[derive(Debug, Clone)]
pub struct Limiters {
    /// Shared by the activity and preference endpoints
    pub preference: Arc<RateLimiter>,
    pub review: Arc<RateLimiter>,
}

impl Limiters {
    pub fn from_args(args: &Args) -> Self {
        Self {
            preference: Arc::new(RateLimiter::preference_updates(args.preference_rate_limit)),
            review: Arc::new(RateLimiter::review_submissions(args.review_rate_limit)),
        }
    }

    fn all(&self) -> Vec<Arc<RateLimiter>> {
        vec![self.preference.clone(), self.review.clone()]
    }
}

/// Build the full router with fresh rate limiters
pub fn build_router(state: SharedState, args: &Args) -> Router {
    build_router_with(state, args, &Limiters::from_args(args))
}

/// Build the full router
///
/// # Arguments
/// * `state` - Shared service and session state
/// * `args` - Server configuration (CORS origin, static directory, proxy trust)
/// * `limiters` - Rate limiters for the popup write endpoints
pub fn build_router_with(state: SharedState, args: &Args, limiters: &Limiters) -> Router {
    let preference_limiter = limiters.preference.clone();
    let review_limiter = limiters.review.clone();

    let popup = Router::new()
        .route("/status", get(popup_routes::status))
        .route(
            "/track-activity",
            post(popup_routes::track_activity).layer(middleware::from_fn_with_state(
                preference_limiter.clone(),
                rate_limit::enforce,
            )),
        )
        .route(
            "/preference",
            post(popup_routes::set_preference).layer(middleware::from_fn_with_state(
                preference_limiter,
                rate_limit::enforce,
            )),
        )
        .route(
            "/submit",
            post(popup_routes::submit).layer(middleware::from_fn_with_state(
                review_limiter,
                rate_limit::enforce,
            )),
        )
        .route("/stats", get(popup_routes::stats));

    let ratings = Router::new()
        .route("/public", get(rating_routes::public_ratings))
        .route("/stats", get(rating_routes::rating_stats))
        .route("/submit", post(rating_routes::submit_rating))
        .route("/update", put(rating_routes::update_rating))
        .route("/my-rating", get(rating_routes::my_rating))
        .route("/:id/helpful", post(rating_routes::mark_helpful))
        .route("/admin/pending", get(rating_routes::pending_ratings))
        .route("/admin/:id/approve", post(rating_routes::approve_rating))
        .route("/admin/:id/reject", post(rating_routes::reject_rating));

    let mut app = Router::new()
        .route("/health", get(health))
        .nest("/api/review-popup", popup)
        .nest("/api/ratings", ratings);

    if let Some(dir) = &args.static_dir {
        app = app.nest_service("/static", ServeDir::new(dir));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(Extension(ForwardedTrust(args.trust_proxy)))
            .layer(cors_layer(args.client_origin.as_deref())),
    )
    .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };

    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true),
        Err(_) => {
            log::warn!("ignoring invalid CORS origin {:?}", origin);
            CorsLayer::permissive()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Open the store, load sessions and serve until shutdown
pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let store = match &args.database_dir {
        Some(dir) => MemoryStore::open(dir)?,
        None => {
            log::warn!("no database directory configured; data lives in memory only");
            MemoryStore::in_memory()
        }
    };

    let sessions = SessionStore::new();
    if let Some(path) = &args.auth_tokens_file {
        let count = sessions.load_tokens_file(path)?;
        log::info!("loaded {} session tokens from {}", count, path.display());
    }

    let service = ReviewService::with_store(Arc::new(store)).with_featured_limit(args.featured_reviews);
    let limiters = Limiters::from_args(&args);
    let app = build_router_with(AppState::new(service, sessions), &args, &limiters);
    rate_limit::spawn_cleanup(limiters.all(), LIMITER_CLEANUP_PERIOD);

    if args.trust_proxy {
        log::info!("rate limits keyed on X-Forwarded-For");
    }

    let listener = TcpListener::bind(args.listen).await?;
    log::info!("Listening on http://{}", args.listen);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
