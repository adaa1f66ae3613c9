/*!
# Excel Analytics Reviews

Review-prompt and ratings backend for the Excel Analytics Platform, built in Rust.

## Overview

The platform asks its users for a review once they have actually used it.
This crate tracks engagement per visitor (anonymous or logged in), decides
when the review popup may be shown, records the visitor's answer ("never",
"remind me later", "dismiss") and stores the submitted reviews together with
their moderation state.

## Architecture

### Client Layer
- **Key Components**:
  - Activity Tracker - Reports page views, uploads, charts, reports and active minutes
  - Popup Manager - Polls the eligibility endpoint and drives the popup UI

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Identity Resolver - Device fingerprint and anonymous id for every request
  - Activity Recorder - Atomic upsert of engagement counters
  - Eligibility Engine - Ordered rules deciding whether the popup appears
  - Preference Recorder - Never / later / dismissed answers
  - Review Service - Ratings, testimonials, statistics and moderation
  - Rate Limiter - Per-client sliding windows on the write endpoints

### Data Persistence Layer
- In-memory collections with optional JSON snapshots (`preferences.json`, `ratings.json`)

## Modules

- **identity**: Fingerprints, anonymous ids and the request subject
- **preference**: Preference records and activity kinds
- **eligibility**: Popup eligibility rules
- **rating**: Rating documents, validation and aggregation
- **store**: Storage traits and the in-memory store
- **service**: Operations behind the HTTP handlers
- **auth**: Session validation and request extractors
- **rate_limit**: Sliding-window limiter and middleware
- **client**: Activity tracker and popup manager
- **config**: Command line / environment configuration
- **app**: Routing and middleware

## REST API Endpoints

- `GET /api/review-popup/status` - Should the popup be shown?
- `POST /api/review-popup/track-activity` - Record an activity
- `POST /api/review-popup/preference` - Record never / later / dismissed
- `POST /api/review-popup/submit` - Submit a review from the popup
- `GET /api/review-popup/stats` - Average rating and featured reviews
- `/api/ratings/...` - Public testimonials, own rating, helpful votes, moderation
*/

pub mod auth;
pub mod client;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod identity;
pub mod preference;
pub mod rate_limit;
pub mod rating;
pub mod service;
pub mod store;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod popup_routes;
#[cfg(feature = "web")]
pub mod rating_routes;

pub use error::{AppError, Result, StoreError};
pub use identity::{RequestMeta, Subject, resolve_subject};
pub use preference::{Activity, ActivityKind, Preference, PreferenceRecord};
pub use service::ReviewService;
pub use store::MemoryStore;
