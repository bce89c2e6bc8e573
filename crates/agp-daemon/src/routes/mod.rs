// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route modules, one per resource family.

/// `GET /adapters*`, `/adapters/jobs*` — registry lifecycle and generation jobs.
pub mod adapters;
/// `GET /audit/verify`.
pub mod audit;
/// `/auth*` — browser session login (Google/GitHub).
pub mod auth;
/// Owner-scoped business profile CRUD and connect helper.
pub mod businesses;
/// `/connect/*` — OAuth authorize/callback for business adapter credentials.
pub mod connect;
/// `/credentials` and `/app-credentials/:service`.
pub mod credentials;
/// `GET /agp/discover`, `/agp/query`, `/agp/execute*`, `/agp/status/:id`, `/agp/businesses`.
pub mod gateway;
/// `GET /health`.
pub mod health;
/// `/keys*` — API key management.
pub mod keys;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

/// Build the merged router over every resource module. Attaching state is
/// left to the caller ([`crate::build_app`]).
#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::router())
        .merge(gateway::router())
        .merge(credentials::router())
        .merge(connect::router())
        .merge(businesses::router())
        .merge(adapters::router())
        .merge(keys::router())
        .merge(auth::router())
        .merge(audit::router())
}
