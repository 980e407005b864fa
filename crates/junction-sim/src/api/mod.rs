//! Query API for the simulation engine.

mod routes;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

pub use routes::ApiError;

pub fn routes() -> Router<Arc<AppState>> {
    routes::create_router()
}
