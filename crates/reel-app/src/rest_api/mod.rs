use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::{auth::authenticate, state::AppState};

pub mod movie;
pub mod paging;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.get_app_config();
    Json(json!({
        "status": "available",
        "systemInfo": {
            "environment": config.environment,
            "version": config.version,
        },
    }))
}

/// Application routes: public health check plus the movie API behind user resolution.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/movies", movie::router())
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));
    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}
