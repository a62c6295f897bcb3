pub mod health;
pub mod operations;
pub mod pools;

use crate::{api_docs::ApiDoc, state::AppState};
use axum::{routing::get, Json, Router};
use fleet_orchestrator::Fleet;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

pub fn create_app(fleet: Fleet) -> Router {
    let state = AppState::new(fleet);

    // Allow CORS for dashboards served from another origin
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(health::routes())
        .route("/api-docs/openapi.json", get(openapi_spec))
        .merge(operations::routes())
        .merge(pools::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
