use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

async fn history(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.store().history(&id).await {
        Some(messages) => Json(messages).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("conversation {} does not exist", id) })),
        )
            .into_response(),
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/conversations/:id", get(history))
        .with_state(state)
}
