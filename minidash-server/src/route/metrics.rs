use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use minidash_proto::MetricsSnapshot;
use serde_json::json;
use tracing::trace;

use crate::AppState;

/// Collect a fresh snapshot on every request.
pub async fn metrics(State(state): State<AppState>) -> Result<Json<MetricsSnapshot>, MetricsError> {
    let mut collector = state.collector.lock_owned().await;
    let snapshot = tokio::task::spawn_blocking(move || collector.collect()).await?;
    trace!("collected {snapshot:?}");

    Ok(Json(snapshot))
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics collection failed: {0}")]
    Collection(#[from] tokio::task::JoinError),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        tracing::error!("{self}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
