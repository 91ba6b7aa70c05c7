use axum::{extract::State, response::Json, routing::post, Extension, Router};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::{AppError, Result},
    models::event::SocialEvent,
    services::auth::User,
    state::AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(ingest_event))
}

/// 上游CRUD服务投递社交事件的内部端点
/// 分发是异步的：事件入队即返回，物化与扇出在分发器任务里完成
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(event): Json<SocialEvent>,
) -> Result<Json<serde_json::Value>> {
    debug!("Event ingested by service account {}", user.id);

    state
        .events_tx
        .send(event)
        .map_err(|_| AppError::ServiceUnavailable("Event dispatcher stopped".to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Event accepted"
    })))
}
