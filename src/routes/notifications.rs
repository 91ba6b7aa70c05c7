use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, put},
    Extension, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::{error::Result, services::auth::User, state::AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // 通知列表与详情
        .route("/", get(list_notifications))
        .route("/unread/count", get(get_unread_count))
        .route("/:id", get(get_notification))
        // 已读标记
        .route("/:id/read", put(mark_read))
        .route("/read-all", put(mark_all_read))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<usize>,
    size: Option<usize>,
}

/// 获取当前用户的通知列表，新的在前
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>> {
    let page = query.page.unwrap_or(1).max(1);
    let size = state.config.clamp_page_size(query.size);

    debug!("Listing notifications for user {} page {}", user.id, page);
    let result = state.store.list(&user.id, page, size);

    Ok(Json(serde_json::json!({
        "success": true,
        "data": result
    })))
}

/// 获取未读计数
async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<serde_json::Value>> {
    let count = state.store.unread_count(&user.id);

    Ok(Json(serde_json::json!({
        "success": true,
        "data": count
    })))
}

/// 获取单条通知详情；不属于当前用户的ID一律按不存在处理
async fn get_notification(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(notification_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let notification = state.store.get_owned(&user.id, &notification_id)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "data": notification
    })))
}

/// 标记单条通知为已读
async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(notification_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    debug!(
        "Marking notification {} read for user {}",
        notification_id, user.id
    );
    let notification = state.store.mark_read_owned(&user.id, &notification_id)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "data": notification
    })))
}

/// 标记当前用户的全部通知为已读
async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<serde_json::Value>> {
    let updated_count = state.store.mark_all_read(&user.id);
    debug!(
        "Marked {} notifications read for user {}",
        updated_count, user.id
    );

    Ok(Json(serde_json::json!({
        "success": true,
        "data": {
            "updated_count": updated_count
        }
    })))
}
