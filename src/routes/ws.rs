use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    error::{AppError, Result},
    state::AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/connect", get(websocket_handler))
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: String,
}

/// WebSocket连接处理器
/// 浏览器无法在握手请求上带自定义头，凭证放在查询参数里；
/// 校验失败在升级之前拒绝，连接根本不会建立
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response> {
    let user = state.auth_service.authenticate(&query.token).map_err(|e| {
        warn!("WebSocket handshake rejected: {}", e);
        AppError::Authentication("Invalid token".to_string())
    })?;

    info!("WebSocket upgrade request from user: {}", user.id);

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| gateway.handle_socket(socket, user.id)))
}
