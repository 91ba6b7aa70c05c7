use crate::{
    error::{AppError, Result},
    models::message::{ClientMessage, ServerMessage},
    models::notification::{Notification, NotificationPage},
};
use async_trait::async_trait;
use futures::{sink::SinkExt, stream::StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// 重同步拉取的页大小
pub const RESYNC_PAGE_SIZE: usize = 50;

/// 会话状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectWait,
}

/// 拉取传输：REST 读与标记操作，和推送路径写同一份存储
#[async_trait]
pub trait PullTransport: Send + Sync {
    async fn list(&self, page: usize, size: usize) -> Result<NotificationPage>;
    async fn mark_read(&self, notification_id: &str) -> Result<Notification>;
    async fn mark_all_read(&self) -> Result<usize>;
}

/// 一条已建立的推送连接
#[async_trait]
pub trait PushConnection: Send {
    async fn send(&mut self, message: ClientMessage) -> Result<()>;
    /// None 表示连接已关闭
    async fn recv(&mut self) -> Option<ServerMessage>;
}

/// 推送传输：负责握手建连
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushConnection>>;
}

/// 本地镜像状态
/// items 新的在前；unread 以服务端回播为准，钳制在零以上
struct LocalState {
    state: SyncState,
    items: Vec<Notification>,
    unread: usize,
}

enum SyncCommand {
    MarkRead(String),
    MarkAllRead,
    Shutdown,
}

/// 会话同步器句柄
/// drop 前调用 shutdown 结束会话；结束会取消尚未触发的重连定时器
pub struct SyncHandle {
    cmd_tx: mpsc::UnboundedSender<SyncCommand>,
    shared: Arc<Mutex<LocalState>>,
    task: tokio::task::JoinHandle<()>,
}

impl SyncHandle {
    pub fn state(&self) -> SyncState {
        self.shared.lock().state
    }

    pub fn unread(&self) -> usize {
        self.shared.lock().unread
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.lock().items.clone()
    }

    /// 用户发起的标记已读；连接可用时走推送通道，否则走拉取传输
    pub fn mark_read(&self, notification_id: &str) {
        let _ = self
            .cmd_tx
            .send(SyncCommand::MarkRead(notification_id.to_string()));
    }

    pub fn mark_all_read(&self) {
        let _ = self.cmd_tx.send(SyncCommand::MarkAllRead);
    }

    /// 结束会话，永久停止重连
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SyncCommand::Shutdown);
    }

    pub async fn shutdown_and_wait(self) {
        let _ = self.cmd_tx.send(SyncCommand::Shutdown);
        let _ = self.task.await;
    }
}

/// 通知同步器
pub struct NotificationSync;

impl NotificationSync {
    /// 启动一个会话同步任务
    pub fn spawn(
        push: Arc<dyn PushTransport>,
        pull: Arc<dyn PullTransport>,
        reconnect_wait: Duration,
    ) -> SyncHandle {
        let shared = Arc::new(Mutex::new(LocalState {
            state: SyncState::Disconnected,
            items: Vec::new(),
            unread: 0,
        }));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(push, pull, shared.clone(), cmd_rx, reconnect_wait));
        SyncHandle {
            cmd_tx,
            shared,
            task,
        }
    }
}

async fn run(
    push: Arc<dyn PushTransport>,
    pull: Arc<dyn PullTransport>,
    shared: Arc<Mutex<LocalState>>,
    mut cmd_rx: mpsc::UnboundedReceiver<SyncCommand>,
    reconnect_wait: Duration,
) {
    loop {
        set_state(&shared, SyncState::Connecting);
        match push.connect().await {
            Ok(mut conn) => {
                set_state(&shared, SyncState::Connected);
                // 无论是否收到重同步推送，进入 CONNECTED 都做一次全量拉取；
                // 推送通道只是加速器，不是唯一事实来源
                resync(pull.as_ref(), &shared).await;

                if connected_loop(conn.as_mut(), pull.as_ref(), &shared, &mut cmd_rx).await {
                    set_state(&shared, SyncState::Disconnected);
                    return;
                }
            }
            Err(e) => {
                warn!("Push connect failed: {}", e);
            }
        }

        // 握手被拒与异常断开同样处理：固定间隔后重试
        set_state(&shared, SyncState::ReconnectWait);
        if wait_before_reconnect(pull.as_ref(), &shared, &mut cmd_rx, reconnect_wait).await {
            set_state(&shared, SyncState::Disconnected);
            return;
        }
    }
}

/// 连接期间的主循环；返回 true 表示会话结束
async fn connected_loop(
    conn: &mut dyn PushConnection,
    pull: &dyn PullTransport,
    shared: &Arc<Mutex<LocalState>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<SyncCommand>,
) -> bool {
    loop {
        tokio::select! {
            message = conn.recv() => match message {
                Some(ServerMessage::Notification { notification }) => {
                    let mut state = shared.lock();
                    state.items.insert(0, notification);
                    state.unread += 1;
                }
                Some(ServerMessage::NotificationUpdated { notification_id, is_read }) => {
                    // 服务端回播的确认状态总是胜出
                    apply_update(shared, &notification_id, is_read);
                }
                Some(ServerMessage::Connected { unread_count, .. }) => {
                    debug!("Resync push received, server unread: {}", unread_count);
                    shared.lock().unread = unread_count;
                }
                None => {
                    info!("Push channel closed");
                    return false;
                }
            },
            command = cmd_rx.recv() => match command {
                Some(SyncCommand::MarkRead(notification_id)) => {
                    let message = ClientMessage::MarkRead {
                        notification_id: notification_id.clone(),
                    };
                    // 不做乐观更新，等待服务端的 notification_updated 回播
                    if conn.send(message).await.is_err() {
                        warn!("Push send failed, falling back to pull transport");
                        mark_read_via_pull(pull, shared, &notification_id).await;
                        return false;
                    }
                }
                Some(SyncCommand::MarkAllRead) => {
                    mark_all_read_via_pull(pull, shared).await;
                }
                Some(SyncCommand::Shutdown) | None => return true,
            },
        }
    }
}

/// 重连等待；期间到达的用户操作走拉取传输。返回 true 表示会话结束
async fn wait_before_reconnect(
    pull: &dyn PullTransport,
    shared: &Arc<Mutex<LocalState>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<SyncCommand>,
    wait: Duration,
) -> bool {
    let timer = sleep(wait);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            _ = &mut timer => return false,
            command = cmd_rx.recv() => match command {
                Some(SyncCommand::MarkRead(notification_id)) => {
                    mark_read_via_pull(pull, shared, &notification_id).await;
                }
                Some(SyncCommand::MarkAllRead) => {
                    mark_all_read_via_pull(pull, shared).await;
                }
                // 会话结束取消重连定时器
                Some(SyncCommand::Shutdown) | None => return true,
            },
        }
    }
}

/// 全量拉取并覆盖本地镜像
async fn resync(pull: &dyn PullTransport, shared: &Arc<Mutex<LocalState>>) {
    match pull.list(1, RESYNC_PAGE_SIZE).await {
        Ok(page) => {
            let mut state = shared.lock();
            state.items = page.items;
            state.unread = page.unread_count;
            debug!("Resync pull applied, unread: {}", state.unread);
        }
        Err(e) => {
            // 本次失败依赖推送与下一次重连收敛
            warn!("Resync pull failed: {}", e);
        }
    }
}

/// 拉取路径的标记已读；确认后才落本地状态
async fn mark_read_via_pull(
    pull: &dyn PullTransport,
    shared: &Arc<Mutex<LocalState>>,
    notification_id: &str,
) {
    match pull.mark_read(notification_id).await {
        Ok(notification) => apply_update(shared, &notification.id, notification.is_read),
        Err(AppError::NotFound(_)) => {
            // 未知ID不致命，会话继续
            warn!("Mark read for unknown notification {}", notification_id);
        }
        Err(e) => {
            warn!("Pull mark_read failed, will converge on next resync: {}", e);
        }
    }
}

async fn mark_all_read_via_pull(pull: &dyn PullTransport, shared: &Arc<Mutex<LocalState>>) {
    match pull.mark_all_read().await {
        Ok(_) => {
            let mut state = shared.lock();
            for item in state.items.iter_mut() {
                item.is_read = true;
            }
            state.unread = 0;
        }
        Err(e) => {
            warn!("Pull mark_all_read failed, will converge on next resync: {}", e);
        }
    }
}

/// 就地修补本地条目的已读标志，不重排
/// 只有 false -> true 的翻转才递减计数，钳制在零
fn apply_update(shared: &Arc<Mutex<LocalState>>, notification_id: &str, is_read: bool) {
    let mut state = shared.lock();
    if let Some(item) = state.items.iter_mut().find(|n| n.id == notification_id) {
        if is_read && !item.is_read {
            item.is_read = true;
            state.unread = state.unread.saturating_sub(1);
        }
    }
}

fn set_state(shared: &Arc<Mutex<LocalState>>, state: SyncState) {
    shared.lock().state = state;
}

// ---- 生产传输实现 ----

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[allow(dead_code)]
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
struct MarkAllReadData {
    updated_count: usize,
}

/// REST 拉取传输
pub struct RestPullTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestPullTransport {
    /// base_url 形如 http://host:3000/api/notify
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl PullTransport for RestPullTransport {
    async fn list(&self, page: usize, size: usize) -> Result<NotificationPage> {
        let response = self
            .client
            .get(format!("{}/notifications", self.base_url))
            .query(&[("page", page), ("size", size)])
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        let envelope: ApiEnvelope<NotificationPage> = response.json().await?;
        Ok(envelope.data)
    }

    async fn mark_read(&self, notification_id: &str) -> Result<Notification> {
        let response = self
            .client
            .put(format!(
                "{}/notifications/{}/read",
                self.base_url, notification_id
            ))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::not_found("Notification"));
        }
        let envelope: ApiEnvelope<Notification> = response.error_for_status()?.json().await?;
        Ok(envelope.data)
    }

    async fn mark_all_read(&self) -> Result<usize> {
        let response = self
            .client
            .put(format!("{}/notifications/read-all", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        let envelope: ApiEnvelope<MarkAllReadData> = response.json().await?;
        Ok(envelope.data.updated_count)
    }
}

/// WebSocket 推送传输
pub struct WsPushTransport {
    url: String,
}

impl WsPushTransport {
    /// 凭证作为查询参数附在连接请求上
    pub fn new(ws_base_url: &str, token: &str) -> Self {
        Self {
            url: format!(
                "{}/ws/connect?token={}",
                ws_base_url.trim_end_matches('/'),
                token
            ),
        }
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self) -> Result<Box<dyn PushConnection>> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        Ok(Box::new(WsPushConnection { stream }))
    }
}

struct WsPushConnection {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl PushConnection for WsPushConnection {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        self.stream
            .send(tokio_tungstenite::tungstenite::Message::Text(text))
            .await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                    match serde_json::from_str(&text) {
                        Ok(message) => return Some(message),
                        Err(e) => {
                            // 格式错误的消息记录后忽略，连接保持
                            warn!("Malformed server message ignored: {}", e);
                        }
                    }
                }
                Ok(tokio_tungstenite::tungstenite::Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => {
                    warn!("Push stream error: {}", e);
                    return None;
                }
            }
        }
        None
    }
}
