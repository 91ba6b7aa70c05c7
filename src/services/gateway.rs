use crate::{
    config::Config,
    error::Result,
    models::message::{ClientMessage, ServerMessage},
    models::notification::Notification,
    services::store::{NotificationStore, StoreObserver},
};
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::{sink::SinkExt, stream::StreamExt};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 单个活跃通道
/// 发送端是有界队列；队列满即视为该通道失速，整个通道被丢弃
struct ChannelHandle {
    tx: mpsc::Sender<ServerMessage>,
    connected_at: DateTime<Utc>,
    last_active: Mutex<DateTime<Utc>>,
}

/// 推送网关
/// 持有接收者 -> 活跃通道集合的映射，负责事件扇出与客户端已读请求的中转
pub struct PushGateway {
    store: Arc<NotificationStore>,
    // 接收者ID -> (连接ID -> 通道)
    channels: RwLock<HashMap<String, HashMap<String, ChannelHandle>>>,
    buffer_size: usize,
    idle_timeout_secs: u64,
}

impl PushGateway {
    /// 创建网关并挂接到存储的事件回调
    pub fn attach(store: Arc<NotificationStore>, config: &Config) -> Arc<Self> {
        let gateway = Arc::new(Self {
            store: store.clone(),
            channels: RwLock::new(HashMap::new()),
            buffer_size: config.channel_buffer_size.max(1),
            idle_timeout_secs: config.channel_idle_timeout_secs,
        });
        store.set_observer(gateway.clone());
        gateway
    }

    /// 注册一个新通道，返回其下行消息接收端
    /// 注册后立即推送一条重同步消息，携带当前未读数
    pub fn register(&self, user_id: &str, connection_id: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let now = Utc::now();

        let resync = ServerMessage::connected(user_id, self.store.unread_count(user_id).unread);
        // 新通道队列为空，容量至少为1，入队不会失败
        let _ = tx.try_send(resync);

        let handle = ChannelHandle {
            tx,
            connected_at: now,
            last_active: Mutex::new(now),
        };

        let mut channels = self.channels.write();
        let connections = channels.entry(user_id.to_string()).or_default();
        connections.insert(connection_id.to_string(), handle);
        info!(
            "Registered channel {} for user {} ({} active)",
            connection_id,
            user_id,
            connections.len()
        );

        rx
    }

    /// 注销通道；发送端随之丢弃，下行任务自然结束
    pub fn unregister(&self, user_id: &str, connection_id: &str) {
        let mut channels = self.channels.write();
        if let Some(connections) = channels.get_mut(user_id) {
            connections.remove(connection_id);
            if connections.is_empty() {
                channels.remove(user_id);
            }
        }
        info!("Unregistered channel {} for user {}", connection_id, user_id);
    }

    pub fn online_channels(&self, user_id: &str) -> usize {
        self.channels
            .read()
            .get(user_id)
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    /// 处理客户端上行消息
    /// 已读请求落到存储后，notification_updated 会经事件回调广播到该接收者
    /// 的全部通道（包括发起方），使各设备收敛
    pub fn handle_client_message(&self, user_id: &str, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::MarkRead { notification_id } => {
                self.store.mark_read_owned(user_id, &notification_id)?;
                Ok(())
            }
        }
    }

    /// 向接收者的全部活跃通道扇出一条消息
    /// try_send 非阻塞：单个失速通道只导致其自身被丢弃，不拖慢其他通道
    fn fan_out(&self, recipient_id: &str, message: ServerMessage) {
        let mut stalled = Vec::new();
        {
            let channels = self.channels.read();
            let Some(connections) = channels.get(recipient_id) else {
                return;
            };
            for (connection_id, handle) in connections {
                if let Err(e) = handle.tx.try_send(message.clone()) {
                    warn!(
                        "Dropping stalled channel {} for user {}: {}",
                        connection_id, recipient_id, e
                    );
                    stalled.push(connection_id.clone());
                }
            }
        }

        if !stalled.is_empty() {
            let mut channels = self.channels.write();
            if let Some(connections) = channels.get_mut(recipient_id) {
                for connection_id in stalled {
                    connections.remove(&connection_id);
                }
                if connections.is_empty() {
                    channels.remove(recipient_id);
                }
            }
        }
    }

    fn touch(&self, user_id: &str, connection_id: &str) {
        let channels = self.channels.read();
        if let Some(handle) = channels
            .get(user_id)
            .and_then(|connections| connections.get(connection_id))
        {
            *handle.last_active.lock() = Utc::now();
        }
    }

    /// 清理超时无活动的通道
    pub fn sweep_idle_channels(&self) {
        let threshold = Utc::now() - ChronoDuration::seconds(self.idle_timeout_secs as i64);
        let mut channels = self.channels.write();
        channels.retain(|user_id, connections| {
            connections.retain(|connection_id, handle| {
                let active = *handle.last_active.lock() >= threshold;
                if !active {
                    warn!(
                        "Cleaning up idle channel {} for user {} (connected at {})",
                        connection_id, user_id, handle.connected_at
                    );
                }
                active
            });
            !connections.is_empty()
        });
    }

    /// 启动周期性清理任务
    pub fn start_idle_sweeper(self: &Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            loop {
                interval.tick().await;
                gateway.sweep_idle_channels();
            }
        })
    }

    /// 接管一条已通过握手的WebSocket连接，直到其关闭
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, user_id: String) {
        let connection_id = format!("conn_{}", uuid::Uuid::new_v4());
        let mut rx = self.register(&user_id, &connection_id);

        let (mut ws_tx, mut ws_rx) = socket.split();

        // 下行任务：通道队列 -> WebSocket
        let send_connection_id = connection_id.clone();
        let send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                    }
                }
            }
            // 通道被回收（失速丢弃或空闲清理）后必须关闭底层连接，
            // 否则客户端停留在已连接状态却再也收不到扇出
            let _ = ws_tx.send(Message::Close(None)).await;
            debug!("Send task ended for channel {}", send_connection_id);
        });

        // 上行循环：解析客户端消息，格式错误只记录不断开
        while let Some(item) = ws_rx.next().await {
            match item {
                Ok(Message::Text(text)) => {
                    self.touch(&user_id, &connection_id);
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            if let Err(e) = self.handle_client_message(&user_id, message) {
                                warn!(
                                    "Client message from {} on {} failed: {}",
                                    user_id, connection_id, e
                                );
                            }
                        }
                        Err(e) => {
                            warn!("Malformed message on channel {}: {}", connection_id, e);
                        }
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    self.touch(&user_id, &connection_id);
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring binary message of {} bytes", data.len());
                }
                Ok(Message::Close(_)) => {
                    info!("Channel {} closed by client", connection_id);
                    break;
                }
                Err(e) => {
                    warn!("WebSocket error on channel {}: {}", connection_id, e);
                    break;
                }
            }
        }

        self.unregister(&user_id, &connection_id);
        send_task.abort();
    }
}

impl StoreObserver for PushGateway {
    fn notification_appended(&self, notification: &Notification) {
        self.fan_out(
            &notification.recipient_id,
            ServerMessage::Notification {
                notification: notification.clone(),
            },
        );
    }

    fn notification_updated(&self, recipient_id: &str, notification_id: &str, is_read: bool) {
        self.fan_out(
            recipient_id,
            ServerMessage::NotificationUpdated {
                notification_id: notification_id.to_string(),
                is_read,
            },
        );
    }
}
