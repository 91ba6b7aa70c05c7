use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::time::{sleep, timeout, Duration};

use notify_hub::{
    config::Config,
    error::{AppError, Result},
    models::message::{ClientMessage, ServerMessage},
    models::notification::{CreateNotificationRequest, Notification, NotificationPage, NotificationType},
    services::client::{NotificationSync, PullTransport, PushConnection, PushTransport, SyncState},
    services::gateway::PushGateway,
    services::store::NotificationStore,
};

const RECONNECT: Duration = Duration::from_millis(25);

fn request_for(recipient_id: &str, title: &str) -> CreateNotificationRequest {
    CreateNotificationRequest {
        recipient_id: recipient_id.to_string(),
        sender_id: Some("user_sender".to_string()),
        notification_type: NotificationType::PostLike,
        resource_type: Some("post".to_string()),
        resource_id: Some("post_1".to_string()),
        title: title.to_string(),
        body: None,
        metadata: serde_json::Value::Null,
    }
}

/// 轮询直到条件满足或超时
async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within timeout");
}

/// 直连存储的拉取传输
struct StorePull {
    store: Arc<NotificationStore>,
    user_id: String,
}

#[async_trait]
impl PullTransport for StorePull {
    async fn list(&self, page: usize, size: usize) -> Result<NotificationPage> {
        Ok(self.store.list(&self.user_id, page, size))
    }

    async fn mark_read(&self, notification_id: &str) -> Result<Notification> {
        self.store.mark_read_owned(&self.user_id, notification_id)
    }

    async fn mark_all_read(&self) -> Result<usize> {
        Ok(self.store.mark_all_read(&self.user_id))
    }
}

/// 直连网关的推送传输，可随时上下线
struct GatewayPush {
    gateway: Arc<PushGateway>,
    user_id: String,
    up: Arc<AtomicBool>,
    last_connection_id: Arc<parking_lot::Mutex<Option<String>>>,
}

impl GatewayPush {
    fn new(gateway: Arc<PushGateway>, user_id: &str) -> Self {
        Self {
            gateway,
            user_id: user_id.to_string(),
            up: Arc::new(AtomicBool::new(true)),
            last_connection_id: Arc::new(parking_lot::Mutex::new(None)),
        }
    }
}

#[async_trait]
impl PushTransport for GatewayPush {
    async fn connect(&self) -> Result<Box<dyn PushConnection>> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("push offline".to_string()));
        }
        let connection_id = format!("conn_{}", uuid::Uuid::new_v4());
        let rx = self.gateway.register(&self.user_id, &connection_id);
        *self.last_connection_id.lock() = Some(connection_id.clone());
        Ok(Box::new(GatewayConn {
            gateway: self.gateway.clone(),
            user_id: self.user_id.clone(),
            connection_id,
            rx,
        }))
    }
}

struct GatewayConn {
    gateway: Arc<PushGateway>,
    user_id: String,
    connection_id: String,
    rx: tokio::sync::mpsc::Receiver<ServerMessage>,
}

#[async_trait]
impl PushConnection for GatewayConn {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        // 服务端对业务错误只记录不断开，这里照样只模拟传输层
        if let Err(e) = self.gateway.handle_client_message(&self.user_id, message) {
            tracing::warn!("client message rejected: {}", e);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }
}

impl Drop for GatewayConn {
    fn drop(&mut self) {
        self.gateway.unregister(&self.user_id, &self.connection_id);
    }
}

fn setup() -> (Arc<NotificationStore>, Arc<PushGateway>) {
    let store = Arc::new(NotificationStore::new());
    let gateway = PushGateway::attach(store.clone(), &Config::default());
    (store, gateway)
}

/// 推送不可用时，已读标记走拉取路径，计数照常收敛
#[tokio::test]
async fn test_mark_read_via_pull_while_push_is_down() {
    let (store, gateway) = setup();
    for i in 0..3 {
        store.append(request_for("u1", &format!("通知{}", i)));
    }
    let target = store.list("u1", 1, 10).items[1].id.clone();

    let push = GatewayPush::new(gateway, "u1");
    push.up.store(false, Ordering::SeqCst);
    let up = push.up.clone();

    let handle = NotificationSync::spawn(
        Arc::new(push),
        Arc::new(StorePull {
            store: store.clone(),
            user_id: "u1".to_string(),
        }),
        RECONNECT,
    );

    wait_for(|| handle.state() == SyncState::ReconnectWait).await;
    handle.mark_read(&target);
    wait_for(|| store.unread_count("u1").unread == 2).await;

    // 推送恢复后重连并全量拉取，本地镜像追上存储
    up.store(true, Ordering::SeqCst);
    wait_for(|| handle.state() == SyncState::Connected).await;
    wait_for(|| handle.unread() == 2).await;
    assert_eq!(handle.notifications().len(), 3);

    handle.shutdown_and_wait().await;
}

/// 设备A标记已读，设备B实时收到更新，两端计数一致
#[tokio::test]
async fn test_cross_device_read_state_converges() {
    let (store, gateway) = setup();
    for i in 0..3 {
        store.append(request_for("u1", &format!("通知{}", i)));
    }
    let target = store.list("u1", 1, 10).items[0].id.clone();

    let pull = |store: &Arc<NotificationStore>| {
        Arc::new(StorePull {
            store: store.clone(),
            user_id: "u1".to_string(),
        })
    };
    let handle_a = NotificationSync::spawn(
        Arc::new(GatewayPush::new(gateway.clone(), "u1")),
        pull(&store),
        RECONNECT,
    );
    let handle_b = NotificationSync::spawn(
        Arc::new(GatewayPush::new(gateway.clone(), "u1")),
        pull(&store),
        RECONNECT,
    );

    wait_for(|| handle_a.unread() == 3 && handle_b.unread() == 3).await;
    assert_eq!(gateway.online_channels("u1"), 2);

    handle_a.mark_read(&target);

    // 发起方同样等服务端回播，不做乐观更新
    wait_for(|| handle_a.unread() == 2 && handle_b.unread() == 2).await;
    let read_on_b = handle_b
        .notifications()
        .into_iter()
        .find(|n| n.id == target)
        .map(|n| n.is_read);
    assert_eq!(read_on_b, Some(true));

    handle_a.shutdown_and_wait().await;
    handle_b.shutdown_and_wait().await;
    wait_for(|| gateway.online_channels("u1") == 0).await;
}

/// 离线期间堆积的通知在上线重同步时一次性补齐
#[tokio::test]
async fn test_offline_backlog_is_recovered_on_connect() {
    let (store, gateway) = setup();

    // 无在线通道时扇出是空操作，存储照常落账
    for i in 0..4 {
        store.append(request_for("u1", &format!("离线通知{}", i)));
    }
    assert_eq!(gateway.online_channels("u1"), 0);

    let handle = NotificationSync::spawn(
        Arc::new(GatewayPush::new(gateway, "u1")),
        Arc::new(StorePull {
            store: store.clone(),
            user_id: "u1".to_string(),
        }),
        RECONNECT,
    );

    wait_for(|| handle.state() == SyncState::Connected).await;
    wait_for(|| handle.unread() == 4).await;
    assert_eq!(handle.notifications().len(), 4);

    handle.shutdown_and_wait().await;
}

/// 连接中断后自动重连，断连窗口内的新通知经重同步补齐
#[tokio::test]
async fn test_reconnect_recovers_missed_notifications() {
    let (store, gateway) = setup();

    let push = GatewayPush::new(gateway.clone(), "u1");
    let last_connection_id = push.last_connection_id.clone();
    let handle = NotificationSync::spawn(
        Arc::new(push),
        Arc::new(StorePull {
            store: store.clone(),
            user_id: "u1".to_string(),
        }),
        RECONNECT,
    );

    wait_for(|| handle.state() == SyncState::Connected).await;
    store.append(request_for("u1", "在线通知"));
    wait_for(|| handle.unread() == 1).await;

    // 服务端强制断开当前通道
    let connection_id = last_connection_id.lock().clone().unwrap();
    gateway.unregister("u1", &connection_id);

    // 断连窗口内落账两条
    store.append(request_for("u1", "错过的通知1"));
    store.append(request_for("u1", "错过的通知2"));

    wait_for(|| handle.unread() == 3).await;
    assert_eq!(handle.notifications().len(), 3);
    assert_eq!(handle.state(), SyncState::Connected);

    handle.shutdown_and_wait().await;
}

/// 重复标记同一条通知不会重复递减计数
#[tokio::test]
async fn test_duplicate_mark_read_is_idempotent() {
    let (store, gateway) = setup();
    for i in 0..3 {
        store.append(request_for("u1", &format!("通知{}", i)));
    }
    let target = store.list("u1", 1, 10).items[0].id.clone();

    let handle = NotificationSync::spawn(
        Arc::new(GatewayPush::new(gateway, "u1")),
        Arc::new(StorePull {
            store: store.clone(),
            user_id: "u1".to_string(),
        }),
        RECONNECT,
    );

    wait_for(|| handle.unread() == 3).await;

    handle.mark_read(&target);
    wait_for(|| handle.unread() == 2).await;
    handle.mark_read(&target);

    // 第二次标记在存储侧是空操作，不会再有回播
    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.unread(), 2);
    assert_eq!(store.unread_count("u1").unread, 2);

    handle.shutdown_and_wait().await;
}

/// 新通知推送与全部已读在多设备间收敛
#[tokio::test]
async fn test_mark_all_read_clears_every_device() {
    let (store, gateway) = setup();

    let pull = Arc::new(StorePull {
        store: store.clone(),
        user_id: "u1".to_string(),
    });
    let handle_a = NotificationSync::spawn(
        Arc::new(GatewayPush::new(gateway.clone(), "u1")),
        pull.clone(),
        RECONNECT,
    );
    let handle_b = NotificationSync::spawn(
        Arc::new(GatewayPush::new(gateway.clone(), "u1")),
        pull.clone(),
        RECONNECT,
    );

    wait_for(|| {
        handle_a.state() == SyncState::Connected && handle_b.state() == SyncState::Connected
    })
    .await;

    for i in 0..3 {
        store.append(request_for("u1", &format!("通知{}", i)));
    }
    wait_for(|| handle_a.unread() == 3 && handle_b.unread() == 3).await;

    handle_a.mark_all_read();
    wait_for(|| handle_a.unread() == 0 && handle_b.unread() == 0).await;
    assert!(handle_b.notifications().iter().all(|n| n.is_read));

    handle_a.shutdown_and_wait().await;
    handle_b.shutdown_and_wait().await;
}

/// 其他用户的通知既不进入账本也不进入通道
#[tokio::test]
async fn test_notifications_are_scoped_to_recipient() {
    let (store, gateway) = setup();

    let handle = NotificationSync::spawn(
        Arc::new(GatewayPush::new(gateway, "u1")),
        Arc::new(StorePull {
            store: store.clone(),
            user_id: "u1".to_string(),
        }),
        RECONNECT,
    );
    wait_for(|| handle.state() == SyncState::Connected).await;

    store.append(request_for("u2", "别人的通知"));
    store.append(request_for("u1", "自己的通知"));

    wait_for(|| handle.unread() == 1).await;
    assert_eq!(handle.notifications().len(), 1);
    assert_eq!(handle.notifications()[0].recipient_id, "u1");

    // 跨用户的已读请求按不存在处理，对方计数不受影响
    let foreign = store.list("u2", 1, 10).items[0].id.clone();
    handle.mark_read(&foreign);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.unread_count("u2").unread, 1);

    handle.shutdown_and_wait().await;
}
