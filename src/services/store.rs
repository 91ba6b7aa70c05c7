use crate::{
    error::{AppError, Result},
    models::notification::{
        CreateNotificationRequest, Notification, NotificationPage, UnreadCount,
    },
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

/// 账本事件观察者
/// 回调在接收者锁内同步执行，因此同一接收者的广播与变更保持同一次序，
/// 回调内不得阻塞、不得回调账本写操作
pub trait StoreObserver: Send + Sync {
    fn notification_appended(&self, notification: &Notification);
    fn notification_updated(&self, recipient_id: &str, notification_id: &str, is_read: bool);
}

/// 单个接收者的通知账本
/// items 按创建时间升序保存，读取时倒序返回
#[derive(Default)]
struct RecipientLedger {
    items: Vec<Notification>,
    unread: usize,
}

/// 通知存储
/// 同一接收者的全部写操作经过其账本互斥锁串行化，不同接收者之间无协调
pub struct NotificationStore {
    ledgers: DashMap<String, Arc<Mutex<RecipientLedger>>>,
    // 通知ID -> 接收者ID
    index: DashMap<String, String>,
    observer: RwLock<Option<Arc<dyn StoreObserver>>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self {
            ledgers: DashMap::new(),
            index: DashMap::new(),
            observer: RwLock::new(None),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn StoreObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn ledger(&self, recipient_id: &str) -> Arc<Mutex<RecipientLedger>> {
        self.ledgers
            .entry(recipient_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// 追加一条通知，分配ID和时间戳，并递增接收者未读计数
    pub fn append(&self, request: CreateNotificationRequest) -> Notification {
        let notification = Notification {
            id: format!("ntf_{}", uuid::Uuid::new_v4()),
            recipient_id: request.recipient_id.clone(),
            sender_id: request.sender_id,
            notification_type: request.notification_type,
            resource_type: request.resource_type,
            resource_id: request.resource_id,
            title: request.title,
            body: request.body,
            metadata: request.metadata,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };

        self.index
            .insert(notification.id.clone(), notification.recipient_id.clone());

        let ledger = self.ledger(&request.recipient_id);
        let mut guard = ledger.lock();
        guard.items.push(notification.clone());
        guard.unread += 1;

        debug!(
            "Appended notification {} for recipient {} (unread: {})",
            notification.id, notification.recipient_id, guard.unread
        );

        // 在串行化作用域内广播，保证各通道观察到的次序与账本一致
        if let Some(observer) = self.observer.read().as_ref() {
            observer.notification_appended(&notification);
        }

        notification
    }

    /// 分页读取，按创建时间倒序
    pub fn list(&self, recipient_id: &str, page: usize, size: usize) -> NotificationPage {
        let page = page.max(1);
        let size = size.max(1);
        let ledger = self.ledger(recipient_id);
        let guard = ledger.lock();

        let total = guard.items.len();
        let items: Vec<Notification> = guard
            .items
            .iter()
            .rev()
            .skip((page - 1) * size)
            .take(size)
            .cloned()
            .collect();
        let pages = if total > 0 { (total + size - 1) / size } else { 1 };

        NotificationPage {
            items,
            total,
            page,
            size,
            pages,
            unread_count: guard.unread,
        }
    }

    pub fn unread_count(&self, recipient_id: &str) -> UnreadCount {
        let ledger = self.ledger(recipient_id);
        let guard = ledger.lock();
        UnreadCount {
            total: guard.items.len(),
            unread: guard.unread,
        }
    }

    /// 按ID读取单条通知
    pub fn get(&self, notification_id: &str) -> Result<Notification> {
        let recipient_id = self
            .index
            .get(notification_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found("Notification"))?;

        let ledger = self.ledger(&recipient_id);
        let guard = ledger.lock();
        guard
            .items
            .iter()
            .find(|n| n.id == notification_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("Notification"))
    }

    /// 所有权校验后的单条读取
    /// 通知不属于该接收者时与不存在同样处理，避免泄露他人通知的存在性
    pub fn get_owned(&self, recipient_id: &str, notification_id: &str) -> Result<Notification> {
        let notification = self.get(notification_id)?;
        if notification.recipient_id != recipient_id {
            return Err(AppError::not_found("Notification"));
        }
        Ok(notification)
    }

    /// 标记单条通知为已读
    /// 幂等：已读的通知原样返回，不重复递减计数、不重复广播
    pub fn mark_read(&self, notification_id: &str) -> Result<Notification> {
        let recipient_id = self
            .index
            .get(notification_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found("Notification"))?;

        let ledger = self.ledger(&recipient_id);
        let mut guard = ledger.lock();
        let item = guard
            .items
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or_else(|| AppError::not_found("Notification"))?;

        if item.is_read {
            return Ok(item.clone());
        }

        item.is_read = true;
        item.read_at = Some(Utc::now());
        let updated = item.clone();
        guard.unread = guard.unread.saturating_sub(1);

        if let Some(observer) = self.observer.read().as_ref() {
            observer.notification_updated(&recipient_id, notification_id, true);
        }

        Ok(updated)
    }

    /// 所有权校验后的标记已读
    /// 通知不属于该接收者时与不存在同样处理，避免泄露他人通知的存在性
    pub fn mark_read_owned(&self, recipient_id: &str, notification_id: &str) -> Result<Notification> {
        let owner = self
            .index
            .get(notification_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found("Notification"))?;

        if owner != recipient_id {
            return Err(AppError::not_found("Notification"));
        }

        self.mark_read(notification_id)
    }

    /// 标记接收者全部通知为已读，返回翻转条数
    pub fn mark_all_read(&self, recipient_id: &str) -> usize {
        let ledger = self.ledger(recipient_id);
        let mut guard = ledger.lock();

        let now = Utc::now();
        let mut flipped = Vec::new();
        for item in guard.items.iter_mut() {
            if !item.is_read {
                item.is_read = true;
                item.read_at = Some(now);
                flipped.push(item.id.clone());
            }
        }
        guard.unread = 0;

        if !flipped.is_empty() {
            if let Some(observer) = self.observer.read().as_ref() {
                for id in &flipped {
                    observer.notification_updated(recipient_id, id, true);
                }
            }
        }

        flipped.len()
    }

    /// 重新统计账本中的未读条数，用于校验计数一致性
    pub fn recount_unread(&self, recipient_id: &str) -> usize {
        let ledger = self.ledger(recipient_id);
        let guard = ledger.lock();
        guard.items.iter().filter(|n| !n.is_read).count()
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::NotificationType;
    use proptest::prelude::*;

    fn request_for(recipient_id: &str) -> CreateNotificationRequest {
        CreateNotificationRequest {
            recipient_id: recipient_id.to_string(),
            sender_id: Some("user_sender".to_string()),
            notification_type: NotificationType::PostComment,
            resource_type: Some("post".to_string()),
            resource_id: Some("post_1".to_string()),
            title: "有人评论了你的帖子".to_string(),
            body: Some("测试评论内容".to_string()),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_append_increments_unread() {
        let store = NotificationStore::new();
        store.append(request_for("u1"));
        store.append(request_for("u1"));
        let count = store.unread_count("u1");
        assert_eq!(count.total, 2);
        assert_eq!(count.unread, 2);
    }

    #[test]
    fn test_list_orders_newest_first() {
        let store = NotificationStore::new();
        let first = store.append(request_for("u1"));
        let second = store.append(request_for("u1"));
        let third = store.append(request_for("u1"));

        let page = store.list("u1", 1, 2);
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.items[0].id, third.id);
        assert_eq!(page.items[1].id, second.id);

        let page2 = store.list("u1", 2, 2);
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].id, first.id);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let store = NotificationStore::new();
        let notification = store.append(request_for("u1"));
        store.append(request_for("u1"));

        let once = store.mark_read(&notification.id).unwrap();
        assert!(once.is_read);
        assert_eq!(store.unread_count("u1").unread, 1);

        let twice = store.mark_read(&notification.id).unwrap();
        assert!(twice.is_read);
        assert_eq!(twice.read_at, once.read_at);
        assert_eq!(store.unread_count("u1").unread, 1);
    }

    #[test]
    fn test_mark_read_unknown_id() {
        let store = NotificationStore::new();
        let result = store.mark_read("ntf_missing");
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_mark_read_owned_rejects_foreign_notification() {
        let store = NotificationStore::new();
        let notification = store.append(request_for("u1"));

        let result = store.mark_read_owned("u2", &notification.id);
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(store.unread_count("u1").unread, 1);

        assert!(store.mark_read_owned("u1", &notification.id).is_ok());
        assert_eq!(store.unread_count("u1").unread, 0);
    }

    #[test]
    fn test_mark_all_read_zeroes_counter() {
        let store = NotificationStore::new();
        for _ in 0..3 {
            store.append(request_for("u1"));
        }
        let first = store.list("u1", 1, 10).items.pop().unwrap();
        store.mark_read(&first.id).unwrap();

        assert_eq!(store.mark_all_read("u1"), 2);
        assert_eq!(store.unread_count("u1").unread, 0);
        assert_eq!(store.mark_all_read("u1"), 0);
        assert_eq!(store.unread_count("u1").unread, 0);
    }

    #[test]
    fn test_recipients_are_independent() {
        let store = NotificationStore::new();
        store.append(request_for("u1"));
        store.append(request_for("u2"));
        store.mark_all_read("u1");
        assert_eq!(store.unread_count("u1").unread, 0);
        assert_eq!(store.unread_count("u2").unread, 1);
    }

    #[test]
    fn test_concurrent_append_and_mark_all_read_keep_invariant() {
        let store = Arc::new(NotificationStore::new());

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    store.append(request_for("u1"));
                }
            }));
        }
        {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    store.mark_all_read("u1");
                    std::thread::yield_now();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let count = store.unread_count("u1");
        assert_eq!(count.total, 200);
        assert_eq!(count.unread, store.recount_unread("u1"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(u8),
        MarkRead(usize),
        MarkAllRead(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..3).prop_map(Op::Append),
            any::<usize>().prop_map(Op::MarkRead),
            (0u8..3).prop_map(Op::MarkAllRead),
        ]
    }

    proptest! {
        /// 任意操作序列之后，未读计数始终等于账本中未读标志的条数
        #[test]
        fn prop_unread_counter_matches_ledger(ops in proptest::collection::vec(op_strategy(), 1..80)) {
            let store = NotificationStore::new();
            let recipients = ["u0", "u1", "u2"];
            let mut ids: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    Op::Append(r) => {
                        let n = store.append(request_for(recipients[r as usize]));
                        ids.push(n.id);
                    }
                    Op::MarkRead(i) => {
                        if !ids.is_empty() {
                            let _ = store.mark_read(&ids[i % ids.len()]);
                        }
                    }
                    Op::MarkAllRead(r) => {
                        store.mark_all_read(recipients[r as usize]);
                    }
                }

                for recipient in &recipients {
                    prop_assert_eq!(
                        store.unread_count(recipient).unread,
                        store.recount_unread(recipient)
                    );
                }
            }
        }
    }
}
