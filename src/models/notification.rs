use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Follow,
    PostLike,
    PostComment,
    CommentLike,
    CommentReply,
    Mention,
    System,
}

/// 通知记录
/// 已读标志只允许 false -> true，不允许回退
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: Option<String>,
    pub notification_type: NotificationType,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub title: String,
    pub body: Option<String>,
    pub metadata: serde_json::Value,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 创建通知请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotificationRequest {
    pub recipient_id: String,
    pub sender_id: Option<String>,
    pub notification_type: NotificationType,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// 通知分页响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
    pub pages: usize,
    pub unread_count: usize,
}

/// 未读统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCount {
    pub total: usize,
    pub unread: usize,
}
