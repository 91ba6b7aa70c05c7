use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::models::notification::Notification;

/// 服务端下行消息
/// 以 type 字段做判别，未知类型在反序列化时直接失败
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 连接确认 + 重同步提示 (当前未读数)
    Connected {
        user_id: String,
        unread_count: usize,
        timestamp: DateTime<Utc>,
    },
    /// 新通知推送
    Notification { notification: Notification },
    /// 已读状态变更广播
    NotificationUpdated {
        notification_id: String,
        is_read: bool,
    },
}

/// 客户端上行消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    MarkRead { notification_id: String },
}

impl ServerMessage {
    pub fn connected(user_id: &str, unread_count: usize) -> Self {
        Self::Connected {
            user_id: user_id.to_string(),
            unread_count,
            timestamp: Utc::now(),
        }
    }
}
