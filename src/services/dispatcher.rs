use crate::{
    models::event::SocialEvent,
    models::notification::{CreateNotificationRequest, NotificationType},
    services::store::NotificationStore,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

const MAX_BODY_LENGTH: usize = 100;

/// 社交事件分发器
/// 把上游CRUD服务投递的社交动作物化为通知并落账
pub struct EventDispatcher;

impl EventDispatcher {
    /// 启动消费循环，返回事件投递端
    pub fn spawn(store: Arc<NotificationStore>) -> mpsc::UnboundedSender<SocialEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            info!("Social event dispatcher started");
            while let Some(event) = rx.recv().await {
                Self::dispatch(&store, event);
            }
            info!("Social event dispatcher stopped");
        });

        tx
    }

    /// 把一条社交事件转成通知请求并追加
    /// 自己触发的动作不通知自己
    pub fn dispatch(store: &NotificationStore, event: SocialEvent) {
        let Some(request) = Self::materialize(event) else {
            return;
        };
        let notification = store.append(request);
        debug!(
            "Materialized notification {} for recipient {}",
            notification.id, notification.recipient_id
        );
    }

    fn materialize(event: SocialEvent) -> Option<CreateNotificationRequest> {
        match event {
            SocialEvent::Followed {
                follower_id,
                follower_name,
                followee_id,
            } => {
                if follower_id == followee_id {
                    return None;
                }
                Some(CreateNotificationRequest {
                    recipient_id: followee_id,
                    sender_id: Some(follower_id.clone()),
                    notification_type: NotificationType::Follow,
                    resource_type: Some("user".to_string()),
                    resource_id: Some(follower_id.clone()),
                    title: "你有一个新粉丝".to_string(),
                    body: Some(format!(
                        "{} 关注了你",
                        follower_name.unwrap_or_else(|| follower_id.clone())
                    )),
                    metadata: serde_json::Value::Null,
                })
            }
            SocialEvent::PostLiked {
                post_id,
                post_author_id,
                liker_id,
                liker_name,
            } => {
                if liker_id == post_author_id {
                    return None;
                }
                Some(CreateNotificationRequest {
                    recipient_id: post_author_id,
                    sender_id: Some(liker_id.clone()),
                    notification_type: NotificationType::PostLike,
                    resource_type: Some("post".to_string()),
                    resource_id: Some(post_id),
                    title: "有人喜欢你的帖子".to_string(),
                    body: Some(format!(
                        "{} 点赞了你的帖子",
                        liker_name.unwrap_or_else(|| liker_id.clone())
                    )),
                    metadata: serde_json::Value::Null,
                })
            }
            SocialEvent::PostCommented {
                post_id,
                post_author_id,
                comment_id,
                commenter_id,
                commenter_name: _,
                content,
            } => {
                if commenter_id == post_author_id {
                    return None;
                }
                Some(CreateNotificationRequest {
                    recipient_id: post_author_id,
                    sender_id: Some(commenter_id),
                    notification_type: NotificationType::PostComment,
                    resource_type: Some("post".to_string()),
                    resource_id: Some(post_id),
                    title: "有人评论了你的帖子".to_string(),
                    body: Some(truncate(&content, MAX_BODY_LENGTH)),
                    metadata: json!({ "comment_id": comment_id }),
                })
            }
            SocialEvent::CommentLiked {
                comment_id,
                comment_author_id,
                liker_id,
                liker_name,
            } => {
                if liker_id == comment_author_id {
                    return None;
                }
                Some(CreateNotificationRequest {
                    recipient_id: comment_author_id,
                    sender_id: Some(liker_id.clone()),
                    notification_type: NotificationType::CommentLike,
                    resource_type: Some("comment".to_string()),
                    resource_id: Some(comment_id),
                    title: "有人喜欢你的评论".to_string(),
                    body: Some(format!(
                        "{} 点赞了你的评论",
                        liker_name.unwrap_or_else(|| liker_id.clone())
                    )),
                    metadata: serde_json::Value::Null,
                })
            }
            SocialEvent::CommentReplied {
                comment_id,
                comment_author_id,
                reply_id,
                replier_id,
                replier_name: _,
                content,
            } => {
                if replier_id == comment_author_id {
                    return None;
                }
                Some(CreateNotificationRequest {
                    recipient_id: comment_author_id,
                    sender_id: Some(replier_id),
                    notification_type: NotificationType::CommentReply,
                    resource_type: Some("comment".to_string()),
                    resource_id: Some(reply_id),
                    title: "有人回复了你的评论".to_string(),
                    body: Some(truncate(&content, MAX_BODY_LENGTH)),
                    metadata: json!({ "parent_id": comment_id }),
                })
            }
            SocialEvent::Mentioned {
                mentioned_user_id,
                by_user_id,
                by_user_name: _,
                resource_type,
                resource_id,
                content,
            } => {
                if mentioned_user_id == by_user_id {
                    return None;
                }
                Some(CreateNotificationRequest {
                    recipient_id: mentioned_user_id,
                    sender_id: Some(by_user_id),
                    notification_type: NotificationType::Mention,
                    resource_type: Some(resource_type),
                    resource_id: Some(resource_id),
                    title: "有人提到了你".to_string(),
                    body: Some(truncate(&content, MAX_BODY_LENGTH)),
                    metadata: serde_json::Value::Null,
                })
            }
        }
    }
}

/// 截断正文，避免超长内容进入通知
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_event_materializes_notification() {
        let store = NotificationStore::new();
        EventDispatcher::dispatch(
            &store,
            SocialEvent::Followed {
                follower_id: "u2".to_string(),
                follower_name: Some("小明".to_string()),
                followee_id: "u1".to_string(),
            },
        );

        let page = store.list("u1", 1, 10);
        assert_eq!(page.total, 1);
        let notification = &page.items[0];
        assert_eq!(notification.notification_type, NotificationType::Follow);
        assert_eq!(notification.sender_id.as_deref(), Some("u2"));
        assert_eq!(notification.resource_type.as_deref(), Some("user"));
        assert_eq!(page.unread_count, 1);
    }

    #[test]
    fn test_self_action_is_skipped() {
        let store = NotificationStore::new();
        EventDispatcher::dispatch(
            &store,
            SocialEvent::PostLiked {
                post_id: "p1".to_string(),
                post_author_id: "u1".to_string(),
                liker_id: "u1".to_string(),
                liker_name: None,
            },
        );
        assert_eq!(store.list("u1", 1, 10).total, 0);
    }

    #[test]
    fn test_comment_body_is_truncated() {
        let store = NotificationStore::new();
        let content = "很长的评论".repeat(50);
        EventDispatcher::dispatch(
            &store,
            SocialEvent::PostCommented {
                post_id: "p1".to_string(),
                post_author_id: "u1".to_string(),
                comment_id: "c1".to_string(),
                commenter_id: "u2".to_string(),
                commenter_name: None,
                content,
            },
        );

        let page = store.list("u1", 1, 10);
        let body = page.items[0].body.as_ref().unwrap();
        assert!(body.ends_with("..."));
        assert!(body.chars().count() <= MAX_BODY_LENGTH + 3);
        assert_eq!(page.items[0].metadata["comment_id"], "c1");
    }
}
