use serde::{Deserialize, Serialize};

/// 社交动作事件
/// 由帖子/评论/关注等 CRUD 服务投递，通知子系统只消费
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocialEvent {
    Followed {
        follower_id: String,
        follower_name: Option<String>,
        followee_id: String,
    },
    PostLiked {
        post_id: String,
        post_author_id: String,
        liker_id: String,
        liker_name: Option<String>,
    },
    PostCommented {
        post_id: String,
        post_author_id: String,
        comment_id: String,
        commenter_id: String,
        commenter_name: Option<String>,
        content: String,
    },
    CommentLiked {
        comment_id: String,
        comment_author_id: String,
        liker_id: String,
        liker_name: Option<String>,
    },
    CommentReplied {
        comment_id: String,
        comment_author_id: String,
        reply_id: String,
        replier_id: String,
        replier_name: Option<String>,
        content: String,
    },
    Mentioned {
        mentioned_user_id: String,
        by_user_id: String,
        by_user_name: Option<String>,
        resource_type: String,
        resource_id: String,
        content: String,
    },
}
