use crate::{
    config::Config,
    models::event::SocialEvent,
    services::{auth::AuthService, gateway::PushGateway, store::NotificationStore},
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 通知存储
    pub store: Arc<NotificationStore>,

    /// 推送网关
    pub gateway: Arc<PushGateway>,

    /// 认证服务
    pub auth_service: AuthService,

    /// 社交事件投递端
    pub events_tx: mpsc::UnboundedSender<SocialEvent>,
}

impl AppState {
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    pub fn is_development(&self) -> bool {
        self.config.is_development()
    }
}
