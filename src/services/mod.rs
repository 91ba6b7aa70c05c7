pub mod auth;
pub mod client;
pub mod dispatcher;
pub mod gateway;
pub mod store;

// 重新导出常用类型
pub use auth::AuthService;
pub use client::{NotificationSync, SyncHandle, SyncState};
pub use dispatcher::EventDispatcher;
pub use gateway::PushGateway;
pub use store::NotificationStore;
