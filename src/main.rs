use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, Router},
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notify_hub::{
    config::Config,
    routes,
    services::{AuthService, EventDispatcher, NotificationStore, PushGateway},
    state::AppState,
    utils::middleware::{auth_middleware, rate_limit_middleware, request_logging_middleware},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "notify_hub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting notify-hub service...");

    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化服务
    let store = Arc::new(NotificationStore::new());
    let gateway = PushGateway::attach(store.clone(), &config);
    let auth_service = AuthService::new(&config);
    let events_tx = EventDispatcher::spawn(store.clone());

    // 启动空闲通道清理任务
    gateway.start_idle_sweeper(config.channel_sweep_interval_secs);

    // 创建应用状态
    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        gateway,
        auth_service,
        events_tx,
    });

    // 配置 CORS
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(
            config
                .cors_allowed_origins
                .split(',')
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        );

    // 构建应用路由 - 使用/api/notify/前缀避免网关路由冲突
    // WebSocket 端点不走认证中间件，凭证在握手的查询参数里校验
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest(
            "/api/notify/notifications",
            routes::notifications::router().layer(middleware::from_fn_with_state(
                app_state.clone(),
                auth_middleware,
            )),
        )
        .nest(
            "/api/notify/events",
            routes::events::router().layer(middleware::from_fn_with_state(
                app_state.clone(),
                auth_middleware,
            )),
        )
        .nest("/api/notify/ws", routes::ws::router())
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "notify-hub is running!"
}
