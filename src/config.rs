use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // Authentication configuration
    pub jwt_secret: String,

    // Pagination
    pub default_page_size: usize,
    pub max_page_size: usize,

    // Push channel configuration
    pub channel_buffer_size: usize,
    pub channel_idle_timeout_secs: u64,
    pub channel_sweep_interval_secs: u64,

    // Client synchronizer defaults
    pub reconnect_interval_secs: u64,

    // Rate limiting
    pub rate_limit_requests: u32,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),

            default_page_size: env::var("DEFAULT_PAGE_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            max_page_size: env::var("MAX_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            channel_buffer_size: env::var("CHANNEL_BUFFER_SIZE")
                .unwrap_or_else(|_| "64".to_string())
                .parse()?,
            channel_idle_timeout_secs: env::var("CHANNEL_IDLE_TIMEOUT")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            channel_sweep_interval_secs: env::var("CHANNEL_SWEEP_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            reconnect_interval_secs: env::var("RECONNECT_INTERVAL")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// 约束分页参数到配置范围内
    pub fn clamp_page_size(&self, size: Option<usize>) -> usize {
        size.unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: "info".to_string(),
            jwt_secret: "change-me".to_string(),
            default_page_size: 20,
            max_page_size: 100,
            channel_buffer_size: 64,
            channel_idle_timeout_secs: 300,
            channel_sweep_interval_secs: 60,
            reconnect_interval_secs: 5,
            rate_limit_requests: 300,
            cors_allowed_origins: "http://localhost:3001".to_string(),
        }
    }
}
