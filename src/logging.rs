use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, level_filters::LevelFilter, Level};
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::ConfigError;

/// Logging settings handed to [`init_logging`] by the entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LogConfig {
    /// Accepts tracing level names plus the `warning`, `fatal` and `panic` aliases.
    pub fn parse(level: &str) -> Result<Self, ConfigError> {
        let level = match level.trim().to_ascii_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" | "fatal" | "panic" => Level::ERROR,
            _ => return Err(ConfigError::InvalidLogLevel(level.to_string())),
        };
        Ok(Self { level })
    }
}

/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(config.level).into())
    });
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    response
}
