use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}

/// Failure to turn a resource string into an [`Item`](crate::domain::item::Item).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("malformed resource {resource:?}: expected host:port")]
    MalformedResource { resource: String },
    #[error("invalid port {port:?} in resource {resource:?}")]
    InvalidPort { resource: String, port: String },
    #[error("invalid scheme in resource {resource:?}")]
    InvalidScheme { resource: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("failed to resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },
    #[error("failed to load system resolver configuration: {reason}")]
    SystemConfig { reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid duration {value:?} for {setting}")]
    InvalidDuration { setting: &'static str, value: String },
    #[error("invalid boolean {value:?} for {setting}")]
    InvalidBool { setting: &'static str, value: String },
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
    #[error("invalid listen address {0:?}")]
    InvalidListenAddress(String),
    #[error("empty items list")]
    NoItems,
}
