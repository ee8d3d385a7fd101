use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chatgate::errors::CompletionError;
use serde_json::json;
use thiserror::Error;

pub const ENV_PREFIX: &str = "CHATGATE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable {env_var} must be set")]
    MissingEnvVar { env_var: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("No provider is configured, set {standard} or the {fee} settings")]
    NoProviders { standard: String, fee: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets the given dotted configuration key
pub fn to_env_var(field: &str) -> String {
    format!("{}_{}", ENV_PREFIX, field.replace('.', "__").to_uppercase())
}

/// A failed `/chat` request, rendered the way the HTTP contract describes
#[derive(Debug)]
pub struct ApiError(pub CompletionError);

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            CompletionError::EmptyQuery => (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, "text/plain")],
                "Error: Query parameter is required",
            )
                .into_response(),
            err @ CompletionError::ProviderUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response(),
            err => {
                tracing::error!("chat turn failed: {}", err);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
