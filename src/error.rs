//! Error types for the CLI

use serde_json::{json, Value};

use crate::account::SelectionError;
use crate::config::ConfigError;
use crate::image::GenerateError;
use crate::writer::WriterError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("WeChat API error {code}: {message}")]
    Wechat { code: i64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Machine-readable code, when the underlying error carries one
    pub fn code(&self) -> Option<String> {
        match self {
            AppError::Config(_) => Some("config_error".to_string()),
            AppError::Selection(e) => Some(e.code().to_string()),
            AppError::Generate(e) => Some(e.code.as_str().to_string()),
            AppError::Writer(e) => Some(e.code().to_string()),
            AppError::Wechat { code, .. } => Some(format!("wechat_{}", code)),
            _ => None,
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            AppError::Config(e) => e.hint.as_deref(),
            AppError::Generate(e) => e.hint.as_deref(),
            AppError::Writer(e) => e.hint(),
            _ => None,
        }
    }

    /// JSON body printed on stdout when a command fails
    pub fn envelope(&self) -> Value {
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });

        if let Some(code) = self.code() {
            body["code"] = json!(code);
        }
        if let Some(hint) = self.hint() {
            body["hint"] = json!(hint);
        }
        if let AppError::Generate(e) = self {
            body["retryable"] = json!(e.code.is_retryable());
        }

        body
    }
}

/// JSON body printed on stdout when a command succeeds
pub fn success_envelope(data: Value) -> Value {
    json!({
        "success": true,
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ErrorCode;

    #[test]
    fn test_envelope_carries_code_and_hint() {
        let err = AppError::from(GenerateError::new(
            "OpenAI",
            ErrorCode::RateLimit,
            "请求过于频繁，请稍后重试",
            Some("稍后再试"),
        ));

        let body = err.envelope();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "rate_limit");
        assert_eq!(body["hint"], "稍后再试");
        assert_eq!(body["retryable"], true);
        assert!(body["error"].as_str().unwrap().contains("[OpenAI]"));
    }

    #[test]
    fn test_plain_errors_have_no_code() {
        let body = AppError::BadRequest("no articles in request".to_string()).envelope();
        assert_eq!(body["error"], "no articles in request");
        assert!(body.get("code").is_none());
        assert!(body.get("hint").is_none());
        assert!(body.get("retryable").is_none());
    }

    #[test]
    fn test_success_envelope() {
        let body = success_envelope(json!({"media_id": "m1"}));
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["media_id"], "m1");
    }
}
