//! Image generation and upload pipeline
//! Supports OpenAI, TuZi (OpenAI-compatible) and ModelScope (async task API)

pub mod compress;
pub mod modelscope;
pub mod openai_compatible;
pub mod processor;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError};
use modelscope::ModelScopeProvider;
use openai_compatible::{Flavor, OpenAiCompatibleProvider};

/// Output of a successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateResult {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    pub model: String,
    pub size: String,
}

/// Machine-readable failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    RateLimit,
    BadRequest,
    PaymentRequired,
    TaskFailed,
    Timeout,
    Canceled,
    NetworkError,
    DecodeError,
    Unknown,
    NoImage,
    InvalidSize,
    NoTaskId,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::PaymentRequired => "payment_required",
            ErrorCode::TaskFailed => "task_failed",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Canceled => "canceled",
            ErrorCode::NetworkError => "network_error",
            ErrorCode::DecodeError => "decode_error",
            ErrorCode::Unknown => "unknown",
            ErrorCode::NoImage => "no_image",
            ErrorCode::InvalidSize => "invalid_size",
            ErrorCode::NoTaskId => "no_task_id",
        }
    }

    /// Whether a caller may reasonably try the same request again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimit | ErrorCode::NetworkError | ErrorCode::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[error(
    "[{provider}] {message}{}",
    .hint.as_ref().map(|h| format!("\n提示: {}", h)).unwrap_or_default()
)]
pub struct GenerateError {
    pub provider: &'static str,
    pub code: ErrorCode,
    pub message: String,
    pub hint: Option<String>,
    pub source: Option<BoxError>,
}

impl GenerateError {
    pub fn new(
        provider: &'static str,
        code: ErrorCode,
        message: impl Into<String>,
        hint: Option<&str>,
    ) -> Self {
        Self {
            provider,
            code,
            message: message.into(),
            hint: hint.map(str::to_string),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn canceled(provider: &'static str) -> Self {
        Self::new(provider, ErrorCode::Canceled, "操作已取消", None).with_source(
            std::io::Error::new(std::io::ErrorKind::Interrupted, "operation canceled"),
        )
    }

    pub(crate) fn network(provider: &'static str, message: &str, err: reqwest::Error) -> Self {
        Self::new(
            provider,
            ErrorCode::NetworkError,
            message,
            Some("确认网络连接正常，API 地址正确"),
        )
        .with_source(err)
    }

    pub(crate) fn decode(provider: &'static str, message: &str, err: reqwest::Error) -> Self {
        Self::new(provider, ErrorCode::DecodeError, message, None).with_source(err)
    }
}

/// Per-provider wording for HTTP status failures
pub(crate) struct StatusTexts {
    /// Prepended to the generic messages, e.g. "ModelScope "
    pub label: &'static str,
    pub unauthorized_hint: &'static str,
    pub rate_limit_hint: &'static str,
    pub bad_request_hint: &'static str,
    pub payment_required_hint: &'static str,
    pub unknown_hint: &'static str,
}

/// Map a non-200 response to a typed error
pub(crate) fn classify_status(
    provider: &'static str,
    texts: &StatusTexts,
    status: u16,
    body: &str,
) -> GenerateError {
    let label = texts.label;
    let err = match status {
        401 => GenerateError::new(
            provider,
            ErrorCode::Unauthorized,
            format!("{}API Key 无效或已过期", label),
            Some(texts.unauthorized_hint),
        ),
        429 => GenerateError::new(
            provider,
            ErrorCode::RateLimit,
            "请求过于频繁，请稍后重试",
            Some(texts.rate_limit_hint),
        ),
        400 => GenerateError::new(
            provider,
            ErrorCode::BadRequest,
            format!("请求参数错误: {}", extract_error_message(body)),
            Some(texts.bad_request_hint),
        ),
        402 | 403 => GenerateError::new(
            provider,
            ErrorCode::PaymentRequired,
            format!("{}账户余额不足或访问受限", label),
            Some(texts.payment_required_hint),
        ),
        _ => GenerateError::new(
            provider,
            ErrorCode::Unknown,
            format!("{}API 返回错误 (HTTP {})", label, status),
            Some(texts.unknown_hint),
        ),
    };

    err.with_source(format!("status {}: {}", status, body))
}

/// Best-effort error text from a provider error body
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.get("message"),
            value.get("error"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(msg) = candidate.as_str().filter(|m| !m.is_empty()) {
                return msg.to_string();
            }
        }
    }
    body.trim().to_string()
}

/// Build HTTP client with the configured timeout
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::new("http_client", format!("build http client: {}", e), None))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    TuZi,
    ModelScope,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "openai" => Ok(ProviderKind::OpenAi),
            "tuzi" => Ok(ProviderKind::TuZi),
            "modelscope" => Ok(ProviderKind::ModelScope),
            other => Err(ConfigError::new(
                "image_provider",
                format!("不支持的图片服务提供者: {}", other),
                Some("支持的提供者: openai, tuzi, modelscope"),
            )),
        }
    }
}

/// A configured image generation backend
#[derive(Debug, Clone)]
pub enum ImageProvider {
    OpenAiCompatible(OpenAiCompatibleProvider),
    ModelScope(ModelScopeProvider),
}

impl ImageProvider {
    /// Validate provider-specific settings, then construct
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let kind: ProviderKind = cfg.image_provider.parse()?;

        if cfg.image_api_key.is_empty() {
            return Err(ConfigError::new(
                "image_api_key",
                format!("使用 {} 生成图片需要配置 API Key", cfg.image_provider),
                Some("配置文件中设置 api.image_key 或环境变量 IMAGE_API_KEY"),
            ));
        }
        if kind == ProviderKind::TuZi && cfg.image_api_base.is_empty() {
            return Err(ConfigError::new(
                "image_api_base",
                "使用 TuZi 生成图片需要配置 API 地址",
                Some("配置文件中设置 api.image_base_url 或环境变量 IMAGE_API_BASE"),
            ));
        }

        let client = build_client(Duration::from_secs(cfg.http_timeout))?;

        let provider = match kind {
            ProviderKind::OpenAi | ProviderKind::TuZi => {
                let flavor = if kind == ProviderKind::TuZi {
                    Flavor::TuZi
                } else {
                    Flavor::OpenAi
                };
                ImageProvider::OpenAiCompatible(OpenAiCompatibleProvider::new(
                    flavor,
                    &cfg.image_api_key,
                    &cfg.image_api_base,
                    &cfg.image_model,
                    &cfg.image_size,
                    client,
                ))
            }
            ProviderKind::ModelScope => ImageProvider::ModelScope(ModelScopeProvider::new(
                &cfg.image_api_key,
                &cfg.image_api_base,
                &cfg.image_model,
                &cfg.image_size,
                client,
            )),
        };

        tracing::debug!("Image provider: {}", provider.name());
        Ok(provider)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageProvider::OpenAiCompatible(p) => p.name(),
            ImageProvider::ModelScope(p) => p.name(),
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerateResult, GenerateError> {
        match self {
            ImageProvider::OpenAiCompatible(p) => p.generate(prompt, cancel).await,
            ImageProvider::ModelScope(p) => p.generate(prompt, cancel).await,
        }
    }
}
