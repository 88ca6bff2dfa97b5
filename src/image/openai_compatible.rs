//! OpenAI-Compatible image generation
//! One synchronous request per image. Also used for TuZi, which speaks the
//! same protocol with a couple of extra headers.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{classify_status, ErrorCode, GenerateError, GenerateResult, StatusTexts};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "dall-e-3";
const OPENAI_SIZE: &str = "1024x1024";

const TUZI_MODEL: &str = "doubao-seedream-4-5-251128";
const TUZI_SIZE: &str = "2048x2048";

const OPENAI_TEXTS: StatusTexts = StatusTexts {
    label: "",
    unauthorized_hint: "请检查配置文件中的 api.image_key 是否正确",
    rate_limit_hint: "OpenAI API 有速率限制，请等待一段时间后再试",
    bad_request_hint: "请检查图片尺寸、模型名称等参数是否正确",
    payment_required_hint: "请检查 OpenAI 账户余额和 API 使用权限",
    unknown_hint: "请稍后重试，或检查 OpenAI 服务状态",
};

const TUZI_TEXTS: StatusTexts = StatusTexts {
    label: "TuZi ",
    unauthorized_hint: "请检查配置文件中的 api.image_key 是否正确，或前往 TuZi 控制台获取新的 API Key",
    rate_limit_hint: "TuZi API 有速率限制，请等待一段时间后再试，或考虑升级套餐",
    bad_request_hint: "请检查图片尺寸、模型名称等参数是否正确。支持的模型: gemini-3-pro-image-preview, doubao-seedream-4-5-251128",
    payment_required_hint: "请前往 TuZi 控制台充值或检查 API 使用权限",
    unknown_hint: "请稍后重试，或访问 TuZi 控制台查看服务状态",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenAi,
    TuZi,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: String,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    flavor: Flavor,
    api_key: String,
    base_url: String,
    model: String,
    size: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Empty `base_url`, `model` or `size` select the flavor's defaults
    pub fn new(
        flavor: Flavor,
        api_key: &str,
        base_url: &str,
        model: &str,
        size: &str,
        client: reqwest::Client,
    ) -> Self {
        let (default_model, default_size) = match flavor {
            Flavor::OpenAi => (OPENAI_MODEL, OPENAI_SIZE),
            Flavor::TuZi => (TUZI_MODEL, TUZI_SIZE),
        };
        let base_url = if base_url.is_empty() {
            OPENAI_BASE_URL
        } else {
            base_url
        };

        Self {
            flavor,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: non_empty_or(model, default_model),
            size: non_empty_or(size, default_size),
            client,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.flavor {
            Flavor::OpenAi => "OpenAI",
            Flavor::TuZi => "TuZi",
        }
    }

    fn texts(&self) -> &'static StatusTexts {
        match self.flavor {
            Flavor::OpenAi => &OPENAI_TEXTS,
            Flavor::TuZi => &TUZI_TEXTS,
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerateResult, GenerateError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerateError::canceled(self.name())),
            result = self.request(prompt) => result,
        }
    }

    async fn request(&self, prompt: &str) -> Result<GenerateResult, GenerateError> {
        let url = format!("{}/images/generations", self.base_url);

        let request = ImageGenerationRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: &self.size,
            response_format: (self.flavor == Flavor::TuZi).then_some("url"),
        };

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request);

        if self.flavor == Flavor::TuZi {
            builder = builder
                .header("HTTP-Referer", "https://wechatwriter.cn")
                .header("X-Title", "WeChat Markdown Editor");
        }

        tracing::info!("Generating image via {} (model {}, size {})", self.name(), self.model, self.size);

        let response = builder
            .send()
            .await
            .map_err(|e| GenerateError::network(self.name(), "网络请求失败，请检查网络连接", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("{} image API error {}", self.name(), status);
            return Err(classify_status(self.name(), self.texts(), status.as_u16(), &body));
        }

        let data: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::decode(self.name(), "响应解析失败", e))?;

        let image = data
            .data
            .into_iter()
            .next()
            .filter(|d| !d.url.is_empty())
            .ok_or_else(|| {
                GenerateError::new(
                    self.name(),
                    ErrorCode::NoImage,
                    "未生成图片",
                    Some("提示词可能不符合内容政策，请尝试修改提示词"),
                )
            })?;

        Ok(GenerateResult {
            url: image.url,
            revised_prompt: image.revised_prompt.filter(|p| !p.is_empty()),
            model: self.model.clone(),
            size: self.size.clone(),
        })
    }
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(flavor: Flavor, server: &MockServer) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            flavor,
            "test-key",
            &format!("{}/", server.uri()),
            "",
            "",
            reqwest::Client::new(),
        )
    }

    async fn respond_with_status(status: u16, body: serde_json::Value) -> GenerateError {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;

        provider(Flavor::OpenAi, &server)
            .generate("a cat", &CancellationToken::new())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "dall-e-3",
                "prompt": "a cat",
                "n": 1,
                "size": "1024x1024"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"url": "https://img.example/cat.png", "revised_prompt": "a fluffy cat"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(Flavor::OpenAi, &server)
            .generate("a cat", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.url, "https://img.example/cat.png");
        assert_eq!(result.revised_prompt.as_deref(), Some("a fluffy cat"));
        assert_eq!(result.model, "dall-e-3");
        assert_eq!(result.size, "1024x1024");
    }

    #[tokio::test]
    async fn test_tuzi_sends_extra_headers_and_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(header("HTTP-Referer", "https://wechatwriter.cn"))
            .and(header("X-Title", "WeChat Markdown Editor"))
            .and(body_partial_json(json!({
                "model": "doubao-seedream-4-5-251128",
                "size": "2048x2048",
                "response_format": "url"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"url": "https://img.example/t.png"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(Flavor::TuZi, &server)
            .generate("a dog", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.url, "https://img.example/t.png");
        assert!(result.revised_prompt.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_regardless_of_body() {
        let err = respond_with_status(401, json!({"unexpected": true})).await;
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.provider, "OpenAI");
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let err = respond_with_status(429, json!({})).await;
        assert_eq!(err.code, ErrorCode::RateLimit);
        assert!(err.code.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_request_carries_server_message() {
        let err = respond_with_status(
            400,
            json!({"error": {"message": "Invalid size", "type": "invalid_request_error"}}),
        )
        .await;
        assert_eq!(err.code, ErrorCode::BadRequest);
        assert!(err.message.contains("Invalid size"));
    }

    #[tokio::test]
    async fn test_forbidden_is_payment_required() {
        let err = respond_with_status(403, json!({})).await;
        assert_eq!(err.code, ErrorCode::PaymentRequired);
    }

    #[tokio::test]
    async fn test_unmapped_status_is_unknown() {
        let err = respond_with_status(503, json!({})).await;
        assert_eq!(err.code, ErrorCode::Unknown);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn test_empty_data_is_no_image() {
        let err = respond_with_status(200, json!({"data": []})).await;
        assert_eq!(err.code, ErrorCode::NoImage);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = provider(Flavor::OpenAi, &server)
            .generate("a cat", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DecodeError);
    }

    #[tokio::test]
    async fn test_canceled_before_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"url": "u"}]}))
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider(Flavor::OpenAi, &server)
            .generate("a cat", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Canceled);
        assert!(err.source.is_some());
    }
}
