//! WeChat Official Account API client
//!
//! Handles access tokens, permanent image material and drafts.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::account::Account;
use crate::draft::Article;
use crate::error::AppError;

pub const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";

/// Tokens are refreshed this long before WeChat says they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Uploaded permanent material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedMaterial {
    pub media_id: String,
    #[serde(rename = "url", default)]
    pub wechat_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    media_id: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct WechatClient {
    account_id: String,
    app_id: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    retry_delay: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl WechatClient {
    pub fn new(account: &Account, client: reqwest::Client) -> Self {
        Self {
            account_id: account.id.clone(),
            app_id: account.app_id.clone(),
            secret: account.secret.clone(),
            base_url: DEFAULT_API_BASE.to_string(),
            client,
            retry_delay: Duration::from_secs(1),
            token: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Get a valid access token, fetching a new one when the cached token is
    /// missing or close to expiry
    pub async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/cgi-bin/token", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.app_id.as_str()),
                ("secret", self.secret.as_str()),
            ])
            .send()
            .await?;

        let body = read_wechat_json(response).await?;
        let token: TokenResponse = serde_json::from_value(body)?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(
            "Access token refreshed for account '{}' (valid {}s)",
            self.account_id,
            token.expires_in
        );

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    /// Upload an image as permanent material
    pub async fn upload_image(&self, path: &Path) -> Result<UploadedMaterial, AppError> {
        let started = Instant::now();
        let token = self.access_token().await?;

        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.jpg")
            .to_string();
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime_for(path))?;
        let form = reqwest::multipart::Form::new().part("media", part);

        let url = format!("{}/cgi-bin/material/add_material", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .multipart(form)
            .send()
            .await?;

        let body = read_wechat_json(response).await?;
        let material: UploadedMaterial = serde_json::from_value(body)?;

        tracing::info!(
            "Material uploaded: {} -> {} ({:?})",
            path.display(),
            mask_media_id(&material.media_id),
            started.elapsed()
        );

        Ok(material)
    }

    /// Upload with up to `attempts` tries, pausing between failures
    pub async fn upload_image_with_retry(
        &self,
        path: &Path,
        attempts: u32,
    ) -> Result<UploadedMaterial, AppError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.upload_image(path).await {
                Ok(material) => return Ok(material),
                Err(e) if attempt < attempts => {
                    tracing::warn!("Upload attempt {}/{} failed: {}", attempt, attempts, e);
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Upload failed after {} attempts: {}", attempts, e);
                    return Err(e);
                }
            }
        }
    }

    /// Create a draft, returning its media id
    pub async fn add_draft(&self, articles: &[Article]) -> Result<String, AppError> {
        let started = Instant::now();
        let token = self.access_token().await?;

        let url = format!("{}/cgi-bin/draft/add", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&json!({ "articles": articles }))
            .send()
            .await?;

        let body = read_wechat_json(response).await?;
        let draft: DraftResponse = serde_json::from_value(body)?;

        tracing::info!(
            "Draft created: {} ({:?})",
            mask_media_id(&draft.media_id),
            started.elapsed()
        );

        Ok(draft.media_id)
    }
}

/// Decode a WeChat response body, turning a non-zero `errcode` into an error
async fn read_wechat_json(response: reqwest::Response) -> Result<Value, AppError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(AppError::BadRequest(format!(
            "WeChat API error {}: {}",
            status, text
        )));
    }

    let value: Value = serde_json::from_str(&text)?;
    check_errcode(&value)?;
    Ok(value)
}

fn check_errcode(value: &Value) -> Result<(), AppError> {
    let code = value.get("errcode").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }

    let message = value
        .get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    tracing::warn!("WeChat API returned errcode {}: {}", code, message);

    Err(AppError::Wechat { code, message })
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

/// A file in the temp directory, removed on drop
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to remove temp file {}: {}", self.path.display(), e);
        }
    }
}

/// Download `url` into a uniquely named temp file. The extension comes from
/// the URL path, defaulting to `.jpg`.
pub async fn download_file(client: &reqwest::Client, url: &str) -> Result<TempFile, AppError> {
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::BadRequest(format!(
            "download failed with status: {}",
            status.as_u16()
        )));
    }

    let ext = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_string)
        })
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "jpg".to_string());

    let path = std::env::temp_dir().join(format!(
        "wechat_writer_download_{}.{}",
        uuid::Uuid::new_v4().simple(),
        ext
    ));
    let file = TempFile::new(path);

    let bytes = response.bytes().await?;
    tokio::fs::write(file.path(), &bytes).await?;

    tracing::debug!("Downloaded {} bytes to {}", bytes.len(), file.path().display());
    Ok(file)
}

/// Shorten a media id for logs
pub fn mask_media_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() < 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}
