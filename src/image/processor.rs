//! Upload pipelines: local file, remote URL, or AI-generated image,
//! each optionally compressed before being stored as WeChat material.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::compress::Compressor;
use super::{build_client, ImageProvider};
use crate::account::Account;
use crate::config::Config;
use crate::error::AppError;
use crate::wechat::{download_file, TempFile, UploadedMaterial, WechatClient};

const UPLOAD_ATTEMPTS: u32 = 3;
const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub media_id: String,
    pub wechat_url: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateUploadResult {
    pub prompt: String,
    pub original_url: String,
    pub media_id: String,
    pub wechat_url: String,
    pub account_id: String,
    pub model: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

pub struct ImageProcessor {
    compressor: Option<Compressor>,
    http: reqwest::Client,
    wechat: WechatClient,
}

impl ImageProcessor {
    /// Processor that uploads to `account`
    pub fn new(cfg: &Config, account: &Account) -> Result<Self, AppError> {
        let http = build_client(Duration::from_secs(cfg.http_timeout))?;
        let compressor = cfg
            .compress_images
            .then(|| Compressor::new(cfg.max_image_width, cfg.max_image_size));

        Ok(Self {
            compressor,
            wechat: WechatClient::new(account, http.clone()),
            http,
        })
    }

    pub fn with_wechat(mut self, wechat: WechatClient) -> Self {
        self.wechat = wechat;
        self
    }

    pub async fn upload_local(&self, path: &Path) -> Result<UploadResult, AppError> {
        tracing::info!("Uploading local image: {}", path.display());

        if !path.is_file() {
            return Err(AppError::NotFound(format!("file not found: {}", path.display())));
        }
        if !is_supported_image(path) {
            return Err(AppError::BadRequest(format!(
                "unsupported image format: {}",
                path.display()
            )));
        }

        let material = self.compress_and_upload(path).await?;
        Ok(self.upload_result(material))
    }

    pub async fn download_and_upload(&self, url: &str) -> Result<UploadResult, AppError> {
        tracing::info!("Downloading and uploading image: {}", url);

        let file = download_file(&self.http, url).await?;
        if !is_supported_image(file.path()) {
            return Err(AppError::BadRequest(
                "downloaded file is not a supported image".to_string(),
            ));
        }

        let material = self.compress_and_upload(file.path()).await?;
        Ok(self.upload_result(material))
    }

    pub async fn generate_and_upload(
        &self,
        provider: &ImageProvider,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerateUploadResult, AppError> {
        tracing::info!("Generating image via {}", provider.name());

        let generated = provider.generate(prompt, cancel).await?;
        tracing::info!(
            "Image generated: {} (model {}, size {})",
            generated.url,
            generated.model,
            generated.size
        );

        let file = download_file(&self.http, &generated.url).await?;
        let material = self.compress_and_upload(file.path()).await?;

        Ok(GenerateUploadResult {
            prompt: prompt.to_string(),
            original_url: generated.url,
            media_id: material.media_id,
            wechat_url: material.wechat_url,
            account_id: self.wechat.account_id().to_string(),
            model: generated.model,
            size: generated.size,
            revised_prompt: generated.revised_prompt,
        })
    }

    async fn compress_and_upload(&self, path: &Path) -> Result<UploadedMaterial, AppError> {
        let compressed = self.compress(path).await;
        let upload_path = compressed.as_ref().map(TempFile::path).unwrap_or(path);
        self.wechat
            .upload_image_with_retry(upload_path, UPLOAD_ATTEMPTS)
            .await
    }

    /// Compressed copy, if compression is enabled and helped. Failures fall
    /// back to the original file.
    async fn compress(&self, path: &Path) -> Option<TempFile> {
        let compressor = self.compressor.clone()?;
        let source: PathBuf = path.to_path_buf();

        match tokio::task::spawn_blocking(move || compressor.compress(&source)).await {
            Ok(Ok(Some(out))) => {
                tracing::info!("Using compressed image: {}", out.display());
                Some(TempFile::new(out))
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::warn!("Compression failed, using original: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Compression task failed, using original: {}", e);
                None
            }
        }
    }

    fn upload_result(&self, material: UploadedMaterial) -> UploadResult {
        UploadResult {
            media_id: material.media_id,
            wechat_url: material.wechat_url,
            account_id: self.wechat.account_id().to_string(),
        }
    }
}
