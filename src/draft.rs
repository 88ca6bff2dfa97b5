//! Draft creation service

use std::path::Path;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountRegistry};
use crate::error::AppError;
use crate::wechat::{WechatClient, DEFAULT_API_BASE};

const DIGEST_MAX_CHARS: usize = 120;
const DRAFT_URL: &str =
    "https://mp.weixin.qq.com/cgi-bin/appmsg?t=media/appmsg_edit_v2&action=edit&createType=0";
const TEST_ARTICLE_TITLE: &str = "AI生成测试文章";

lazy_static! {
    static ref BLOCK_END: Regex =
        Regex::new(r"(?i)</p>|<br\s*/?>|</div>|</h[1-6]>|</li>").unwrap();
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// A draft article as sent to WeChat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_cover_pic: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    #[serde(default)]
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftResult {
    pub media_id: String,
    pub draft_url: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
}

pub struct DraftService {
    registry: AccountRegistry,
    http: reqwest::Client,
    api_base: String,
}

impl DraftService {
    pub fn new(registry: AccountRegistry, http: reqwest::Client) -> Self {
        Self {
            registry,
            http,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    fn client_for(&self, account: &Account) -> WechatClient {
        WechatClient::new(account, self.http.clone()).with_base_url(&self.api_base)
    }

    /// Create a draft from a `{ "articles": [...] }` JSON file
    pub async fn create_from_file(
        &self,
        path: &Path,
        selector: Option<&str>,
    ) -> Result<DraftResult, AppError> {
        tracing::info!("Creating draft from file: {}", path.display());

        let data = tokio::fs::read_to_string(path).await?;
        let request: DraftRequest = serde_json::from_str(&data)?;

        self.create(request.articles, selector).await
    }

    pub async fn create(
        &self,
        mut articles: Vec<Article>,
        selector: Option<&str>,
    ) -> Result<DraftResult, AppError> {
        if articles.is_empty() {
            return Err(AppError::BadRequest("no articles in request".to_string()));
        }

        for article in articles.iter_mut() {
            fill_digest(article);
        }

        let account = self.registry.select(None, selector)?;
        tracing::info!(
            "Creating draft with account '{}' ({})",
            account.id,
            account.name
        );

        let client = self.client_for(account);
        let media_id = client.add_draft(&articles).await?;

        Ok(self.result(media_id, account))
    }

    /// Upload `cover`, then create a single-article draft from an HTML file
    pub async fn create_test_draft(
        &self,
        html_path: &Path,
        cover: &Path,
        title: Option<&str>,
        selector: Option<&str>,
    ) -> Result<DraftResult, AppError> {
        let html = tokio::fs::read_to_string(html_path).await?;
        self.create_with_cover(html, cover, title, selector).await
    }

    /// Upload `cover`, then create a single-article draft from `html`
    pub async fn create_with_cover(
        &self,
        html: String,
        cover: &Path,
        title: Option<&str>,
        selector: Option<&str>,
    ) -> Result<DraftResult, AppError> {
        let account = self.registry.select(None, selector)?;
        let client = self.client_for(account);

        let material = client.upload_image_with_retry(cover, 3).await?;

        let mut article = Article {
            title: title
                .filter(|t| !t.is_empty())
                .unwrap_or(TEST_ARTICLE_TITLE)
                .to_string(),
            content: html,
            thumb_media_id: Some(material.media_id),
            show_cover_pic: Some(1),
            ..Article::default()
        };
        fill_digest(&mut article);

        let media_id = client.add_draft(std::slice::from_ref(&article)).await?;
        Ok(self.result(media_id, account))
    }

    fn result(&self, media_id: String, account: &Account) -> DraftResult {
        DraftResult {
            media_id,
            draft_url: DRAFT_URL.to_string(),
            account_id: account.id.clone(),
            created_at: Utc::now(),
        }
    }
}

fn fill_digest(article: &mut Article) {
    let missing = article.digest.as_deref().map_or(true, |d| d.trim().is_empty());
    if missing {
        let digest = generate_digest(&article.content, DIGEST_MAX_CHARS);
        if !digest.is_empty() {
            article.digest = Some(digest);
        }
    }
}

/// Plain-text summary of HTML content, truncated to `max_chars` characters
pub fn generate_digest(content: &str, max_chars: usize) -> String {
    let text = BLOCK_END.replace_all(content, " ");
    let text = TAG.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        text
    }
}
