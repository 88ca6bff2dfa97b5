//! Markdown to WeChat HTML conversion
//!
//! The HTML itself is written by an external model. This module prepares the
//! request, tracks the article's image references through `<!-- IMG:n -->`
//! placeholders, and swaps uploaded WeChat URLs back in.

pub mod prompt;

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::image::processor::ImageProcessor;
use crate::image::ImageProvider;
use crate::wechat::mask_media_id;

pub const DEFAULT_THEME: &str = "default";
const UNTITLED: &str = "未命名文章";
const IMAGE_STYLE: &str = "max-width:100%;height:auto;display:block;margin:20px auto;";

lazy_static! {
    static ref MARKDOWN_IMAGE: Regex = Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap();
    static ref AI_IMAGE: Regex = Regex::new(r"^__generate:(.+)__$").unwrap();
    static ref PLACEHOLDER: Regex = Regex::new(r"<!-- IMG:(\d+) -->").unwrap();
    static ref HTML_FENCE: Regex = Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```$").unwrap();
}

/// Where an image comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// `./relative/path.png`
    Local,
    /// `http(s)://...`
    Online,
    /// `__generate:prompt__`
    Ai,
}

/// One image referenced by the Markdown source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub index: usize,
    /// Path, URL, or generation prompt as written
    pub original: String,
    pub placeholder: String,
    #[serde(rename = "type")]
    pub kind: ImageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wechat_url: Option<String>,
}

pub fn placeholder(index: usize) -> String {
    format!("<!-- IMG:{} -->", index)
}

/// Image references in document order. Targets that are neither `./` paths,
/// http(s) URLs nor `__generate:...__` prompts are ignored.
pub fn extract_images(markdown: &str) -> Vec<ImageRef> {
    let mut images = Vec::new();

    for caps in MARKDOWN_IMAGE.captures_iter(markdown) {
        let target = caps[2].trim();

        let (kind, ai_prompt) = if target.starts_with("./") {
            (ImageKind::Local, None)
        } else if target.starts_with("http://") || target.starts_with("https://") {
            (ImageKind::Online, None)
        } else if let Some(prompt) = AI_IMAGE.captures(target) {
            (ImageKind::Ai, Some(prompt[1].to_string()))
        } else {
            continue;
        };

        let index = images.len();
        images.push(ImageRef {
            index,
            original: ai_prompt.clone().unwrap_or_else(|| target.to_string()),
            placeholder: placeholder(index),
            kind,
            ai_prompt,
            wechat_url: None,
        });
    }

    images
}

fn is_image_line(line: &str) -> bool {
    line.starts_with("![") || line.starts_with("<img") || line.starts_with("<!-- IMG:")
}

/// Replace every line that is an image (Markdown syntax, `<img>` tag, or an
/// existing placeholder) with sequentially numbered placeholders
pub fn insert_placeholders(html: &str) -> String {
    let mut next = 0;
    html.split('\n')
        .map(|line| {
            if is_image_line(line.trim()) {
                let p = placeholder(next);
                next += 1;
                p
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Placeholder indexes present in `html`, in order of appearance
pub fn placeholder_indexes(html: &str) -> Vec<usize> {
    PLACEHOLDER
        .captures_iter(html)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

fn image_tag(url: &str) -> String {
    format!(
        r#"<img src="{}" style="{}" alt="" />"#,
        html_escape::encode_double_quoted_attribute(url),
        IMAGE_STYLE
    )
}

/// Swap placeholders for `<img>` tags. Images without a WeChat URL keep their
/// placeholder.
pub fn replace_placeholders(html: &str, images: &[ImageRef]) -> String {
    let mut out = html.to_string();
    for image in images {
        if image.placeholder.is_empty() {
            continue;
        }
        if let Some(url) = image.wechat_url.as_deref().filter(|u| !u.is_empty()) {
            out = out.replace(&image.placeholder, &image_tag(url));
        }
    }
    out
}

/// First heading, else the first plain line; images and quotes are skipped
pub fn markdown_title(markdown: &str) -> String {
    for line in markdown.lines().map(str::trim) {
        if line.starts_with('#') {
            let title = line.trim_start_matches('#').trim();
            if !title.is_empty() {
                return title.to_string();
            }
        } else if !line.is_empty() && !line.starts_with('!') && !line.starts_with('>') {
            return line.to_string();
        }
    }
    UNTITLED.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct ConvertRequest {
    pub markdown: String,
    pub theme: String,
    /// Replaces the built-in formatting instructions
    pub custom_prompt: Option<String>,
}

/// What the external model needs to produce the HTML
#[derive(Debug, Clone, Serialize)]
pub struct ConvertAiRequest {
    pub theme: String,
    pub prompt: String,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertedArticle {
    pub title: String,
    pub theme: String,
    pub html: String,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone)]
pub enum ConvertStep {
    Ready(ConvertedArticle),
    NeedsExternalGeneration(ConvertAiRequest),
}

/// Without the model's HTML, produce the request for it; with it, normalise
/// the HTML and attach the image references.
pub fn convert(request: &ConvertRequest, ai_html: Option<&str>) -> Result<ConvertStep, AppError> {
    if request.markdown.trim().is_empty() {
        return Err(AppError::BadRequest(
            "markdown content cannot be empty".to_string(),
        ));
    }

    let theme = if request.theme.is_empty() {
        DEFAULT_THEME.to_string()
    } else {
        request.theme.clone()
    };
    let images = extract_images(&request.markdown);

    let Some(reply) = ai_html else {
        let prompt = prompt::build_prompt(&theme, request.custom_prompt.as_deref(), &request.markdown);
        tracing::info!(
            "AI conversion request prepared (theme {}, {} image(s), {} chars)",
            theme,
            images.len(),
            prompt.chars().count()
        );
        return Ok(ConvertStep::NeedsExternalGeneration(ConvertAiRequest {
            theme,
            prompt,
            images,
        }));
    };

    let html = strip_fence(reply);
    if html.is_empty() {
        return Err(AppError::BadRequest("AI returned empty HTML".to_string()));
    }

    let html = insert_placeholders(&html);
    let found = placeholder_indexes(&html).len();
    if found != images.len() {
        tracing::warn!(
            "HTML has {} image placeholder(s), Markdown references {} image(s)",
            found,
            images.len()
        );
    }

    Ok(ConvertStep::Ready(ConvertedArticle {
        title: markdown_title(&request.markdown),
        theme,
        html,
        images,
    }))
}

fn strip_fence(reply: &str) -> String {
    let reply = reply.trim();
    match HTML_FENCE.captures(reply).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => reply.to_string(),
    }
}

/// Upload every image of `article` and swap its placeholder for the WeChat
/// URL. Individual failures are logged and skipped. Returns the number of
/// uploaded images.
pub async fn upload_images(
    article: &mut ConvertedArticle,
    processor: &ImageProcessor,
    provider: Option<&ImageProvider>,
    base_dir: &Path,
    cancel: &CancellationToken,
) -> usize {
    let mut uploaded = 0;

    for image in article.images.iter_mut() {
        tracing::info!(
            "Processing image {} ({:?}): {}",
            image.index,
            image.kind,
            image.original
        );

        let result = match image.kind {
            ImageKind::Local => processor
                .upload_local(&base_dir.join(&image.original))
                .await
                .map(|r| (r.media_id, r.wechat_url)),
            ImageKind::Online => processor
                .download_and_upload(&image.original)
                .await
                .map(|r| (r.media_id, r.wechat_url)),
            ImageKind::Ai => match provider {
                Some(provider) => processor
                    .generate_and_upload(provider, &image.original, cancel)
                    .await
                    .map(|r| (r.media_id, r.wechat_url)),
                None => {
                    tracing::warn!("Image {} needs generation but no provider is configured", image.index);
                    continue;
                }
            },
        };

        match result {
            Ok((media_id, wechat_url)) => {
                tracing::info!(
                    "Image {} uploaded: {} {}",
                    image.index,
                    mask_media_id(&media_id),
                    wechat_url
                );
                image.wechat_url = Some(wechat_url);
                uploaded += 1;
            }
            Err(e) => tracing::warn!("Image {} upload failed: {}", image.index, e),
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    article.html = replace_placeholders(&article.html, &article.images);
    uploaded
}
