//! Configuration loading
//!
//! Priority: environment variables > config file > defaults.
//! Config files are YAML unless the extension is `.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::account::{Account, AccountRegistry};

const DEFAULT_MAX_IMAGE_WIDTH: u32 = 1920;
const DEFAULT_MAX_IMAGE_SIZE: u64 = 5 * 1024 * 1024;
const DEFAULT_HTTP_TIMEOUT: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("配置错误 [{field}]: {message}")]
pub struct ConfigError {
    pub field: String,
    pub message: String,
    pub hint: Option<String>,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            hint: hint.map(str::to_string),
        }
    }
}

/// Effective application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub wechat_accounts: Vec<Account>,
    pub default_account: String,

    pub image_provider: String,
    pub image_api_key: String,
    /// Empty means "provider default"
    pub image_api_base: String,
    pub image_model: String,
    pub image_size: String,

    pub compress_images: bool,
    pub max_image_width: u32,
    /// Bytes
    pub max_image_size: u64,

    /// Seconds
    pub http_timeout: u64,

    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wechat_accounts: Vec::new(),
            default_account: String::new(),
            image_provider: "openai".to_string(),
            image_api_key: String::new(),
            image_api_base: String::new(),
            image_model: String::new(),
            image_size: String::new(),
            compress_images: true,
            max_image_width: DEFAULT_MAX_IMAGE_WIDTH,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            config_file: None,
        }
    }
}

// ============ File format ============

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    wechat: WechatSection,
    #[serde(default)]
    api: ApiSection,
    #[serde(default)]
    image: ImageSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WechatSection {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    default: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiSection {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    image_provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    image_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    image_base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    image_model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    image_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_timeout: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compress: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_size_mb: Option<u64>,
}

impl Config {
    /// Load from `path` (or the first config file found), then the environment,
    /// then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        match path {
            Some(path) => {
                // An explicitly requested file must be usable
                cfg.apply_file(path)?;
                cfg.config_file = Some(path.to_path_buf());
            }
            None => {
                if let Some(found) = find_config_file() {
                    match cfg.apply_file(&found) {
                        Ok(()) => {
                            tracing::info!("Using config file: {}", found.display());
                            cfg.config_file = Some(found);
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Failed to load config file {} ({}), falling back to env/defaults",
                                found.display(),
                                e
                            );
                        }
                    }
                }
            }
        }

        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.validate()?;

        Ok(cfg)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(
                "config_file",
                format!("读取配置文件失败 {}: {}", path.display(), e),
                Some("检查文件路径和权限"),
            )
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let file: ConfigFile = if is_json {
            serde_json::from_str(&data).map_err(|e| {
                ConfigError::new("config_file", format!("parse json: {}", e), None)
            })?
        } else {
            serde_yaml::from_str(&data).map_err(|e| {
                ConfigError::new("config_file", format!("parse yaml: {}", e), None)
            })?
        };

        self.apply_config_file(file);
        Ok(())
    }

    fn apply_config_file(&mut self, file: ConfigFile) {
        self.wechat_accounts = file.wechat.accounts;
        self.default_account = file.wechat.default;

        let api = file.api;
        if !api.image_provider.is_empty() {
            self.image_provider = api.image_provider;
        }
        if !api.image_key.is_empty() {
            self.image_api_key = api.image_key;
        }
        if !api.image_base_url.is_empty() {
            self.image_api_base = api.image_base_url;
        }
        if !api.image_model.is_empty() {
            self.image_model = api.image_model;
        }
        if !api.image_size.is_empty() {
            self.image_size = api.image_size;
        }
        if let Some(timeout) = api.http_timeout.filter(|t| *t > 0) {
            self.http_timeout = timeout;
        }

        if let Some(compress) = file.image.compress {
            self.compress_images = compress;
        }
        if let Some(width) = file.image.max_width.filter(|w| *w > 0) {
            self.max_image_width = width;
        }
        if let Some(mb) = file.image.max_size_mb.filter(|m| *m > 0) {
            self.max_image_size = mb * 1024 * 1024;
        }
    }

    /// Apply overrides from an environment lookup
    fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.is_empty());

        if let Some(v) = get("IMAGE_PROVIDER") {
            self.image_provider = v;
        }
        if let Some(v) = get("IMAGE_API_KEY") {
            self.image_api_key = v;
        }
        if let Some(v) = get("IMAGE_API_BASE") {
            self.image_api_base = v;
        }
        if let Some(v) = get("IMAGE_MODEL") {
            self.image_model = v;
        }
        if let Some(v) = get("IMAGE_SIZE") {
            self.image_size = v;
        }
        if let Some(v) = get("COMPRESS_IMAGES") {
            self.compress_images = v == "true" || v == "1";
        }
        if let Some(v) = get("MAX_IMAGE_WIDTH").and_then(|v| v.parse().ok()) {
            self.max_image_width = v;
        }
        if let Some(v) = get("MAX_IMAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.max_image_size = v;
        }
        if let Some(v) = get("HTTP_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.http_timeout = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, acc) in self.wechat_accounts.iter().enumerate() {
            if acc.id.is_empty() {
                return Err(ConfigError::new(
                    format!("wechat.accounts[{}].id", i),
                    "账号 ID 不能为空",
                    Some("配置文件中设置 wechat.accounts[].id"),
                ));
            }
            if acc.app_id.is_empty() {
                return Err(ConfigError::new(
                    format!("wechat.accounts[{}].appid", i),
                    format!("账号 '{}' 的 AppID 未配置", acc.id),
                    Some("配置文件中设置 wechat.accounts[].appid"),
                ));
            }
            if acc.secret.is_empty() {
                return Err(ConfigError::new(
                    format!("wechat.accounts[{}].secret", i),
                    format!("账号 '{}' 的 Secret 未配置", acc.id),
                    Some("登录微信公众平台 > 设置与开发 > 基本配置 > 获取 Secret"),
                ));
            }
        }

        if let Some(dup) = self.account_registry().duplicate_ids().first() {
            return Err(ConfigError::new(
                "wechat.accounts",
                format!("账号 ID 重复: {}", dup),
                Some("每个账号的 id 必须唯一"),
            ));
        }

        if !(100..=10000).contains(&self.max_image_width) {
            return Err(ConfigError::new(
                "image.max_width",
                "图片最大宽度必须在 100 到 10000 之间",
                Some("配置文件中设置 image.max_width: 1920"),
            ));
        }
        if self.max_image_size < 100 * 1024 {
            return Err(ConfigError::new(
                "image.max_size_mb",
                "图片最大大小不能小于 100KB",
                Some("配置文件中设置 image.max_size_mb: 5"),
            ));
        }
        if !(1..=300).contains(&self.http_timeout) {
            return Err(ConfigError::new(
                "api.http_timeout",
                "超时时间必须在 1 到 300 秒之间",
                Some("配置文件中设置 api.http_timeout: 30"),
            ));
        }

        Ok(())
    }

    pub fn account_registry(&self) -> AccountRegistry {
        AccountRegistry::new(self.wechat_accounts.clone(), self.default_account.clone())
    }

    /// Effective config for display
    pub fn to_json(&self, mask_secrets: bool) -> Value {
        let accounts: Vec<Value> = self
            .wechat_accounts
            .iter()
            .map(|acc| account_json(acc, mask_secrets))
            .collect();

        json!({
            "wechat_accounts": accounts,
            "default_account": self.default_account,
            "image_provider": self.image_provider,
            "image_api_key": mask_if(&self.image_api_key, mask_secrets),
            "image_api_base": self.image_api_base,
            "image_model": self.image_model,
            "image_size": self.image_size,
            "compress_images": self.compress_images,
            "max_image_width": self.max_image_width,
            "max_image_size_mb": self.max_image_size / 1024 / 1024,
            "http_timeout": self.http_timeout,
            "config_file": self.config_file.as_ref().map(|p| p.display().to_string()),
        })
    }
}

pub fn account_json(acc: &Account, mask_secrets: bool) -> Value {
    json!({
        "id": acc.id,
        "name": acc.name,
        "appid": acc.app_id,
        "secret": mask_if(&acc.secret, mask_secrets),
        "keywords": acc.keywords,
        "default_style": acc.default_style,
    })
}

/// Config file candidates, user-level first, then the working directory
fn config_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = PathBuf::from(home);
        paths.push(home.join(".config").join("wechatwriter").join("config.yaml"));
        paths.push(home.join(".wechatwriter.yaml"));
        paths.push(home.join(".wechatwriter.yml"));
    }

    for name in [
        "wechatwriter.yaml",
        "wechatwriter.yml",
        "wechatwriter.json",
        ".wechatwriter.yaml",
        ".wechatwriter.yml",
        ".wechatwriter.json",
    ] {
        paths.push(PathBuf::from(name));
    }

    paths
}

fn find_config_file() -> Option<PathBuf> {
    config_candidates().into_iter().find(|p| p.is_file())
}

/// Default location for `config init`
pub fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("wechatwriter")
        .join("config.yaml")
}

/// Write a template config file. Refuses to overwrite.
pub fn write_template(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Err(ConfigError::new(
            "config_file",
            format!("config file already exists: {}", path.display()),
            None,
        ));
    }

    let template = ConfigFile {
        wechat: WechatSection {
            accounts: vec![Account {
                id: "my-account".to_string(),
                name: "我的公众号".to_string(),
                app_id: "your_wechat_appid".to_string(),
                secret: "your_wechat_secret".to_string(),
                keywords: vec!["关键词1".to_string(), "关键词2".to_string()],
                default_style: "dan-koe".to_string(),
            }],
            default: "my-account".to_string(),
        },
        api: ApiSection {
            image_provider: "openai".to_string(),
            image_key: "your_image_api_key".to_string(),
            image_base_url: "https://api.openai.com/v1".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            http_timeout: Some(DEFAULT_HTTP_TIMEOUT),
        },
        image: ImageSection {
            compress: Some(true),
            max_width: Some(DEFAULT_MAX_IMAGE_WIDTH),
            max_size_mb: Some(DEFAULT_MAX_IMAGE_SIZE / 1024 / 1024),
        },
    };

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let data = if is_json {
        serde_json::to_string_pretty(&template)
            .map_err(|e| ConfigError::new("config_file", format!("marshal config: {}", e), None))?
    } else {
        serde_yaml::to_string(&template)
            .map_err(|e| ConfigError::new("config_file", format!("marshal config: {}", e), None))?
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            ConfigError::new("config_file", format!("create directory: {}", e), None)
        })?;
    }

    std::fs::write(path, data)
        .map_err(|e| ConfigError::new("config_file", format!("write config file: {}", e), None))
}

fn mask_if(value: &str, mask: bool) -> String {
    if !mask || value.is_empty() {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE_YAML: &str = r#"
wechat:
  default: tech
  accounts:
    - id: tech
      name: 技术号
      appid: wx111
      secret: s111
      keywords: [rust, 编程]
    - id: life
      name: 生活号
      appid: wx222
      secret: s222
api:
  image_provider: modelscope
  image_key: ms-key
  image_size: 1280x720
  http_timeout: 45
image:
  compress: false
  max_width: 1080
  max_size_mb: 2
"#;

    fn write_config(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "config.yaml", SAMPLE_YAML);

        let mut cfg = Config::default();
        cfg.apply_file(&path).unwrap();

        assert_eq!(cfg.wechat_accounts.len(), 2);
        assert_eq!(cfg.wechat_accounts[0].app_id, "wx111");
        assert_eq!(cfg.wechat_accounts[0].keywords, vec!["rust", "编程"]);
        assert_eq!(cfg.default_account, "tech");
        assert_eq!(cfg.image_provider, "modelscope");
        assert_eq!(cfg.image_api_key, "ms-key");
        assert_eq!(cfg.image_size, "1280x720");
        assert_eq!(cfg.http_timeout, 45);
        assert!(!cfg.compress_images);
        assert_eq!(cfg.max_image_width, 1080);
        assert_eq!(cfg.max_image_size, 2 * 1024 * 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "wechatwriter.json",
            r#"{"wechat":{"accounts":[{"id":"a","appid":"wx","secret":"s"}]},"api":{"image_provider":"tuzi"}}"#,
        );

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.wechat_accounts[0].id, "a");
        assert_eq!(cfg.image_provider, "tuzi");
        assert_eq!(cfg.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_explicit_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.yaml"))).unwrap_err();
        assert_eq!(err.field, "config_file");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "config.yaml", SAMPLE_YAML);

        let env: HashMap<&str, &str> = [
            ("IMAGE_PROVIDER", "openai"),
            ("IMAGE_API_KEY", "env-key"),
            ("COMPRESS_IMAGES", "1"),
            ("MAX_IMAGE_SIZE", "204800"),
            ("HTTP_TIMEOUT", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_file(&path).unwrap();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.image_provider, "openai");
        assert_eq!(cfg.image_api_key, "env-key");
        assert!(cfg.compress_images);
        assert_eq!(cfg.max_image_size, 204800);
        // unparsable values keep the previous setting
        assert_eq!(cfg.http_timeout, 45);
    }

    #[test]
    fn test_validate_rejects_missing_secret() {
        let cfg = Config {
            wechat_accounts: vec![Account {
                id: "a".to_string(),
                name: String::new(),
                app_id: "wx".to_string(),
                secret: String::new(),
                keywords: vec![],
                default_style: String::new(),
            }],
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field, "wechat.accounts[0].secret");
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let acc = Account {
            id: "same".to_string(),
            name: String::new(),
            app_id: "wx".to_string(),
            secret: "s".to_string(),
            keywords: vec![],
            default_style: String::new(),
        };
        let cfg = Config {
            wechat_accounts: vec![acc.clone(), acc],
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field, "wechat.accounts");
        assert!(err.message.contains("same"));
    }

    #[test]
    fn test_validate_ranges() {
        let cfg = Config {
            max_image_width: 50,
            ..Config::default()
        };
        assert_eq!(cfg.validate().unwrap_err().field, "image.max_width");

        let cfg = Config {
            max_image_size: 1024,
            ..Config::default()
        };
        assert_eq!(cfg.validate().unwrap_err().field, "image.max_size_mb");

        let cfg = Config {
            http_timeout: 0,
            ..Config::default()
        };
        assert_eq!(cfg.validate().unwrap_err().field, "api.http_timeout");
    }

    #[test]
    fn test_empty_account_list_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_mask_if() {
        assert_eq!(mask_if("abcdefgh", true), "ab***gh");
        assert_eq!(mask_if("abcd", true), "***");
        assert_eq!(mask_if("", true), "");
        assert_eq!(mask_if("abcdefgh", false), "abcdefgh");
    }

    #[test]
    fn test_to_json_masks_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "config.yaml", SAMPLE_YAML);
        let mut cfg = Config::default();
        cfg.apply_file(&path).unwrap();

        let shown = cfg.to_json(true);
        assert_eq!(shown["image_api_key"], "ms***ey");
        assert_eq!(shown["wechat_accounts"][0]["secret"], "***");
        assert_eq!(shown["max_image_size_mb"], 2);
    }

    #[test]
    fn test_write_template_round_trips_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        write_template(&path).unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.default_account, "my-account");
        assert_eq!(cfg.max_image_width, 1920);

        assert!(write_template(&path).is_err());
    }
}
