//! Writer styles loaded from YAML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::WriterError;

const DEFAULT_CATEGORY: &str = "自定义";
const DEFAULT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritingStyle {
    pub tone: String,
    pub voice: String,
    pub perspective: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleFormula {
    #[serde(rename = "type")]
    pub kind: String,
    pub template: String,
    pub examples: Vec<String>,
}

/// One writer persona
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterStyle {
    pub name: String,
    pub english_name: String,
    pub category: String,
    pub description: String,
    pub version: String,
    pub core_beliefs: Vec<String>,
    pub writing_style: WritingStyle,
    pub writing_prompt: String,
    pub title_formulas: Vec<TitleFormula>,
    pub quote_templates: Vec<String>,
    pub cover_style: String,
}

/// Listing entry for `write --list`
#[derive(Debug, Clone, Serialize)]
pub struct StyleSummary {
    pub name: String,
    pub english_name: String,
    pub category: String,
    pub description: String,
    pub cover_style: String,
}

impl From<&WriterStyle> for StyleSummary {
    fn from(style: &WriterStyle) -> Self {
        Self {
            name: style.name.clone(),
            english_name: style.english_name.clone(),
            category: style.category.clone(),
            description: style.description.clone(),
            cover_style: style.cover_style.clone(),
        }
    }
}

/// Directories searched for styles, first existing one wins
pub fn default_style_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("writers")];
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = PathBuf::from(home);
        dirs.push(home.join(".config").join("wechatwriter").join("writers"));
        dirs.push(home.join(".wechatwriter").join("writers"));
    }
    dirs
}

fn canonical_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.as_str() {
        "dankoe" | "dan" | "koe" => "dan-koe".to_string(),
        _ => name,
    }
}

/// Styles keyed by lowercase English name
#[derive(Debug, Default)]
pub struct StyleManager {
    dir: Option<PathBuf>,
    styles: BTreeMap<String, WriterStyle>,
}

impl StyleManager {
    /// Load from `dir`, or from the first existing default directory. No
    /// directory means no styles. Unreadable or invalid files are skipped.
    pub fn load(dir: Option<&Path>) -> Self {
        let dir = match dir {
            Some(d) => Some(d.to_path_buf()),
            None => default_style_dirs().into_iter().find(|d| d.is_dir()),
        };

        let mut manager = Self {
            dir: dir.clone(),
            styles: BTreeMap::new(),
        };

        let Some(dir) = dir else {
            tracing::debug!("No writer style directory found");
            return manager;
        };

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot read style directory {}: {}", dir.display(), e);
                return manager;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            match load_style(&path) {
                Ok(style) => {
                    tracing::debug!("Loaded writer style '{}' from {}", style.english_name, path.display());
                    manager.styles.insert(style.english_name.to_lowercase(), style);
                }
                Err(e) => tracing::warn!("Skipping style file {}: {}", path.display(), e),
            }
        }

        manager
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// By English name (aliases allowed), then by display name
    pub fn get(&self, name: &str) -> Result<&WriterStyle, WriterError> {
        let key = canonical_name(name);
        if let Some(style) = self.styles.get(&key) {
            return Ok(style);
        }

        self.styles
            .values()
            .find(|s| s.name == name.trim())
            .ok_or_else(|| WriterError::StyleNotFound {
                name: name.to_string(),
                available: self.styles.values().map(|s| s.english_name.clone()).collect(),
            })
    }

    pub fn list(&self) -> Vec<StyleSummary> {
        self.styles.values().map(StyleSummary::from).collect()
    }
}

fn load_style(path: &Path) -> Result<WriterStyle, String> {
    let data = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut style: WriterStyle = serde_yaml::from_str(&data).map_err(|e| e.to_string())?;

    if style.english_name.trim().is_empty() {
        return Err("english_name is required".to_string());
    }
    style.english_name = style.english_name.trim().to_string();
    if style.name.is_empty() {
        style.name = style.english_name.clone();
    }
    if style.category.is_empty() {
        style.category = DEFAULT_CATEGORY.to_string();
    }
    if style.version.is_empty() {
        style.version = DEFAULT_VERSION.to_string();
    }

    Ok(style)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAN_KOE: &str = r#"
name: 丹·科
english_name: dan-koe
description: 深刻但不学究
core_beliefs:
  - 专注是新的智商
  - 创造胜过消费
writing_style:
  tone: 直接
writing_prompt: 你是 Dan Koe 风格的写作者。
cover_style: minimal
"#;

    fn style_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dan-koe.yaml"), DAN_KOE).unwrap();
        std::fs::write(
            dir.path().join("plain.yml"),
            "name: 朴素\nenglish_name: Plain\ncategory: 生活\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "name: [unclosed\n").unwrap();
        std::fs::write(dir.path().join("nameless.yaml"), "name: 无名\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "english_name: txt\n").unwrap();
        dir
    }

    #[test]
    fn test_load_skips_invalid_files_and_fills_defaults() {
        let dir = style_dir();
        let manager = StyleManager::load(Some(dir.path()));

        let list = manager.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].english_name, "dan-koe");
        assert_eq!(list[0].category, DEFAULT_CATEGORY);
        assert_eq!(list[1].english_name, "Plain");
        assert_eq!(list[1].category, "生活");

        let style = manager.get("dan-koe").unwrap();
        assert_eq!(style.version, DEFAULT_VERSION);
        assert_eq!(style.core_beliefs.len(), 2);
        assert_eq!(style.writing_style.tone, "直接");
    }

    #[test]
    fn test_get_by_alias_and_display_name() {
        let dir = style_dir();
        let manager = StyleManager::load(Some(dir.path()));

        for name in ["dankoe", "Dan", "koe", "DAN-KOE"] {
            assert_eq!(manager.get(name).unwrap().english_name, "dan-koe");
        }
        assert_eq!(manager.get("plain").unwrap().name, "朴素");
        assert_eq!(manager.get("朴素").unwrap().english_name, "Plain");
    }

    #[test]
    fn test_unknown_style_lists_available() {
        let dir = style_dir();
        let manager = StyleManager::load(Some(dir.path()));

        match manager.get("hemingway").unwrap_err() {
            WriterError::StyleNotFound { name, available } => {
                assert_eq!(name, "hemingway");
                assert_eq!(available, vec!["dan-koe".to_string(), "Plain".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_directory_means_no_styles() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StyleManager::load(Some(&dir.path().join("absent")));
        assert!(manager.list().is_empty());
        assert!(manager.get("dan-koe").is_err());
    }
}
