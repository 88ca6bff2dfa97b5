//! Style-guided writing assistant
//!
//! The article is written by an external model. This module picks the writer
//! style and assembles the prompt for it.

pub mod style;

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Serialize;

use crate::humanizer::{prompt as humanize_prompt, HumanizeRequest, Intensity};

pub use style::{StyleManager, WriterStyle};

pub const DEFAULT_STYLE: &str = "dan-koe";

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("writer style not found: {name} (available: {})", available.join(", "))]
    StyleNotFound { name: String, available: Vec<String> },

    #[error("用户输入不能为空")]
    EmptyInput,

    #[error("invalid {field}: {value}")]
    InvalidOption { field: &'static str, value: String },
}

impl WriterError {
    pub fn code(&self) -> &'static str {
        match self {
            WriterError::StyleNotFound { .. } => "style_not_found",
            WriterError::EmptyInput => "empty_input",
            WriterError::InvalidOption { .. } => "invalid_option",
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            WriterError::StyleNotFound { .. } => {
                Some("运行 write --list 查看可用风格，或在 writers/ 目录添加 YAML 风格文件")
            }
            _ => None,
        }
    }
}

macro_rules! option_enum {
    ($name:ident, $field:literal, $default:ident, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = WriterError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    "" => Ok($name::default()),
                    $($text => Ok($name::$variant),)+
                    other => Err(WriterError::InvalidOption {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

option_enum!(InputType, "input type", Idea, {
    Idea => "idea",
    Fragment => "fragment",
    Outline => "outline",
    Title => "title",
});

option_enum!(ArticleType, "article type", Essay, {
    Essay => "essay",
    Commentary => "commentary",
    Story => "story",
    Tutorial => "tutorial",
    Review => "review",
    Suibi => "suibi",
});

option_enum!(Length, "length", Medium, {
    Short => "short",
    Medium => "medium",
    Long => "long",
});

#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub input: String,
    pub input_type: InputType,
    pub article_type: ArticleType,
    pub length: Length,
    pub title: Option<String>,
}

/// What the external model needs to write (or restyle) the article
#[derive(Debug, Clone, Serialize)]
pub struct WriteAiRequest {
    pub style: String,
    pub english_name: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humanizer: Option<HumanizerFollowUp>,
}

/// Second pass applied to the generated article
#[derive(Debug, Clone, Serialize)]
pub struct HumanizerFollowUp {
    pub enabled: bool,
    pub intensity: Intensity,
    pub prompt_template: String,
    pub instruction: String,
}

pub fn build_prompt(style: &WriterStyle, request: &WriteRequest) -> Result<String, WriterError> {
    if request.input.trim().is_empty() {
        return Err(WriterError::EmptyInput);
    }

    let mut prompt = String::new();
    prompt.push_str(&style.writing_prompt);
    prompt.push_str("\n\n");

    if !style.core_beliefs.is_empty() {
        prompt.push_str("## 核心写作 DNA\n");
        for (i, belief) in style.core_beliefs.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", i + 1, belief);
        }
        prompt.push('\n');
    }

    let _ = writeln!(prompt, "## 用户输入\n输入类型: {}", request.input_type.as_str());
    if let Some(title) = request.title.as_deref().filter(|t| !t.is_empty()) {
        let _ = writeln!(prompt, "标题: {}", title);
    }
    let _ = writeln!(prompt, "文章类型: {}", request.article_type.as_str());
    let _ = writeln!(prompt, "期望长度: {}", request.length.as_str());

    prompt.push_str("\n## 用户内容\n");
    prompt.push_str(&request.input);
    prompt.push_str("\n\n---\n\n请根据以上要求，生成符合该风格的文章。直接输出文章内容，不需要其他说明。");

    Ok(prompt)
}

/// Prompt for restyling existing text, with optional reader feedback
pub fn build_refine_prompt(
    style: &WriterStyle,
    content: &str,
    feedback: Option<&str>,
) -> Result<String, WriterError> {
    if content.trim().is_empty() {
        return Err(WriterError::EmptyInput);
    }

    let mut prompt = String::new();
    prompt.push_str(&style.writing_prompt);
    prompt.push_str("\n\n## 润色任务\n请将以下内容用该风格重新润色：\n\n### 原文\n");
    prompt.push_str(content);
    if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
        let _ = write!(prompt, "\n\n### 用户反馈\n{}", feedback);
    }
    prompt.push_str("\n\n---\n\n请输出润色后的内容，保持原意，用该风格重新表达。");

    Ok(prompt)
}

/// Humanize prompt template that keeps the writer's style. The generated
/// article goes after its trailing text heading.
pub fn humanizer_follow_up(style: &WriterStyle, intensity: Intensity) -> HumanizerFollowUp {
    let request = HumanizeRequest {
        intensity,
        preserve_style: true,
        original_style: Some(style.english_name.clone()),
        show_changes: true,
        include_score: true,
        ..HumanizeRequest::default()
    };

    HumanizerFollowUp {
        enabled: true,
        intensity,
        prompt_template: humanize_prompt::build_prompt(&request),
        instruction: "先生成文章，然后使用 humanizer prompt 去除 AI 痕迹".to_string(),
    }
}

/// Build the generation request for `request` in `style`
pub fn prepare(
    style: &WriterStyle,
    request: &WriteRequest,
    humanize: Option<Intensity>,
) -> Result<WriteAiRequest, WriterError> {
    let prompt = build_prompt(style, request)?;
    tracing::info!(
        "Writing request prepared: style {}, {} / {} / {}",
        style.english_name,
        request.input_type.as_str(),
        request.article_type.as_str(),
        request.length.as_str()
    );

    Ok(WriteAiRequest {
        style: style.name.clone(),
        english_name: style.english_name.clone(),
        prompt,
        humanizer: humanize.map(|i| humanizer_follow_up(style, i)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> WriterStyle {
        WriterStyle {
            name: "丹·科".to_string(),
            english_name: "dan-koe".to_string(),
            writing_prompt: "你是 Dan Koe 风格的写作者。".to_string(),
            core_beliefs: vec!["专注是新的智商".to_string(), "创造胜过消费".to_string()],
            ..WriterStyle::default()
        }
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!("".parse::<InputType>().unwrap(), InputType::Idea);
        assert_eq!(" Outline ".parse::<InputType>().unwrap(), InputType::Outline);
        assert_eq!("suibi".parse::<ArticleType>().unwrap(), ArticleType::Suibi);
        assert_eq!("long".parse::<Length>().unwrap(), Length::Long);

        let err = "novel".parse::<ArticleType>().unwrap_err();
        assert_eq!(err.code(), "invalid_option");
        assert!(err.to_string().contains("novel"));
    }

    #[test]
    fn test_build_prompt_layout() {
        let request = WriteRequest {
            input: "关于专注的一点想法".to_string(),
            title: Some("专注的代价".to_string()),
            length: Length::Short,
            ..WriteRequest::default()
        };

        let prompt = build_prompt(&style(), &request).unwrap();
        assert_eq!(
            prompt,
            "你是 Dan Koe 风格的写作者。\n\n\
             ## 核心写作 DNA\n1. 专注是新的智商\n2. 创造胜过消费\n\n\
             ## 用户输入\n输入类型: idea\n标题: 专注的代价\n文章类型: essay\n期望长度: short\n\
             \n## 用户内容\n关于专注的一点想法\
             \n\n---\n\n请根据以上要求，生成符合该风格的文章。直接输出文章内容，不需要其他说明。"
        );
    }

    #[test]
    fn test_build_prompt_without_beliefs_or_title() {
        let mut style = style();
        style.core_beliefs.clear();
        let request = WriteRequest {
            input: "片段".to_string(),
            input_type: InputType::Fragment,
            ..WriteRequest::default()
        };

        let prompt = build_prompt(&style, &request).unwrap();
        assert!(!prompt.contains("核心写作 DNA"));
        assert!(!prompt.contains("标题:"));
        assert!(prompt.contains("输入类型: fragment\n"));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let request = WriteRequest {
            input: "  \n".to_string(),
            ..WriteRequest::default()
        };
        assert!(matches!(build_prompt(&style(), &request), Err(WriterError::EmptyInput)));
        assert!(matches!(build_refine_prompt(&style(), "", None), Err(WriterError::EmptyInput)));
    }

    #[test]
    fn test_refine_prompt_feedback_is_optional() {
        let plain = build_refine_prompt(&style(), "原文内容", None).unwrap();
        assert!(plain.contains("### 原文\n原文内容\n\n---"));
        assert!(!plain.contains("### 用户反馈"));

        let with = build_refine_prompt(&style(), "原文内容", Some("更口语一些")).unwrap();
        assert!(with.contains("### 用户反馈\n更口语一些"));
        assert!(with.ends_with("请输出润色后的内容，保持原意，用该风格重新表达。"));
    }

    #[test]
    fn test_prepare_with_humanizer_follow_up() {
        let request = WriteRequest {
            input: "想法".to_string(),
            ..WriteRequest::default()
        };

        let plain = prepare(&style(), &request, None).unwrap();
        assert_eq!(plain.style, "丹·科");
        assert!(plain.humanizer.is_none());

        let ai = prepare(&style(), &request, Some(Intensity::Gentle)).unwrap();
        let follow_up = ai.humanizer.unwrap();
        assert!(follow_up.enabled);
        assert_eq!(follow_up.intensity, Intensity::Gentle);
        assert!(follow_up.prompt_template.contains("「dan-koe」"));
        assert!(follow_up.prompt_template.ends_with("# 待处理文本\n\n"));
    }
}
