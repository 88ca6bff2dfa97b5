//! AI writing trace removal ("humanizing")
//!
//! The rewrite itself is done by an external model. This module builds the
//! request for it and parses the structured reply.

pub mod parser;
pub mod prompt;

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use parser::ResponseParser;

/// How hard to rewrite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Gentle,
    #[default]
    Medium,
    Aggressive,
}

impl Intensity {
    /// Lenient parse; anything unrecognized is `Medium`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "gentle" | "light" | "温和" | "轻度" => Intensity::Gentle,
            "aggressive" | "heavy" | "激进" | "深度" => Intensity::Aggressive,
            _ => Intensity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Gentle => "gentle",
            Intensity::Medium => "medium",
            Intensity::Aggressive => "aggressive",
        }
    }
}

/// Pattern families the rewrite can concentrate on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusPattern {
    Content,
    Language,
    Style,
    Filler,
    Collaboration,
}

impl FocusPattern {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "content" | "内容" => Some(FocusPattern::Content),
            "language" | "语言" => Some(FocusPattern::Language),
            "style" | "风格" => Some(FocusPattern::Style),
            "filler" | "填充" => Some(FocusPattern::Filler),
            "collaboration" | "协作" => Some(FocusPattern::Collaboration),
            _ => None,
        }
    }

    /// Unknown entries are dropped
    pub fn parse_list<S: AsRef<str>>(items: &[S]) -> Vec<Self> {
        items
            .iter()
            .filter_map(|s| FocusPattern::parse(s.as_ref()))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HumanizeRequest {
    pub content: String,
    pub intensity: Intensity,
    pub focus_on: Vec<FocusPattern>,
    /// Keep the features of `original_style`
    pub preserve_style: bool,
    pub original_style: Option<String>,
    pub show_changes: bool,
    pub include_score: bool,
    /// e.g. "ai-generated", "human-written"
    pub source_hint: Option<String>,
}

/// One edit made by the rewrite
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub revised: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub reason: String,
}

/// Five-dimension quality score, each dimension out of 10
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Score {
    pub total: u32,
    pub directness: u32,
    pub rhythm: u32,
    pub trust: u32,
    pub authenticity: u32,
    pub conciseness: u32,
}

impl Score {
    pub fn dimension_sum(&self) -> u32 {
        [self.rhythm, self.trust, self.authenticity, self.conciseness]
            .into_iter()
            .fold(self.directness, u32::saturating_add)
    }

    pub fn rating(&self) -> &'static str {
        match self.total {
            t if t >= 45 => "优秀 - 已去除 AI 痕迹",
            t if t >= 35 => "良好 - 仍有改进空间",
            t if t >= 25 => "一般 - 需要进一步修订",
            _ => "较差 - 建议重新处理",
        }
    }
}

pub fn rating_of(score: Option<&Score>) -> &'static str {
    score.map_or("未评分", Score::rating)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HumanizeResult {
    pub success: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HumanizeResult {
    pub fn failed(content: &str, error: &str) -> Self {
        Self {
            success: false,
            content: content.to_string(),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Human-readable report
    pub fn summary(&self) -> String {
        if !self.success {
            return format!("[X] 处理失败: {}", self.error.as_deref().unwrap_or_default());
        }

        let mut out = String::from("[OK] 处理完成\n\n");
        if let Some(report) = &self.report {
            let _ = write!(out, "[修改说明]\n{}\n\n", report);
        }
        if !self.changes.is_empty() {
            let _ = write!(out, "[修改] 修改了 {} 处\n\n", self.change_count());
        }
        if let Some(score) = &self.score {
            let _ = write!(out, "[评分] 质量评分: {}/50 - {}\n\n", score.total, score.rating());
            out.push_str("| 维度 | 得分 |\n|------|------|\n");
            for (label, value) in [
                ("直接性", score.directness),
                ("节奏", score.rhythm),
                ("信任度", score.trust),
                ("真实性", score.authenticity),
                ("精炼度", score.conciseness),
            ] {
                let _ = writeln!(out, "| {} | {}/10 |", label, value);
            }
        }
        out
    }

    /// JSON payload for the CLI
    pub fn to_output(&self) -> Value {
        let mut out = json!({
            "success": self.success,
            "content": self.content,
            "summary": self.summary(),
        });

        if let Some(error) = &self.error {
            out["error"] = json!(error);
        }
        if let Some(report) = &self.report {
            out["report"] = json!(report);
        }
        if !self.changes.is_empty() {
            out["changes_count"] = json!(self.change_count());
            out["changes"] = json!(self.changes);
        }
        if let Some(score) = &self.score {
            let mut value = json!(score);
            value["rating"] = json!(score.rating());
            out["score"] = value;
        }

        out
    }
}

/// Everything the external model needs
#[derive(Debug, Clone, Serialize)]
pub struct AiRequest {
    pub content: String,
    pub intensity: Intensity,
    pub prompt: String,
}

/// Outcome of one humanize step
#[derive(Debug, Clone)]
pub enum HumanizeStep {
    Ready(HumanizeResult),
    NeedsExternalGeneration(AiRequest),
}

/// Without a model reply, produce the request for one; with a reply, parse it.
pub fn humanize(request: &HumanizeRequest, ai_response: Option<&str>) -> HumanizeStep {
    if request.content.trim().is_empty() {
        return HumanizeStep::Ready(HumanizeResult::failed(&request.content, "输入内容为空"));
    }

    match ai_response {
        Some(reply) => HumanizeStep::Ready(ResponseParser::new().parse(reply, &request.content)),
        None => HumanizeStep::NeedsExternalGeneration(AiRequest {
            content: request.content.clone(),
            intensity: request.intensity,
            prompt: prompt::build_prompt(request),
        }),
    }
}
