//! Extraction of humanized text, change notes and score from a model reply
//!
//! Replies are expected to use `# <header>` sections, but any subset may be
//! missing, reordered, or replaced by plain prose.

use lazy_static::lazy_static;
use regex::Regex;

use super::{Change, HumanizeResult, Score};

const RESULT_HEADERS: &[&str] = &["# 人性化后的文本"];
const CHANGES_HEADERS: &[&str] = &["# 修改说明", "# Changes"];
const SCORE_HEADERS: &[&str] = &["# 质量评分", "# Score"];
const PROCESSED_HEADERS: &[&str] = &["# 处理结果", "# Result"];

const PARSE_FAILED: &str = "无法解析 AI 返回结果，已返回原始文本";

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new("```(?:markdown)?\n?").unwrap();
    static ref JSON_FENCE: Regex = Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```$").unwrap();
    static ref DIGITS: Regex = Regex::new(r"\d+").unwrap();
}

fn all_headers() -> impl Iterator<Item = &'static str> {
    RESULT_HEADERS
        .iter()
        .chain(CHANGES_HEADERS)
        .chain(SCORE_HEADERS)
        .chain(PROCESSED_HEADERS)
        .copied()
}

fn starts_with_any(line: &str, headers: &[&str]) -> bool {
    headers.iter().any(|h| line.starts_with(h))
}

fn is_header(line: &str) -> bool {
    all_headers().any(|h| line.starts_with(h))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, response: &str, original: &str) -> HumanizeResult {
        if let Some(result) = self.parse_structured(response) {
            return result;
        }

        let content = self.extract_unstructured(response);
        if !content.is_empty() {
            tracing::debug!("No result section found, using unstructured fallback");
            return HumanizeResult {
                success: true,
                content,
                ..HumanizeResult::default()
            };
        }

        tracing::warn!("Could not extract content from AI response");
        HumanizeResult::failed(original, PARSE_FAILED)
    }

    fn parse_structured(&self, response: &str) -> Option<HumanizeResult> {
        let content = extract_section(response, RESULT_HEADERS)?;

        let changes_body = extract_section(response, CHANGES_HEADERS);
        let changes = changes_body
            .as_deref()
            .map(parse_changes)
            .unwrap_or_default();
        let score = extract_section(response, SCORE_HEADERS)
            .as_deref()
            .and_then(parse_score);

        Some(HumanizeResult {
            success: true,
            content,
            changes,
            score,
            report: changes_body,
            error: None,
        })
    }

    /// Everything between a start marker (or the top) and an end marker,
    /// minus code fences and `#` lines
    fn extract_unstructured(&self, response: &str) -> String {
        let text = CODE_FENCE.replace_all(response, "");
        let lines: Vec<&str> = text.lines().collect();

        let start = lines
            .iter()
            .position(|l| starts_with_any(l, RESULT_HEADERS) || starts_with_any(l, PROCESSED_HEADERS))
            .map_or(0, |i| i + 1);

        let kept: Vec<&str> = lines[start..]
            .iter()
            .take_while(|l| !starts_with_any(l, CHANGES_HEADERS) && !starts_with_any(l, SCORE_HEADERS))
            .filter(|l| !l.starts_with('#'))
            .copied()
            .collect();

        kept.join("\n").trim().to_string()
    }
}

/// Trimmed body of the first section introduced by one of `headers`, ending at
/// the next recognized header. `None` when absent or empty.
fn extract_section(response: &str, headers: &[&str]) -> Option<String> {
    let mut lines = response.lines();
    lines.find(|l| starts_with_any(l, headers))?;

    let body: Vec<&str> = lines.take_while(|l| !is_header(l)).collect();
    let body = body.join("\n").trim().to_string();

    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

/// A JSON array of changes (optionally fenced), else a single summary record
fn parse_changes(body: &str) -> Vec<Change> {
    if let Ok(changes) = serde_json::from_str::<Vec<Change>>(body) {
        return changes;
    }

    if let Some(inner) = JSON_FENCE.captures(body).and_then(|c| c.get(1)) {
        if let Ok(changes) = serde_json::from_str::<Vec<Change>>(inner.as_str()) {
            return changes;
        }
    }

    vec![Change {
        kind: "summary".to_string(),
        original: "见修改说明".to_string(),
        revised: body.to_string(),
        position: 0,
        reason: "综合处理".to_string(),
    }]
}

/// Scan `| label | value | ... |` rows. `None` when nothing scores above zero.
fn parse_score(body: &str) -> Option<Score> {
    let mut score = Score::default();
    let mut explicit_total = None;

    for line in body.lines().map(str::trim) {
        if !line.starts_with('|') {
            continue;
        }
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 4 {
            continue;
        }

        let label = parts[1].trim().trim_matches('*').trim().to_lowercase();
        let Some(value) = DIGITS
            .find(parts[2])
            .and_then(|m| m.as_str().parse::<u32>().ok())
        else {
            continue;
        };

        match label.as_str() {
            "直接性" | "directness" => score.directness = value,
            "节奏" | "rhythm" => score.rhythm = value,
            "信任度" | "trust" => score.trust = value,
            "真实性" | "authenticity" => score.authenticity = value,
            "精炼度" | "conciseness" => score.conciseness = value,
            "总分" | "total" => explicit_total = Some(value),
            _ => {}
        }
    }

    score.total = explicit_total
        .filter(|t| *t > 0)
        .unwrap_or_else(|| score.dimension_sum());

    if score.total == 0 {
        None
    } else {
        Some(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORE_TABLE: &str = "\
| 维度 | 得分 | 说明 |
|------|------|------|
| 直接性 | 8/10 | 开门见山 |
| 节奏 | 7/10 | 长短句交替 |
| 信任度 | 9/10 | 不啰嗦 |
| 真实性 | 8/10 | 有个人观点 |
| 精炼度 | 6/10 | 还能再删 |";

    fn parse(response: &str, original: &str) -> HumanizeResult {
        ResponseParser::new().parse(response, original)
    }

    #[test]
    fn test_well_formed_document() {
        let response = format!(
            "# 人性化后的文本\n\n  我昨天去了趟海边。\n风很大。\n\n# 修改说明\n\n删除了\"值得一提的是\"等填充短语。\n\n# 质量评分\n\n{}\n",
            SCORE_TABLE
        );

        let result = parse(&response, "原文");
        assert!(result.success);
        assert_eq!(result.content, "我昨天去了趟海边。\n风很大。");

        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].kind, "summary");
        assert_eq!(result.changes[0].original, "见修改说明");
        assert_eq!(result.changes[0].revised, "删除了\"值得一提的是\"等填充短语。");
        assert_eq!(result.changes[0].reason, "综合处理");
        assert_eq!(
            result.report.as_deref(),
            Some("删除了\"值得一提的是\"等填充短语。")
        );

        let score = result.score.unwrap();
        assert_eq!(score.directness, 8);
        assert_eq!(score.rhythm, 7);
        assert_eq!(score.trust, 9);
        assert_eq!(score.authenticity, 8);
        assert_eq!(score.conciseness, 6);
        assert_eq!(score.total, 38);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_explicit_total_wins() {
        let response = format!(
            "# 人性化后的文本\n正文\n# 质量评分\n{}\n| **总分** | **42/50** | 良好 |",
            SCORE_TABLE
        );
        assert_eq!(parse(&response, "").score.unwrap().total, 42);
    }

    #[test]
    fn test_json_changes() {
        let response = r#"# 人性化后的文本
正文
# 修改说明
[{"type":"filler_phrase","original":"值得注意的是，","revised":"","position":12,"reason":"填充短语"},
 {"type":"ai_vocabulary","original":"至关重要","revised":"很重要"}]
"#;
        let result = parse(response, "");
        assert_eq!(result.changes.len(), 2);
        assert_eq!(result.changes[0].kind, "filler_phrase");
        assert_eq!(result.changes[0].position, 12);
        assert_eq!(result.changes[1].revised, "很重要");
        assert_eq!(result.changes[1].position, 0);
    }

    #[test]
    fn test_fenced_json_changes() {
        let response = "# 人性化后的文本\n正文\n# Changes\n```json\n[{\"type\":\"other\",\"original\":\"a\",\"revised\":\"b\"}]\n```\n";
        let result = parse(response, "");
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].kind, "other");
    }

    #[test]
    fn test_sections_in_any_order() {
        let response = format!(
            "# Score\n{}\n\n# 人性化后的文本\n结果\n\n# 修改说明\n改了几处",
            SCORE_TABLE
        );
        let result = parse(&response, "");
        assert_eq!(result.content, "结果");
        assert_eq!(result.score.unwrap().total, 38);
        assert_eq!(result.changes[0].revised, "改了几处");
    }

    #[test]
    fn test_missing_optional_sections() {
        let result = parse("# 人性化后的文本\n只有正文", "");
        assert!(result.success);
        assert_eq!(result.content, "只有正文");
        assert!(result.changes.is_empty());
        assert!(result.score.is_none());
        assert!(result.report.is_none());
    }

    #[test]
    fn test_score_rows_must_start_with_pipe() {
        let body = "直接性 | 8/10 | x |\n  | 节奏 | 7 | y |";
        let score = parse_score(body).unwrap();
        assert_eq!(score.directness, 0);
        assert_eq!(score.rhythm, 7);
        assert_eq!(score.total, 7);
    }

    #[test]
    fn test_score_takes_first_digit_run() {
        let score = parse_score("| 直接性 | 8/10 | x |").unwrap();
        assert_eq!(score.directness, 8);
        assert_eq!(score.total, 8);
    }

    #[test]
    fn test_score_labels_case_insensitive() {
        let score = parse_score("| Directness | 5 | |\n| RHYTHM | 4 | |\n| **Total** | 30 | |").unwrap();
        assert_eq!(score.directness, 5);
        assert_eq!(score.rhythm, 4);
        assert_eq!(score.total, 30);
    }

    #[test]
    fn test_oversized_score_cells_saturate() {
        let response = "# 人性化后的文本\n正文\n# 质量评分\n| 直接性 | 4000000000 | |\n| 节奏 | 4000000000 | |";
        let result = parse(response, "orig");
        assert!(result.success);
        assert_eq!(result.content, "正文");

        let score = result.score.unwrap();
        assert_eq!(score.directness, 4_000_000_000);
        assert_eq!(score.total, u32::MAX);
        assert!(score.rating().starts_with("优秀"));
    }

    #[test]
    fn test_zero_score_is_absent() {
        assert!(parse_score("| 直接性 | 0/10 | |\n| 节奏 | n/a | |").is_none());
        let result = parse("# 人性化后的文本\n正文\n# 质量评分\n暂无评分", "");
        assert!(result.score.is_none());
    }

    #[test]
    fn test_unstructured_prose() {
        let prose = "这是一段没有任何标题的文字。\n\n第二段也很普通。";
        let result = parse(prose, "原文");
        assert!(result.success);
        assert_eq!(result.content, prose);
        assert!(result.changes.is_empty());
        assert!(result.score.is_none());
    }

    #[test]
    fn test_unstructured_strips_fences() {
        let result = parse("```markdown\n改写后的内容\n```", "原文");
        assert!(result.success);
        assert_eq!(result.content, "改写后的内容");
    }

    #[test]
    fn test_unstructured_with_markers() {
        let response = "好的，下面是结果：\n# 处理结果\n## 小标题\n正文一\n\n正文二\n# Score\n| 直接性 | 9 | |";
        let result = parse(response, "");
        assert!(result.success);
        assert_eq!(result.content, "正文一\n\n正文二");
        assert!(result.score.is_none());
    }

    #[test]
    fn test_empty_result_section_falls_back() {
        let response = "# 人性化后的文本\n\n# 修改说明\n改了";
        let result = parse(response, "原始输入");
        assert!(!result.success);
        assert_eq!(result.content, "原始输入");
        assert_eq!(result.error.as_deref(), Some(PARSE_FAILED));
    }

    #[test]
    fn test_empty_input_fails() {
        let result = parse("", "");
        assert!(!result.success);
        assert_eq!(result.content, "");
        assert!(result.error.is_some());
    }

    #[test]
    fn test_only_headers_fails() {
        let result = parse("# 修改说明\n# 质量评分\n", "keep me");
        assert!(!result.success);
        assert_eq!(result.content, "keep me");
    }
}
