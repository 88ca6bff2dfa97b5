//! Prompt construction for the humanizer

use std::fmt::Write as _;

use super::{FocusPattern, HumanizeRequest, Intensity};

const SYSTEM_PROMPT: &str = r#"# Humanizer-zh: 去除 AI 写作痕迹

你是一位文字编辑，专门识别和去除 AI 生成文本的痕迹，让文字读起来自然、有人味。

## 你的任务

1. **识别 AI 模式**：扫描下面列出的模式
2. **重写问题片段**：用自然的表达替换 AI 痕迹
3. **保留含义**：核心信息保持完整
4. **维持语调**：匹配原文的语气（正式、随意、技术等）
5. **注入灵魂**：不只是删掉坏模式，还要有真实的个性

## 核心规则

1. **删除填充短语**：去掉开场白和强调性拐杖词
2. **打破公式结构**：避免二元对比、戏剧性分段、修辞性铺垫
3. **变化节奏**：长短句混合，两项优于三项，段落结尾不要千篇一律
4. **信任读者**：直接陈述事实，跳过软化、辩解和手把手引导
5. **删除金句**：听起来像可引用的语句，就重写它

## 需要检测的模式

### 内容模式

1. 过度强调意义：标志着、见证了、是…的体现、凸显了、为…奠定基础
2. 过度强调知名度：反复提媒体报道、专家观点却不给具体来源
3. 肤浅分析：突出/强调/确保…、反映/象征…、为…做出贡献
4. 宣传式语言：充满活力的、令人叹为观止的、必游之地
5. 模糊归因：行业报告显示、观察者指出、专家认为（无具体来源）
6. 公式化的"挑战与未来展望"

### 语言和语法模式

7. 过度使用的 AI 词汇：此外、至关重要、深入探讨、格局、织锦
8. 回避"是"：作为/代表/标志着/充当
9. 否定式排比："不仅…而且…"、"这不仅仅是…而是…"
10. 三段式过度使用
11. 同义词循环
12. 虚假范围："从 X 到 Y" 但两者不在同一尺度

### 风格模式

13. 破折号过度使用
14. 粗体过度使用
15. 以粗体小标题开头的列表项
16. 表情符号装饰

### 填充词和回避

17. 填充短语：为了实现这一目标、在这个时间点
18. 过度限定：可以潜在地可能被认为
19. 通用积极结论：未来看起来光明

### 交流痕迹

20. 协作式客套：希望这对您有帮助、当然！
21. 知识截止免责声明
22. 谄媚讨好的语气

## 个性与灵魂

- 有观点，对事实做出反应
- 短句有力，长句展开
- 承认复杂性
- 适当使用"我"
- 允许一点不完美的结构
- 对感受要具体，写场景而不是形容词
"#;

const OUTPUT_FORMAT: &str = r#"

## 输出格式

请按以下格式输出：

# 人性化后的文本

[重写后的完整文本]

# 修改说明

[主要修改点，可以是 JSON 数组：[{"type","original","revised","position","reason"}]]

# 质量评分

| 维度 | 得分 | 说明 |
|------|------|------|
| 直接性 | x/10 | [说明] |
| 节奏 | x/10 | [说明] |
| 信任度 | x/10 | [说明] |
| 真实性 | x/10 | [说明] |
| 精炼度 | x/10 | [说明] |
| **总分** | **x/50** | [评级] |

## 最终要求

1. 输出完整的重写后文本
"#;

fn intensity_section(intensity: Intensity) -> &'static str {
    match intensity {
        Intensity::Gentle => "**温和模式**：只处理最明显、最确定的问题。保留大部分原文结构，只修改填充短语、过度强调的连接词等明显痕迹。",
        Intensity::Medium => "**中等模式**（默认）：平衡处理。去除明显的 AI 痕迹，保留合理的表达。",
        Intensity::Aggressive => "**激进模式**：深度审查，最大化去除 AI 痕迹。可以大幅改写句式结构，注入更强的个性和观点。",
    }
}

fn focus_line(pattern: FocusPattern) -> &'static str {
    match pattern {
        FocusPattern::Content => "- **内容模式**：过度强调、夸大意义、宣传语言、模糊归因",
        FocusPattern::Language => "- **语言语法**：AI 词汇、否定排比、三段式、同义词循环",
        FocusPattern::Style => "- **风格模式**：破折号过度、粗体滥用、表情符号",
        FocusPattern::Filler => "- **填充词回避**：填充短语、过度限定、通用结论",
        FocusPattern::Collaboration => "- **协作痕迹**：对话式客套、知识截止免责声明",
    }
}

/// Full prompt for the external model, ending with the text to rewrite
pub fn build_prompt(request: &HumanizeRequest) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT);

    prompt.push_str("\n\n## 处理强度\n\n");
    prompt.push_str(intensity_section(request.intensity));

    if let Some(style) = request
        .original_style
        .as_deref()
        .filter(|s| request.preserve_style && !s.is_empty())
    {
        let _ = write!(
            prompt,
            "\n\n## 风格保护\n\n原文采用「{}」写作风格，请保留该风格的核心特征。\n\n",
            style
        );
        prompt.push_str("**重要原则**：\n");
        prompt.push_str("- 如果某种模式是该风格刻意为之（如用破折号制造停顿），请保留\n");
        prompt.push_str("- 只去除无意的 AI 痕迹\n");
        prompt.push_str("- 保持风格的一致性\n");
    }

    if !request.focus_on.is_empty() {
        prompt.push_str("\n\n## 重点处理模式\n\n请重点关注以下类型的模式：\n");
        for pattern in &request.focus_on {
            prompt.push_str(focus_line(*pattern));
            prompt.push('\n');
        }
    }

    if let Some(hint) = request.source_hint.as_deref().filter(|h| !h.is_empty()) {
        let _ = write!(prompt, "\n\n## 源信息\n\n文本来源: {}\n", hint);
    }

    prompt.push_str(OUTPUT_FORMAT);
    if request.show_changes {
        prompt.push_str("2. 提供修改说明和主要变更点\n");
    }
    if request.include_score {
        prompt.push_str("3. 按 5 维度给出质量评分\n");
    }
    prompt.push_str("4. 只返回上述格式的内容，不需要其他解释\n");

    let _ = write!(prompt, "\n\n# 待处理文本\n\n{}", request.content);

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HumanizeRequest {
        HumanizeRequest {
            content: "需要处理的文章".to_string(),
            ..HumanizeRequest::default()
        }
    }

    #[test]
    fn test_default_prompt_sections() {
        let prompt = build_prompt(&request());
        assert!(prompt.starts_with("# Humanizer-zh"));
        assert!(prompt.contains("**中等模式**"));
        assert!(prompt.contains("# 人性化后的文本"));
        assert!(!prompt.contains("## 风格保护"));
        assert!(!prompt.contains("## 重点处理模式"));
        assert!(!prompt.contains("## 源信息"));
        assert!(!prompt.contains("2. 提供修改说明"));
        assert!(prompt.ends_with("# 待处理文本\n\n需要处理的文章"));
    }

    #[test]
    fn test_style_section_requires_preserve_flag() {
        let mut req = request();
        req.original_style = Some("dan-koe".to_string());
        assert!(!build_prompt(&req).contains("## 风格保护"));

        req.preserve_style = true;
        let prompt = build_prompt(&req);
        assert!(prompt.contains("## 风格保护"));
        assert!(prompt.contains("「dan-koe」"));
    }

    #[test]
    fn test_optional_sections() {
        let mut req = request();
        req.intensity = Intensity::Aggressive;
        req.focus_on = vec![FocusPattern::Filler, FocusPattern::Collaboration];
        req.source_hint = Some("ai-generated".to_string());
        req.show_changes = true;
        req.include_score = true;

        let prompt = build_prompt(&req);
        assert!(prompt.contains("**激进模式**"));
        assert!(prompt.contains("- **填充词回避**"));
        assert!(prompt.contains("- **协作痕迹**"));
        assert!(!prompt.contains("- **风格模式**"));
        assert!(prompt.contains("文本来源: ai-generated"));
        assert!(prompt.contains("2. 提供修改说明和主要变更点"));
        assert!(prompt.contains("3. 按 5 维度给出质量评分"));
    }
}
