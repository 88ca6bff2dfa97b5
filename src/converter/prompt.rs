//! Conversion prompt

use std::fmt::Write as _;

const GENERIC_PROMPT: &str = r#"你是一位微信公众号排版助手。请将下面的 Markdown 转换为可以直接粘贴到公众号编辑器的 HTML。

要求：
1. 所有样式写成内联 style 属性，不使用 <style> 标签、class 或外部 CSS
2. 正文字号 15-16px，行高 1.75 以上，段落之间留出间距
3. 标题、引用、列表、代码块、表格都要有清晰的层级
4. 图片不要输出 <img> 标签，改用占位符：<!-- IMG:index -->，index 按图片在原文中出现的顺序从 0 开始编号，每个占位符单独一行
5. 不要改写、删减或补充原文内容
6. 只返回完整的 HTML，不要任何解释"#;

/// Custom instructions replace the generic ones; the theme is named either way
pub fn build_prompt(theme: &str, custom_prompt: Option<&str>, markdown: &str) -> String {
    let mut prompt = match custom_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        Some(custom) => custom.to_string(),
        None => GENERIC_PROMPT.to_string(),
    };

    let _ = write!(prompt, "\n\n主题: {}", theme);
    let _ = write!(prompt, "\n\n```\n{}\n```", markdown);
    prompt
}
