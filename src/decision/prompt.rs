//! Prompt 模板：从 prompt 目录按文件名加载，缺失时退回内置模板
//!
//! 占位符按名替换（`{user_input}` 等），模板中其余花括号原样保留，示例 JSON 不需要转义。

use std::path::{Path, PathBuf};

pub const PERCEPTION_PROMPT: &str = "perception_prompt.txt";
pub const CONSERVATIVE_PROMPT: &str = "decision_prompt_conservative.txt";
pub const EXPLORATORY_PARALLEL_PROMPT: &str = "decision_prompt_exploratory_parallel.txt";
pub const EXPLORATORY_SEQUENTIAL_PROMPT: &str = "decision_prompt_exploratory_sequential.txt";

const BUILTIN_TEMPLATES: [(&str, &str); 4] = [
    (
        PERCEPTION_PROMPT,
        include_str!("../../prompts/perception_prompt.txt"),
    ),
    (
        CONSERVATIVE_PROMPT,
        include_str!("../../prompts/decision_prompt_conservative.txt"),
    ),
    (
        EXPLORATORY_PARALLEL_PROMPT,
        include_str!("../../prompts/decision_prompt_exploratory_parallel.txt"),
    ),
    (
        EXPLORATORY_SEQUENTIAL_PROMPT,
        include_str!("../../prompts/decision_prompt_exploratory_sequential.txt"),
    ),
];

/// 同名内置模板；未知文件名退回保守决策模板
pub fn builtin_template(file_name: &str) -> &'static str {
    BUILTIN_TEMPLATES
        .iter()
        .find(|(name, _)| *name == file_name)
        .map(|(_, body)| *body)
        .unwrap_or(BUILTIN_TEMPLATES[1].1)
}

/// 读取 `<dir>/<file_name>`；读不到时记 warn 并使用内置模板
pub fn load_prompt(dir: &Path, file_name: &str) -> String {
    let path: PathBuf = dir.join(file_name);
    match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                stage = "plan",
                path = %path.display(),
                error = %e,
                "prompt template missing, using built-in"
            );
            builtin_template(file_name).to_string()
        }
    }
}

/// 按名替换占位符
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
