//! 计划生成：渲染决策 prompt、调用 LLM、剥离代码围栏并校验 solve() 形态
//!
//! 从不返回错误：LLM 失败得到 `FINAL_ANSWER: [unknown]`，形态不对得到
//! `FINAL_ANSWER: [Could not generate valid solve()]`。

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::decision::prompt::{load_prompt, render};
use crate::llm::LlmClient;
use crate::memory::MemoryItem;
use crate::sandbox::FINAL_ANSWER_MARKER;

pub const INVALID_PLAN_ANSWER: &str = "FINAL_ANSWER: [Could not generate valid solve()]";
pub const GENERATION_FAILED_ANSWER: &str = "FINAL_ANSWER: [unknown]";

static SOLVE_DEF_RE: OnceLock<Regex> = OnceLock::new();

/// 文本中是否定义了 solve()
pub fn is_solve_plan(text: &str) -> bool {
    let re = SOLVE_DEF_RE.get_or_init(|| Regex::new(r"(?m)^\s*(async\s+)?def\s+solve\s*\(").unwrap());
    re.is_match(text)
}

/// 计划的形态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// 定义了 solve() 的代码
    Solve(String),
    /// 直接给出的 `FINAL_ANSWER: ...`
    Terminal(String),
    Invalid(String),
}

impl Plan {
    pub fn classify(text: &str) -> Self {
        if is_solve_plan(text) {
            Plan::Solve(text.to_string())
        } else if text.trim_start().starts_with(FINAL_ANSWER_MARKER) {
            Plan::Terminal(text.trim().to_string())
        } else {
            Plan::Invalid(text.to_string())
        }
    }
}

/// 去掉 ``` 围栏与开头的 `python` 语言标记
pub fn strip_code_fences(raw: &str) -> String {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }
    let inner = text.trim_matches('`').trim();
    match inner.get(..6) {
        Some(tag) if tag.eq_ignore_ascii_case("python") => inner[6..].trim().to_string(),
        _ => inner.to_string(),
    }
}

/// 一次计划生成所需的全部输入
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub user_input: &'a str,
    pub memory_items: &'a [MemoryItem],
    pub tool_descriptions: &'a str,
    /// 模板文件名（位于 prompt 目录下）
    pub prompt_file: &'a str,
    pub step_num: usize,
    pub max_steps: usize,
}

/// 把记忆条目渲染成 prompt 中的 `- text` 列表，空则为 `None`
pub fn memory_texts(items: &[MemoryItem]) -> String {
    if items.is_empty() {
        return "None".to_string();
    }
    items
        .iter()
        .map(|m| format!("- {}", m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct PlanGenerator {
    llm: Arc<dyn LlmClient>,
    prompt_dir: PathBuf,
}

impl PlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, prompt_dir: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            prompt_dir: prompt_dir.into(),
        }
    }

    pub fn build_prompt(&self, req: &PlanRequest<'_>) -> String {
        let template = load_prompt(&self.prompt_dir, req.prompt_file);
        render(
            &template,
            &[
                ("tool_descriptions", req.tool_descriptions),
                ("user_input", req.user_input),
                ("memory_texts", &memory_texts(req.memory_items)),
                ("step_num", &req.step_num.to_string()),
                ("max_steps", &req.max_steps.to_string()),
            ],
        )
    }

    /// 生成计划文本：合法时为 solve() 代码，否则为终态字符串
    pub async fn generate(&self, req: &PlanRequest<'_>) -> String {
        let prompt = self.build_prompt(req);
        let raw = match self.llm.generate_text(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(stage = "plan", error = %e, "planning failed");
                return GENERATION_FAILED_ANSWER.to_string();
            }
        };
        let plan = strip_code_fences(&raw);
        tracing::debug!(stage = "plan", plan = %plan, "llm output");

        if is_solve_plan(&plan) {
            plan
        } else {
            tracing::warn!(stage = "plan", "llm did not return a valid solve()");
            INVALID_PLAN_ANSWER.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::prompt::CONSERVATIVE_PROMPT;
    use crate::llm::mock::MockReply;
    use crate::llm::MockLlmClient;
    use crate::memory::MemoryItemType;

    fn request<'a>(items: &'a [MemoryItem]) -> PlanRequest<'a> {
        PlanRequest {
            user_input: "add 1 and 2",
            memory_items: items,
            tool_descriptions: "- add: Add two numbers",
            prompt_file: CONSERVATIVE_PROMPT,
            step_num: 2,
            max_steps: 3,
        }
    }

    fn generator(llm: Arc<MockLlmClient>) -> PlanGenerator {
        PlanGenerator::new(llm, std::env::temp_dir().join("lifeline-no-prompts"))
    }

    #[test]
    fn test_solve_shape_detection() {
        assert!(is_solve_plan("def solve():\n    return 1"));
        assert!(is_solve_plan("import json\nasync  def solve (x):"));
        assert!(!is_solve_plan("def solver():"));
        assert!(!is_solve_plan("x = 'def solve('"));
        assert!(!is_solve_plan("FINAL_ANSWER: 3"));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```python\nasync def solve():\n    return 1\n```"),
            "async def solve():\n    return 1"
        );
        assert_eq!(strip_code_fences("```\ndef solve(): pass\n```"), "def solve(): pass");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn test_classify_plan() {
        assert!(matches!(Plan::classify("def solve():\n  pass"), Plan::Solve(_)));
        assert_eq!(
            Plan::classify(" FINAL_ANSWER: [unknown]"),
            Plan::Terminal("FINAL_ANSWER: [unknown]".into())
        );
        assert!(matches!(Plan::classify("I think the answer is 3"), Plan::Invalid(_)));
    }

    #[test]
    fn test_memory_texts() {
        assert_eq!(memory_texts(&[]), "None");
        let items = vec![
            MemoryItem::new(MemoryItemType::RunMetadata, "started"),
            MemoryItem::new(MemoryItemType::FinalAnswer, "done"),
        ];
        assert_eq!(memory_texts(&items), "- started\n- done");
    }

    #[tokio::test]
    async fn test_generate_fenced_plan_and_prompt_substitution() {
        let llm = Arc::new(MockLlmClient::with_replies([
            "```python\nasync def solve():\n    return 'FINAL_ANSWER: 3'\n```",
        ]));
        let plan = generator(llm.clone()).generate(&request(&[])).await;
        assert_eq!(plan, "async def solve():\n    return 'FINAL_ANSWER: 3'");
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("- add: Add two numbers"));
        assert!(prompt.contains("add 1 and 2"));
        assert!(prompt.contains("Step 2 of 3"));
        assert!(!prompt.contains("{tool_descriptions}"));
    }

    #[tokio::test]
    async fn test_generate_degrades_to_terminal_strings() {
        let llm = Arc::new(MockLlmClient::with_replies(["the answer is 3"]));
        assert_eq!(generator(llm).generate(&request(&[])).await, INVALID_PLAN_ANSWER);

        let llm = Arc::new(MockLlmClient::with_script(vec![MockReply::Error("down".into())]));
        assert_eq!(
            generator(llm).generate(&request(&[])).await,
            GENERATION_FAILED_ANSWER
        );
    }
}
