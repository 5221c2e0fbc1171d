//! 沙箱：解析并执行计划中的 `solve()`，把返回值规范化为字符串
//!
//! 计划只能通过 `mcp.call_tool` 触达外部，每个计划的调用次数受预算限制；
//! 任何失败（语法、运行期、预算、缺少 solve）都折叠成 `[sandbox error: ...]`，从不向外抛出。

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod ops;
pub mod outcome;
pub mod parser;
pub mod value;

use serde::Serialize;

pub use error::SandboxError;
pub use interp::{Interpreter, MAX_CALL_DEPTH};
pub use outcome::{
    PlanOutcome, FINAL_ANSWER_MARKER, FURTHER_PROCESSING_MARKER, SANDBOX_ERROR_MARKER,
};
pub use value::Value;

use crate::tools::ToolDispatcher;

/// 单个计划最多调用工具的次数
pub const MAX_TOOL_CALLS_PER_PLAN: usize = 5;

/// 计划中的一次工具调用（成功与失败都会记录）
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// 文本结果；能解析为 JSON 时为解析后的值
    pub result: serde_json::Value,
    pub raw_response: serde_json::Value,
    pub success: bool,
}

/// 一次执行的完整报告
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// 规范化后的结果字符串
    pub output: String,
    pub outcome: PlanOutcome,
    pub tool_calls: Vec<ToolCallResult>,
}

impl ExecutionReport {
    /// 本次执行中报错的工具名（去重，保持首次出现顺序）
    pub fn failed_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for call in self.tool_calls.iter().filter(|c| !c.success) {
            if !names.contains(&call.tool_name) {
                names.push(call.tool_name.clone());
            }
        }
        names
    }
}

/// 计划执行器
#[derive(Debug, Clone)]
pub struct Sandbox {
    max_tool_calls: usize,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(MAX_TOOL_CALLS_PER_PLAN)
    }
}

impl Sandbox {
    pub fn new(max_tool_calls: usize) -> Self {
        Self { max_tool_calls }
    }

    /// 执行计划，返回结果字符串与工具调用记录
    pub async fn run(&self, code: &str, dispatcher: &dyn ToolDispatcher) -> ExecutionReport {
        let mut interpreter = Interpreter::new(dispatcher, self.max_tool_calls);
        let result = match parser::parse(code) {
            Ok(program) => interpreter.run(&program).await,
            Err(e) => Err(e),
        };
        let output = match result {
            Ok(value) => normalize(&value),
            Err(e) => {
                tracing::warn!(stage = "sandbox", error = %e, "plan execution failed");
                format!("{} {}]", SANDBOX_ERROR_MARKER, e)
            }
        };
        let outcome = PlanOutcome::classify(&output);
        let tool_calls = interpreter.into_tool_calls();
        tracing::info!(
            stage = "sandbox",
            outcome = outcome.label(),
            tool_calls = tool_calls.len(),
            "plan executed"
        );
        ExecutionReport {
            output,
            outcome,
            tool_calls,
        }
    }
}

/// 返回值规范化：带 `result` 键的字典取 `str(result)`，其余字典转 JSON，
/// 列表按空格拼接各元素的 `str()`，其他取 `str()`
pub fn normalize(value: &Value) -> String {
    match value {
        Value::Dict(_) => match value.dict_get(&Value::str("result")) {
            Some(result) => result.to_display(),
            None => value
                .to_json_text()
                .unwrap_or_else(|_| value.to_display()),
        },
        Value::List(items) => items
            .iter()
            .map(Value::to_display)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_display(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{utility_server, LocalDispatcher};

    fn dispatcher() -> LocalDispatcher {
        LocalDispatcher::new(5).with_server(utility_server())
    }

    async fn run(code: &str) -> ExecutionReport {
        Sandbox::default().run(code, &dispatcher()).await
    }

    #[tokio::test]
    async fn test_result_dict_is_unwrapped() {
        let report = run("async def solve():\n    return {'result': 7}\n").await;
        assert_eq!(report.output, "7");
        assert_eq!(report.outcome, PlanOutcome::Other("7".into()));
    }

    #[tokio::test]
    async fn test_list_is_space_joined_and_other_dicts_become_json() {
        assert_eq!(run("def solve():\n    return [1, 2, 3]\n").await.output, "1 2 3");
        assert_eq!(
            run("def solve():\n    return {'a': 1}\n").await.output,
            r#"{"a": 1}"#
        );
        assert_eq!(run("def solve():\n    return None\n").await.output, "None");
    }

    #[tokio::test]
    async fn test_tool_call_result_is_parsed_by_plan() {
        let code = r#"
import json

async def solve():
    result = await mcp.call_tool('add', {'input': {'a': 20, 'b': 22}})
    value = json.loads(result.content[0].text)['result']
    return f"FINAL_ANSWER: {value}"
"#;
        let report = run(code).await;
        assert_eq!(report.output, "FINAL_ANSWER: 42");
        assert_eq!(report.tool_calls.len(), 1);
        assert!(report.tool_calls[0].success);
        assert_eq!(report.tool_calls[0].result["result"], 42);
    }

    #[tokio::test]
    async fn test_five_tool_calls_allowed_sixth_aborts() {
        let five = "async def solve():\n    for i in range(5):\n        await mcp.call_tool('add', {'input': {'a': i, 'b': 1}})\n    return 'FINAL_ANSWER: done'\n";
        let report = run(five).await;
        assert_eq!(report.output, "FINAL_ANSWER: done");
        assert_eq!(report.tool_calls.len(), 5);

        let six = "async def solve():\n    for i in range(6):\n        await mcp.call_tool('add', {'input': {'a': i, 'b': 1}})\n    return 'FINAL_ANSWER: done'\n";
        let report = run(six).await;
        assert!(report.output.starts_with(SANDBOX_ERROR_MARKER));
        assert!(report.output.contains("Exceeded max tool calls (5)"));
        assert_eq!(report.tool_calls.len(), 5);
        assert!(matches!(report.outcome, PlanOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_budget_error_escapes_try_except() {
        let code = "async def solve():\n    try:\n        for i in range(10):\n            await mcp.call_tool('add', {'input': {'a': 1, 'b': 1}})\n    except Exception:\n        return 'FINAL_ANSWER: swallowed'\n    return 'FINAL_ANSWER: done'\n";
        let report = run(code).await;
        assert!(report.output.contains("Exceeded max tool calls"));
    }

    #[tokio::test]
    async fn test_tool_errors_are_catchable_and_recorded() {
        let code = "async def solve():\n    try:\n        await mcp.call_tool('teleport', {})\n    except Exception as e:\n        return 'FINAL_ANSWER: recovered'\n";
        let report = run(code).await;
        assert_eq!(report.output, "FINAL_ANSWER: recovered");
        assert_eq!(report.failed_tools(), vec!["teleport".to_string()]);
    }

    #[tokio::test]
    async fn test_failures_become_sandbox_error_strings() {
        for code in [
            "def solve(:\n    return 1\n",
            "def helper():\n    return 1\n",
            "import os\ndef solve():\n    return 1\n",
            "def solve():\n    return undefined_name\n",
        ] {
            let out = run(code).await.output;
            assert!(out.starts_with("[sandbox error: "), "{}", out);
            assert!(out.ends_with(']'), "{}", out);
        }
        assert!(run("def helper():\n    return 1\n")
            .await
            .output
            .contains("No solve() function found"));
    }

    #[tokio::test]
    async fn test_mutation_helpers_and_comprehensions() {
        let code = r#"
def double(x):
    return x * 2

def solve():
    totals = {}
    items = []
    for word in "b a c a".split():
        totals[word] = totals.get(word, 0) + 1
        items.append(double(len(word)))
    ranked = sorted(totals.items(), key=lambda kv: (-kv[1], kv[0]))
    evens = [n for n in range(10) if n % 2 == 0]
    return f"FINAL_ANSWER: {ranked[0][0]} {sum(items)} {evens[-1]}"
"#;
        assert_eq!(run(code).await.output, "FINAL_ANSWER: a 8 8");
    }

    #[tokio::test]
    async fn test_runaway_recursion_is_bounded() {
        let code = "def loop(n):\n    return loop(n + 1)\n\ndef solve():\n    return loop(0)\n";
        let out = run(code).await.output;
        assert!(out.contains("maximum call depth"), "{}", out);
    }

    #[tokio::test]
    async fn test_blank_and_comment_lines_close_nested_blocks() {
        for gap in ["\n", "        # keep going\n", "\n    # done looping\n\n"] {
            let code = format!(
                "def solve():\n    x = 0\n    for i in range(3):\n        x += i\n{gap}    return x\n"
            );
            assert_eq!(run(&code).await.output, "3", "gap {gap:?}");

            let code = format!(
                "def solve():\n    x = 0\n    try:\n        x = 1\n    except Exception:\n        x = 2\n{gap}    return x\n"
            );
            assert_eq!(run(&code).await.output, "1", "gap {gap:?}");

            let code = format!(
                "def helper():\n    return 4\n{gap}def solve():\n    return helper() + 1\n"
            );
            assert_eq!(run(&code).await.output, "5", "gap {gap:?}");
        }
    }

    #[tokio::test]
    async fn test_integer_extremes_never_panic() {
        assert_eq!(run("def solve():\n    return 7 % 9223372036854775807\n").await.output, "7");
        assert_eq!(
            run("def solve():\n    return (-9223372036854775807 - 1) % -1\n").await.output,
            "0"
        );
        for expr in [
            "len('ab' * (2 ** 62))",
            "len([0] * (10 ** 18))",
            "len(range(-(2**62)*2, 2**62))",
            "'7'.zfill(10 ** 18)",
        ] {
            let out = run(&format!("def solve():\n    return {expr}\n")).await.output;
            assert!(out.starts_with(SANDBOX_ERROR_MARKER), "{expr}: {out}");
        }
    }

    #[tokio::test]
    async fn test_lambda_resolves_names_where_it_was_defined() {
        let code = r#"
def make_scaler(factor):
    return lambda x: x * factor

def solve():
    factor = 100
    scale = make_scaler(3)
    offset = 1
    shifted = sorted([3, 1, 2], key=lambda n: n + offset)
    return f"FINAL_ANSWER: {scale(2)} {shifted}"
"#;
        assert_eq!(run(code).await.output, "FINAL_ANSWER: 6 [1, 2, 3]");
    }
}
