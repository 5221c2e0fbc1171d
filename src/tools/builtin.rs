//! 内置 utility 工具服务器：echo 与几个演示用的数值工具
//!
//! 结果统一为 `{"result": ...}` JSON 文本，计划侧用 `json.loads(result.content[0].text)["result"]` 取值。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{tool_input, Tool, ToolRegistry, ToolServer};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Usage: input={\"input\": {\"text\": \"hi\"}} result = await mcp.call_tool('echo', input)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let text = tool_input(&args)
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(text.to_string())
    }
}

/// 两整数相加
pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two integers. Usage: input={\"input\": {\"a\": 1, \"b\": 2}} result = await mcp.call_tool('add', input)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
            "required": ["a", "b"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let input = tool_input(&args);
        let a = int_arg(input, "a")?;
        let b = int_arg(input, "b")?;
        let sum = a.checked_add(b).ok_or("integer overflow")?;
        Ok(format!("{{\"result\": {}}}", sum))
    }
}

/// 字符串逐字符转 ASCII 码
pub struct StringsToCharsToIntTool;

#[async_trait]
impl Tool for StringsToCharsToIntTool {
    fn name(&self) -> &str {
        "strings_to_chars_to_int"
    }

    fn description(&self) -> &str {
        "Return the ASCII values of the characters in a word. Usage: input={\"input\": {\"string\": \"INDIA\"}} result = await mcp.call_tool('strings_to_chars_to_int', input)"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let s = tool_input(&args)
            .get("string")
            .and_then(|v| v.as_str())
            .ok_or("missing string argument 'string'")?;
        let codes: Vec<String> = s.chars().map(|c| (c as u32).to_string()).collect();
        Ok(format!("{{\"result\": [{}]}}", codes.join(", ")))
    }
}

/// 整数列表的 e^x 之和
pub struct ExponentialSumTool;

#[async_trait]
impl Tool for ExponentialSumTool {
    fn name(&self) -> &str {
        "int_list_to_exponential_sum"
    }

    fn description(&self) -> &str {
        "Sum of exponentials of a list of integers. Usage: input={\"input\": {\"numbers\": [65, 66]}} result = await mcp.call_tool('int_list_to_exponential_sum', input)"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let numbers = tool_input(&args)
            .get("numbers")
            .and_then(|v| v.as_array())
            .ok_or("missing list argument 'numbers'")?;
        let mut total = 0.0_f64;
        for n in numbers {
            let x = n.as_f64().ok_or_else(|| format!("not a number: {n}"))?;
            total += x.exp();
        }
        Ok(format!("{{\"result\": {}}}", json!(total)))
    }
}

fn int_arg(input: &Value, key: &str) -> Result<i64, String> {
    input
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| format!("missing integer argument '{key}'"))
}

/// 内置 utility 服务器
pub fn utility_server() -> ToolServer {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(AddTool);
    registry.register(StringsToCharsToIntTool);
    registry.register(ExponentialSumTool);
    ToolServer::new(
        "utility",
        "Echo and small arithmetic helpers (addition, ASCII codes, exponential sums).",
        registry,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_accepts_wrapped_and_flat_args() {
        assert_eq!(
            EchoTool.execute(json!({"input": {"text": "hi"}})).await.unwrap(),
            "hi"
        );
        assert_eq!(EchoTool.execute(json!({"text": "yo"})).await.unwrap(), "yo");
    }

    #[tokio::test]
    async fn test_ascii_codes() {
        let out = StringsToCharsToIntTool
            .execute(json!({"input": {"string": "AB"}}))
            .await
            .unwrap();
        assert_eq!(out, "{\"result\": [65, 66]}");
    }

    #[tokio::test]
    async fn test_add_missing_argument() {
        assert!(AddTool.execute(json!({"input": {"a": 1}})).await.is_err());
    }
}
