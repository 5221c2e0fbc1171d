//! 执行结果的标签化
//!
//! 结果字符串上的控制标记只在这里解析一次，循环只按变体分支。

use serde::Serialize;

pub const FINAL_ANSWER_MARKER: &str = "FINAL_ANSWER:";
pub const FURTHER_PROCESSING_MARKER: &str = "FURTHER_PROCESSING_REQUIRED:";
pub const SANDBOX_ERROR_MARKER: &str = "[sandbox error:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum PlanOutcome {
    /// 完整的 `FINAL_ANSWER: ...` 字符串
    Final(String),
    /// 标记之后的中间结果，需要再规划一轮
    Continue(String),
    /// 完整的 `[sandbox error: ...]` 字符串
    Failed(String),
    /// 无标记的普通结果（视为隐式最终答案）
    Other(String),
}

impl PlanOutcome {
    /// 按去掉首尾空白后的前缀分类
    pub fn classify(raw: &str) -> Self {
        let text = raw.trim();
        if text.starts_with(FINAL_ANSWER_MARKER) {
            PlanOutcome::Final(text.to_string())
        } else if let Some(rest) = text.strip_prefix(FURTHER_PROCESSING_MARKER) {
            PlanOutcome::Continue(rest.trim().to_string())
        } else if text.starts_with(SANDBOX_ERROR_MARKER) {
            PlanOutcome::Failed(text.to_string())
        } else {
            PlanOutcome::Other(text.to_string())
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanOutcome::Final(_) => "final",
            PlanOutcome::Continue(_) => "continue",
            PlanOutcome::Failed(_) => "failed",
            PlanOutcome::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_markers() {
        assert_eq!(
            PlanOutcome::classify("  FINAL_ANSWER: 42\n"),
            PlanOutcome::Final("FINAL_ANSWER: 42".into())
        );
        assert_eq!(
            PlanOutcome::classify("FURTHER_PROCESSING_REQUIRED:   foo bar "),
            PlanOutcome::Continue("foo bar".into())
        );
        assert_eq!(
            PlanOutcome::classify("[sandbox error: boom]"),
            PlanOutcome::Failed("[sandbox error: boom]".into())
        );
        assert_eq!(PlanOutcome::classify("7"), PlanOutcome::Other("7".into()));
        assert_eq!(PlanOutcome::classify(""), PlanOutcome::Other(String::new()));
    }

    #[test]
    fn test_marker_must_be_prefix() {
        assert!(matches!(
            PlanOutcome::classify("answer is FINAL_ANSWER: 1"),
            PlanOutcome::Other(_)
        ));
    }
}
