//! 应用配置：从 config/profiles.yaml 与环境变量加载
//!
//! 加载顺序：先读 profiles 文件（yaml / toml 由 config crate 按扩展名识别），再叠加显式路径，
//! 最后用环境变量 `AGENT__*` 覆盖（双下划线表示嵌套，如 `AGENT__STRATEGY__MAX_STEPS=5`）。
//! 配置只在构建上下文前加载一次；非法配置是启动期致命错误，不会进入运行期。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/profiles.yaml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub strategy: StrategyProfile,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

/// [agent] 段：名称、标识、描述
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_agent_id")]
    pub id: String,
    #[serde(default)]
    pub description: String,
}

fn default_agent_name() -> String {
    "Lifeline".to_string()
}

fn default_agent_id() -> String {
    "lifeline-agent".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            id: default_agent_id(),
            description: String::new(),
        }
    }
}

/// 规划模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    Conservative,
    Exploratory,
}

/// 探索子模式（仅在 exploratory 下有意义，只影响所选 prompt，不会真正并发执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationMode {
    Parallel,
    Sequential,
}

/// [strategy] 段：不可变的策略画像
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyProfile {
    #[serde(default = "default_planning_mode")]
    pub planning_mode: PlanningMode,
    /// 缺省为 None；exploratory + None 会回落到保守模板
    #[serde(default)]
    pub exploration_mode: Option<ExplorationMode>,
    #[serde(default)]
    pub memory_fallback_enabled: bool,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_lifelines")]
    pub max_lifelines_per_step: usize,
}

fn default_planning_mode() -> PlanningMode {
    PlanningMode::Conservative
}

fn default_max_steps() -> usize {
    3
}

fn default_max_lifelines() -> usize {
    3
}

impl Default for StrategyProfile {
    fn default() -> Self {
        Self {
            planning_mode: default_planning_mode(),
            exploration_mode: None,
            memory_fallback_enabled: false,
            max_steps: default_max_steps(),
            max_lifelines_per_step: default_max_lifelines(),
        }
    }
}

impl StrategyProfile {
    /// max_steps 至少为 1；lifelines 为无符号类型，天然 ≥ 0
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps < 1 {
            return Err(AgentError::ConfigError(
                "strategy.max_steps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// [memory] 段：会话记忆根目录
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_memory_root")]
    pub root: PathBuf,
}

fn default_memory_root() -> PathBuf {
    PathBuf::from("memory")
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            root: default_memory_root(),
        }
    }
}

/// [llm] 段：后端选择与模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// [prompts] 段：prompt 模板目录
#[derive(Debug, Clone, Deserialize)]
pub struct PromptsSection {
    #[serde(default = "default_prompts_dir")]
    pub dir: PathBuf,
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

impl Default for PromptsSection {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        self.strategy.validate()
    }
}

/// 从 config 目录加载配置，环境变量 AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/profiles、../config/profiles（扩展名 yaml / yml / toml），找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENT__*（双下划线表示嵌套键）
/// 4. 反序列化后校验；任何一步失败都是致命错误
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/profiles", "../config/profiles"];
    'outer: for name in default_names {
        for ext in ["yaml", "yml", "toml"] {
            if std::path::Path::new(&format!("{}.{}", name, ext)).exists() {
                builder = builder.add_source(config::File::with_name(name).required(false));
                break 'outer;
            }
        }
    }

    if let Some(ref path) = config_path {
        if !path.exists() {
            return Err(AgentError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(config::File::from(path.clone()));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_from_yaml(yaml: &str) -> Result<AppConfig, AgentError> {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        load_config(Some(file.path().to_path_buf()))
    }

    #[test]
    fn test_load_strategy_from_yaml() {
        let cfg = load_from_yaml(
            "strategy:\n  planning_mode: exploratory\n  exploration_mode: parallel\n  memory_fallback_enabled: true\n  max_steps: 4\n  max_lifelines_per_step: 2\n",
        )
        .unwrap();
        assert_eq!(cfg.strategy.planning_mode, PlanningMode::Exploratory);
        assert_eq!(cfg.strategy.exploration_mode, Some(ExplorationMode::Parallel));
        assert!(cfg.strategy.memory_fallback_enabled);
        assert_eq!(cfg.strategy.max_steps, 4);
        assert_eq!(cfg.strategy.max_lifelines_per_step, 2);
    }

    #[test]
    fn test_zero_max_steps_is_fatal() {
        let err = load_from_yaml("strategy:\n  planning_mode: conservative\n  max_steps: 0\n")
            .unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[test]
    fn test_unknown_planning_mode_is_fatal() {
        let err = load_from_yaml("strategy:\n  planning_mode: reckless\n").unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_fatal() {
        let err = load_config(Some(PathBuf::from("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.strategy.planning_mode, PlanningMode::Conservative);
        assert_eq!(cfg.memory.root, PathBuf::from("memory"));
    }
}
