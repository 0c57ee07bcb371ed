//! 配置模块 - 远端能力、费率、窗口与持久化参数
//!
//! 读取优先级：
//! 1. 命令行 `--config <path>` 指定的 JSON 文件
//! 2. `~/.config/triage-desk/config.json`
//! 3. 内置默认值
//!
//! 环境变量覆盖：`DEEPSEEK_API_KEY`、`DEEPSEEK_BASE_URL`、`TRIAGE_DATA_FILE`

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::ai::client::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_MS};
use crate::ledger::CostRates;

/// 每 1k 输入 token 费用
pub const DEFAULT_INPUT_COST_PER_1K: f64 = 0.01;

/// 每 1k 输出 token 费用
pub const DEFAULT_OUTPUT_COST_PER_1K: f64 = 0.02;

/// 费用保留的小数位数
pub const DEFAULT_COST_PRECISION: u32 = 6;

/// 每个会话保留的最大消息数
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// 分类最大尝试次数
pub const DEFAULT_MAX_CLASSIFICATION_ATTEMPTS: u32 = 3;

/// 定时保存间隔（秒）
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 300;

pub const DEFAULT_THREAD_NAME_PREFIX: &str = "Help with";

pub const DEFAULT_SYSTEM_PROMPT: &str = "Your name is CryptoExpert. You help users with \
cryptocurrency and blockchain questions: wallets, exchanges, transactions, scams and \
security incidents. Be concise and practical, never ask for private keys or seed \
phrases, and tell users when an issue needs their exchange's or wallet's official support.";

pub const DEFAULT_CLASSIFICATION_PROMPT: &str = "Determine if the user's message is a \
request for help related to cryptocurrency or blockchain. Respond exactly 'YES' or 'NO' \
without any other text.";

/// 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// API 密钥
    pub api_key: String,
    /// API 基础 URL
    pub base_url: String,
    /// 模型名称
    pub model: String,
    /// 请求超时（毫秒）
    pub timeout_ms: u64,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub cost_precision: u32,
    /// 会话历史窗口 W
    pub history_window: usize,
    pub max_classification_attempts: u32,
    pub save_interval_secs: u64,
    /// 快照文件路径
    pub data_file: PathBuf,
    /// 会话系统提示
    pub system_prompt: String,
    /// 分类系统提示（要求只回答 YES/NO）
    pub classification_prompt: String,
    /// 子会话名称前缀，如 "Help with alice"
    pub thread_name_prefix: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            input_cost_per_1k: DEFAULT_INPUT_COST_PER_1K,
            output_cost_per_1k: DEFAULT_OUTPUT_COST_PER_1K,
            cost_precision: DEFAULT_COST_PRECISION,
            history_window: DEFAULT_HISTORY_WINDOW,
            max_classification_attempts: DEFAULT_MAX_CLASSIFICATION_ATTEMPTS,
            save_interval_secs: DEFAULT_SAVE_INTERVAL_SECS,
            data_file: default_data_file(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            classification_prompt: DEFAULT_CLASSIFICATION_PROMPT.to_string(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

/// 默认快照路径 `~/.triage-desk/state.json`
pub fn default_data_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".triage-desk")
        .join("state.json")
}

/// 默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/triage-desk/config.json"))
}

impl TriageConfig {
    /// 按优先级加载配置并应用环境变量覆盖
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件读取，缺省字段取默认值
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(key) = non_empty_env("DEEPSEEK_API_KEY") {
            debug!("Using DEEPSEEK_API_KEY from environment");
            self.api_key = key;
        }
        if let Some(url) = non_empty_env("DEEPSEEK_BASE_URL") {
            self.base_url = url;
        }
        if let Some(path) = non_empty_env("TRIAGE_DATA_FILE") {
            self.data_file = PathBuf::from(path);
        }
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        if self.history_window == 0 {
            return Err(anyhow!("history_window must be at least 1"));
        }
        if self.max_classification_attempts == 0 {
            return Err(anyhow!("max_classification_attempts must be at least 1"));
        }
        if self.save_interval_secs == 0 {
            return Err(anyhow!("save_interval_secs must be positive"));
        }
        for (name, rate) in [
            ("input_cost_per_1k", self.input_cost_per_1k),
            ("output_cost_per_1k", self.output_cost_per_1k),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(anyhow!("{} must be a non-negative number, got {}", name, rate));
            }
        }
        Ok(())
    }

    pub fn rates(&self) -> CostRates {
        CostRates {
            input_per_1k: self.input_cost_per_1k,
            output_per_1k: self.output_cost_per_1k,
            precision: self.cost_precision,
        }
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = TriageConfig::default();
        assert_eq!(config.history_window, 10);
        assert_eq!(config.max_classification_attempts, 3);
        assert_eq!(config.save_interval_secs, 300);
        assert_eq!(config.input_cost_per_1k, 0.01);
        assert_eq!(config.output_cost_per_1k, 0.02);
        assert_eq!(config.thread_name_prefix, "Help with");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"model": "deepseek-reasoner", "history_window": 6}"#).unwrap();

        let config = TriageConfig::from_file(&path).unwrap();
        assert_eq!(config.model, "deepseek-reasoner");
        assert_eq!(config.history_window, 6);
        assert_eq!(config.max_classification_attempts, 3);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(TriageConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = TriageConfig {
            history_window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TriageConfig {
            max_classification_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TriageConfig {
            output_cost_per_1k: -0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TriageConfig {
            input_cost_per_1k: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rates_from_config() {
        let rates = TriageConfig::default().rates();
        assert_eq!(rates.input_per_1k, 0.01);
        assert_eq!(rates.output_per_1k, 0.02);
        assert_eq!(rates.precision, 6);
    }
}
