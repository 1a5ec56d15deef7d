//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PEV__*` 覆盖（双下划线表示嵌套，如 `PEV__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub pev: PevSection,
    pub api: ApiSection,
    pub capabilities: CapabilitiesSection,
    pub log: LogSection,
}

/// [app] 段：应用名、会话缓存容量
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话 LRU 缓存上限，超出时淘汰最久未使用的会话
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_max_sessions() -> usize {
    1000
}

/// [llm] 段：推理服务后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 provider 对应的环境变量（OPENAI_API_KEY / DEEPSEEK_API_KEY）
    pub api_key: Option<String>,
    /// 单次推理请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl LlmSection {
    /// 配置中的 api_key 优先，其次环境变量；空字符串视为未设置
    pub fn resolve_api_key(&self, env_var: &str) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(env_var).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// [pev] 段：PEV 循环时间预算与单步超时（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct PevSection {
    /// 普通查询的 PEV 循环累计时间预算
    #[serde(default = "default_loop_timeout")]
    pub loop_timeout_secs: u64,
    /// complex 查询的延长预算
    #[serde(default = "default_complex_timeout")]
    pub complex_timeout_secs: u64,
    /// 单个计划步骤的执行超时
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// 单次迭代的估计耗时：剩余预算不足时不再启动新迭代
    #[serde(default = "default_estimated_iteration")]
    pub estimated_iteration_secs: u64,
}

impl Default for PevSection {
    fn default() -> Self {
        Self {
            loop_timeout_secs: default_loop_timeout(),
            complex_timeout_secs: default_complex_timeout(),
            step_timeout_secs: default_step_timeout(),
            estimated_iteration_secs: default_estimated_iteration(),
        }
    }
}

fn default_loop_timeout() -> u64 {
    240
}

fn default_complex_timeout() -> u64 {
    330
}

fn default_step_timeout() -> u64 {
    90
}

fn default_estimated_iteration() -> u64 {
    45
}

/// [api] 段：HTTP 监听地址与整体请求超时（pev-web）
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_api_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_api_complex_timeout")]
    pub complex_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_api_timeout(),
            complex_timeout_secs: default_api_complex_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_api_timeout() -> u64 {
    300
}

fn default_api_complex_timeout() -> u64 {
    360
}

/// [capabilities] 段：各能力后端的 system prompt 文件（未设置时使用内置 prompt）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CapabilitiesSection {
    pub lookup_prompt: Option<PathBuf>,
    pub design_guidance_prompt: Option<PathBuf>,
    pub code_generation_prompt: Option<PathBuf>,
}

/// [log] 段：日志级别与输出格式（console / json）
#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "console".to_string()
}

impl AppConfig {
    /// 校验数值配置；API Key 等外部依赖在创建 LLM 客户端时检查
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.app.max_sessions == 0 {
            return Err(AgentError::ConfigError("app.max_sessions must be > 0".to_string()));
        }
        let timeouts = [
            ("pev.loop_timeout_secs", self.pev.loop_timeout_secs),
            ("pev.complex_timeout_secs", self.pev.complex_timeout_secs),
            ("pev.step_timeout_secs", self.pev.step_timeout_secs),
            ("llm.request_timeout_secs", self.llm.request_timeout_secs),
            ("api.request_timeout_secs", self.api.request_timeout_secs),
            ("api.complex_timeout_secs", self.api.complex_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(AgentError::ConfigError(format!("{name} must be > 0")));
        }
        if !matches!(self.log.format.as_str(), "console" | "json") {
            return Err(AgentError::ConfigError(format!(
                "log.format must be console or json, got {}",
                self.log.format
            )));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 PEV__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PEV__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PEV")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
