//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAYFARER__*` 覆盖（双下划线表示嵌套，如 `WAYFARER__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::llm::SamplingParams;
use crate::planning::PlanningLimits;
use crate::tools::{DispatchPolicy, DUCKDUCKGO_HTML_ENDPOINT, NOMINATIM_ENDPOINT};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planner: PlannerSection,
    pub tools: ToolsSection,
    pub cache: CacheSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：together / openai / mock；缺少 API Key 时回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 单次模型请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "together".to_string()
}

fn default_temperature() -> f32 {
    0.6
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_tokens() -> u32 {
    15000
}

fn default_request_timeout() -> u64 {
    180
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl LlmSection {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

/// [planner] 段：轮数与纠错上限、截止时间、花费容差
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_correction_retries")]
    pub correction_retries: usize,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_cost_tolerance")]
    pub cost_tolerance: f64,
    #[serde(default = "default_true")]
    pub research_enabled: bool,
}

fn default_max_rounds() -> usize {
    8
}

fn default_correction_retries() -> usize {
    1
}

fn default_run_timeout_secs() -> u64 {
    300
}

fn default_cost_tolerance() -> f64 {
    0.10
}

fn default_true() -> bool {
    true
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            correction_retries: default_correction_retries(),
            run_timeout_secs: default_run_timeout_secs(),
            cost_tolerance: default_cost_tolerance(),
            research_enabled: true,
        }
    }
}

impl PlannerSection {
    pub fn limits(&self) -> PlanningLimits {
        PlanningLimits {
            max_rounds: self.max_rounds,
            correction_retries: self.correction_retries,
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            cost_tolerance: self.cost_tolerance,
            research_enabled: self.research_enabled,
        }
    }
}

/// [tools] 段：单次调用超时、并发上限、重试与退避
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub scrape: ScrapeSection,
    #[serde(default)]
    pub geocode: GeocodeSection,
}

fn default_tool_timeout_secs() -> u64 {
    20
}

fn default_max_concurrent_calls() -> usize {
    6
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    300
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_concurrent_calls: default_max_concurrent_calls(),
            retries: default_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            search: SearchSection::default(),
            scrape: ScrapeSection::default(),
            geocode: GeocodeSection::default(),
        }
    }
}

/// [tools.search] 段：搜索端点与排除的域名
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_discard_domains")]
    pub discard_domains: Vec<String>,
}

fn default_search_endpoint() -> String {
    DUCKDUCKGO_HTML_ENDPOINT.to_string()
}

fn default_discard_domains() -> Vec<String> {
    [
        "youtube.com",
        "britannica.com",
        "vimeo.com",
        "pinterest.com",
        "facebook.com",
        "instagram.com",
        "tiktok.com",
        "twitter.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            discard_domains: default_discard_domains(),
        }
    }
}

/// [tools.scrape] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSection {
    /// 页面正文截断长度（字符）
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
}

fn default_max_chars() -> usize {
    4000
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            respect_robots: true,
        }
    }
}

/// [tools.geocode] 段：Nominatim 要求可识别的 User-Agent
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeSection {
    #[serde(default = "default_geocode_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_geocode_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

fn default_geocode_endpoint() -> String {
    NOMINATIM_ENDPOINT.to_string()
}

fn default_geocode_user_agent() -> String {
    format!("wayfarer/{}", env!("CARGO_PKG_VERSION"))
}

fn default_candidate_limit() -> usize {
    5
}

impl Default for GeocodeSection {
    fn default() -> Self {
        Self {
            endpoint: default_geocode_endpoint(),
            user_agent: default_geocode_user_agent(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

/// [cache] 段：容量、各工具 TTL、清理周期与快照
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,
    #[serde(default = "default_scrape_ttl_secs")]
    pub scrape_ttl_secs: u64,
    #[serde(default = "default_geocode_ttl_secs")]
    pub geocode_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    pub snapshot_path: Option<PathBuf>,
}

fn default_max_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_ttl_secs() -> u64 {
    24 * 3600
}

fn default_search_ttl_secs() -> u64 {
    6 * 3600
}

fn default_scrape_ttl_secs() -> u64 {
    24 * 3600
}

fn default_geocode_ttl_secs() -> u64 {
    30 * 24 * 3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            default_ttl_secs: default_ttl_secs(),
            search_ttl_secs: default_search_ttl_secs(),
            scrape_ttl_secs: default_scrape_ttl_secs(),
            geocode_ttl_secs: default_geocode_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            snapshot_path: None,
        }
    }
}

impl CacheSection {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_bytes: self.max_bytes,
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            snapshot_path: self.snapshot_path.clone(),
        }
    }
}

impl AppConfig {
    /// 分发策略由 [tools] 与 [cache] 的 TTL 共同决定
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            tool_timeout: Duration::from_secs(self.tools.tool_timeout_secs),
            retries: self.tools.retries,
            backoff_base: Duration::from_millis(self.tools.backoff_base_ms),
            scrape_max_chars: self.tools.scrape.max_chars,
            search_ttl: Duration::from_secs(self.cache.search_ttl_secs),
            scrape_ttl: Duration::from_secs(self.cache.scrape_ttl_secs),
            geocode_ttl: Duration::from_secs(self.cache.geocode_ttl_secs),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WAYFARER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAYFARER__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("WAYFARER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        let limits = cfg.planner.limits();
        assert_eq!(limits.max_rounds, 8);
        assert_eq!(limits.correction_retries, 1);
        assert_eq!(limits.run_timeout, Duration::from_secs(300));
        assert_eq!(cfg.tools.max_concurrent_calls, 6);
        assert_eq!(cfg.cache.max_bytes, 2 * 1024 * 1024 * 1024);
        let policy = cfg.dispatch_policy();
        assert_eq!(policy.retries, 2);
        assert_eq!(policy.scrape_max_chars, 4000);
        assert!(cfg.tools.search.discard_domains.contains(&"youtube.com".to_string()));
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wayfarer.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"mock\"\n\n[planner]\nmax_rounds = 3\n\n[tools.scrape]\nrespect_robots = false\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.planner.max_rounds, 3);
        assert!(!cfg.tools.scrape.respect_robots);
        assert_eq!(cfg.planner.correction_retries, 1);
    }
}
