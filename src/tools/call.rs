//! 工具调用的类型定义
//!
//! 模型给出的是 `ToolCallRequest`（工具名字符串 + 自由 JSON 参数）；
//! `resolve` 通过显式映射转成封闭集合 `ToolCall`（Search / Scrape / Geocode），
//! 每个变体有固定、带类型的参数，缓存键由规范化参数派生。

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::cache::CacheKey;
use crate::tools::provider::SearchHit;

/// 可用工具（封闭集合）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    Search,
    Scrape,
    Geocode,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [ToolName::Search, ToolName::Scrape, ToolName::Geocode];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Search => "search",
            ToolName::Scrape => "scrape",
            ToolName::Geocode => "geocode",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "search" | "web_search" => Some(ToolName::Search),
            "scrape" | "fetch" => Some(ToolName::Scrape),
            "geocode" => Some(ToolName::Geocode),
            _ => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_search_count() -> u8 {
    5
}

/// search 参数
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// 搜索关键词，如 "best pastelarias Lisbon"
    #[serde(alias = "q")]
    pub query: String,
    /// 返回结果条数（1-10）
    #[serde(default = "default_search_count")]
    pub count: u8,
}

/// scrape 参数
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScrapeArgs {
    /// 完整的 http(s) 地址
    pub url: String,
}

/// geocode 参数
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GeocodeArgs {
    /// 地点名称，建议带上城市，如 "Belém Tower, Lisbon"
    #[serde(alias = "query", alias = "name")]
    pub place: String,
}

/// 解析后的带类型参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolArgs {
    Search(SearchArgs),
    Scrape(ScrapeArgs),
    Geocode(GeocodeArgs),
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 去掉 fragment；scheme / host 小写，path 与 query 保持原样
fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

impl ToolArgs {
    pub fn tool(&self) -> ToolName {
        match self {
            ToolArgs::Search(_) => ToolName::Search,
            ToolArgs::Scrape(_) => ToolName::Scrape,
            ToolArgs::Geocode(_) => ToolName::Geocode,
        }
    }

    /// 规范化：去多余空白、统一大小写、限制取值范围
    pub fn normalized(&self) -> ToolArgs {
        match self {
            ToolArgs::Search(a) => ToolArgs::Search(SearchArgs {
                query: collapse_whitespace(&a.query).to_lowercase(),
                count: a.count.clamp(1, 10),
            }),
            ToolArgs::Scrape(a) => ToolArgs::Scrape(ScrapeArgs {
                url: normalize_url(&a.url),
            }),
            ToolArgs::Geocode(a) => ToolArgs::Geocode(GeocodeArgs {
                place: collapse_whitespace(&a.place).to_lowercase(),
            }),
        }
    }

    fn canonical(&self) -> String {
        // 字段顺序固定，保证同一参数得到同一串
        match self.normalized() {
            ToolArgs::Search(a) => format!("query={}&count={}", a.query, a.count),
            ToolArgs::Scrape(a) => format!("url={}", a.url),
            ToolArgs::Geocode(a) => format!("place={}", a.place),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(self.tool().as_str(), &self.canonical())
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            ToolArgs::Search(a) if a.query.trim().is_empty() => Err("query must not be empty".into()),
            ToolArgs::Scrape(a) => {
                let url = a.url.trim();
                if url.starts_with("http://") || url.starts_with("https://") {
                    Ok(())
                } else {
                    Err(format!("url must start with http:// or https://, got '{}'", url))
                }
            }
            ToolArgs::Geocode(a) if a.place.trim().is_empty() => Err("place must not be empty".into()),
            _ => Ok(()),
        }
    }

    /// 日志用的简短预览
    pub fn preview(&self) -> String {
        let s = match self {
            ToolArgs::Search(a) => format!("query={:?} count={}", a.query, a.count),
            ToolArgs::Scrape(a) => format!("url={}", a.url),
            ToolArgs::Geocode(a) => format!("place={:?}", a.place),
        };
        if s.chars().count() > 200 {
            format!("{}...", s.chars().take(200).collect::<String>())
        } else {
            s
        }
    }
}

/// 模型发出的原始调用：`{"id": "c1", "tool": "search", "args": {...}}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "name")]
    pub tool: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            args,
        }
    }

    /// 映射到封闭的工具集合；未知工具或参数不合法时给出单次调用级别的失败
    pub fn resolve(&self) -> Result<ToolCall, ToolFailure> {
        let name = ToolName::parse(&self.tool).ok_or_else(|| {
            ToolFailure::new(
                FailureKind::UnknownTool,
                format!(
                    "unknown tool '{}', available: search, scrape, geocode",
                    self.tool
                ),
            )
        })?;
        let invalid = |e: serde_json::Error| {
            ToolFailure::new(
                FailureKind::InvalidArguments,
                format!("invalid arguments for {}: {}", name, e),
            )
        };
        let args = match name {
            ToolName::Search => ToolArgs::Search(serde_json::from_value(self.args.clone()).map_err(invalid)?),
            ToolName::Scrape => ToolArgs::Scrape(serde_json::from_value(self.args.clone()).map_err(invalid)?),
            ToolName::Geocode => ToolArgs::Geocode(serde_json::from_value(self.args.clone()).map_err(invalid)?),
        };
        args.validate()
            .map_err(|msg| ToolFailure::new(FailureKind::InvalidArguments, msg))?;
        Ok(ToolCall {
            id: self.id.clone(),
            args,
        })
    }
}

/// 已解析的调用
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub args: ToolArgs,
}

/// 各工具的结构化结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadDetail {
    Search {
        hits: Vec<SearchHit>,
    },
    Page {
        status: u16,
        truncated: bool,
    },
    Place {
        lat: f64,
        lon: f64,
        display_name: String,
        confidence: f64,
        osm_url: String,
        /// 置信度较低、被舍弃的候选
        #[serde(default)]
        discarded: Vec<String>,
    },
}

/// 规范化后的结果（即缓存中保存的内容）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub text: String,
    pub source_url: Option<String>,
    pub retrieved_at: DateTime<Utc>,
    pub detail: PayloadDetail,
}

/// 失败类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    InvalidArguments,
    /// 重试耗尽仍失败（超时 / 5xx / 限流）
    Unavailable,
    NotFound,
    /// robots.txt 禁止
    Disallowed,
    Cancelled,
    /// 本次请求关闭了检索
    ResearchDisabled,
}

/// 单次调用的错误标记
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub attempts: u32,
}

impl ToolFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// 单次调用结果；创建后不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub outcome: Result<ToolPayload, ToolFailure>,
    /// 是否命中缓存
    #[serde(default)]
    pub cached: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, tool: ToolName, payload: ToolPayload, cached: bool) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.as_str().to_string(),
            outcome: Ok(payload),
            cached,
        }
    }

    pub fn failure(call_id: impl Into<String>, tool: impl Into<String>, failure: ToolFailure) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            outcome: Err(failure),
            cached: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// 回填给模型的 JSON 文本
    pub fn to_observation(&self) -> String {
        let body = match &self.outcome {
            Ok(payload) => serde_json::json!({
                "call_id": self.call_id,
                "tool": self.tool,
                "ok": true,
                "text": payload.text,
                "source_url": payload.source_url,
                "retrieved_at": payload.retrieved_at.to_rfc3339(),
                "data": payload.detail,
            }),
            Err(failure) => serde_json::json!({
                "call_id": self.call_id,
                "tool": self.tool,
                "ok": false,
                "error": format!("source unavailable ({:?}): {}", failure.kind, failure.message),
            }),
        };
        body.to_string()
    }
}
