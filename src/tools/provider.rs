//! 检索提供方抽象
//!
//! 搜索 / 抓取 / 地理编码各自一个 trait，互相独立、可替换；缓存与重试由 ToolDispatcher 负责。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 提供方错误；is_transient 决定 Dispatcher 是否重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Disallowed by robots.txt: {0}")]
    Disallowed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// 超时、网络、5xx、408、429 视为暂时性错误
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::RateLimited | ProviderError::Network(_) => true,
            ProviderError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }

    pub fn from_status(code: u16) -> Self {
        if code == 429 {
            ProviderError::RateLimited
        } else {
            ProviderError::Status(code)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = e.status() {
            ProviderError::from_status(status.as_u16())
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// 单条搜索结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// 抓取到的原始页面
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageFetch {
    pub status: u16,
    /// HTML 或纯文本
    pub body: String,
}

/// 地理编码候选
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeocodeCandidate {
    pub lat: f64,
    pub lon: f64,
    pub display_name: String,
    /// 0.0 - 1.0
    pub confidence: f64,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// 按相关度排序返回至多 count 条结果
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, ProviderError>;
}

#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    /// 返回原始内容与 HTTP 状态；非 2xx 也作为 Ok 返回，由调用方判断
    async fn fetch(&self, url: &str) -> Result<PageFetch, ProviderError>;
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// 返回全部候选（可能为空）
    async fn geocode(&self, place: &str) -> Result<Vec<GeocodeCandidate>, ProviderError>;
}
