//! Scrape 提供方：抓取网页并转成纯文本
//!
//! GET 请求带超时与浏览器 User-Agent；可选遵守 robots.txt（User-agent: * 的 Disallow 规则）。
//! 对 HTML 使用 html2text 提取可读文本，失败时回退到简单去标签；结果按字符数截断。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use url::Url;

use crate::tools::provider::{PageFetch, ProviderError, ScrapeProvider};

/// 使用现代浏览器 UA，避免被站点识别为爬虫
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36";

/// 截断后追加的标记
const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head = s.get(..s.len().min(15)).unwrap_or("").to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<meta") || s.contains("<head") || s.contains("<title")))
}

fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 将抓取内容规范化为纯文本并截断到 max_chars；返回 (文本, 是否截断)
pub fn page_to_text(raw: &str, max_chars: usize) -> (String, bool) {
    // 去除 BOM，避免 HTML 检测失败
    let raw = raw.strip_prefix('\u{FEFF}').unwrap_or(raw);
    let text = if looks_like_html(raw) {
        html_to_text(raw)
    } else {
        raw.to_string()
    };
    let text = text.trim();
    if text.chars().count() > max_chars {
        let kept: String = text.chars().take(max_chars).collect();
        (kept + TRUNCATION_MARKER, true)
    } else {
        (text.to_string(), false)
    }
}

/// robots.txt 是否允许抓取 path（仅解析 `User-agent: *` 段的 Disallow / Allow 前缀）
pub fn robots_allows(robots_txt: &str, path: &str) -> bool {
    let mut applies = false;
    let mut in_agent_block = false;
    let mut longest_allow = 0usize;
    let mut longest_disallow = 0usize;

    for line in robots_txt.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();
        match field.as_str() {
            "user-agent" => {
                if !in_agent_block {
                    applies = false;
                }
                in_agent_block = true;
                if value == "*" {
                    applies = true;
                }
            }
            "disallow" | "allow" => {
                in_agent_block = false;
                if !applies || value.is_empty() || !path.starts_with(value) {
                    continue;
                }
                if field == "allow" {
                    longest_allow = longest_allow.max(value.len());
                } else {
                    longest_disallow = longest_disallow.max(value.len());
                }
            }
            _ => in_agent_block = false,
        }
    }
    longest_disallow == 0 || longest_allow >= longest_disallow
}

/// 从 URL 中拆出 (origin, path?query)
fn split_origin(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw.trim()).ok()?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    let path = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    Some((origin.ascii_serialization(), path))
}

/// 基于 reqwest 的抓取实现
pub struct HttpScraper {
    client: Client,
    respect_robots: bool,
}

impl HttpScraper {
    pub fn new(timeout_secs: u64, respect_robots: bool) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(BROWSER_USER_AGENT)
            .default_headers({
                use reqwest::header::{HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    ACCEPT,
                    HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
                );
                h.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
                h
            })
            .build()
            .unwrap_or_default();
        Self {
            client,
            respect_robots,
        }
    }

    /// robots.txt 获取失败时默认允许
    async fn allowed_by_robots(&self, url: &str) -> bool {
        let Some((origin, path)) = split_origin(url) else {
            return true;
        };
        let robots_url = format!("{}/robots.txt", origin);
        match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => robots_allows(&body, &path),
                Err(_) => true,
            },
            _ => true,
        }
    }
}

#[async_trait]
impl ScrapeProvider for HttpScraper {
    async fn fetch(&self, url: &str) -> Result<PageFetch, ProviderError> {
        if self.respect_robots && !self.allowed_by_robots(url).await {
            return Err(ProviderError::Disallowed(url.to_string()));
        }
        tracing::debug!(url = %url, "scrape fetch");
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(PageFetch { status, body })
    }
}
