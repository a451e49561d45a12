//! Search 提供方：DuckDuckGo HTML 端点
//!
//! 查询词后追加 `-site:` 排除视频 / 社交类站点（这些页面抓不到可用正文），
//! 返回结果中若仍出现这些域名也会被过滤。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use url::Url;

use crate::tools::provider::{ProviderError, SearchHit, SearchProvider};
use crate::tools::scrape::BROWSER_USER_AGENT;

pub const DUCKDUCKGO_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

fn result_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("valid regex")
    })
}

fn snippet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn clean_fragment(html: &str) -> String {
    let text = tag_re().replace_all(html, "");
    let text = text
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// DuckDuckGo 链接形如 `//duckduckgo.com/l/?uddg=<编码后的真实地址>`，取出真实地址
fn resolve_result_url(href: &str) -> Option<String> {
    let href = href.replace("&amp;", "&");
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.clone()
    };
    let url = Url::parse(&absolute).ok()?;
    if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    if url.scheme() == "http" || url.scheme() == "https" {
        Some(absolute)
    } else {
        None
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(|h| h.to_ascii_lowercase())
}

fn is_discarded(url: &str, discard: &[String]) -> bool {
    let Some(host) = host_of(url) else {
        return true;
    };
    discard
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

/// 解析 DuckDuckGo HTML 结果页
pub fn parse_results(html: &str, count: usize, discard: &[String]) -> Vec<SearchHit> {
    let snippets: Vec<String> = snippet_re()
        .captures_iter(html)
        .map(|c| clean_fragment(&c[1]))
        .collect();
    result_link_re()
        .captures_iter(html)
        .enumerate()
        .filter_map(|(i, c)| {
            let url = resolve_result_url(&c[1])?;
            Some(SearchHit {
                title: clean_fragment(&c[2]),
                url,
                snippet: snippets.get(i).cloned().unwrap_or_default(),
            })
        })
        .filter(|hit| !is_discarded(&hit.url, discard))
        .take(count)
        .collect()
}

/// 在查询词后追加排除站点
pub fn build_query(query: &str, discard: &[String]) -> String {
    let mut q = query.trim().to_string();
    for domain in discard {
        q.push_str(&format!(" -site:{}", domain));
    }
    q
}

/// DuckDuckGo 搜索
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
    discard_domains: Vec<String>,
}

impl DuckDuckGoSearch {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64, discard_domains: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            discard_domains: discard_domains
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let q = build_query(query, &self.discard_domains);
        tracing::debug!(query = %q, "duckduckgo search");
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", q.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16()));
        }
        let html = resp.text().await?;
        Ok(parse_results(&html, count, &self.discard_domains))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<div class="result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.visitlisboa.com%2Fen%2Fplaces&amp;rut=abc">Visit <b>Lisboa</b> &amp; more</a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Official <b>tourism</b> site.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3D1">Lisbon video</a>
  <a class="result__snippet" href="x">A video.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://en.wikipedia.org/wiki/Lisbon">Lisbon - Wikipedia</a>
  <a class="result__snippet" href="x">Capital of Portugal.</a>
</div>
"#;

    #[test]
    fn test_parse_results_decodes_and_filters() {
        let discard = vec!["youtube.com".to_string()];
        let hits = parse_results(PAGE, 5, &discard);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.visitlisboa.com/en/places");
        assert_eq!(hits[0].title, "Visit Lisboa & more");
        assert_eq!(hits[0].snippet, "Official tourism site.");
        assert_eq!(hits[1].url, "https://en.wikipedia.org/wiki/Lisbon");
        assert_eq!(hits[1].snippet, "Capital of Portugal.");
    }

    #[test]
    fn test_parse_results_respects_count() {
        let hits = parse_results(PAGE, 1, &[]);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_build_query() {
        let q = build_query(" lisbon tips ", &["youtube.com".into(), "tiktok.com".into()]);
        assert_eq!(q, "lisbon tips -site:youtube.com -site:tiktok.com");
    }
}
