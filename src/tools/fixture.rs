//! 固定数据的提供方（测试 / 离线演示）
//!
//! 结果由输入确定；记录调用次数，可指定某些输入永远失败，便于验证重试与单次失败隔离。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::tools::provider::{
    GeocodeCandidate, GeocodeProvider, PageFetch, ProviderError, ScrapeProvider, SearchHit,
    SearchProvider,
};

fn slug(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// 搜索：固定结果或按查询词生成
#[derive(Default)]
pub struct FixtureSearch {
    canned: HashMap<String, Vec<SearchHit>>,
    failing: HashSet<String>,
    /// 前 N 次调用返回 503，然后恢复
    flaky_failures: AtomicUsize,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl FixtureSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.canned.insert(query.to_lowercase(), hits);
        self
    }

    /// 该查询永远返回 HTTP 503
    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_lowercase());
        self
    }

    pub fn flaky(self, failures: usize) -> Self {
        self.flaky_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for FixtureSearch {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.to_string());
        }
        let key = query.to_lowercase();
        if self.failing.contains(&key) {
            return Err(ProviderError::Status(503));
        }
        let remaining = self.flaky_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.flaky_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Timeout);
        }
        let hits = match self.canned.get(&key) {
            Some(hits) => hits.clone(),
            None => (1..=count.min(3))
                .map(|i| SearchHit {
                    title: format!("{} result {}", query, i),
                    url: format!("https://example.org/{}/{}", slug(query), i),
                    snippet: format!("Snippet {} about {}.", i, query),
                })
                .collect(),
        };
        Ok(hits.into_iter().take(count).collect())
    }
}

/// 抓取：固定页面，未登记的地址返回 404
#[derive(Default)]
pub struct FixtureScraper {
    pages: HashMap<String, PageFetch>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl FixtureScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            PageFetch {
                status: 200,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeProvider for FixtureScraper {
    async fn fetch(&self, url: &str) -> Result<PageFetch, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(url) {
            return Err(ProviderError::Status(503));
        }
        Ok(self.pages.get(url).cloned().unwrap_or(PageFetch {
            status: 404,
            body: String::new(),
        }))
    }
}

/// 地理编码：固定候选，未登记的地名返回空
#[derive(Default)]
pub struct FixtureGeocoder {
    places: HashMap<String, Vec<GeocodeCandidate>>,
    calls: AtomicUsize,
}

impl FixtureGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, place: &str, candidates: Vec<GeocodeCandidate>) -> Self {
        self.places.insert(place.to_lowercase(), candidates);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodeProvider for FixtureGeocoder {
    async fn geocode(&self, place: &str) -> Result<Vec<GeocodeCandidate>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .places
            .get(&place.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_search_is_deterministic() {
        let search = FixtureSearch::new();
        let a = search.search("Lisbon food", 5).await.unwrap();
        let b = search.search("Lisbon food", 5).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].url, "https://example.org/lisbon-food/1");
        assert_eq!(search.calls(), 2);
    }

    #[tokio::test]
    async fn test_canned_hits_are_truncated_to_count() {
        let hit = |n: usize| SearchHit {
            title: format!("Guide {}", n),
            url: format!("https://guides.test/{}", n),
            snippet: "curated".into(),
        };
        let search = FixtureSearch::new().with_hits("Porto Wine", vec![hit(1), hit(2), hit(3)]);
        let hits = search.search("porto wine", 2).await.unwrap();
        assert_eq!(hits, vec![hit(1), hit(2)]);
        assert_eq!(search.queries(), vec!["porto wine".to_string()]);
    }

    #[tokio::test]
    async fn test_fixture_failures() {
        let search = FixtureSearch::new().failing_on("broken");
        assert_eq!(
            search.search("Broken", 5).await.unwrap_err(),
            ProviderError::Status(503)
        );

        let flaky = FixtureSearch::new().flaky(1);
        assert!(flaky.search("x", 1).await.is_err());
        assert!(flaky.search("x", 1).await.is_ok());

        let scraper = FixtureScraper::new();
        assert_eq!(scraper.fetch("https://nowhere.test").await.unwrap().status, 404);
    }
}
