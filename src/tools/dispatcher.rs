//! 工具分发器
//!
//! 把模型的一批 `ToolCallRequest` 映射到对应提供方并执行：
//! 先查缓存，未命中再在超时内调用提供方；暂时性错误按指数退避重试，
//! 成功后写回缓存。单个调用失败只产生该调用的错误结果，不影响同批其它调用。
//! 结果顺序与输入一致；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, ContentCache, PutOutcome};
use crate::core::TaskScheduler;
use crate::tools::call::{
    FailureKind, PayloadDetail, ToolArgs, ToolCall, ToolCallRequest, ToolFailure, ToolName,
    ToolPayload, ToolResult,
};
use crate::tools::geocode::{osm_link, pick_best};
use crate::tools::provider::{GeocodeProvider, ProviderError, ScrapeProvider, SearchProvider};
use crate::tools::scrape::page_to_text;

/// 超时、重试、缓存 TTL 等策略
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// 单次提供方调用的超时
    pub tool_timeout: Duration,
    /// 首次失败后的最大重试次数
    pub retries: u32,
    /// 第 n 次重试前等待 base * 2^n
    pub backoff_base: Duration,
    /// 抓取文本保留的最大字符数
    pub scrape_max_chars: usize,
    pub search_ttl: Duration,
    pub scrape_ttl: Duration,
    pub geocode_ttl: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(20),
            retries: 2,
            backoff_base: Duration::from_millis(300),
            scrape_max_chars: 4000,
            search_ttl: Duration::from_secs(6 * 3600),
            scrape_ttl: Duration::from_secs(24 * 3600),
            geocode_ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

impl DispatchPolicy {
    fn ttl(&self, tool: ToolName) -> Duration {
        match tool {
            ToolName::Search => self.search_ttl,
            ToolName::Scrape => self.scrape_ttl,
            ToolName::Geocode => self.geocode_ttl,
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// 提供方最终失败时映射到的错误类别
fn failure_from(err: &ProviderError, attempts: u32) -> ToolFailure {
    let kind = match err {
        ProviderError::NotFound(_) | ProviderError::Status(404) | ProviderError::Status(410) => {
            FailureKind::NotFound
        }
        ProviderError::Disallowed(_) => FailureKind::Disallowed,
        _ => FailureKind::Unavailable,
    };
    ToolFailure::new(kind, err.to_string()).with_attempts(attempts)
}

/// 工具分发器：持有三类提供方与共享缓存
pub struct ToolDispatcher {
    search: Arc<dyn SearchProvider>,
    scrape: Arc<dyn ScrapeProvider>,
    geocode: Arc<dyn GeocodeProvider>,
    cache: Arc<ContentCache>,
    scheduler: TaskScheduler,
    policy: DispatchPolicy,
}

/// 单次调用的审计信息
struct Audit<'a> {
    call_id: &'a str,
    tool: &'a str,
    cache: &'static str,
    attempts: u32,
    args_preview: String,
    start: Instant,
}

impl Audit<'_> {
    fn emit(&self, result: &ToolResult) {
        let outcome = match &result.outcome {
            Ok(_) => "ok".to_string(),
            Err(f) => format!("{:?}", f.kind).to_lowercase(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "call_id": self.call_id,
            "tool": self.tool,
            "cache": self.cache,
            "ok": !result.is_error(),
            "outcome": outcome,
            "attempts": self.attempts,
            "duration_ms": self.start.elapsed().as_millis() as u64,
            "args_preview": self.args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
    }
}

impl ToolDispatcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        scrape: Arc<dyn ScrapeProvider>,
        geocode: Arc<dyn GeocodeProvider>,
        cache: Arc<ContentCache>,
        max_concurrent_calls: usize,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            search,
            scrape,
            geocode,
            cache,
            scheduler: TaskScheduler::new(max_concurrent_calls),
            policy,
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// 并发执行一批调用（受并发上限约束），返回与输入同序的结果
    pub async fn dispatch(
        &self,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.dispatch_one(call, cancel))).await
    }

    async fn dispatch_one(&self, request: &ToolCallRequest, cancel: &CancellationToken) -> ToolResult {
        let start = Instant::now();
        let call = match request.resolve() {
            Ok(call) => call,
            Err(failure) => {
                let result = ToolResult::failure(&request.id, &request.tool, failure);
                Audit {
                    call_id: &request.id,
                    tool: &request.tool,
                    cache: "n/a",
                    attempts: 0,
                    args_preview: preview_value(&request.args),
                    start,
                }
                .emit(&result);
                return result;
            }
        };

        let tool = call.args.tool();
        let key = call.args.cache_key();
        let mut audit = Audit {
            call_id: &request.id,
            tool: tool.as_str(),
            cache: "hit",
            attempts: 0,
            args_preview: call.args.preview(),
            start,
        };

        if let Some(payload) = self.cached(&key) {
            let result = ToolResult::success(&call.id, tool, payload, true);
            audit.emit(&result);
            return result;
        }

        audit.cache = "miss";
        let (result, attempts) = self.execute_live(&call, key, cancel).await;
        audit.attempts = attempts;
        audit.emit(&result);
        result
    }

    /// 缓存内容反序列化失败按未命中处理
    fn cached(&self, key: &CacheKey) -> Option<ToolPayload> {
        let bytes = self.cache.get(key)?;
        match serde_json::from_slice::<ToolPayload>(&bytes) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    /// 调用提供方（带超时、重试与取消）；返回结果与实际尝试次数
    async fn execute_live(
        &self,
        call: &ToolCall,
        key: CacheKey,
        cancel: &CancellationToken,
    ) -> (ToolResult, u32) {
        let tool = call.args.tool();
        let cancelled = |attempts: u32| {
            ToolResult::failure(
                &call.id,
                tool.as_str(),
                ToolFailure::new(FailureKind::Cancelled, "run cancelled").with_attempts(attempts),
            )
        };

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (cancelled(0), 0),
            permit = self.scheduler.acquire_tool() => permit,
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return (cancelled(attempts), attempts),
                r = timeout(self.policy.tool_timeout, self.invoke(&call.args)) => {
                    r.unwrap_or(Err(ProviderError::Timeout))
                }
            };

            match outcome {
                Ok(payload) => {
                    self.write_through(key, &payload, tool);
                    return (ToolResult::success(&call.id, tool, payload, false), attempts);
                }
                Err(e) if e.is_transient() && attempts <= self.policy.retries => {
                    let delay = self.policy.backoff(attempts - 1);
                    tracing::debug!(
                        call_id = %call.id,
                        tool = %tool,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient tool error, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return (cancelled(attempts), attempts),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let failure = failure_from(&e, attempts);
                    return (ToolResult::failure(&call.id, tool.as_str(), failure), attempts);
                }
            }
        }
    }

    fn write_through(&self, key: CacheKey, payload: &ToolPayload, tool: ToolName) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize tool payload, not cached");
                return;
            }
        };
        let outcome = self.cache.put(key, bytes, Some(self.policy.ttl(tool)));
        if matches!(outcome, PutOutcome::Rejected | PutOutcome::Unavailable) {
            tracing::debug!(tool = %tool, ?outcome, "tool payload not cached");
        }
    }

    /// 调用对应提供方并规范化为 ToolPayload
    async fn invoke(&self, args: &ToolArgs) -> Result<ToolPayload, ProviderError> {
        let retrieved_at = chrono::Utc::now();
        match args {
            ToolArgs::Search(a) => {
                let hits = self.search.search(a.query.trim(), a.count.clamp(1, 10) as usize).await?;
                let text = hits
                    .iter()
                    .enumerate()
                    .map(|(i, h)| format!("{}. {} ({}): {}", i + 1, h.title, h.url, h.snippet))
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolPayload {
                    text,
                    source_url: hits.first().map(|h| h.url.clone()),
                    retrieved_at,
                    detail: PayloadDetail::Search { hits },
                })
            }
            ToolArgs::Scrape(a) => {
                let url = a.url.trim();
                let page = self.scrape.fetch(url).await?;
                if !(200..300).contains(&page.status) {
                    return Err(ProviderError::from_status(page.status));
                }
                let (text, truncated) = page_to_text(&page.body, self.policy.scrape_max_chars);
                Ok(ToolPayload {
                    text,
                    source_url: Some(url.to_string()),
                    retrieved_at,
                    detail: PayloadDetail::Page {
                        status: page.status,
                        truncated,
                    },
                })
            }
            ToolArgs::Geocode(a) => {
                let place = a.place.trim();
                let candidates = self.geocode.geocode(place).await?;
                let (best, discarded) =
                    pick_best(candidates).ok_or_else(|| ProviderError::NotFound(place.to_string()))?;
                if !discarded.is_empty() {
                    tracing::debug!(place = %place, chosen = %best.display_name, discarded = discarded.len(), "ambiguous geocode");
                }
                let osm_url = osm_link(best.lat, best.lon);
                Ok(ToolPayload {
                    text: format!("{} ({:.5}, {:.5})", best.display_name, best.lat, best.lon),
                    source_url: Some(osm_url.clone()),
                    retrieved_at,
                    detail: PayloadDetail::Place {
                        lat: best.lat,
                        lon: best.lon,
                        display_name: best.display_name,
                        confidence: best.confidence,
                        osm_url,
                        discarded,
                    },
                })
            }
        }
    }
}

fn preview_value(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::tools::fixture::{FixtureGeocoder, FixtureScraper, FixtureSearch};
    use crate::tools::provider::{GeocodeCandidate, SearchHit};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> DispatchPolicy {
        DispatchPolicy {
            tool_timeout: Duration::from_millis(500),
            backoff_base: Duration::from_millis(1),
            ..DispatchPolicy::default()
        }
    }

    fn dispatcher_with(
        search: Arc<FixtureSearch>,
        scrape: Arc<FixtureScraper>,
        geocode: Arc<FixtureGeocoder>,
    ) -> ToolDispatcher {
        ToolDispatcher::new(
            search,
            scrape,
            geocode,
            Arc::new(ContentCache::new(CacheConfig::default())),
            6,
            fast_policy(),
        )
    }

    fn default_dispatcher() -> (ToolDispatcher, Arc<FixtureSearch>) {
        let search = Arc::new(FixtureSearch::new().failing_on("broken query"));
        let scrape = Arc::new(
            FixtureScraper::new()
                .with_page("https://example.org/tram", "<html><body><p>Tram 28 runs daily.</p></body></html>"),
        );
        let geocode = Arc::new(FixtureGeocoder::new().with_place(
            "belém tower",
            vec![
                GeocodeCandidate {
                    lat: 38.6916,
                    lon: -9.2160,
                    display_name: "Torre de Belém, Lisboa".into(),
                    confidence: 0.8,
                },
                GeocodeCandidate {
                    lat: -1.45,
                    lon: -48.5,
                    display_name: "Belém, Pará".into(),
                    confidence: 0.3,
                },
            ],
        ));
        (dispatcher_with(search.clone(), scrape, geocode), search)
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_isolates_failure() {
        let (dispatcher, search) = default_dispatcher();
        let calls = vec![
            ToolCallRequest::new("a", "search", json!({"query": "lisbon food"})),
            ToolCallRequest::new("b", "search", json!({"query": "broken query"})),
            ToolCallRequest::new("c", "scrape", json!({"url": "https://example.org/tram"})),
            ToolCallRequest::new("d", "geocode", json!({"place": "Belém Tower"})),
        ];
        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;

        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(results.iter().filter(|r| r.is_error()).count(), 1);

        let failure = results[1].outcome.as_ref().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Unavailable);
        assert_eq!(failure.attempts, 3);
        // 1 次成功 + 3 次失败尝试
        assert_eq!(search.calls(), 4);
    }

    #[tokio::test]
    async fn test_second_dispatch_hits_cache() {
        let (dispatcher, search) = default_dispatcher();
        let calls = vec![ToolCallRequest::new("a", "search", json!({"query": "Lisbon  Food"}))];
        let first = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        assert!(!first[0].cached);

        let again = vec![ToolCallRequest::new("b", "search", json!({"query": "lisbon food"}))];
        let second = dispatcher.dispatch(&again, &CancellationToken::new()).await;
        assert!(second[0].cached);
        assert_eq!(second[0].call_id, "b");
        assert_eq!(search.calls(), 1);
        assert_eq!(dispatcher.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_error_recovers_within_retries() {
        let search = Arc::new(FixtureSearch::new().flaky(2));
        let dispatcher = dispatcher_with(
            search.clone(),
            Arc::new(FixtureScraper::new()),
            Arc::new(FixtureGeocoder::new()),
        );
        let calls = vec![ToolCallRequest::new("a", "search", json!({"query": "x"}))];
        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        assert!(!results[0].is_error());
        assert_eq!(search.calls(), 3);
    }

    #[tokio::test]
    async fn test_scrape_normalizes_html() {
        let (dispatcher, _) = default_dispatcher();
        let calls = vec![ToolCallRequest::new("a", "scrape", json!({"url": "https://example.org/tram"}))];
        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        let payload = results[0].outcome.as_ref().unwrap();
        assert!(payload.text.contains("Tram 28 runs daily."));
        assert!(!payload.text.contains("<p>"));
        assert_eq!(payload.source_url.as_deref(), Some("https://example.org/tram"));
    }

    #[tokio::test]
    async fn test_missing_page_is_not_retried() {
        let scrape = Arc::new(FixtureScraper::new());
        let dispatcher = dispatcher_with(
            Arc::new(FixtureSearch::new()),
            scrape.clone(),
            Arc::new(FixtureGeocoder::new()),
        );
        let calls = vec![ToolCallRequest::new("a", "scrape", json!({"url": "https://example.org/missing"}))];
        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        assert_eq!(results[0].outcome.as_ref().unwrap_err().kind, FailureKind::NotFound);
        assert_eq!(scrape.calls(), 1);
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_geocode_picks_best_and_records_discarded() {
        let (dispatcher, _) = default_dispatcher();
        let calls = vec![ToolCallRequest::new("a", "geocode", json!({"place": "Belém Tower"}))];
        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        match &results[0].outcome.as_ref().unwrap().detail {
            PayloadDetail::Place { display_name, discarded, osm_url, .. } => {
                assert_eq!(display_name, "Torre de Belém, Lisboa");
                assert_eq!(discarded, &vec!["Belém, Pará".to_string()]);
                assert!(osm_url.contains("mlat=38.69160"));
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_per_call_error() {
        let (dispatcher, _) = default_dispatcher();
        let calls = vec![
            ToolCallRequest::new("a", "book_hotel", json!({})),
            ToolCallRequest::new("b", "search", json!({"query": "lisbon"})),
        ];
        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        assert_eq!(results[0].outcome.as_ref().unwrap_err().kind, FailureKind::UnknownTool);
        assert!(!results[1].is_error());
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_calls_cancelled() {
        let (dispatcher, search) = default_dispatcher();
        let token = CancellationToken::new();
        token.cancel();
        let calls = vec![ToolCallRequest::new("a", "search", json!({"query": "lisbon"}))];
        let results = dispatcher.dispatch(&calls, &token).await;
        assert_eq!(results[0].outcome.as_ref().unwrap_err().kind, FailureKind::Cancelled);
        assert_eq!(search.calls(), 0);
    }

    /// 每次查询耗时固定，记录同时在途的调用峰值；"hang" 查询永不返回
    struct SlowSearch {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowSearch {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SearchProvider for SlowSearch {
        async fn search(&self, query: &str, _count: usize) -> Result<Vec<SearchHit>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // 超时会丢弃本 future，在 drop 时归还计数
            let _guard = InFlight(&self.in_flight);
            let delay = if query == "hang" {
                Duration::from_secs(3600)
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;
            Ok(vec![SearchHit {
                title: query.to_string(),
                url: format!("https://example.org/{}", query),
                snippet: "slow result".into(),
            }])
        }
    }

    fn slow_dispatcher(search: Arc<SlowSearch>, tool_timeout: Duration) -> ToolDispatcher {
        ToolDispatcher::new(
            search,
            Arc::new(FixtureScraper::new()),
            Arc::new(FixtureGeocoder::new()),
            Arc::new(ContentCache::new(CacheConfig::default())),
            6,
            DispatchPolicy {
                tool_timeout,
                backoff_base: Duration::from_millis(1),
                ..DispatchPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let search = Arc::new(SlowSearch::new(Duration::from_millis(50)));
        let dispatcher = slow_dispatcher(search.clone(), Duration::from_secs(5));
        let calls: Vec<_> = (0..20)
            .map(|i| ToolCallRequest::new(format!("c{}", i), "search", json!({"query": format!("topic {}", i)})))
            .collect();

        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        assert!(results.iter().all(|r| !r.is_error()));
        assert_eq!(search.calls.load(Ordering::SeqCst), 20);
        let peak = search.peak.load(Ordering::SeqCst);
        assert!(peak <= 6, "peak in flight {}", peak);
        assert!(peak >= 2, "calls did not overlap, peak {}", peak);
    }

    #[tokio::test]
    async fn test_hanging_call_times_out_without_blocking_siblings() {
        let search = Arc::new(SlowSearch::new(Duration::from_millis(20)));
        let dispatcher = slow_dispatcher(search.clone(), Duration::from_millis(200));
        let mut calls = vec![ToolCallRequest::new("stuck", "search", json!({"query": "hang"}))];
        calls.extend(
            (0..20).map(|i| ToolCallRequest::new(format!("c{}", i), "search", json!({"query": format!("topic {}", i)}))),
        );

        let start = Instant::now();
        let results = dispatcher.dispatch(&calls, &CancellationToken::new()).await;
        let elapsed = start.elapsed();

        let failure = results[0].outcome.as_ref().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Unavailable);
        assert_eq!(failure.attempts, 3);
        assert!(results[1..].iter().all(|r| !r.is_error()));
        assert!(search.peak.load(Ordering::SeqCst) <= 6);
        // 3 次 200ms 超时加上退避，远小于提供方的挂起时间
        assert!(elapsed < Duration::from_secs(3), "batch took {:?}", elapsed);
    }
}
