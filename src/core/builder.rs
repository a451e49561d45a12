//! 规划器构建器：统一的组件初始化逻辑
//!
//! 从 AppConfig 装配 LLM、检索提供方、缓存、分发器与 Orchestrator。
//! 测试或嵌入方可用 `with_llm` / `with_providers` 替换任一组件。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agent::TravelPlanner;
use crate::cache::ContentCache;
use crate::config::AppConfig;
use crate::llm::{create_together_client, together_api_key, LlmClient, MockLlmClient, OpenAiClient};
use crate::planning::{Orchestrator, PlanningEvent};
use crate::tools::{
    DuckDuckGoSearch, GeocodeProvider, HttpScraper, NominatimGeocoder, ScrapeProvider, SearchProvider,
    ToolDispatcher,
};

/// 规划器构建器
pub struct PlannerBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    search: Option<Arc<dyn SearchProvider>>,
    scrape: Option<Arc<dyn ScrapeProvider>>,
    geocode: Option<Arc<dyn GeocodeProvider>>,
    cancel: Option<CancellationToken>,
    event_tx: Option<UnboundedSender<PlanningEvent>>,
}

impl PlannerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            search: None,
            scrape: None,
            geocode: None,
            cancel: None,
            event_tx: None,
        }
    }

    /// 指定 LLM 客户端（不再按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定检索提供方
    pub fn with_providers(
        mut self,
        search: Arc<dyn SearchProvider>,
        scrape: Arc<dyn ScrapeProvider>,
        geocode: Arc<dyn GeocodeProvider>,
    ) -> Self {
        self.search = Some(search);
        self.scrape = Some(scrape);
        self.geocode = Some(geocode);
        self
    }

    /// 根取消令牌（通常来自 ShutdownManager）
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<PlanningEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按 provider 与 API Key 选择后端；缺少 Key 时回退到离线 Mock
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let llm = &self.config.llm;
        let provider = llm.provider.to_lowercase();
        let request_timeout = std::time::Duration::from_secs(llm.request_timeout_secs);

        match provider.as_str() {
            "together" if together_api_key().is_some() => {
                let client = create_together_client(llm.model.as_deref(), llm.sampling())
                    .with_request_timeout(request_timeout);
                tracing::info!(model = %client.model_name(), "Using Together LLM");
                Arc::new(client)
            }
            "openai" if std::env::var("OPENAI_API_KEY").is_ok() => {
                let model = llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
                tracing::info!(model = %model, "Using OpenAI-compatible LLM");
                Arc::new(
                    OpenAiClient::new(llm.base_url.as_deref(), &model, None)
                        .with_sampling(llm.sampling())
                        .with_request_timeout(request_timeout),
                )
            }
            "mock" => Arc::new(MockLlmClient),
            other => {
                tracing::warn!(provider = other, "No API key set or provider unknown, using Mock LLM");
                Arc::new(MockLlmClient)
            }
        }
    }

    /// 打开缓存（存在快照时载入）
    pub fn build_cache(&self) -> Arc<ContentCache> {
        Arc::new(ContentCache::open(self.config.cache.cache_config()))
    }

    /// 按配置创建分发器；未指定的提供方使用真实网络实现
    pub fn build_dispatcher(&self, cache: Arc<ContentCache>) -> ToolDispatcher {
        let tools = &self.config.tools;
        let search = self.search.clone().unwrap_or_else(|| {
            Arc::new(DuckDuckGoSearch::new(
                tools.search.endpoint.clone(),
                tools.tool_timeout_secs,
                tools.search.discard_domains.clone(),
            ))
        });
        let scrape = self.scrape.clone().unwrap_or_else(|| {
            Arc::new(HttpScraper::new(tools.tool_timeout_secs, tools.scrape.respect_robots))
        });
        let geocode = self.geocode.clone().unwrap_or_else(|| {
            Arc::new(NominatimGeocoder::new(
                tools.geocode.endpoint.clone(),
                &tools.geocode.user_agent,
                tools.tool_timeout_secs,
                tools.geocode.candidate_limit,
            ))
        });
        ToolDispatcher::new(
            search,
            scrape,
            geocode,
            cache,
            tools.max_concurrent_calls,
            self.config.dispatch_policy(),
        )
    }

    /// 装配完整的 TravelPlanner；需在 tokio 运行时内调用（启动缓存清理任务）
    pub fn build(self) -> TravelPlanner {
        let llm = self.llm.clone().unwrap_or_else(|| self.build_llm());
        let cache = self.build_cache();
        let dispatcher = Arc::new(self.build_dispatcher(Arc::clone(&cache)));

        let root = self.cancel.clone().unwrap_or_default();
        let sweeper = root.child_token();
        cache.spawn_sweeper(sweeper.clone());

        let mut orchestrator =
            Orchestrator::new(llm, dispatcher, self.config.planner.limits()).with_cancel_token(root);
        if let Some(tx) = self.event_tx {
            orchestrator = orchestrator.with_event_tx(tx);
        }
        TravelPlanner::new(orchestrator, cache, sweeper)
    }
}
