//! 对外入口：TravelPlanner
//!
//! 展示层只调用 `plan`：校验请求、按权重分配预算、交给 Orchestrator 运行规划。
//! 缓存与后台清理任务由 TravelPlanner 持有，`close` 时写出快照。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::budget::{allocate, CategoryWeights};
use crate::cache::{CacheError, ContentCache};
use crate::core::PlanningError;
use crate::planning::{Orchestrator, PlannedTrip};
use crate::trip::{Itinerary, TravelRequest};

/// 行程规划器：可被多个请求共享（每次 plan 拥有独立的对话状态）
pub struct TravelPlanner {
    orchestrator: Orchestrator,
    cache: Arc<ContentCache>,
    default_weights: CategoryWeights,
    /// 停止缓存清理任务
    sweeper: CancellationToken,
}

impl TravelPlanner {
    pub fn new(orchestrator: Orchestrator, cache: Arc<ContentCache>, sweeper: CancellationToken) -> Self {
        Self {
            orchestrator,
            cache,
            default_weights: CategoryWeights::default(),
            sweeper,
        }
    }

    /// 覆盖默认类别权重
    pub fn with_default_weights(mut self, weights: CategoryWeights) -> Self {
        self.default_weights = weights;
        self
    }

    /// 规划一次行程
    pub async fn plan(
        &self,
        request: &TravelRequest,
        weights: Option<&CategoryWeights>,
    ) -> Result<Itinerary, PlanningError> {
        self.plan_with_diagnostics(request, weights)
            .await
            .map(|trip| trip.itinerary)
    }

    /// 与 `plan` 相同，额外返回每轮诊断
    pub async fn plan_with_diagnostics(
        &self,
        request: &TravelRequest,
        weights: Option<&CategoryWeights>,
    ) -> Result<PlannedTrip, PlanningError> {
        request.validate().map_err(PlanningError::InvalidRequest)?;
        let weights = weights.unwrap_or(&self.default_weights);
        let allocation = allocate(request.budget, &request.currency, weights)?;
        tracing::debug!(
            currency = %allocation.currency(),
            total = allocation.total(),
            "budget allocated"
        );
        self.orchestrator.run(request, &allocation).await
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// 停止后台清理并关闭缓存（配置了快照路径时写出快照）
    pub fn close(&self) -> Result<(), CacheError> {
        self.sweeper.cancel();
        let stats = self.cache.stats();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate(),
            puts = stats.puts,
            evictions = stats.evictions,
            entries = stats.entries,
            "cache closing"
        );
        self.cache.close()
    }
}
