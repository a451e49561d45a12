//! 规划状态机与每轮诊断
//!
//! INIT -> AWAITING_MODEL -> (TOOL_CALLS_PENDING -> AWAITING_MODEL)* -> VALIDATING
//!      -> (DONE | RETRY_CORRECTION -> AWAITING_MODEL) -> DONE / FAILED

use serde::Serialize;

use crate::trip::Itinerary;

/// 规划阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningPhase {
    Init,
    AwaitingModel,
    ToolCallsPending,
    Validating,
    RetryCorrection,
    Done,
    Failed,
}

impl PlanningPhase {
    /// 合法的状态转移
    pub fn can_transition_to(self, next: PlanningPhase) -> bool {
        use PlanningPhase::*;
        matches!(
            (self, next),
            (Init, AwaitingModel)
                | (AwaitingModel, ToolCallsPending)
                | (AwaitingModel, Validating)
                | (ToolCallsPending, AwaitingModel)
                | (Validating, Done)
                | (Validating, RetryCorrection)
                | (RetryCorrection, AwaitingModel)
                | (_, Failed)
        ) && !matches!(self, Done | Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanningPhase::Done | PlanningPhase::Failed)
    }
}

/// 轮次类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Research,
    Correction,
}

impl RoundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundKind::Research => "research",
            RoundKind::Correction => "correction",
        }
    }
}

/// 单轮诊断
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundDiagnostics {
    pub round: usize,
    pub kind: RoundKind,
    pub tool_calls: usize,
    pub tool_errors: usize,
    pub cache_hits: usize,
    /// 本轮终稿的校验问题数
    pub violations: usize,
    pub duration_ms: u64,
}

impl RoundDiagnostics {
    pub fn new(round: usize, kind: RoundKind) -> Self {
        Self {
            round,
            kind,
            tool_calls: 0,
            tool_errors: 0,
            cache_hits: 0,
            violations: 0,
            duration_ms: 0,
        }
    }
}

/// 整次运行的诊断
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlanDiagnostics {
    pub model: String,
    pub rounds: Vec<RoundDiagnostics>,
    /// 状态转移轨迹
    pub phases: Vec<PlanningPhase>,
    pub corrections: usize,
    /// (prompt, completion, total)
    pub token_usage: (u64, u64, u64),
}

impl PlanDiagnostics {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            rounds: Vec::new(),
            phases: vec![PlanningPhase::Init],
            corrections: 0,
            token_usage: (0, 0, 0),
        }
    }

    pub fn phase(&self) -> PlanningPhase {
        self.phases.last().copied().unwrap_or(PlanningPhase::Init)
    }

    /// 记录状态转移；非法转移只记日志
    pub fn enter(&mut self, next: PlanningPhase) {
        let current = self.phase();
        if !current.can_transition_to(next) {
            tracing::warn!(?current, ?next, "unexpected planning phase transition");
        }
        self.phases.push(next);
    }

    pub fn research_rounds(&self) -> usize {
        self.rounds.iter().filter(|r| r.kind == RoundKind::Research).count()
    }

    pub fn tool_calls(&self) -> usize {
        self.rounds.iter().map(|r| r.tool_calls).sum()
    }
}

/// 成功运行的产物
#[derive(Clone, Debug, Serialize)]
pub struct PlannedTrip {
    pub itinerary: Itinerary,
    pub diagnostics: PlanDiagnostics,
}
