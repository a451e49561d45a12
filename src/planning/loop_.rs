//! 规划主循环（Orchestrator）
//!
//! 有界的 模型 <-> 工具 多轮交互：每轮把完整对话与声明的工具交给模型，
//! 回复为 Tool Calls 则经 ToolDispatcher 并发执行、结果按序回填；回复为终稿则校验，
//! 校验失败最多发起 correction_retries 次纠错轮。整次运行受外层截止时间约束，
//! 到期或收到取消信号时在下一个挂起点结束。Orchestrator 本身不做网络 I/O。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::budget::BudgetAllocation;
use crate::core::{PlanningError, PlanningFault, RecoveryAction, RecoveryEngine};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{ConversationState, Message};
use crate::planning::parser::{parse_model_output, strip_reasoning, ModelReply};
use crate::planning::prompt::{system_prompt, tool_results_message, user_prompt, TripBrief};
use crate::planning::state::{PlanDiagnostics, PlannedTrip, PlanningPhase, RoundDiagnostics, RoundKind};
use crate::planning::PlanningEvent;
use crate::tools::{
    tool_specs, FailureKind, ToolCallRequest, ToolDispatcher, ToolFailure, ToolResult,
};
use crate::trip::{Itinerary, TravelRequest};
use crate::validate::{to_itinerary, ValidationContext, Violation};

/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;
/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 轮数、纠错、截止时间等上限
#[derive(Debug, Clone)]
pub struct PlanningLimits {
    /// research 轮（模型调用）上限
    pub max_rounds: usize,
    /// 校验失败后允许的纠错轮数
    pub correction_retries: usize,
    /// 整次运行的截止时间
    pub run_timeout: Duration,
    /// 活动总花费可超出总预算的比例
    pub cost_tolerance: f64,
    /// 全局检索开关（请求级开关与之取与）
    pub research_enabled: bool,
}

impl Default for PlanningLimits {
    fn default() -> Self {
        Self {
            max_rounds: 8,
            correction_retries: 1,
            run_timeout: Duration::from_secs(300),
            cost_tolerance: 0.10,
            research_enabled: true,
        }
    }
}

/// 循环内部的终止原因，出循环后连同对话转为 PlanningError
enum Stop {
    RoundBudget,
    Schema(Vec<Violation>),
    Deadline,
    Cancelled,
    Model(LlmError),
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 保证同一轮内的 call id 唯一且非空
fn assign_call_ids(calls: &mut [ToolCallRequest], round: usize) {
    let mut seen = HashSet::new();
    for (i, call) in calls.iter_mut().enumerate() {
        let id = call.id.trim();
        if id.is_empty() || !seen.insert(id.to_string()) {
            call.id = format!("r{}-c{}", round, i + 1);
            seen.insert(call.id.clone());
        }
    }
}

/// 规划编排器：持有模型、分发器与恢复引擎；每次 run 拥有独立的对话状态
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    recovery: RecoveryEngine,
    limits: PlanningLimits,
    cancel: CancellationToken,
    event_tx: Option<UnboundedSender<PlanningEvent>>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, dispatcher: Arc<ToolDispatcher>, limits: PlanningLimits) -> Self {
        Self {
            llm,
            dispatcher,
            recovery: RecoveryEngine::new(),
            limits,
            cancel: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// 根取消令牌（如 ShutdownManager::token），每次运行派生子令牌
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<PlanningEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn limits(&self) -> &PlanningLimits {
        &self.limits
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    fn send_event(&self, ev: PlanningEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 执行一次规划
    pub async fn run(
        &self,
        request: &TravelRequest,
        allocation: &BudgetAllocation,
    ) -> Result<PlannedTrip, PlanningError> {
        let research = request.research && self.limits.research_enabled;
        let brief = TripBrief::new(request, allocation, research);
        let ctx = ValidationContext::new(request, allocation, self.limits.cost_tolerance);
        let mut conversation = ConversationState::opening(system_prompt(research), user_prompt(&brief));
        let mut diagnostics = PlanDiagnostics::new(self.llm.model_name());
        let run_token = self.cancel.child_token();
        let run_id = uuid::Uuid::new_v4();

        tracing::info!(
            %run_id,
            destination = %request.destination,
            days = request.days(),
            research,
            max_rounds = self.limits.max_rounds,
            "planning run started"
        );

        // 客户端累计计数，本次运行的用量取前后差值
        let usage_before = self.llm.token_usage();
        let outcome = tokio::select! {
            biased;
            r = self.drive(&mut conversation, &mut diagnostics, &ctx, allocation, research, &run_token) => r,
            _ = tokio::time::sleep(self.limits.run_timeout) => Err(Stop::Deadline),
        };
        // 结束所有在途调用
        run_token.cancel();

        let usage_after = self.llm.token_usage();
        let (prompt, completion, total) = (
            usage_after.0.saturating_sub(usage_before.0),
            usage_after.1.saturating_sub(usage_before.1),
            usage_after.2.saturating_sub(usage_before.2),
        );
        diagnostics.token_usage = (prompt, completion, total);
        self.send_event(PlanningEvent::TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        });

        match outcome {
            Ok(itinerary) => {
                tracing::info!(
                    %run_id,
                    days = itinerary.days.len(),
                    rounds = diagnostics.rounds.len(),
                    corrections = diagnostics.corrections,
                    unsourced = itinerary.unsourced_activities(),
                    "planning run finished"
                );
                self.send_event(PlanningEvent::Done {
                    days: itinerary.days.len(),
                    total_cost: itinerary.total_cost(),
                });
                Ok(PlannedTrip {
                    itinerary,
                    diagnostics,
                })
            }
            Err(stop) => {
                if !diagnostics.phase().is_terminal() {
                    diagnostics.enter(PlanningPhase::Failed);
                }
                let err = match stop {
                    Stop::RoundBudget => PlanningError::RoundBudgetExceeded {
                        max_rounds: self.limits.max_rounds,
                        conversation,
                    },
                    Stop::Schema(violations) => PlanningError::SchemaViolation {
                        violations,
                        conversation,
                    },
                    Stop::Deadline => PlanningError::Timeout {
                        after_secs: self.limits.run_timeout.as_secs(),
                        conversation,
                    },
                    Stop::Cancelled => PlanningError::Cancelled { conversation },
                    Stop::Model(source) => PlanningError::Model {
                        source,
                        conversation,
                    },
                };
                tracing::warn!(%run_id, error = %err, rounds = diagnostics.rounds.len(), "planning run failed");
                self.send_event(PlanningEvent::Error {
                    text: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// 状态机主体
    async fn drive(
        &self,
        conversation: &mut ConversationState,
        diagnostics: &mut PlanDiagnostics,
        ctx: &ValidationContext,
        allocation: &BudgetAllocation,
        research: bool,
        token: &CancellationToken,
    ) -> Result<Itinerary, Stop> {
        let tools = if research { tool_specs() } else { Vec::new() };
        let mut research_rounds = 0usize;
        let mut pending_correction = false;

        loop {
            if token.is_cancelled() {
                return Err(Stop::Cancelled);
            }

            let kind = if pending_correction {
                RoundKind::Correction
            } else {
                if research_rounds >= self.limits.max_rounds {
                    return Err(Stop::RoundBudget);
                }
                research_rounds += 1;
                RoundKind::Research
            };
            pending_correction = false;

            let started = Instant::now();
            let mut round = RoundDiagnostics::new(diagnostics.rounds.len() + 1, kind);
            diagnostics.enter(PlanningPhase::AwaitingModel);
            self.send_event(PlanningEvent::RoundStarted {
                round: round.round,
                kind: kind.as_str(),
                research_rounds,
                max_rounds: self.limits.max_rounds,
            });
            self.send_event(PlanningEvent::Thinking);

            let reply = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Stop::Cancelled),
                r = self.llm.complete(conversation.messages(), &tools) => r,
            };
            let raw = match reply {
                Ok(raw) => raw,
                Err(e) => {
                    let action = self.recovery.handle(&PlanningFault::Model(&e));
                    match action {
                        RecoveryAction::Abort => return Err(Stop::Model(e)),
                        RecoveryAction::RetryWithPrompt(prompt) => {
                            conversation.push(Message::user(prompt));
                            continue;
                        }
                    }
                }
            };
            conversation.push(Message::assistant(raw.clone()));

            let (_, thinking) = strip_reasoning(&raw);
            if let Some(text) = thinking {
                self.send_event(PlanningEvent::ThinkingContent {
                    text: preview(&text, THINKING_PREVIEW_CHARS),
                });
            }

            let violations = match parse_model_output(&raw) {
                Ok(ModelReply::ToolCalls(mut calls)) => {
                    diagnostics.enter(PlanningPhase::ToolCallsPending);
                    assign_call_ids(&mut calls, round.round);
                    let results = self.run_tools(&calls, research, token).await;
                    if token.is_cancelled() {
                        return Err(Stop::Cancelled);
                    }
                    round.tool_calls = results.len();
                    round.tool_errors = results.iter().filter(|r| r.is_error()).count();
                    round.cache_hits = results.iter().filter(|r| r.cached).count();
                    conversation.push(Message::tool(tool_results_message(&results)));
                    round.duration_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(
                        round = round.round,
                        calls = round.tool_calls,
                        errors = round.tool_errors,
                        cache_hits = round.cache_hits,
                        "tool round complete"
                    );
                    diagnostics.rounds.push(round);
                    continue;
                }
                Ok(ModelReply::Final(document)) => {
                    diagnostics.enter(PlanningPhase::Validating);
                    match to_itinerary(&document, ctx, allocation) {
                        Ok(itinerary) => {
                            round.duration_ms = started.elapsed().as_millis() as u64;
                            diagnostics.rounds.push(round);
                            diagnostics.enter(PlanningPhase::Done);
                            return Ok(itinerary);
                        }
                        Err(violations) => violations,
                    }
                }
                Err(message) => {
                    diagnostics.enter(PlanningPhase::Validating);
                    vec![Violation::malformed(message)]
                }
            };

            round.violations = violations.len();
            round.duration_ms = started.elapsed().as_millis() as u64;
            diagnostics.rounds.push(round);
            tracing::info!(count = violations.len(), "itinerary failed validation");
            self.send_event(PlanningEvent::ValidationFailed {
                violations: violations.iter().map(|v| v.to_string()).collect(),
            });

            if diagnostics.corrections >= self.limits.correction_retries {
                return Err(Stop::Schema(violations));
            }
            let action = self.recovery.handle(&PlanningFault::Violations(&violations));
            match action {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    diagnostics.corrections += 1;
                    diagnostics.enter(PlanningPhase::RetryCorrection);
                    self.send_event(PlanningEvent::Correction {
                        attempt: diagnostics.corrections,
                        detail: preview(&prompt, RESULT_PREVIEW_CHARS),
                    });
                    conversation.push(Message::user(prompt));
                    pending_correction = true;
                }
                RecoveryAction::Abort => return Err(Stop::Schema(violations)),
            }
        }
    }

    /// 执行一轮的工具调用；检索关闭时每个调用得到单独的错误结果
    async fn run_tools(
        &self,
        calls: &[ToolCallRequest],
        research: bool,
        token: &CancellationToken,
    ) -> Vec<ToolResult> {
        for call in calls {
            self.send_event(PlanningEvent::ToolCall {
                call_id: call.id.clone(),
                tool: call.tool.clone(),
                args: call.args.clone(),
            });
        }

        let results = if research {
            self.dispatcher.dispatch(calls, token).await
        } else {
            calls
                .iter()
                .map(|call| {
                    ToolResult::failure(
                        &call.id,
                        &call.tool,
                        ToolFailure::new(
                            FailureKind::ResearchDisabled,
                            "research is disabled for this trip; answer from your own knowledge",
                        ),
                    )
                })
                .collect()
        };

        for result in &results {
            let text = match &result.outcome {
                Ok(payload) => payload.text.as_str(),
                Err(failure) => failure.message.as_str(),
            };
            self.send_event(PlanningEvent::ToolResult {
                call_id: result.call_id.clone(),
                tool: result.tool.clone(),
                ok: !result.is_error(),
                cached: result.cached,
                preview: preview(text, RESULT_PREVIEW_CHARS),
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{allocate, CategoryWeights};
    use crate::cache::{CacheConfig, ContentCache};
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Role;
    use crate::tools::{
        DispatchPolicy, FixtureGeocoder, FixtureScraper, FixtureSearch, GeocodeCandidate, ToolSpec,
    };
    use crate::trip::Currency;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn lisbon() -> (TravelRequest, BudgetAllocation) {
        let request = TravelRequest::new(
            "Berlin",
            "Lisbon",
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 3).unwrap(),
            1000.0,
            Currency::new("EUR"),
        )
        .with_interests(["food", "history"]);
        let allocation = allocate(1000.0, &request.currency, &CategoryWeights::default()).unwrap();
        (request, allocation)
    }

    fn activity(name: &str, cost: f64, category: &str) -> Value {
        json!({
            "name": name,
            "time": "10:00-12:00",
            "location": {"name": name, "lat": 38.7, "lon": -9.14},
            "cost": cost,
            "category": category
        })
    }

    fn final_doc() -> Value {
        json!({"itinerary": {
            "days": [
                {"date": "2025-05-01", "activities": [activity("Alfama walk", 0.0, "activities")]},
                {"date": "2025-05-02", "activities": [activity("Belém Tower", 10.0, "activities")]},
                {"date": "2025-05-03", "activities": [activity("Tram 28", 3.0, "transport")]}
            ],
            "budget": {"total": 1000, "currency": "EUR"},
            "advice": ["Buy a Viva Viagem card"]
        }})
    }

    fn missing_cost_doc() -> Value {
        let mut doc = final_doc();
        doc["itinerary"]["days"][1]["activities"][0]
            .as_object_mut()
            .unwrap()
            .remove("cost");
        doc
    }

    const RESEARCH: &str = r#"{"tool_calls": [
        {"id": "c1", "tool": "search", "args": {"query": "Lisbon food history"}},
        {"id": "c2", "tool": "geocode", "args": {"place": "Belém Tower"}}]}"#;

    struct Harness {
        search: Arc<FixtureSearch>,
        geocode: Arc<FixtureGeocoder>,
        dispatcher: Arc<ToolDispatcher>,
    }

    fn harness() -> Harness {
        let search = Arc::new(FixtureSearch::new());
        let scrape = Arc::new(FixtureScraper::new());
        let geocode = Arc::new(FixtureGeocoder::new().with_place(
            "Belém Tower",
            vec![GeocodeCandidate {
                lat: 38.6916,
                lon: -9.2160,
                display_name: "Torre de Belém, Lisboa".into(),
                confidence: 0.8,
            }],
        ));
        let dispatcher = Arc::new(ToolDispatcher::new(
            search.clone(),
            scrape,
            geocode.clone(),
            Arc::new(ContentCache::new(CacheConfig::default())),
            6,
            DispatchPolicy {
                tool_timeout: Duration::from_millis(500),
                backoff_base: Duration::from_millis(1),
                ..DispatchPolicy::default()
            },
        ));
        Harness {
            search,
            geocode,
            dispatcher,
        }
    }

    fn limits() -> PlanningLimits {
        PlanningLimits {
            run_timeout: Duration::from_secs(10),
            ..PlanningLimits::default()
        }
    }

    fn tool_messages(conversation: &[Message]) -> Vec<&Message> {
        conversation.iter().filter(|m| m.role == Role::Tool).collect()
    }

    /// 永不返回的模型
    struct StalledLlm;

    #[async_trait]
    impl LlmClient for StalledLlm {
        async fn complete(&self, _: &[Message], _: &[ToolSpec]) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(LlmError::Timeout(3600))
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    /// 每次调用累计固定 token 数，直接给出最终行程
    struct MeteredLlm {
        calls: std::sync::atomic::AtomicU64,
    }

    #[async_trait]
    impl LlmClient for MeteredLlm {
        async fn complete(&self, _: &[Message], _: &[ToolSpec]) -> Result<String, LlmError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(final_doc().to_string())
        }

        fn model_name(&self) -> &str {
            "metered"
        }

        fn token_usage(&self) -> (u64, u64, u64) {
            let n = self.calls.load(std::sync::atomic::Ordering::SeqCst);
            (n * 100, n * 20, n * 120)
        }
    }

    #[tokio::test]
    async fn test_research_then_final_itinerary() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new([RESEARCH.to_string(), final_doc().to_string()]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(llm.clone(), h.dispatcher.clone(), limits()).with_event_tx(tx);

        let trip = orchestrator.run(&request, &allocation).await.unwrap();
        assert_eq!(trip.itinerary.days.len(), 3);
        assert_eq!(trip.itinerary.budget.by_category.values().sum::<f64>(), 1000.0);
        assert_eq!(trip.diagnostics.research_rounds(), 2);
        assert_eq!(trip.diagnostics.tool_calls(), 2);
        assert_eq!(trip.diagnostics.phase(), PlanningPhase::Done);
        assert_eq!(h.search.calls(), 1);
        assert_eq!(h.geocode.calls(), 1);

        // 第二次模型调用能看到按调用顺序排列的两条结果
        let second = &llm.requests()[1];
        let tools = tool_messages(second);
        assert_eq!(tools.len(), 1);
        let observations: Vec<Value> = serde_json::from_str(&tools[0].content).unwrap();
        assert_eq!(observations[0]["call_id"], "c1");
        assert_eq!(observations[1]["call_id"], "c2");
        assert_eq!(observations[1]["data"]["lat"], 38.6916);
        assert_eq!(llm.declared_tools(), vec![3, 3]);

        let mut saw_done = false;
        while let Ok(ev) = rx.try_recv() {
            if let PlanningEvent::Done { days, .. } = ev {
                assert_eq!(days, 3);
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn test_perpetual_tool_calls_hit_round_bound() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::repeating(
            r#"{"tool_calls": [{"id": "c1", "tool": "search", "args": {"query": "Lisbon"}}]}"#,
        ));
        let orchestrator = Orchestrator::new(
            llm.clone(),
            h.dispatcher.clone(),
            PlanningLimits {
                max_rounds: 3,
                ..limits()
            },
        );

        let err = orchestrator.run(&request, &allocation).await.unwrap_err();
        match &err {
            PlanningError::RoundBudgetExceeded { max_rounds, conversation } => {
                assert_eq!(*max_rounds, 3);
                assert_eq!(tool_messages(conversation.messages()).len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(llm.calls(), 3);
        // 同一查询只真正检索一次，其余命中缓存
        assert_eq!(h.search.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_cost_is_corrected_in_one_round() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new([
            missing_cost_doc().to_string(),
            final_doc().to_string(),
        ]));
        let orchestrator = Orchestrator::new(llm.clone(), h.dispatcher.clone(), limits());

        let trip = orchestrator.run(&request, &allocation).await.unwrap();
        assert_eq!(trip.diagnostics.corrections, 1);
        assert_eq!(trip.diagnostics.rounds[1].kind, RoundKind::Correction);
        assert_eq!(trip.diagnostics.rounds[0].violations, 1);

        let correction = llm.requests()[1]
            .last()
            .map(|m| m.content.clone())
            .unwrap();
        assert!(correction.contains("days[1].activities[0].cost"));
    }

    #[tokio::test]
    async fn test_second_failure_is_schema_violation() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new([
            missing_cost_doc().to_string(),
            missing_cost_doc().to_string(),
            final_doc().to_string(),
        ]));
        let orchestrator = Orchestrator::new(llm.clone(), h.dispatcher.clone(), limits());

        let err = orchestrator.run(&request, &allocation).await.unwrap_err();
        assert!(matches!(err, PlanningError::SchemaViolation { .. }));
        assert_eq!(err.violations()[0].path, "days[1].activities[0].cost");
        assert!(err.conversation().is_some());
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_output_gets_corrective_round() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new([
            "Day 1: wander around Alfama. Day 2: Belém.".to_string(),
            final_doc().to_string(),
        ]));
        let orchestrator = Orchestrator::new(llm.clone(), h.dispatcher.clone(), limits());

        let trip = orchestrator.run(&request, &allocation).await.unwrap();
        assert_eq!(trip.diagnostics.corrections, 1);
        let correction = &llm.requests()[1];
        assert!(correction
            .last()
            .is_some_and(|m| m.content.contains("single JSON object")));
    }

    #[tokio::test]
    async fn test_correction_round_does_not_consume_round_budget() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new([
            missing_cost_doc().to_string(),
            final_doc().to_string(),
        ]));
        let orchestrator = Orchestrator::new(
            llm.clone(),
            h.dispatcher.clone(),
            PlanningLimits {
                max_rounds: 1,
                ..limits()
            },
        );

        let trip = orchestrator.run(&request, &allocation).await.unwrap();
        assert_eq!(trip.diagnostics.research_rounds(), 1);
        assert_eq!(trip.diagnostics.rounds.len(), 2);
    }

    #[tokio::test]
    async fn test_research_disabled_declares_no_tools() {
        let (request, allocation) = lisbon();
        let request = request.with_research(false);
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new([RESEARCH.to_string(), final_doc().to_string()]));
        let orchestrator = Orchestrator::new(llm.clone(), h.dispatcher.clone(), limits());

        let trip = orchestrator.run(&request, &allocation).await.unwrap();
        assert_eq!(llm.declared_tools(), vec![0, 0]);
        assert_eq!(h.search.calls(), 0);
        assert_eq!(h.geocode.calls(), 0);
        assert_eq!(trip.diagnostics.rounds[0].tool_errors, 2);

        let second = &llm.requests()[1];
        let observations: Vec<Value> = serde_json::from_str(&tool_messages(second)[0].content).unwrap();
        assert_eq!(observations.len(), 2);
        assert!(observations.iter().all(|o| o["ok"] == false));
        assert!(observations[0]["error"].as_str().unwrap().contains("ResearchDisabled"));
    }

    #[tokio::test]
    async fn test_duplicate_call_ids_are_reassigned() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool_calls": [
                {"tool": "search", "args": {"query": "a"}},
                {"id": "x", "tool": "search", "args": {"query": "b"}},
                {"id": "x", "tool": "search", "args": {"query": "c"}}]}"#
                .to_string(),
            final_doc().to_string(),
        ]));
        let orchestrator = Orchestrator::new(llm.clone(), h.dispatcher.clone(), limits());

        orchestrator.run(&request, &allocation).await.unwrap();
        let second = &llm.requests()[1];
        let observations: Vec<Value> = serde_json::from_str(&tool_messages(second)[0].content).unwrap();
        let ids: Vec<&str> = observations.iter().filter_map(|o| o["call_id"].as_str()).collect();
        assert_eq!(ids, vec!["r1-c1", "x", "r1-c3"]);
    }

    #[tokio::test]
    async fn test_model_error_aborts_run() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let orchestrator = Orchestrator::new(llm, h.dispatcher.clone(), limits());

        let err = orchestrator.run(&request, &allocation).await.unwrap_err();
        assert!(matches!(
            err,
            PlanningError::Model {
                source: LlmError::Exhausted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_deadline_stops_stalled_run() {
        let (request, allocation) = lisbon();
        let h = harness();
        let orchestrator = Orchestrator::new(
            Arc::new(StalledLlm),
            h.dispatcher.clone(),
            PlanningLimits {
                run_timeout: Duration::from_millis(50),
                ..PlanningLimits::default()
            },
        );

        let started = Instant::now();
        let err = orchestrator.run(&request, &allocation).await.unwrap_err();
        assert!(matches!(err, PlanningError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let (request, allocation) = lisbon();
        let h = harness();
        let root = CancellationToken::new();
        let orchestrator =
            Orchestrator::new(Arc::new(StalledLlm), h.dispatcher.clone(), limits()).with_cancel_token(root.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            root.cancel();
        });
        let err = orchestrator.run(&request, &allocation).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, PlanningError::Cancelled { .. }));
        assert_eq!(err.conversation().map(|c| c.len()), Some(2));
    }

    #[tokio::test]
    async fn test_token_usage_is_per_run() {
        let (request, allocation) = lisbon();
        let h = harness();
        let llm = Arc::new(MeteredLlm {
            calls: std::sync::atomic::AtomicU64::new(0),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(llm.clone(), h.dispatcher.clone(), limits()).with_event_tx(tx);

        let first = orchestrator.run(&request, &allocation).await.unwrap();
        let second = orchestrator.run(&request, &allocation).await.unwrap();
        assert_eq!(first.diagnostics.token_usage, (100, 20, 120));
        assert_eq!(second.diagnostics.token_usage, (100, 20, 120));
        assert_eq!(llm.token_usage(), (200, 40, 240));

        let mut reported = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let PlanningEvent::TokenUsage { total_tokens, .. } = ev {
                reported.push(total_tokens);
            }
        }
        assert_eq!(reported, vec![120, 120]);
    }
}
