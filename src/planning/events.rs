//! 规划过程事件：用于 CLI / 前端展示轮次、工具调用、校验与结果

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanningEvent {
    /// 新一轮开始（research 轮计入上限，correction 轮不计入）
    RoundStarted {
        round: usize,
        kind: &'static str,
        research_rounds: usize,
        max_rounds: usize,
    },
    /// 正在调用模型
    Thinking,
    /// 推理模型的思考内容（预览）
    ThinkingContent { text: String },
    /// 调用工具
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        call_id: String,
        tool: String,
        ok: bool,
        cached: bool,
        preview: String,
    },
    /// 终稿未通过校验
    ValidationFailed { violations: Vec<String> },
    /// 发起纠错轮
    Correction { attempt: usize, detail: String },
    /// Token 使用统计（本次运行累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// 行程生成完毕
    Done { days: usize, total_cost: f64 },
    /// 错误
    Error { text: String },
}
