//! 规划运行的错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：校验失败时决定 RetryWithPrompt（纠错轮）还是 Abort。
//! 轮数耗尽 / 超时 / 取消时携带完整对话，便于诊断（不会作为可用行程返回）。

use thiserror::Error;

use crate::budget::AllocationError;
use crate::llm::LlmError;
use crate::memory::ConversationState;
use crate::validate::Violation;

/// 规划运行的终止错误
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Invalid travel request: {}", .0.join("; "))]
    InvalidRequest(Vec<String>),

    #[error("Budget allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("No final itinerary within {max_rounds} rounds")]
    RoundBudgetExceeded {
        max_rounds: usize,
        conversation: ConversationState,
    },

    #[error("Itinerary failed validation ({} violations)", .violations.len())]
    SchemaViolation {
        violations: Vec<Violation>,
        conversation: ConversationState,
    },

    #[error("Planning run exceeded its {after_secs}s deadline")]
    Timeout {
        after_secs: u64,
        conversation: ConversationState,
    },

    #[error("Planning run cancelled")]
    Cancelled { conversation: ConversationState },

    #[error("Model request failed: {source}")]
    Model {
        source: LlmError,
        conversation: ConversationState,
    },
}

impl PlanningError {
    /// 失败时的对话（请求 / 分配阶段的错误没有对话）
    pub fn conversation(&self) -> Option<&ConversationState> {
        match self {
            PlanningError::RoundBudgetExceeded { conversation, .. }
            | PlanningError::SchemaViolation { conversation, .. }
            | PlanningError::Timeout { conversation, .. }
            | PlanningError::Cancelled { conversation }
            | PlanningError::Model { conversation, .. } => Some(conversation),
            PlanningError::InvalidRequest(_) | PlanningError::Allocation(_) => None,
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            PlanningError::SchemaViolation { violations, .. } => violations,
            _ => &[],
        }
    }
}

/// 恢复引擎根据失败类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重试（如校验失败）
    RetryWithPrompt(String),
    /// 终止当前运行
    Abort,
}
