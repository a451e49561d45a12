//! 错误恢复引擎
//!
//! 根据失败类型返回 RecoveryAction：校验问题 -> 纠错提示（列出全部问题），模型调用失败 -> 终止。

use crate::core::RecoveryAction;
use crate::llm::LlmError;
use crate::validate::{render_violations, Violation, ViolationKind};

/// 一轮中可恢复性待判定的失败
#[derive(Debug)]
pub enum PlanningFault<'a> {
    /// 终稿未通过校验（含无法解析的输出）
    Violations(&'a [Violation]),
    Model(&'a LlmError),
}

/// 将失败映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, fault: &PlanningFault<'_>) -> RecoveryAction {
        match fault {
            PlanningFault::Violations(violations) if violations.is_empty() => RecoveryAction::Abort,
            PlanningFault::Violations(violations) => {
                RecoveryAction::RetryWithPrompt(corrective_prompt(violations))
            }
            PlanningFault::Model(_) => RecoveryAction::Abort,
        }
    }
}

/// 纠错轮的提示：要求只修正列出的问题并重新输出完整 JSON
fn corrective_prompt(violations: &[Violation]) -> String {
    let malformed = violations.iter().any(|v| v.kind == ViolationKind::Malformed);
    let mut prompt = String::from(
        "Your previous itinerary could not be accepted. Fix exactly these problems and keep everything else unchanged:\n",
    );
    prompt.push_str(&render_violations(violations));
    if malformed {
        prompt.push_str(
            "\n\nYour reply must be a single JSON object and nothing else, \
             shaped as {\"itinerary\": {\"days\": [...], \"budget\": {...}, \"alternatives\": [...], \"advice\": [...]}}.",
        );
    } else {
        prompt.push_str("\n\nReply with the complete corrected JSON object {\"itinerary\": {...}}.");
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violations_produce_corrective_prompt() {
        let engine = RecoveryEngine::new();
        let violations = vec![Violation::new(
            "days[1].activities[0].cost",
            ViolationKind::MissingField,
            "required field 'cost' is missing",
        )];
        match engine.handle(&PlanningFault::Violations(&violations)) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("days[1].activities[0].cost"));
                assert!(msg.contains("keep everything else unchanged"));
            }
            other => panic!("Expected RetryWithPrompt, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_output_reminds_json_shape() {
        let engine = RecoveryEngine::new();
        let violations = vec![Violation::malformed("expected value at line 1 column 1")];
        let RecoveryAction::RetryWithPrompt(msg) = engine.handle(&PlanningFault::Violations(&violations)) else {
            panic!("Expected RetryWithPrompt");
        };
        assert!(msg.contains("single JSON object"));
    }

    #[test]
    fn test_model_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = LlmError::Timeout(30);
        assert_eq!(engine.handle(&PlanningFault::Model(&err)), RecoveryAction::Abort);
    }
}
