//! 规划层：提示词、模型输出解析、状态机与编排主循环

pub mod events;
pub mod loop_;
pub mod parser;
pub mod prompt;
pub mod state;

pub use events::PlanningEvent;
pub use loop_::{Orchestrator, PlanningLimits};
pub use parser::{parse_model_output, strip_reasoning, ModelReply};
pub use prompt::{extract_brief, system_prompt, tool_results_message, user_prompt, TripBrief};
pub use state::{PlanDiagnostics, PlannedTrip, PlanningPhase, RoundDiagnostics, RoundKind};
