//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Together / Mock / Scripted）实现 LlmClient：
//! 传入完整对话与声明的工具能力，返回模型的原始文本（由规划层解析）。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolSpec;

/// 模型边界的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Model request timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid model request: {0}")]
    InvalidRequest(String),

    #[error("Scripted model has no response left")]
    Exhausted,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tools 为空表示本次不允许调用工具
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<String, LlmError>;

    /// 模型标识（写入日志与诊断）
    fn model_name(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
