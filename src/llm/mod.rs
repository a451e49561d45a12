//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Together / 离线 Mock）

pub mod mock;
pub mod openai;
pub mod together;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, SamplingParams, TokenUsage};
pub use together::{create_together_client, together_api_key, TOGETHER_BASE_URL, TOGETHER_DEFAULT_MODEL};
pub use traits::{LlmClient, LlmError};
