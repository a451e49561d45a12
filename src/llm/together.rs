//! Together AI 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.together.xyz/v1
//! - 默认模型: deepseek-ai/DeepSeek-R1（推理模型，输出带 `<think>` 块，由规划层剥离）

use crate::llm::openai::SamplingParams;
use crate::llm::OpenAiClient;

/// Together API 常量
pub const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
pub const TOGETHER_DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-R1";

/// 是否配置了 Together 的 API Key
pub fn together_api_key() -> Option<String> {
    std::env::var("TOGETHER_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
}

/// 创建 Together 客户端
///
/// - 优先使用环境变量 `TOGETHER_API_KEY`
/// - 模型可通过 `model` 参数或 `TOGETHER_MODEL` 环境变量指定
pub fn create_together_client(model: Option<&str>, sampling: SamplingParams) -> OpenAiClient {
    let api_key = together_api_key().unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("TOGETHER_MODEL").ok())
        .unwrap_or_else(|| TOGETHER_DEFAULT_MODEL.to_string());

    OpenAiClient::new(Some(TOGETHER_BASE_URL), &model, Some(api_key.as_str())).with_sampling(sampling)
}
