//! 离线 LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - `MockLlmClient`：确定性地先地理编码目的地，再按请求参数生成一份合法行程
//! - `ScriptedLlmClient`：按顺序返回预设回复，并记录每次收到的对话

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::budget::Category;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};
use crate::planning::prompt::extract_brief;
use crate::tools::ToolSpec;

/// 离线客户端：无需网络即可跑通完整规划流程
#[derive(Debug, Default)]
pub struct MockLlmClient;

/// 最近一次 geocode 观察中的坐标
fn last_coordinates(messages: &[Message]) -> Option<(f64, f64)> {
    let observation = messages.iter().rev().find(|m| m.role == Role::Tool)?;
    let items: Vec<Value> = serde_json::from_str(&observation.content).ok()?;
    items.iter().find_map(|item| {
        let data = item.get("data")?;
        Some((data.get("lat")?.as_f64()?, data.get("lon")?.as_f64()?))
    })
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<String, LlmError> {
        let brief = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .find_map(|m| extract_brief(&m.content))
            .ok_or_else(|| LlmError::InvalidRequest("no trip parameters in conversation".into()))?;

        let researched = messages.iter().any(|m| m.role == Role::Tool);
        if !tools.is_empty() && !researched {
            return Ok(json!({
                "tool_calls": [{"id": "c1", "tool": "geocode", "args": {"place": brief.destination}}]
            })
            .to_string());
        }

        let (lat, lon) = last_coordinates(messages).unwrap_or((0.0, 0.0));
        let days: Vec<Value> = brief
            .dates()
            .into_iter()
            .enumerate()
            .map(|(i, date)| {
                json!({
                    "date": date.format("%Y-%m-%d").to_string(),
                    "activities": [{
                        "name": format!("Explore {} (day {})", brief.destination, i + 1),
                        "time": "10:00-13:00",
                        "location": {"name": brief.destination, "lat": lat, "lon": lon},
                        "cost": 0.0,
                        "category": Category::Activities.as_str(),
                    }],
                    "tip": "Start early to avoid the crowds.",
                })
            })
            .collect();

        Ok(json!({
            "itinerary": {
                "days": days,
                "budget": {
                    "total": brief.budget_total,
                    "currency": brief.currency,
                    "by_category": brief.allocation,
                },
                "alternatives": [],
                "advice": ["Offline plan: configure a model API key for a researched itinerary."],
            }
        })
        .to_string())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 按脚本回复的客户端；脚本耗尽后返回 `LlmError::Exhausted`
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
    repeat: Option<String>,
    requests: Mutex<Vec<Vec<Message>>>,
    tool_counts: Mutex<Vec<usize>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// 每次都返回同一回复
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            repeat: Some(response.into()),
            ..Default::default()
        }
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 每次调用时收到的完整对话
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 每次调用时声明的工具数
    pub fn declared_tools(&self) -> Vec<usize> {
        self.tool_counts.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        if let Ok(mut counts) = self.tool_counts.lock() {
            counts.push(tools.len());
        }
        if let Some(response) = &self.repeat {
            return Ok(response.clone());
        }
        self.responses
            .lock()
            .map_err(|_| LlmError::Request("script lock poisoned".into()))?
            .pop_front()
            .ok_or(LlmError::Exhausted)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
