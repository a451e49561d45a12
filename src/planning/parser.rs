//! 模型输出解析：Tool Calls 或终稿
//!
//! 先剥离推理模型的 `<think>...</think>` 块，再从文本中提取 JSON（```json 代码块或首尾花括号之间）。
//! 解析失败返回 Err（由循环当作校验失败处理），不会 panic。

use serde_json::Value;

use crate::tools::ToolCallRequest;

/// 一次模型回复的含义
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// 需要执行的工具调用（同一轮可有多个）
    ToolCalls(Vec<ToolCallRequest>),
    /// 候选终稿（尚未校验）
    Final(Value),
}

/// 拆出推理内容；返回 (正文, 推理内容)
pub fn strip_reasoning(output: &str) -> (String, Option<String>) {
    let mut body = String::with_capacity(output.len());
    let mut thinking = Vec::new();
    let mut rest = output;

    // 部分服务端会省略开头的 <think>，只保留结束标签
    if !rest.contains("<think>") {
        if let Some(end) = rest.find("</think>") {
            thinking.push(rest[..end].trim().to_string());
            rest = &rest[end + "</think>".len()..];
        }
    }

    while let Some(start) = rest.find("<think>") {
        body.push_str(&rest[..start]);
        let after = &rest[start + "<think>".len()..];
        match after.find("</think>") {
            Some(end) => {
                thinking.push(after[..end].trim().to_string());
                rest = &after[end + "</think>".len()..];
            }
            None => {
                // 未闭合：其后全部视为推理内容
                thinking.push(after.trim().to_string());
                rest = "";
            }
        }
    }
    body.push_str(rest);

    let thinking = thinking.into_iter().filter(|t| !t.is_empty()).collect::<Vec<_>>();
    let thinking = if thinking.is_empty() {
        None
    } else {
        Some(thinking.join("\n"))
    };
    (body.trim().to_string(), thinking)
}

/// 提取 JSON 文本（```json 块或纯 JSON）
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 兼容 OpenAI 风格 `{"name": ..., "arguments": "<json 字符串>"}`
fn normalize_call(mut call: Value) -> Value {
    if let Some(obj) = call.as_object_mut() {
        if let Some(Value::String(raw)) = obj.get("args").or_else(|| obj.get("arguments")).cloned() {
            if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
                obj.remove("arguments");
                obj.insert("args".into(), parsed);
            }
        }
    }
    call
}

fn parse_calls(items: &[Value]) -> Result<Vec<ToolCallRequest>, String> {
    if items.is_empty() {
        return Err("'tool_calls' is empty".into());
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(normalize_call(item.clone()))
                .map_err(|e| format!("tool_calls[{}] is not a valid tool call: {}", i, e))
        })
        .collect()
}

/// 解析模型输出
pub fn parse_model_output(output: &str) -> Result<ModelReply, String> {
    let (body, _) = strip_reasoning(output);
    if body.is_empty() {
        return Err("empty response".into());
    }
    let json = extract_json(&body).ok_or_else(|| "response contains no JSON object".to_string())?;
    let value: Value = serde_json::from_str(json).map_err(|e| format!("invalid JSON: {}", e))?;
    let Some(obj) = value.as_object() else {
        return Err("response JSON is not an object".into());
    };

    if let Some(calls) = obj.get("tool_calls") {
        let items = calls
            .as_array()
            .ok_or_else(|| "'tool_calls' must be an array".to_string())?;
        return parse_calls(items).map(ModelReply::ToolCalls);
    }
    if obj.contains_key("tool") {
        return parse_calls(std::slice::from_ref(&value)).map(ModelReply::ToolCalls);
    }
    if let Some(itinerary) = obj.get("itinerary") {
        return Ok(ModelReply::Final(itinerary.clone()));
    }
    if obj.contains_key("days") {
        return Ok(ModelReply::Final(value));
    }
    Err("response is neither tool_calls nor an itinerary".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_calls_batch() {
        let out = r#"{"tool_calls": [{"id": "c1", "tool": "search", "args": {"query": "Lisbon"}},
                                     {"id": "c2", "tool": "geocode", "args": {"place": "Alfama"}}]}"#;
        match parse_model_output(out).unwrap() {
            ModelReply::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[1].tool, "geocode");
                assert_eq!(calls[1].args, json!({"place": "Alfama"}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_single_call_with_think_block() {
        let out = "<think>I should look up trams first.</think>\n```json\n{\"tool\": \"search\", \"args\": {\"query\": \"tram 28\"}}\n```";
        let ModelReply::ToolCalls(calls) = parse_model_output(out).unwrap() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].id, "");
        assert_eq!(calls[0].tool, "search");
    }

    #[test]
    fn test_openai_style_string_arguments() {
        let out = r#"{"tool_calls": [{"id": "x", "name": "scrape", "arguments": "{\"url\": \"https://a.org\"}"}]}"#;
        let ModelReply::ToolCalls(calls) = parse_model_output(out).unwrap() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].tool, "scrape");
        assert_eq!(calls[0].args, json!({"url": "https://a.org"}));
    }

    #[test]
    fn test_parse_final_document() {
        let wrapped = r#"Here you go: {"itinerary": {"days": [], "budget": {}}}"#;
        assert!(matches!(parse_model_output(wrapped).unwrap(), ModelReply::Final(v) if v.get("days").is_some()));
        let bare = r#"{"days": [{"date": "2025-05-01", "activities": []}]}"#;
        assert!(matches!(parse_model_output(bare).unwrap(), ModelReply::Final(_)));
    }

    #[test]
    fn test_malformed_output_is_error_not_panic() {
        assert!(parse_model_output("").is_err());
        assert!(parse_model_output("Sure! Day 1: visit Alfama.").is_err());
        assert!(parse_model_output(r#"{"days": [ {"date": "2025-05-01", }"#).is_err());
        assert!(parse_model_output(r#"{"tool_calls": []}"#).is_err());
        assert!(parse_model_output(r#"{"answer": 42}"#).is_err());
        assert!(parse_model_output("<think>unterminated reasoning {\"days\": []}").is_err());
    }

    #[test]
    fn test_strip_reasoning_variants() {
        let (body, thinking) = strip_reasoning("<think>a</think>{\"x\":1}<think>b</think>");
        assert_eq!(body, "{\"x\":1}");
        assert_eq!(thinking.as_deref(), Some("a\nb"));

        let (body, thinking) = strip_reasoning("plan quietly</think>{\"y\":2}");
        assert_eq!(body, "{\"y\":2}");
        assert_eq!(thinking.as_deref(), Some("plan quietly"));

        let (body, thinking) = strip_reasoning("{\"z\":3}");
        assert_eq!(body, "{\"z\":3}");
        assert!(thinking.is_none());
    }
}
