//! 工具 JSON Schema 生成（schemars）
//!
//! 每个工具的参数 Schema 由其参数类型自动生成，注入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::Value;

use crate::tools::call::{GeocodeArgs, ScrapeArgs, SearchArgs, ToolName};

/// 声明给模型的工具能力
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

impl ToolSpec {
    pub fn for_tool(tool: ToolName) -> Self {
        match tool {
            ToolName::Search => ToolSpec {
                name: "search",
                description: "Web search. Returns titles, URLs and snippets of the top results.",
                parameters: schema_value::<SearchArgs>(),
            },
            ToolName::Scrape => ToolSpec {
                name: "scrape",
                description: "Fetch a web page and return its readable text (truncated).",
                parameters: schema_value::<ScrapeArgs>(),
            },
            ToolName::Geocode => ToolSpec {
                name: "geocode",
                description: "Resolve a place name to latitude, longitude and a canonical name.",
                parameters: schema_value::<GeocodeArgs>(),
            },
        }
    }
}

/// 全部工具
pub fn tool_specs() -> Vec<ToolSpec> {
    ToolName::ALL.iter().map(|t| ToolSpec::for_tool(*t)).collect()
}

/// 工具声明的 JSON 文本，可拼入 system prompt
pub fn tool_specs_json(specs: &[ToolSpec]) -> String {
    serde_json::to_string_pretty(specs).unwrap_or_default()
}
