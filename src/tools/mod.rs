//! 检索工具：调用类型、提供方、分发器
//!
//! 工具集合是封闭的（Search / Scrape / Geocode），模型按名字请求，由 `ToolCallRequest::resolve` 显式映射。

pub mod call;
pub mod dispatcher;
pub mod fixture;
pub mod geocode;
pub mod provider;
pub mod schema;
pub mod scrape;
pub mod search;

pub use call::{
    FailureKind, GeocodeArgs, PayloadDetail, ScrapeArgs, SearchArgs, ToolArgs, ToolCall,
    ToolCallRequest, ToolFailure, ToolName, ToolPayload, ToolResult,
};
pub use dispatcher::{DispatchPolicy, ToolDispatcher};
pub use fixture::{FixtureGeocoder, FixtureScraper, FixtureSearch};
pub use geocode::{osm_link, pick_best, NominatimGeocoder, NOMINATIM_ENDPOINT};
pub use provider::{
    GeocodeCandidate, GeocodeProvider, PageFetch, ProviderError, ScrapeProvider, SearchHit,
    SearchProvider,
};
pub use schema::{tool_specs, tool_specs_json, ToolSpec};
pub use scrape::HttpScraper;
pub use search::{DuckDuckGoSearch, DUCKDUCKGO_HTML_ENDPOINT};
