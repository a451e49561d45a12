//! Wayfarer - Rust 行程规划智能体
//!
//! 模块划分：
//! - **agent**: 对外入口 TravelPlanner（校验请求、分配预算、运行规划）
//! - **budget**: 按类别权重分配总预算（最小货币单位，精确求和）
//! - **cache**: 内容寻址、容量受限的检索结果缓存（LRU + TTL + 快照）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、工具并发调度、关闭信号、组件装配
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Together / Mock）
//! - **memory**: 单次规划的对话状态
//! - **planning**: 提示词、输出解析、状态机与编排主循环
//! - **tools**: 检索工具（search / scrape / geocode）与分发器
//! - **trip**: 行程请求与行程文档类型
//! - **validate**: 行程文档校验与转换

pub mod agent;
pub mod budget;
pub mod cache;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;
pub mod tools;
pub mod trip;
pub mod validate;

pub use agent::TravelPlanner;
pub use crate::core::{PlannerBuilder, PlanningError};
pub use trip::{Itinerary, TravelRequest};
