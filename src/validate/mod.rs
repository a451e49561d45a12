//! 行程文档校验
//!
//! 对模型给出的候选文档做结构检查，一次返回全部问题（路径 + 类别 + 说明），
//! 纠错轮可以据此一次性修正。通过校验的文档再转换为强类型 `Itinerary`。

pub mod document;

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetAllocation, Category};
use crate::trip::TravelRequest;

pub use document::{to_itinerary, validate};

/// 问题类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// 模型输出不是可解析的 JSON 文档
    Malformed,
    MissingField,
    WrongType,
    InvalidValue,
    /// 日期超出请求范围、倒序或跳天
    DayOrdering,
    UnknownCategory,
    /// 活动缺少已解析的坐标
    UnresolvedLocation,
    /// 预算块与分配结果不一致 / 总花费超出容差
    BudgetMismatch,
}

/// 单条问题
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// 如 `days[1].activities[0].cost`
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new("$", ViolationKind::Malformed, message)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// 校验所需的请求上下文
#[derive(Clone, Debug)]
pub struct ValidationContext {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub currency: String,
    pub total: f64,
    /// 允许引用的类别
    pub categories: BTreeSet<Category>,
    /// 活动总花费可超出总预算的比例
    pub cost_tolerance: f64,
    /// 分配金额（主货币单位），用于核对模型给出的 by_category
    pub allocated: Vec<(Category, f64)>,
}

impl ValidationContext {
    pub fn new(request: &TravelRequest, allocation: &BudgetAllocation, cost_tolerance: f64) -> Self {
        Self {
            start_date: request.start_date,
            end_date: request.end_date,
            currency: allocation.currency().code().to_string(),
            total: allocation.total(),
            categories: allocation.categories().collect(),
            cost_tolerance: cost_tolerance.max(0.0),
            allocated: allocation
                .categories()
                .map(|c| (c, allocation.amount(c)))
                .collect(),
        }
    }
}

/// 多条问题拼成纠错提示中的列表
pub fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("- {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}
