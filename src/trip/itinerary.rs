//! 最终产物：按天排列的行程
//!
//! JSON 形状与模型约定一致：`{ days: [...], budget: {...}, alternatives: [...], advice: [...] }`。

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetAllocation, Category};

/// 已解析坐标的地点
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osm_url: Option<String>,
}

/// 单个活动
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    /// 时间窗口，如 "09:00-11:30" 或 "morning"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub location: Location,
    pub cost: f64,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    /// 检索降级时可缺省
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// 一天的安排
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub date: NaiveDate,
    pub activities: Vec<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl DayPlan {
    pub fn total_cost(&self) -> f64 {
        self.activities.iter().map(|a| a.cost).sum()
    }
}

/// 预算摘要（以主货币单位表示）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub total: f64,
    pub currency: String,
    pub by_category: BTreeMap<Category, f64>,
}

impl From<&BudgetAllocation> for BudgetSummary {
    fn from(allocation: &BudgetAllocation) -> Self {
        Self {
            total: allocation.total(),
            currency: allocation.currency().code().to_string(),
            by_category: allocation
                .iter()
                .map(|(category, _)| (category, allocation.amount(category)))
                .collect(),
        }
    }
}

/// 备选方案（未排入行程的地点 / 活动）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// 校验通过后交付给调用方的行程
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    pub days: Vec<DayPlan>,
    pub budget: BudgetSummary,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    /// 过往旅行者的建议
    #[serde(default)]
    pub advice: Vec<String>,
}

impl Itinerary {
    /// 所有活动费用之和
    pub fn total_cost(&self) -> f64 {
        self.days.iter().map(DayPlan::total_cost).sum()
    }

    /// 按类别汇总活动费用
    pub fn spend_by_category(&self) -> BTreeMap<Category, f64> {
        let mut spend = BTreeMap::new();
        for activity in self.days.iter().flat_map(|d| d.activities.iter()) {
            *spend.entry(activity.category).or_insert(0.0) += activity.cost;
        }
        spend
    }

    /// 缺少来源链接的活动数（检索降级的体现）
    pub fn unsourced_activities(&self) -> usize {
        self.days
            .iter()
            .flat_map(|d| d.activities.iter())
            .filter(|a| a.source_url.is_none())
            .count()
    }
}
