//! 预算分配：总预算 + 类别权重 -> 各类别金额
//!
//! 纯函数、确定性：权重先归一化，再按最小货币单位向下取整；取整余数全部归入 misc，
//! 因此各类别之和严格等于总预算，且没有负数。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trip::Currency;

/// 权重归一化精度（十亿分之一），避免浮点误差影响取整
const WEIGHT_SCALE: i128 = 1_000_000_000;

/// 预算类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Lodging,
    Transport,
    Food,
    Activities,
    Misc,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Lodging,
        Category::Transport,
        Category::Food,
        Category::Activities,
        Category::Misc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Lodging => "lodging",
            Category::Transport => "transport",
            Category::Food => "food",
            Category::Activities => "activities",
            Category::Misc => "misc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分配失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    #[error("Invalid total budget: {0}")]
    InvalidTotal(f64),
}

/// 类别权重；未出现的类别视为 0
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryWeights(BTreeMap<Category, f64>);

impl CategoryWeights {
    pub fn new(weights: impl IntoIterator<Item = (Category, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    pub fn get(&self, category: Category) -> f64 {
        self.0.get(&category).copied().unwrap_or(0.0)
    }

    fn check(&self) -> Result<f64, AllocationError> {
        for (category, weight) in &self.0 {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(AllocationError::InvalidWeights(format!(
                    "{} has weight {}",
                    category, weight
                )));
            }
        }
        let sum: f64 = self.0.values().sum();
        if sum <= 0.0 {
            return Err(AllocationError::InvalidWeights(
                "all weights are zero".to_string(),
            ));
        }
        Ok(sum)
    }
}

impl Default for CategoryWeights {
    /// lodging 35% / transport 20% / food 25% / activities 15% / misc 5%
    fn default() -> Self {
        Self::new([
            (Category::Lodging, 0.35),
            (Category::Transport, 0.20),
            (Category::Food, 0.25),
            (Category::Activities, 0.15),
            (Category::Misc, 0.05),
        ])
    }
}

/// 分配结果：金额以最小货币单位保存
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BudgetAllocation {
    currency: Currency,
    total_minor: i64,
    shares: BTreeMap<Category, i64>,
}

impl BudgetAllocation {
    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn total_minor(&self) -> i64 {
        self.total_minor
    }

    pub fn amount_minor(&self, category: Category) -> i64 {
        self.shares.get(&category).copied().unwrap_or(0)
    }

    /// 总预算（主货币单位）
    pub fn total(&self) -> f64 {
        self.to_major(self.total_minor)
    }

    /// 类别金额（主货币单位）
    pub fn amount(&self, category: Category) -> f64 {
        self.to_major(self.amount_minor(category))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, i64)> + '_ {
        self.shares.iter().map(|(c, v)| (*c, *v))
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.shares.keys().copied()
    }

    pub fn contains(&self, category: Category) -> bool {
        self.shares.contains_key(&category)
    }

    /// 1 个主货币单位对应的最小单位数
    pub fn unit_minor(&self) -> i64 {
        10i64.pow(self.currency.minor_digits())
    }

    pub fn to_major(&self, minor: i64) -> f64 {
        minor as f64 / self.unit_minor() as f64
    }
}

/// 按权重分配总预算
pub fn allocate(
    total: f64,
    currency: &Currency,
    weights: &CategoryWeights,
) -> Result<BudgetAllocation, AllocationError> {
    if !total.is_finite() || total < 0.0 {
        return Err(AllocationError::InvalidTotal(total));
    }
    let weight_sum = weights.check()?;
    let unit = 10f64.powi(currency.minor_digits() as i32);
    let total_minor = (total * unit).round() as i64;

    let mut shares = BTreeMap::new();
    let mut assigned: i64 = 0;
    for category in Category::ALL.into_iter().filter(|c| *c != Category::Misc) {
        let scaled = ((weights.get(category) / weight_sum) * WEIGHT_SCALE as f64).round() as i128;
        let share = (total_minor as i128 * scaled / WEIGHT_SCALE) as i64;
        shares.insert(category, share);
        assigned += share;
    }

    // 极端情况下权重取整可能使已分配额略超总额，从最大的类别扣回
    while assigned > total_minor {
        let overshoot = assigned - total_minor;
        let Some((_, largest)) = shares.iter_mut().max_by_key(|(_, v)| **v) else {
            break;
        };
        let take = overshoot.min(*largest);
        *largest -= take;
        assigned -= take;
    }

    shares.insert(Category::Misc, total_minor - assigned);

    Ok(BudgetAllocation {
        currency: currency.clone(),
        total_minor,
        shares,
    })
}
