//! 行程请求：出发地 / 目的地 / 日期 / 预算 / 偏好
//!
//! TravelRequest 在一次规划开始后不可变；validate 在分配预算与调用模型之前执行。

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// ISO 4217 货币代码（统一大写）
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Currency(String);

impl From<String> for Currency {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_uppercase())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// 最小货币单位的小数位数（JPY 为 0，BHD 为 3，其余默认 2）
    pub fn minor_digits(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "HUF" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
            _ => 2,
        }
    }

    fn is_well_formed(&self) -> bool {
        self.0.len() == 3 && self.0.chars().all(|c| c.is_ascii_uppercase())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 旅行节奏
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pace {
    Relaxed,
    #[default]
    Moderate,
    Packed,
}

impl Pace {
    /// 每天建议的活动数量区间
    pub fn activities_per_day(&self) -> (usize, usize) {
        match self {
            Pace::Relaxed => (1, 2),
            Pace::Moderate => (2, 4),
            Pace::Packed => (4, 6),
        }
    }
}

/// 住宿偏好
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccommodationPrefs {
    /// 星级（3 / 4 / 5），None 表示无偏好
    pub star_rating: Option<u8>,
    pub types: Vec<String>,
    pub location: Vec<String>,
    pub amenities: Vec<String>,
}

/// 餐饮偏好
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiningPrefs {
    pub cuisines: Vec<String>,
    pub styles: Vec<String>,
    pub dietary_restrictions: Option<String>,
}

/// 目的地内交通偏好
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportPrefs {
    pub modes: Vec<String>,
    /// 可接受的活动间通勤时间（如 "short distances"）
    pub acceptable_travel_time: Option<String>,
}

/// 调用方提交的行程请求
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TravelRequest {
    pub origin: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// 总预算（主货币单位）
    pub budget: f64,
    pub currency: Currency,
    #[serde(default = "default_travelers")]
    pub travelers: u32,
    #[serde(default)]
    pub interests: BTreeSet<String>,
    #[serde(default)]
    pub pace: Pace,
    #[serde(default)]
    pub travel_style: Option<String>,
    /// 偏好上午或晚上的活动
    #[serde(default)]
    pub time_of_day: Option<String>,
    #[serde(default)]
    pub accommodation: AccommodationPrefs,
    #[serde(default)]
    pub dining: DiningPrefs,
    #[serde(default)]
    pub transport: TransportPrefs,
    /// 省钱模式：优先免费或低价活动
    #[serde(default)]
    pub budget_conscious: bool,
    /// 关闭后不向模型声明任何检索工具
    #[serde(default = "default_research")]
    pub research: bool,
}

fn default_travelers() -> u32 {
    1
}

fn default_research() -> bool {
    true
}

impl TravelRequest {
    /// 最小合法请求，其余偏好取默认值
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        budget: f64,
        currency: Currency,
    ) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            start_date,
            end_date,
            budget,
            currency,
            travelers: default_travelers(),
            interests: BTreeSet::new(),
            pace: Pace::default(),
            travel_style: None,
            time_of_day: None,
            accommodation: AccommodationPrefs::default(),
            dining: DiningPrefs::default(),
            transport: TransportPrefs::default(),
            budget_conscious: false,
            research: default_research(),
        }
    }

    pub fn with_interests<I, S>(mut self, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests = interests.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_travelers(mut self, travelers: u32) -> Self {
        self.travelers = travelers;
        self
    }

    pub fn with_pace(mut self, pace: Pace) -> Self {
        self.pace = pace;
        self
    }

    pub fn with_research(mut self, enabled: bool) -> Self {
        self.research = enabled;
        self
    }

    /// 行程天数（含首尾两天）
    pub fn days(&self) -> u32 {
        let span = (self.end_date - self.start_date).num_days();
        if span < 0 {
            0
        } else {
            span as u32 + 1
        }
    }

    /// 校验请求；返回全部问题，便于一次性提示调用方
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.origin.trim().is_empty() {
            problems.push("origin must not be empty".to_string());
        }
        if self.destination.trim().is_empty() {
            problems.push("destination must not be empty".to_string());
        }
        if self.end_date < self.start_date {
            problems.push(format!(
                "end_date {} is before start_date {}",
                self.end_date, self.start_date
            ));
        }
        if self.travelers == 0 {
            problems.push("travelers must be at least 1".to_string());
        }
        if !self.budget.is_finite() || self.budget < 0.0 {
            problems.push(format!("budget must be a non-negative number, got {}", self.budget));
        }
        if !self.currency.is_well_formed() {
            problems.push(format!("currency '{}' is not a 3-letter code", self.currency));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_inclusive() {
        let req = TravelRequest::new(
            "Porto",
            "Lisbon",
            date(2026, 5, 1),
            date(2026, 5, 3),
            1000.0,
            Currency::new("eur"),
        );
        assert_eq!(req.days(), 3);
        assert_eq!(req.currency.code(), "EUR");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut req = TravelRequest::new(
            "",
            " ",
            date(2026, 5, 3),
            date(2026, 5, 1),
            -5.0,
            Currency::new("euro"),
        );
        req.travelers = 0;
        let problems = req.validate().unwrap_err();
        assert_eq!(problems.len(), 6);
        assert_eq!(req.days(), 0);
    }

    #[test]
    fn test_minor_digits() {
        assert_eq!(Currency::new("JPY").minor_digits(), 0);
        assert_eq!(Currency::new("usd").minor_digits(), 2);
        assert_eq!(Currency::new("KWD").minor_digits(), 3);
    }

    #[test]
    fn test_deserialize_defaults() {
        let req: TravelRequest = serde_json::from_str(
            r#"{"origin":"Fes","destination":"Bali","start_date":"2026-07-01",
                "end_date":"2026-07-10","budget":3000,"currency":"usd"}"#,
        )
        .unwrap();
        assert_eq!(req.travelers, 1);
        assert_eq!(req.currency.code(), "USD");
        assert_eq!(req.pace, Pace::Moderate);
        assert!(req.research);
        assert!(req.interests.is_empty());
    }
}
