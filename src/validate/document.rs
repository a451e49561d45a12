//! 文档级检查与转换

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::budget::{BudgetAllocation, Category};
use crate::tools::osm_link;
use crate::trip::{Alternative, BudgetSummary, DayPlan, Itinerary};
use crate::validate::{ValidationContext, Violation, ViolationKind};

/// 金额比较的容差（±1 个主货币单位）
const AMOUNT_TOLERANCE: f64 = 1.0;

struct Checker<'a> {
    ctx: &'a ValidationContext,
    violations: Vec<Violation>,
}

impl<'a> Checker<'a> {
    fn new(ctx: &'a ValidationContext) -> Self {
        Self {
            ctx,
            violations: Vec::new(),
        }
    }

    fn push(&mut self, path: impl Into<String>, kind: ViolationKind, message: impl Into<String>) {
        self.violations.push(Violation::new(path, kind, message));
    }

    fn required_str<'v>(&mut self, obj: &'v Map<String, Value>, parent: &str, key: &str) -> Option<&'v str> {
        let path = format!("{}.{}", parent, key);
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(path, ViolationKind::MissingField, format!("required field '{}' is missing", key));
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.push(path, ViolationKind::InvalidValue, format!("'{}' must not be empty", key));
                None
            }
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.push(path, ViolationKind::WrongType, format!("'{}' must be a string, got {}", key, type_name(other)));
                None
            }
        }
    }

    fn required_number(&mut self, obj: &Map<String, Value>, parent: &str, key: &str) -> Option<f64> {
        let path = format!("{}.{}", parent, key);
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(path, ViolationKind::MissingField, format!("required field '{}' is missing", key));
                None
            }
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => Some(v),
                _ => {
                    self.push(path, ViolationKind::InvalidValue, format!("'{}' is not a finite number", key));
                    None
                }
            },
            Some(other) => {
                self.push(path, ViolationKind::WrongType, format!("'{}' must be a number, got {}", key, type_name(other)));
                None
            }
        }
    }

    fn optional_str(&mut self, obj: &Map<String, Value>, parent: &str, key: &str) {
        match obj.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(other) => self.push(
                format!("{}.{}", parent, key),
                ViolationKind::WrongType,
                format!("'{}' must be a string, got {}", key, type_name(other)),
            ),
        }
    }

    fn check_document(&mut self, doc: &Value) {
        let Some(root) = doc.as_object() else {
            self.push("$", ViolationKind::WrongType, format!("document must be a JSON object, got {}", type_name(doc)));
            return;
        };

        match root.get("days") {
            None | Some(Value::Null) => self.push("days", ViolationKind::MissingField, "required field 'days' is missing"),
            Some(Value::Array(days)) if days.is_empty() => {
                self.push("days", ViolationKind::InvalidValue, "'days' must contain at least one day")
            }
            Some(Value::Array(days)) => self.check_days(days),
            Some(other) => self.push("days", ViolationKind::WrongType, format!("'days' must be an array, got {}", type_name(other))),
        }

        match root.get("budget") {
            None | Some(Value::Null) => self.push("budget", ViolationKind::MissingField, "required field 'budget' is missing"),
            Some(Value::Object(budget)) => self.check_budget(budget),
            Some(other) => self.push("budget", ViolationKind::WrongType, format!("'budget' must be an object, got {}", type_name(other))),
        }

        match root.get("alternatives") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let path = format!("alternatives[{}]", i);
                    match item {
                        Value::String(_) => {}
                        Value::Object(obj) => {
                            self.required_str(obj, &path, "name");
                        }
                        other => self.push(path, ViolationKind::WrongType, format!("alternative must be an object or string, got {}", type_name(other))),
                    }
                }
            }
            Some(other) => self.push("alternatives", ViolationKind::WrongType, format!("'alternatives' must be an array, got {}", type_name(other))),
        }
    }

    fn check_days(&mut self, days: &[Value]) {
        let mut previous: Option<NaiveDate> = None;
        let mut first: Option<NaiveDate> = None;
        let mut last: Option<NaiveDate> = None;
        let mut total_cost = 0.0;

        for (i, day) in days.iter().enumerate() {
            let path = format!("days[{}]", i);
            let Some(obj) = day.as_object() else {
                self.push(path, ViolationKind::WrongType, format!("day must be an object, got {}", type_name(day)));
                continue;
            };

            if let Some(raw) = self.required_str(obj, &path, "date") {
                match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                    Ok(date) => {
                        self.check_date(&path, date, previous);
                        if i == 0 {
                            first = Some(date);
                        }
                        if i == days.len() - 1 {
                            last = Some(date);
                        }
                        previous = Some(date);
                    }
                    Err(_) => self.push(
                        format!("{}.date", path),
                        ViolationKind::InvalidValue,
                        format!("date '{}' is not in YYYY-MM-DD format", raw),
                    ),
                }
            }

            match obj.get("activities") {
                None | Some(Value::Null) => self.push(
                    format!("{}.activities", path),
                    ViolationKind::MissingField,
                    "required field 'activities' is missing",
                ),
                Some(Value::Array(activities)) => {
                    for (j, activity) in activities.iter().enumerate() {
                        let activity_path = format!("{}.activities[{}]", path, j);
                        total_cost += self.check_activity(&activity_path, activity).unwrap_or(0.0);
                    }
                }
                Some(other) => self.push(
                    format!("{}.activities", path),
                    ViolationKind::WrongType,
                    format!("'activities' must be an array, got {}", type_name(other)),
                ),
            }

            self.optional_str(obj, &path, "tip");
            self.optional_str(obj, &path, "rationale");
        }

        if let Some(first) = first {
            if first != self.ctx.start_date {
                self.push(
                    "days[0].date",
                    ViolationKind::DayOrdering,
                    format!("first day is {} but the trip starts on {}", first, self.ctx.start_date),
                );
            }
        }
        if let Some(last) = last {
            if last != self.ctx.end_date {
                self.push(
                    format!("days[{}].date", days.len() - 1),
                    ViolationKind::DayOrdering,
                    format!("last day is {} but the trip ends on {}", last, self.ctx.end_date),
                );
            }
        }

        let ceiling = self.ctx.total * (1.0 + self.ctx.cost_tolerance);
        if total_cost > ceiling + 1e-6 {
            self.push(
                "days",
                ViolationKind::BudgetMismatch,
                format!(
                    "activities cost {:.2} {} in total, more than the {:.2} {} budget allows",
                    total_cost, self.ctx.currency, self.ctx.total, self.ctx.currency
                ),
            );
        }
    }

    fn check_date(&mut self, path: &str, date: NaiveDate, previous: Option<NaiveDate>) {
        let path = format!("{}.date", path);
        if date < self.ctx.start_date || date > self.ctx.end_date {
            self.push(
                path,
                ViolationKind::DayOrdering,
                format!("{} is outside the trip range {} to {}", date, self.ctx.start_date, self.ctx.end_date),
            );
            return;
        }
        if let Some(prev) = previous {
            let gap = (date - prev).num_days();
            if gap < 0 {
                self.push(path, ViolationKind::DayOrdering, format!("{} comes after {} but is earlier", date, prev));
            } else if gap > 1 {
                self.push(path, ViolationKind::DayOrdering, format!("{} leaves a gap of {} days after {}", date, gap - 1, prev));
            }
        }
    }

    /// 返回合法的 cost（用于汇总）
    fn check_activity(&mut self, path: &str, activity: &Value) -> Option<f64> {
        let Some(obj) = activity.as_object() else {
            self.push(path, ViolationKind::WrongType, format!("activity must be an object, got {}", type_name(activity)));
            return None;
        };

        self.required_str(obj, path, "name");
        self.optional_str(obj, path, "time");
        self.optional_str(obj, path, "tip");

        if let Some(raw) = self.required_str(obj, path, "category") {
            match Category::parse(raw) {
                Some(category) if self.ctx.categories.contains(&category) => {}
                _ => self.push(
                    format!("{}.category", path),
                    ViolationKind::UnknownCategory,
                    format!(
                        "category '{}' is not one of {}",
                        raw,
                        self.ctx.categories.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                ),
            }
        }

        match obj.get("source_url") {
            Some(Value::String(url)) if !(url.starts_with("http://") || url.starts_with("https://")) => self.push(
                format!("{}.source_url", path),
                ViolationKind::InvalidValue,
                format!("source_url '{}' is not an http(s) URL", url),
            ),
            _ => self.optional_str(obj, path, "source_url"),
        }

        self.check_location(path, obj.get("location"));

        let cost = self.required_number(obj, path, "cost")?;
        if cost < 0.0 {
            self.push(format!("{}.cost", path), ViolationKind::InvalidValue, format!("cost must be non-negative, got {}", cost));
            return None;
        }
        Some(cost)
    }

    fn check_location(&mut self, parent: &str, location: Option<&Value>) {
        let path = format!("{}.location", parent);
        let obj = match location {
            Some(Value::Object(obj)) => obj,
            None | Some(Value::Null) => {
                self.push(path, ViolationKind::UnresolvedLocation, "activity has no resolved location (name, lat, lon)");
                return;
            }
            Some(other) => {
                self.push(
                    path,
                    ViolationKind::UnresolvedLocation,
                    format!("location must be an object with name, lat and lon, got {}", type_name(other)),
                );
                return;
            }
        };
        self.required_str(obj, &path, "name");
        for (key, limit) in [("lat", 90.0), ("lon", 180.0)] {
            match obj.get(key).and_then(Value::as_f64) {
                Some(v) if v.is_finite() && v.abs() <= limit => {}
                Some(v) => self.push(
                    format!("{}.{}", path, key),
                    ViolationKind::UnresolvedLocation,
                    format!("{} {} is out of range", key, v),
                ),
                None => self.push(
                    format!("{}.{}", path, key),
                    ViolationKind::UnresolvedLocation,
                    format!("location has no numeric '{}'; geocode the place first", key),
                ),
            }
        }
    }

    fn check_budget(&mut self, budget: &Map<String, Value>) {
        if let Some(currency) = self.required_str(budget, "budget", "currency") {
            if !currency.trim().eq_ignore_ascii_case(&self.ctx.currency) {
                self.push(
                    "budget.currency",
                    ViolationKind::BudgetMismatch,
                    format!("currency '{}' differs from the requested {}", currency, self.ctx.currency),
                );
            }
        }
        if let Some(total) = self.required_number(budget, "budget", "total") {
            if (total - self.ctx.total).abs() > AMOUNT_TOLERANCE {
                self.push(
                    "budget.total",
                    ViolationKind::BudgetMismatch,
                    format!("total {} differs from the allocated {:.2}", total, self.ctx.total),
                );
            }
        }

        match budget.get("by_category") {
            None | Some(Value::Null) => {}
            Some(Value::Object(by_category)) => {
                for (key, value) in by_category {
                    let path = format!("budget.by_category.{}", key);
                    let Some(category) = Category::parse(key).filter(|c| self.ctx.categories.contains(c)) else {
                        self.push(path, ViolationKind::UnknownCategory, format!("unknown budget category '{}'", key));
                        continue;
                    };
                    let expected = self
                        .ctx
                        .allocated
                        .iter()
                        .find(|(c, _)| *c == category)
                        .map(|(_, amount)| *amount)
                        .unwrap_or(0.0);
                    match value.as_f64() {
                        Some(v) if (v - expected).abs() <= AMOUNT_TOLERANCE => {}
                        Some(v) => self.push(
                            path,
                            ViolationKind::BudgetMismatch,
                            format!("{} is {} but {:.2} was allocated", key, v, expected),
                        ),
                        None => self.push(path, ViolationKind::WrongType, format!("'{}' must be a number", key)),
                    }
                }
            }
            Some(other) => self.push(
                "budget.by_category",
                ViolationKind::WrongType,
                format!("'by_category' must be an object, got {}", type_name(other)),
            ),
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 一次遍历收集全部问题
pub fn validate(document: &Value, ctx: &ValidationContext) -> Result<(), Vec<Violation>> {
    let mut checker = Checker::new(ctx);
    checker.check_document(document);
    if checker.violations.is_empty() {
        Ok(())
    } else {
        Err(checker.violations)
    }
}

/// 校验并转换为 Itinerary；预算块按分配结果重建
pub fn to_itinerary(
    document: &Value,
    ctx: &ValidationContext,
    allocation: &BudgetAllocation,
) -> Result<Itinerary, Vec<Violation>> {
    validate(document, ctx)?;

    let mut days_value = document.get("days").cloned().unwrap_or(Value::Array(Vec::new()));
    // 日期去掉首尾空白、类别统一为小写规范名，与校验时的解释一致
    if let Some(days) = days_value.as_array_mut() {
        for day in days.iter_mut() {
            let trimmed = day.get("date").and_then(Value::as_str).map(|d| d.trim().to_string());
            if let Some(date) = trimmed {
                day["date"] = Value::String(date);
            }
        }
        for activity in days
            .iter_mut()
            .filter_map(|d| d.get_mut("activities").and_then(Value::as_array_mut))
            .flatten()
        {
            if let Some(category) = activity
                .get("category")
                .and_then(Value::as_str)
                .and_then(Category::parse)
            {
                activity["category"] = Value::String(category.as_str().to_string());
            }
        }
    }

    let mut days: Vec<DayPlan> =
        serde_json::from_value(days_value).map_err(|e| vec![Violation::malformed(e.to_string())])?;
    for activity in days.iter_mut().flat_map(|d| d.activities.iter_mut()) {
        let (lat, lon) = (activity.location.lat, activity.location.lon);
        activity.location.osm_url.get_or_insert_with(|| osm_link(lat, lon));
    }

    let alternatives = document
        .get("alternatives")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(Alternative {
                        name: name.clone(),
                        note: None,
                        source_url: None,
                    }),
                    other => serde_json::from_value(other.clone()).ok(),
                })
                .collect()
        })
        .unwrap_or_default();

    let advice = document
        .get("advice")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();

    Ok(Itinerary {
        days,
        budget: BudgetSummary::from(allocation),
        alternatives,
        advice,
    })
}
