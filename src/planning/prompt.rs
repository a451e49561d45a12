//! 提示词：system 指令、行程请求与预算分配的渲染、工具结果回填
//!
//! 请求参数同时以可读文本和 ```json 块给出，JSON 块可被 `extract_brief` 原样取回。

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetAllocation, Category};
use crate::tools::ToolResult;
use crate::trip::{AccommodationPrefs, DiningPrefs, Pace, TransportPrefs, TravelRequest};

/// 回复协议与行程规则
const SYSTEM_PROMPT: &str = r#"You are an expert travel planning assistant. Build a realistic, costed, day-by-day itinerary that respects the traveler's budget split and preferences, and weave in practical advice from previous travelers (local customs, safety, crowd timing, hidden gems, transport and budget tips).

Reply with exactly ONE JSON object and nothing else. It has one of two shapes:

1. Request research (you may ask for several calls at once; they run in parallel):
{"tool_calls": [{"id": "c1", "tool": "search", "args": {"query": "best time to visit Belem Tower", "count": 5}},
                {"id": "c2", "tool": "geocode", "args": {"place": "Belem Tower, Lisbon"}}]}

2. Deliver the final itinerary:
{"itinerary": {
  "days": [{"date": "YYYY-MM-DD", "activities": [{"name": "...", "time": "09:00-11:00",
            "location": {"name": "...", "lat": 0.0, "lon": 0.0}, "cost": 0.0, "category": "activities",
            "tip": "...", "source_url": "https://..."}], "tip": "...", "rationale": "..."}],
  "budget": {"total": 0.0, "currency": "XXX", "by_category": {"lodging": 0.0}},
  "alternatives": [{"name": "...", "note": "..."}],
  "advice": ["..."]}}

Rules for the final itinerary:
- One entry per calendar day from the first to the last trip date, in order.
- Every activity needs a numeric cost (per group, in the trip currency, 0 if free) and a category from: lodging, transport, food, activities, misc.
- Every activity needs a location with real coordinates; geocode places you are unsure about.
- source_url is optional. Only use URLs that appeared in tool results; never invent or use placeholder links.
- budget.total, budget.currency and budget.by_category must repeat the allocation given by the user exactly.
- The sum of all activity costs must stay within the total budget."#;

const RESEARCH_NOTE: &str = "Use the declared tools to verify facts, prices, opening hours and coordinates before you answer. If a tool result says a source is unavailable, continue without it.";

const NO_RESEARCH_NOTE: &str = "No research tools are available for this trip. Answer from your own knowledge, do not emit tool_calls, and leave source_url out.";

/// 模型可见的行程参数
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TripBrief {
    pub origin: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: u32,
    pub travelers: u32,
    pub currency: String,
    pub budget_total: f64,
    pub allocation: BTreeMap<Category, f64>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub pace: Pace,
    #[serde(default)]
    pub travel_style: Option<String>,
    #[serde(default)]
    pub time_of_day: Option<String>,
    #[serde(default)]
    pub accommodation: AccommodationPrefs,
    #[serde(default)]
    pub dining: DiningPrefs,
    #[serde(default)]
    pub transport: TransportPrefs,
    #[serde(default)]
    pub budget_conscious: bool,
    #[serde(default)]
    pub research: bool,
}

impl TripBrief {
    pub fn new(request: &TravelRequest, allocation: &BudgetAllocation, research: bool) -> Self {
        Self {
            origin: request.origin.clone(),
            destination: request.destination.clone(),
            start_date: request.start_date,
            end_date: request.end_date,
            days: request.days(),
            travelers: request.travelers,
            currency: allocation.currency().code().to_string(),
            budget_total: allocation.total(),
            allocation: allocation
                .categories()
                .map(|c| (c, allocation.amount(c)))
                .collect(),
            interests: request.interests.iter().cloned().collect(),
            pace: request.pace,
            travel_style: request.travel_style.clone(),
            time_of_day: request.time_of_day.clone(),
            accommodation: request.accommodation.clone(),
            dining: request.dining.clone(),
            transport: request.transport.clone(),
            budget_conscious: request.budget_conscious,
            research,
        }
    }

    /// 行程覆盖的每一天
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start_date
            .iter_days()
            .take_while(|d| *d <= self.end_date)
            .collect()
    }
}

pub fn system_prompt(research: bool) -> String {
    let note = if research { RESEARCH_NOTE } else { NO_RESEARCH_NOTE };
    format!("{}\n\n{}", SYSTEM_PROMPT, note)
}

fn join_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

/// 首条 user 消息：可读摘要 + JSON 参数块
pub fn user_prompt(brief: &TripBrief) -> String {
    let (min_acts, max_acts) = brief.pace.activities_per_day();
    let mut lines = vec![
        format!(
            "Plan a {}-day trip from {} to {} for {} traveler(s), {} to {}.",
            brief.days, brief.origin, brief.destination, brief.travelers, brief.start_date, brief.end_date
        ),
        format!("Total budget: {:.2} {}. Allocation by category:", brief.budget_total, brief.currency),
    ];
    for (category, amount) in &brief.allocation {
        lines.push(format!("- {}: {:.2} {}", category, amount, brief.currency));
    }
    lines.push(format!("Interests: {}.", join_or(&brief.interests, "general sightseeing")));
    lines.push(format!("Pace: {:?}, about {}-{} activities per day.", brief.pace, min_acts, max_acts));
    if let Some(style) = &brief.travel_style {
        lines.push(format!("Travel style: {}.", style));
    }
    if let Some(time) = &brief.time_of_day {
        lines.push(format!("Preferred time of day: {}.", time));
    }
    let stay = &brief.accommodation;
    if stay.star_rating.is_some() || !stay.types.is_empty() || !stay.location.is_empty() || !stay.amenities.is_empty() {
        lines.push(format!(
            "Accommodation: {} stars, types {}, near {}, amenities {}.",
            stay.star_rating.map(|s| s.to_string()).unwrap_or_else(|| "any".into()),
            join_or(&stay.types, "any"),
            join_or(&stay.location, "anywhere central"),
            join_or(&stay.amenities, "none required"),
        ));
    }
    let dining = &brief.dining;
    if !dining.cuisines.is_empty() || !dining.styles.is_empty() || dining.dietary_restrictions.is_some() {
        lines.push(format!(
            "Dining: cuisines {}, styles {}, dietary restrictions {}.",
            join_or(&dining.cuisines, "any"),
            join_or(&dining.styles, "any"),
            dining.dietary_restrictions.as_deref().unwrap_or("none"),
        ));
    }
    let transport = &brief.transport;
    if !transport.modes.is_empty() || transport.acceptable_travel_time.is_some() {
        lines.push(format!(
            "Getting around: {}, acceptable travel time {}.",
            join_or(&transport.modes, "any"),
            transport.acceptable_travel_time.as_deref().unwrap_or("flexible"),
        ));
    }
    if brief.budget_conscious {
        lines.push("Budget-conscious mode: prefer free or low-cost activities and affordable options.".into());
    }

    let json = serde_json::to_string_pretty(brief).unwrap_or_default();
    format!("{}\n\nTrip parameters:\n```json\n{}\n```", lines.join("\n"), json)
}

/// 从 user 消息中取回 TripBrief
pub fn extract_brief(text: &str) -> Option<TripBrief> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    serde_json::from_str(rest[..end].trim()).ok()
}

/// 一轮的工具结果：与调用同序的 JSON 数组
pub fn tool_results_message(results: &[ToolResult]) -> String {
    let items: Vec<String> = results.iter().map(ToolResult::to_observation).collect();
    format!("[{}]", items.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{allocate, CategoryWeights};
    use crate::trip::Currency;

    fn brief() -> TripBrief {
        let mut request = TravelRequest::new(
            "Berlin",
            "Lisbon",
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 3).unwrap(),
            1000.0,
            Currency::new("eur"),
        )
        .with_interests(["food", "history"])
        .with_travelers(2)
        .with_pace(Pace::Packed);
        request.budget_conscious = true;
        request.dining.dietary_restrictions = Some("vegetarian".into());
        let allocation = allocate(1000.0, &request.currency, &CategoryWeights::default()).unwrap();
        TripBrief::new(&request, &allocation, true)
    }

    #[test]
    fn test_user_prompt_round_trips_brief() {
        let b = brief();
        let prompt = user_prompt(&b);
        assert!(prompt.contains("lodging: 350.00 EUR"));
        assert!(prompt.contains("Budget-conscious mode"));
        assert!(prompt.contains("vegetarian"));
        assert!(prompt.contains("for 2 traveler(s)"));
        assert!(prompt.contains("Pace: Packed, about 4-6 activities per day."));
        let back = extract_brief(&prompt).unwrap();
        assert_eq!(back.destination, "Lisbon");
        assert_eq!(back.days, 3);
        assert_eq!(back.allocation.get(&Category::Misc), Some(&50.0));
    }

    #[test]
    fn test_dates_cover_range() {
        assert_eq!(brief().dates().len(), 3);
    }

    #[test]
    fn test_system_prompt_research_toggle() {
        assert!(system_prompt(true).contains("declared tools"));
        assert!(system_prompt(false).contains("No research tools"));
    }
}
