//! 规划端到端集成测试：脚本化模型 + 确定性检索提供方

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use wayfarer::budget::{Category, CategoryWeights};
use wayfarer::config::AppConfig;
use wayfarer::core::PlannerBuilder;
use wayfarer::llm::{MockLlmClient, ScriptedLlmClient};
use wayfarer::tools::{FixtureGeocoder, FixtureScraper, FixtureSearch, GeocodeCandidate};
use wayfarer::trip::{Currency, TravelRequest};
use wayfarer::PlanningError;

fn lisbon() -> TravelRequest {
    TravelRequest::new(
        "Berlin",
        "Lisbon",
        NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 5, 3).unwrap(),
        1000.0,
        Currency::new("EUR"),
    )
}

fn three_day_document() -> String {
    let day = |date: &str, name: &str, cost: f64| {
        json!({
            "date": date,
            "activities": [{
                "name": name,
                "time": "10:00-12:00",
                "location": {"name": name, "lat": 38.71, "lon": -9.13},
                "cost": cost,
                "category": "activities",
                "source_url": "https://example.org/lisbon-food-history/0"
            }]
        })
    };
    json!({"itinerary": {
        "days": [
            day("2025-05-01", "Alfama walking tour", 15.0),
            day("2025-05-02", "Jerónimos Monastery", 10.0),
            day("2025-05-03", "Time Out Market", 0.0)
        ],
        "budget": {"total": 1000.0, "currency": "EUR",
                   "by_category": {"lodging": 350.0, "transport": 200.0, "food": 250.0, "activities": 150.0, "misc": 50.0}},
        "alternatives": ["Sintra day trip"],
        "advice": ["Trams get crowded after 10am"]
    }})
    .to_string()
}

fn fixtures() -> (Arc<FixtureSearch>, Arc<FixtureScraper>, Arc<FixtureGeocoder>) {
    (
        Arc::new(FixtureSearch::new()),
        Arc::new(FixtureScraper::new().with_page(
            "https://example.org/lisbon-food-history/0",
            "<html><body><h1>Lisbon</h1><p>Try pastéis de nata.</p></body></html>",
        )),
        Arc::new(FixtureGeocoder::new().with_place(
            "Lisbon",
            vec![GeocodeCandidate {
                lat: 38.7223,
                lon: -9.1393,
                display_name: "Lisboa, Portugal".into(),
                confidence: 0.9,
            }],
        )),
    )
}

#[tokio::test]
async fn test_lisbon_end_to_end() {
    let (search, scrape, geocode) = fixtures();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"tool_calls": [{"id": "c1", "tool": "search", "args": {"query": "Lisbon food history"}}]}"#.to_string(),
        three_day_document(),
    ]));
    let planner = PlannerBuilder::new(AppConfig::default())
        .with_llm(llm.clone())
        .with_providers(search.clone(), scrape.clone(), geocode.clone())
        .build();

    let itinerary = planner.plan(&lisbon(), None).await.unwrap();

    assert_eq!(search.calls(), 1);
    assert_eq!(scrape.calls(), 0);
    assert_eq!(planner.cache().len(), 1);
    assert_eq!(itinerary.days.len(), 3);
    assert_eq!(itinerary.budget.currency, "EUR");
    let sum: f64 = itinerary.budget.by_category.values().sum();
    assert!((sum - 1000.0).abs() < 1e-9);
    assert_eq!(itinerary.budget.by_category.get(&Category::Lodging), Some(&350.0));
    assert_eq!(llm.calls(), 2);

    planner.close().unwrap();
    assert!(planner.cache().is_empty());
}

#[tokio::test]
async fn test_custom_weights_flow_into_budget() {
    let (search, scrape, geocode) = fixtures();
    let weights = CategoryWeights::new([(Category::Lodging, 1.0), (Category::Food, 1.0)]);
    let planner = PlannerBuilder::new(AppConfig::default())
        .with_llm(Arc::new(MockLlmClient))
        .with_providers(search, scrape, geocode.clone())
        .build();

    let itinerary = planner.plan(&lisbon(), Some(&weights)).await.unwrap();
    assert_eq!(itinerary.budget.by_category.get(&Category::Lodging), Some(&500.0));
    assert_eq!(itinerary.budget.by_category.get(&Category::Transport), Some(&0.0));
    // 离线模型先地理编码目的地，行程沿用该坐标
    assert_eq!(geocode.calls(), 1);
    assert_eq!(itinerary.days[0].activities[0].location.lat, 38.7223);
}

#[tokio::test]
async fn test_planner_default_weights_apply_without_override() {
    let (search, scrape, geocode) = fixtures();
    let planner = PlannerBuilder::new(AppConfig::default())
        .with_llm(Arc::new(MockLlmClient))
        .with_providers(search, scrape, geocode)
        .build()
        .with_default_weights(CategoryWeights::new([(Category::Activities, 1.0)]));

    let itinerary = planner.plan(&lisbon(), None).await.unwrap();
    assert_eq!(itinerary.budget.by_category.get(&Category::Activities), Some(&1000.0));
    assert_eq!(itinerary.budget.by_category.get(&Category::Lodging), Some(&0.0));

    // 显式传入的权重优先
    let explicit = CategoryWeights::new([(Category::Lodging, 1.0)]);
    let itinerary = planner.plan(&lisbon(), Some(&explicit)).await.unwrap();
    assert_eq!(itinerary.budget.by_category.get(&Category::Lodging), Some(&1000.0));
    planner.close().unwrap();
}

#[tokio::test]
async fn test_invalid_request_fails_before_model() {
    let (search, scrape, geocode) = fixtures();
    let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
    let planner = PlannerBuilder::new(AppConfig::default())
        .with_llm(llm.clone())
        .with_providers(search, scrape, geocode)
        .build();

    let mut request = lisbon();
    request.end_date = NaiveDate::from_ymd_opt(2025, 4, 30).unwrap();
    request.travelers = 0;
    match planner.plan(&request, None).await {
        Err(PlanningError::InvalidRequest(problems)) => assert_eq!(problems.len(), 2),
        other => panic!("unexpected {:?}", other.map(|i| i.days.len())),
    }
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_cache_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.cache.snapshot_path = Some(dir.path().join("cache.json"));

    let script = || {
        Arc::new(ScriptedLlmClient::new([
            r#"{"tool_calls": [{"id": "c1", "tool": "search", "args": {"query": "Lisbon food history"}}]}"#.to_string(),
            three_day_document(),
        ]))
    };

    let (search, scrape, geocode) = fixtures();
    let first = PlannerBuilder::new(config.clone())
        .with_llm(script())
        .with_providers(search.clone(), scrape.clone(), geocode.clone())
        .build();
    first.plan(&lisbon(), None).await.unwrap();
    first.close().unwrap();

    let second = PlannerBuilder::new(config)
        .with_llm(script())
        .with_providers(search.clone(), scrape, geocode)
        .build();
    assert_eq!(second.cache().len(), 1);
    second.plan(&lisbon(), None).await.unwrap();
    // 第二次运行命中快照中的缓存
    assert_eq!(search.calls(), 1);
    second.close().unwrap();
}
