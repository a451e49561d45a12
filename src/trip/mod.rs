//! 领域模型：行程请求与最终行程

pub mod itinerary;
pub mod request;

pub use itinerary::{Activity, Alternative, BudgetSummary, DayPlan, Itinerary, Location};
pub use request::{AccommodationPrefs, Currency, DiningPrefs, Pace, TransportPrefs, TravelRequest};
