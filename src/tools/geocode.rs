//! Geocode 提供方：OpenStreetMap Nominatim
//!
//! 地名 -> 坐标 + 规范名称；多个候选时取置信度（importance）最高者，其余记录为被舍弃的候选。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::tools::provider::{GeocodeCandidate, GeocodeProvider, ProviderError};

pub const NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

/// OpenStreetMap 地图链接（缩放 15 适合街区级别）
pub fn osm_link(lat: f64, lon: f64) -> String {
    format!(
        "https://www.openstreetmap.org/?mlat={:.5}&mlon={:.5}&zoom=15",
        lat, lon
    )
}

/// 选出置信度最高的候选；返回 (最佳, 被舍弃候选的名称)
pub fn pick_best(mut candidates: Vec<GeocodeCandidate>) -> Option<(GeocodeCandidate, Vec<String>)> {
    if candidates.is_empty() {
        return None;
    }
    // 稳定排序：置信度相同时保留提供方的原始顺序
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut iter = candidates.into_iter();
    let best = iter.next()?;
    let discarded = iter.map(|c| c.display_name).collect();
    Some((best, discarded))
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    importance: Option<f64>,
}

/// 解析 Nominatim jsonv2 响应
pub fn parse_nominatim(body: &str) -> Result<Vec<GeocodeCandidate>, ProviderError> {
    let places: Vec<NominatimPlace> =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    Ok(places
        .into_iter()
        .filter_map(|p| {
            let lat = p.lat.parse::<f64>().ok()?;
            let lon = p.lon.parse::<f64>().ok()?;
            Some(GeocodeCandidate {
                lat,
                lon,
                display_name: p.display_name,
                confidence: p.importance.unwrap_or(0.0).clamp(0.0, 1.0),
            })
        })
        .collect())
}

/// Nominatim 地理编码
pub struct NominatimGeocoder {
    client: Client,
    endpoint: String,
    limit: usize,
}

impl NominatimGeocoder {
    /// Nominatim 使用政策要求可识别的 User-Agent
    pub fn new(endpoint: impl Into<String>, user_agent: &str, timeout_secs: u64, limit: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimGeocoder {
    async fn geocode(&self, place: &str) -> Result<Vec<GeocodeCandidate>, ProviderError> {
        tracing::debug!(place = %place, "nominatim geocode");
        let limit = self.limit.to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", place), ("format", "jsonv2"), ("limit", limit.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse_nominatim(&body)
    }
}
