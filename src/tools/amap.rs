//! AMap (Gaode) REST lookups exposed as capabilities.
//!
//! - `amap_maps_text_search`: keyword POI search, optionally limited to a city
//! - `amap_maps_weather`: multi-day forecast for a city
//!
//! Both answer with compact JSON so the completion can quote coordinates
//! and figures verbatim.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::base_tool::{Capability, ToolArguments};
use crate::config::AmapSettings;

pub const TEXT_SEARCH_TOOL: &str = "amap_maps_text_search";
pub const WEATHER_TOOL: &str = "amap_maps_weather";

const MAX_POIS: usize = 10;

// ============================================================================
// Shared client
// ============================================================================

/// HTTP access to the AMap web service API.
#[derive(Debug, Clone)]
pub struct AmapClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl AmapClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("building AMap HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_settings(settings: &AmapSettings) -> anyhow::Result<Self> {
        Self::new(settings.base_url.clone(), settings.api_key.clone())
    }

    /// GET `path` with `params` plus the key and check AMap's status field.
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> anyhow::Result<Value> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("AMap API key not configured"))?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let mut query: Vec<(&str, &str)> = vec![("key", key), ("output", "JSON")];
        query.extend_from_slice(params);

        let response = self.http.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("AMap returned HTTP {}", status);
        }
        let body: Value = response.json().await.context("decoding AMap response")?;
        if body.get("status").and_then(Value::as_str) != Some("1") {
            let info = body.get("info").and_then(Value::as_str).unwrap_or("unknown error");
            bail!("AMap request failed: {}", info);
        }
        Ok(body)
    }
}

// ============================================================================
// Text search
// ============================================================================

/// Keyword POI search.
#[derive(Debug, Clone)]
pub struct AmapTextSearch {
    client: AmapClient,
}

impl AmapTextSearch {
    pub fn new(client: AmapClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Capability for AmapTextSearch {
    fn name(&self) -> &str {
        TEXT_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search points of interest by keyword. Arguments: keywords, city"
    }

    fn default_argument_key(&self) -> &str {
        "keywords"
    }

    async fn invoke(&self, args: &ToolArguments) -> anyhow::Result<String> {
        let keywords = args
            .get("keywords")
            .or_else(|| args.get("query"))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("missing argument: keywords"))?;
        let city = args.get("city").map(|s| s.trim()).unwrap_or("");

        log::debug!("AMap text search - keywords: {}, city: {}", keywords, city);
        let mut params = vec![("keywords", keywords), ("extensions", "all"), ("offset", "10")];
        if !city.is_empty() {
            params.push(("city", city));
            params.push(("citylimit", "true"));
        }
        let body = self.client.get("/v3/place/text", &params).await?;
        Ok(summarize_pois(&body).to_string())
    }
}

/// Compact POI list from a `/v3/place/text` response.
pub fn summarize_pois(body: &Value) -> Value {
    let pois = body
        .get("pois")
        .and_then(Value::as_array)
        .map(|pois| pois.iter().take(MAX_POIS).map(summarize_poi).collect::<Vec<_>>())
        .unwrap_or_default();
    Value::Array(pois)
}

fn summarize_poi(poi: &Value) -> Value {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or("").to_string();
    let biz = poi.get("biz_ext");
    let photos: Vec<String> = poi
        .get("photos")
        .and_then(Value::as_array)
        .map(|p| {
            p.iter()
                .filter_map(|ph| ph.get("url").and_then(Value::as_str))
                .take(3)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    json!({
        "name": text(poi.get("name")),
        "type": text(poi.get("type")),
        "address": text(poi.get("address")),
        "location": poi.get("location").and_then(Value::as_str).and_then(parse_lng_lat),
        "rating": text(biz.and_then(|b| b.get("rating"))),
        "cost": text(biz.and_then(|b| b.get("cost"))),
        "photos": photos,
    })
}

/// AMap encodes coordinates as `"lng,lat"`.
pub fn parse_lng_lat(raw: &str) -> Option<Value> {
    let (lng, lat) = raw.split_once(',')?;
    let lng: f64 = lng.trim().parse().ok()?;
    let lat: f64 = lat.trim().parse().ok()?;
    Some(json!({"lat": lat, "lng": lng}))
}

// ============================================================================
// Weather
// ============================================================================

/// City weather forecast.
#[derive(Debug, Clone)]
pub struct AmapWeather {
    client: AmapClient,
}

impl AmapWeather {
    pub fn new(client: AmapClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Capability for AmapWeather {
    fn name(&self) -> &str {
        WEATHER_TOOL
    }

    fn description(&self) -> &str {
        "Weather forecast for the next days. Arguments: city"
    }

    fn default_argument_key(&self) -> &str {
        "city"
    }

    async fn invoke(&self, args: &ToolArguments) -> anyhow::Result<String> {
        let city = args
            .get("city")
            .or_else(|| args.get("input"))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("missing argument: city"))?;

        log::debug!("AMap weather - city: {}", city);
        let body = self
            .client
            .get("/v3/weather/weatherInfo", &[("city", city), ("extensions", "all")])
            .await?;
        Ok(summarize_forecast(&body).to_string())
    }
}

/// Daily entries from a `/v3/weather/weatherInfo?extensions=all` response.
pub fn summarize_forecast(body: &Value) -> Value {
    let casts = body
        .get("forecasts")
        .and_then(|f| f.get(0))
        .and_then(|f| f.get("casts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let text = |c: &Value, key: &str| c.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    Value::Array(
        casts
            .iter()
            .map(|c| {
                json!({
                    "date": text(c, "date"),
                    "day_weather": text(c, "dayweather"),
                    "night_weather": text(c, "nightweather"),
                    "day_temp": text(c, "daytemp"),
                    "night_temp": text(c, "nighttemp"),
                    "day_wind": text(c, "daywind"),
                    "night_wind": text(c, "nightwind"),
                })
            })
            .collect(),
    )
}
