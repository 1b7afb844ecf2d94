//! Trip request and plan types.
//!
//! Plans come out of a completion, so deserialization is lenient: ratings,
//! prices and temperatures accept numbers or text, missing fields take
//! defaults, numeric fields also accept numeric strings such as `"100"`,
//! and a bare number is accepted where a budget breakdown is expected.

use std::fmt;

use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What the traveller asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequest {
    pub destination: String,
    /// `YYYY-MM-DD`.
    pub start_date: String,
    /// `YYYY-MM-DD`, not before `start_date`.
    pub end_date: String,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub hotel_preferences: Vec<String>,
    #[serde(default = "default_budget")]
    pub budget: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

fn default_budget() -> String {
    "moderate".to_string()
}

impl TripRequest {
    pub fn new(
        destination: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
            preferences: Vec::new(),
            hotel_preferences: Vec::new(),
            budget: default_budget(),
            user_id: None,
        }
    }

    pub fn with_preferences<I, S>(mut self, preferences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferences = preferences.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Parsed `(start, end)` dates.
    pub fn dates(&self) -> Result<(NaiveDate, NaiveDate), chrono::ParseError> {
        let start = NaiveDate::parse_from_str(self.start_date.trim(), "%Y-%m-%d")?;
        let end = NaiveDate::parse_from_str(self.end_date.trim(), "%Y-%m-%d")?;
        Ok((start, end))
    }

    /// Number of days, both ends included.
    pub fn duration_days(&self) -> Option<i64> {
        let (start, end) = self.dates().ok()?;
        Some((end - start).num_days() + 1)
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A number or a free-text value such as "free" or "100 yuan".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Figure {
    Number(f64),
    Text(String),
}

impl Default for Figure {
    fn default() -> Self {
        Figure::Text("N/A".to_string())
    }
}

impl Figure {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Figure::Number(n) => Some(*n),
            Figure::Text(t) => t.trim().parse().ok(),
        }
    }
}

/// Reads a JSON number or a numeric string as `f64`.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let figure = Figure::deserialize(deserializer)?;
    figure
        .as_f64()
        .ok_or_else(|| de::Error::custom(format!("expected a number, got {:?}", figure.to_string())))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Figure>::deserialize(deserializer)?.and_then(|f| f.as_f64()))
}

fn lenient_day<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let n = lenient_f64(deserializer)?;
    if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
        Ok(n as u32)
    } else {
        Err(de::Error::custom(format!("invalid day number {}", n)))
    }
}

impl fmt::Display for Figure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Figure::Number(n) => write!(f, "{}", n),
            Figure::Text(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Cost breakdown of a whole trip or a single day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Budget {
    pub transport_cost: f64,
    pub dining_cost: f64,
    pub hotel_cost: f64,
    pub attraction_ticket_cost: f64,
    pub total: f64,
}

impl Budget {
    /// Sum of the four parts.
    pub fn parts_sum(&self) -> f64 {
        self.transport_cost + self.dining_cost + self.hotel_cost + self.attraction_ticket_cost
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct BudgetFields {
    #[serde(deserialize_with = "lenient_f64")]
    transport_cost: f64,
    #[serde(deserialize_with = "lenient_f64")]
    dining_cost: f64,
    #[serde(deserialize_with = "lenient_f64")]
    hotel_cost: f64,
    #[serde(alias = "ticket_cost", deserialize_with = "lenient_f64")]
    attraction_ticket_cost: f64,
    #[serde(alias = "total_cost", deserialize_with = "lenient_f64")]
    total: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BudgetRepr {
    Total(Figure),
    Fields(BudgetFields),
}

impl<'de> Deserialize<'de> for Budget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match BudgetRepr::deserialize(deserializer)? {
            BudgetRepr::Total(figure) => Budget {
                total: figure
                    .as_f64()
                    .ok_or_else(|| de::Error::custom(format!("invalid budget total {:?}", figure.to_string())))?,
                ..Budget::default()
            },
            BudgetRepr::Fields(f) => Budget {
                transport_cost: f.transport_cost,
                dining_cost: f.dining_cost,
                hotel_cost: f.hotel_cost,
                attraction_ticket_cost: f.attraction_ticket_cost,
                total: f.total,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attraction {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub rating: Figure,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub suggested_duration_hours: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub ticket_price: Figure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotel {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub price: Figure,
    #[serde(default)]
    pub rating: Figure,
    #[serde(default, alias = "distance_to_attraction_km", deserialize_with = "lenient_opt_f64")]
    pub distance_to_main_attraction_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dining {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub cost_per_person: Figure,
    #[serde(default)]
    pub rating: Figure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub date: String,
    #[serde(default)]
    pub day_weather: String,
    #[serde(default)]
    pub night_weather: String,
    #[serde(default)]
    pub day_temp: Figure,
    #[serde(default)]
    pub night_temp: Figure,
    #[serde(default)]
    pub day_wind: Option<String>,
    #[serde(default)]
    pub night_wind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    #[serde(deserialize_with = "lenient_day")]
    pub day: u32,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub weather: Option<Weather>,
    #[serde(default)]
    pub recommended_hotel: Option<Hotel>,
    #[serde(default)]
    pub attractions: Vec<Attraction>,
    #[serde(default)]
    pub dinings: Vec<Dining>,
    #[serde(default)]
    pub budget: Budget,
}

/// The structured artifact returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripPlan {
    pub trip_title: String,
    pub total_budget: Budget,
    #[serde(default)]
    pub hotels: Vec<Hotel>,
    pub days: Vec<DayPlan>,
}
