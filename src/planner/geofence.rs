//! Geofencing — destination bounding boxes and distance checks.
//!
//! A plan is filtered against the destination's box: attractions and
//! dinings without coordinates, or outside the box, are removed; a
//! recommended hotel outside the box is dropped. Distances between stops
//! only produce warnings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::model::{Location, TripPlan};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Largest distance between consecutive attractions of one day.
pub const SAME_DAY_LIMIT_KM: f64 = 50.0;
/// Largest distance from one day's last attraction to the next day's first.
pub const CROSS_DAY_LIMIT_KM: f64 = 100.0;

// ---------------------------------------------------------------------------
// Boxes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub const fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    /// Inclusive on every edge.
    pub fn contains(&self, location: &Location) -> bool {
        (self.min_lat..=self.max_lat).contains(&location.lat)
            && (self.min_lng..=self.max_lng).contains(&location.lng)
    }
}

/// A named box with alternative spellings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub bounds: BoundingBox,
}

const KNOWN_DESTINATIONS: &[(&str, &[&str], BoundingBox)] = &[
    ("beijing", &["北京", "peking"], BoundingBox::new(39.4, 41.1, 115.4, 117.5)),
    ("shanghai", &["上海"], BoundingBox::new(30.7, 31.9, 120.8, 122.2)),
    ("hangzhou", &["杭州"], BoundingBox::new(29.2, 30.6, 118.3, 120.9)),
    ("guangzhou", &["广州", "canton"], BoundingBox::new(22.5, 23.9, 112.9, 114.1)),
    ("shenzhen", &["深圳"], BoundingBox::new(22.4, 22.9, 113.7, 114.7)),
    ("chengdu", &["成都"], BoundingBox::new(30.1, 31.5, 102.9, 104.9)),
    ("xian", &["西安", "xi'an", "xi an"], BoundingBox::new(33.7, 34.8, 107.6, 109.8)),
    ("nanjing", &["南京"], BoundingBox::new(31.2, 32.6, 118.3, 119.3)),
];

/// Lookup table from normalized destination names to boxes.
#[derive(Debug, Clone)]
pub struct DestinationBounds {
    by_name: HashMap<String, BoundingBox>,
}

impl Default for DestinationBounds {
    fn default() -> Self {
        let mut bounds = Self::empty();
        for (name, aliases, bbox) in KNOWN_DESTINATIONS {
            bounds.insert(name, aliases.iter().copied(), *bbox);
        }
        bounds
    }
}

impl DestinationBounds {
    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    /// Built-in table plus `extra`; extra entries win on name clashes.
    pub fn with_entries(extra: &[DestinationEntry]) -> Self {
        let mut bounds = Self::default();
        for entry in extra {
            bounds.insert(&entry.name, entry.aliases.iter().map(String::as_str), entry.bounds);
        }
        bounds
    }

    pub fn insert<'a>(&mut self, name: &str, aliases: impl IntoIterator<Item = &'a str>, bbox: BoundingBox) {
        self.by_name.insert(normalize_destination(name), bbox);
        for alias in aliases {
            self.by_name.insert(normalize_destination(alias), bbox);
        }
    }

    pub fn lookup(&self, destination: &str) -> Option<BoundingBox> {
        self.by_name.get(&normalize_destination(destination)).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Trim, lowercase, drop a trailing `市` or ` city`.
pub fn normalize_destination(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let stripped = lowered
        .strip_suffix('市')
        .or_else(|| lowered.strip_suffix(" city"))
        .unwrap_or(&lowered);
    stripped.trim().to_string()
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: &Location, b: &Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A distance rule that a plan breaks without being filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeoWarning {
    SameDayDistance {
        day: u32,
        from: String,
        to: String,
        distance_km: f64,
    },
    CrossDayDistance {
        day: u32,
        from: String,
        to: String,
        distance_km: f64,
    },
}

impl GeoWarning {
    pub fn message(&self) -> String {
        match self {
            GeoWarning::SameDayDistance {
                day,
                from,
                to,
                distance_km,
            } => format!(
                "Day {}: {} and {} are {:.1} km apart (limit {} km)",
                day, from, to, distance_km, SAME_DAY_LIMIT_KM
            ),
            GeoWarning::CrossDayDistance {
                day,
                from,
                to,
                distance_km,
            } => format!(
                "Day {} to day {}: {} and {} are {:.1} km apart (limit {} km)",
                day,
                day + 1,
                from,
                to,
                distance_km,
                CROSS_DAY_LIMIT_KM
            ),
        }
    }
}

/// What [`validate_plan`] changed and noticed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Attractions, dinings and recommended hotels removed.
    pub removed: usize,
    pub removed_names: Vec<String>,
    pub warnings: Vec<GeoWarning>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.removed == 0 && self.warnings.is_empty()
    }
}

fn accepts(bbox: Option<&BoundingBox>, location: Option<&Location>) -> bool {
    match (bbox, location) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(b), Some(l)) => b.contains(l),
    }
}

/// Filter `plan` in place against `bbox` and collect distance warnings.
///
/// With `bbox == None` every point that has coordinates is accepted.
pub fn validate_plan(plan: &mut TripPlan, bbox: Option<&BoundingBox>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for day in &mut plan.days {
        let mut removed_here = Vec::new();
        day.attractions.retain(|a| {
            let keep = accepts(bbox, a.location.as_ref());
            if !keep {
                removed_here.push(a.name.clone());
            }
            keep
        });
        day.dinings.retain(|d| {
            let keep = accepts(bbox, d.location.as_ref());
            if !keep {
                removed_here.push(d.name.clone());
            }
            keep
        });
        if let (Some(b), Some(hotel)) = (bbox, &day.recommended_hotel) {
            if hotel.location.as_ref().is_some_and(|l| !b.contains(l)) {
                removed_here.push(hotel.name.clone());
                day.recommended_hotel = None;
            }
        }

        if !removed_here.is_empty() {
            log::warn!("Day {}: removed {} point(s) outside destination", day.day, removed_here.len());
        }
        report.removed += removed_here.len();
        report.removed_names.extend(removed_here);

        for pair in day.attractions.windows(2) {
            let (Some(a), Some(b)) = (&pair[0].location, &pair[1].location) else {
                continue;
            };
            let distance_km = haversine_km(a, b);
            if distance_km > SAME_DAY_LIMIT_KM {
                report.warnings.push(GeoWarning::SameDayDistance {
                    day: day.day,
                    from: pair[0].name.clone(),
                    to: pair[1].name.clone(),
                    distance_km,
                });
            }
        }
    }

    for pair in plan.days.windows(2) {
        let (Some(last), Some(first)) = (pair[0].attractions.last(), pair[1].attractions.first()) else {
            continue;
        };
        let (Some(a), Some(b)) = (&last.location, &first.location) else {
            continue;
        };
        let distance_km = haversine_km(a, b);
        if distance_km > CROSS_DAY_LIMIT_KM {
            report.warnings.push(GeoWarning::CrossDayDistance {
                day: pair[0].day,
                from: last.name.clone(),
                to: first.name.clone(),
                distance_km,
            });
        }
    }

    for warning in &report.warnings {
        log::warn!("{}", warning.message());
    }
    report
}
