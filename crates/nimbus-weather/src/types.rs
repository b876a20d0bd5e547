use std::collections::BTreeMap;

use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// Measurement system passed to the weather provider.
///
/// `Standard` is Kelvin, the provider's raw unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl UnitSystem {
    /// Value sent as the provider's `units` query parameter.
    pub fn as_query_param(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
            Self::Standard => "standard",
        }
    }

    /// Lenient parse for values read back from settings storage.
    /// Anything unrecognized falls back to metric.
    pub fn parse(value: &str) -> Self {
        match value {
            "metric" => Self::Metric,
            "imperial" => Self::Imperial,
            "standard" => Self::Standard,
            _ => Self::Metric,
        }
    }
}

/// Derive the cache/favorites key for a coordinate pair.
///
/// Deterministic decimal concatenation; two locations only collide when both
/// coordinates render to identical strings, which is an accepted imprecision
/// for this domain.
pub fn location_key(lat: f64, lon: f64) -> String {
    format!("{lat}_{lon}")
}

/// A city as selected by the user or returned from geocoding search.
///
/// Identity is the coordinate pair, never the display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

impl City {
    pub fn location_key(&self) -> String {
        location_key(self.lat, self.lon)
    }
}

/// Current conditions at one location and point in time.
///
/// Produced only by the remote provider and cached verbatim; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub name: String,
    pub coord: Coord,
    pub main: MainConditions,
    pub wind: Wind,
    pub weather: Vec<Condition>,
    pub sys: Sys,
    pub clouds: Clouds,
    /// Visibility in meters; absent in some provider responses.
    #[serde(default)]
    pub visibility: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainConditions {
    pub temp: f64,
    pub pressure: i64,
    pub humidity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
    #[serde(default)]
    pub deg: i64,
}

/// One condition code/description pair (the provider sends a list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sys {
    #[serde(default)]
    pub country: String,
    pub sunrise: i64,
    pub sunset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clouds {
    pub all: i64,
}

/// Raw forecast payload: 3-hour slots, time-ascending.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    pub list: Vec<ForecastEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastEntry {
    /// Slot time, epoch seconds UTC.
    pub dt: i64,
    pub main: ForecastMain,
    #[serde(default)]
    pub weather: Vec<Condition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastMain {
    pub temp: f64,
    pub temp_min: f64,
    pub temp_max: f64,
}

/// Per-day aggregate derived from the raw 3-hour slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    /// Mean of the day's slot temperatures.
    pub temperature: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    /// Icon code of the day's first slot, or empty when the provider sent none.
    pub icon: String,
}

impl ForecastResponse {
    /// Group slots by calendar day in the local time zone and aggregate,
    /// keeping at most `days` days in ascending date order.
    ///
    /// The grouping is regenerated wholesale on every fetch; slots whose
    /// timestamp does not map to a local date are skipped.
    pub fn into_daily(self, days: usize) -> Vec<DailyForecast> {
        let mut by_day: BTreeMap<NaiveDate, Vec<ForecastEntry>> = BTreeMap::new();
        for entry in self.list {
            let Some(local) = Local.timestamp_opt(entry.dt, 0).single() else {
                continue;
            };
            by_day.entry(local.date_naive()).or_default().push(entry);
        }

        by_day
            .into_iter()
            .take(days)
            .map(|(date, entries)| {
                let count = entries.len() as f64;
                let temperature = entries.iter().map(|e| e.main.temp).sum::<f64>() / count;
                let min_temperature =
                    entries.iter().map(|e| e.main.temp_min).fold(f64::INFINITY, f64::min);
                let max_temperature =
                    entries.iter().map(|e| e.main.temp_max).fold(f64::NEG_INFINITY, f64::max);
                let icon = entries
                    .first()
                    .and_then(|e| e.weather.first())
                    .map(|c| c.icon.clone())
                    .unwrap_or_default();

                DailyForecast { date, temperature, min_temperature, max_temperature, icon }
            })
            .collect()
    }
}

/// Result of one orchestration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityWeather {
    pub city: City,
    pub weather: WeatherSnapshot,
    pub forecast: Vec<DailyForecast>,
    /// True when the data came from the offline fallback tier.
    pub is_stale: bool,
}

/// A bookmarked city with its last-known weather, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteCity {
    pub city: City,
    #[serde(default)]
    pub weather: Option<WeatherSnapshot>,
    #[serde(default)]
    pub forecast: Option<Vec<DailyForecast>>,
}

/// One persisted snapshot row: serialized weather + forecast for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub location_key: String,
    /// Write time, epoch milliseconds.
    pub stored_at_ms: i64,
    pub weather_json: String,
    pub forecast_json: String,
}
