//! HTTP client for the OpenWeatherMap API.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use crate::error::WeatherError;
use crate::types::{City, DailyForecast, ForecastResponse, UnitSystem, WeatherSnapshot};

const API_BASE: &str = "https://api.openweathermap.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Number of forecast days requested by default.
pub const DEFAULT_FORECAST_DAYS: usize = 5;

#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

/// One geocoding result from the provider's direct-search endpoint.
#[derive(Debug, Deserialize)]
struct GeocodeItem {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: String,
    #[serde(default)]
    state: Option<String>,
}

impl WeatherClient {
    pub fn new(api_key: &str) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    pub fn new_with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
        }
    }

    /// Fetch current conditions for a coordinate pair.
    #[instrument(skip(self), level = "debug")]
    pub async fn current_weather(
        &self,
        lat: f64,
        lon: f64,
        units: UnitSystem,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("units", units.as_query_param().to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fetch the raw 3-hour forecast slots for a coordinate pair.
    #[instrument(skip(self), level = "debug")]
    pub async fn forecast(
        &self,
        lat: f64,
        lon: f64,
        units: UnitSystem,
    ) -> Result<ForecastResponse, WeatherError> {
        let url = format!("{}/data/2.5/forecast", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("units", units.as_query_param().to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fetch and aggregate the forecast into per-day entries.
    pub async fn daily_forecast(
        &self,
        lat: f64,
        lon: f64,
        days: usize,
        units: UnitSystem,
    ) -> Result<Vec<DailyForecast>, WeatherError> {
        let response = self.forecast(lat, lon, units).await?;
        Ok(response.into_daily(days))
    }

    /// Search cities by name via the geocoding endpoint.
    #[instrument(skip(self), level = "debug")]
    pub async fn search_cities(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<City>, WeatherError> {
        let url = format!("{}/geo/1.0/direct", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", name.to_string()),
                ("limit", limit.to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await?;

        let items: Vec<GeocodeItem> = self.handle_response(response).await?;
        Ok(items
            .into_iter()
            .map(|item| City {
                name: item.name,
                country: item.country,
                state: item.state,
                lat: item.lat,
                lon: item.lon,
            })
            .collect())
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, WeatherError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(WeatherError::Api { status: status.as_u16(), message })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn weather_body(name: &str, temp: f64) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "coord": {"lon": 21.01, "lat": 52.23},
            "main": {"temp": temp, "pressure": 1013, "humidity": 60},
            "wind": {"speed": 3.5, "deg": 180},
            "weather": [{"main": "Clouds", "description": "scattered clouds", "icon": "03d"}],
            "sys": {"country": "PL", "sunrise": 1718000000u32, "sunset": 1718050000u32},
            "clouds": {"all": 40},
            "visibility": 10000
        })
    }

    fn forecast_body() -> serde_json::Value {
        serde_json::json!({
            "list": [
                {
                    "dt": 1718010000u32,
                    "main": {"temp": 11.0, "temp_min": 10.0, "temp_max": 12.0},
                    "weather": [{"main": "Clouds", "description": "few clouds", "icon": "02d"}]
                },
                {
                    "dt": 1718020800u32,
                    "main": {"temp": 13.0, "temp_min": 12.0, "temp_max": 14.0},
                    "weather": [{"main": "Clear", "description": "clear sky", "icon": "01d"}]
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_current_weather() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("units", "metric"))
            .and(query_param("appid", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(weather_body("Warsaw", 10.0)))
            .mount(&mock_server)
            .await;

        let client = WeatherClient::new_with_base_url("test_key", &mock_server.uri());
        let snapshot = client.current_weather(52.23, 21.01, UnitSystem::Metric).await.unwrap();

        assert_eq!(snapshot.name, "Warsaw");
        assert!((snapshot.main.temp - 10.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.sys.country, "PL");
    }

    #[tokio::test]
    async fn test_forecast_aggregates_to_daily() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .mount(&mock_server)
            .await;

        let client = WeatherClient::new_with_base_url("test_key", &mock_server.uri());
        let daily =
            client.daily_forecast(52.23, 21.01, 5, UnitSystem::Metric).await.unwrap();

        assert!(!daily.is_empty());
        // Both slots land within the same UTC hour-span; regardless of the
        // local zone the aggregate min/max must cover both.
        let min = daily.iter().map(|d| d.min_temperature).fold(f64::INFINITY, f64::min);
        let max = daily.iter().map(|d| d.max_temperature).fold(f64::NEG_INFINITY, f64::max);
        assert!((min - 10.0).abs() < f64::EPSILON);
        assert!((max - 14.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
            .mount(&mock_server)
            .await;

        let client = WeatherClient::new_with_base_url("test_key", &mock_server.uri());
        let result = client.current_weather(52.23, 21.01, UnitSystem::Metric).await;

        assert!(matches!(result, Err(WeatherError::Api { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_search_cities() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .and(query_param("q", "Warsaw"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "Warsaw", "lat": 52.23, "lon": 21.01, "country": "PL", "state": "Masovian Voivodeship"},
                {"name": "Warsaw", "lat": 41.24, "lon": -85.85, "country": "US", "state": "Indiana"}
            ])))
            .mount(&mock_server)
            .await;

        let client = WeatherClient::new_with_base_url("test_key", &mock_server.uri());
        let cities = client.search_cities("Warsaw", 5).await.unwrap();

        assert_eq!(cities.len(), 2);
        assert_eq!(cities[0].country, "PL");
        assert_eq!(cities[1].state.as_deref(), Some("Indiana"));
    }
}
