//! Freshness-gated weather retrieval.
//!
//! Three tiers, in preference order: fresh cache hit, live fetch, stale cache.
//! Network failures never escape this module; callers see either data (with an
//! `is_stale` marker) or [`WeatherError::NoData`].

use chrono::Utc;

use crate::error::WeatherError;
use crate::provider::{WeatherClient, DEFAULT_FORECAST_DAYS};
use crate::store::{Database, SettingsStore, SnapshotStore};
use crate::types::{CachedEntry, City, CityWeather, DailyForecast, WeatherSnapshot};

const MILLIS_PER_MINUTE: i64 = 60_000;

pub struct WeatherRepository {
    client: WeatherClient,
    snapshots: SnapshotStore,
    settings: SettingsStore,
}

impl WeatherRepository {
    pub fn new(client: WeatherClient, db: &Database) -> Self {
        Self {
            client,
            snapshots: db.snapshots(),
            settings: db.settings(),
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Best available weather for a city.
    ///
    /// A cache entry no older than the configured refresh interval is served
    /// without network I/O. Otherwise a live fetch runs; if it fails and any
    /// cached entry exists, that entry is returned marked stale with its
    /// stored timestamp untouched.
    pub async fn get_weather(&self, city: &City) -> Result<CityWeather, WeatherError> {
        let key = city.location_key();
        let ttl_ms =
            self.settings.refresh_interval_minutes()?.saturating_mul(MILLIS_PER_MINUTE);

        if let Some((weather, forecast)) = self.decode_cached(&key, ttl_ms)? {
            tracing::debug!(city = %city.name, "serving cached weather");
            return Ok(bundle(city, weather, forecast, false));
        }

        match self.refresh(city).await {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                tracing::warn!(city = %city.name, error = %e, "live fetch failed, trying stale cache");
                match self.decode_cached(&key, i64::MAX)? {
                    Some((weather, forecast)) => Ok(bundle(city, weather, forecast, true)),
                    None => Err(WeatherError::NoData),
                }
            }
        }
    }

    /// Unconditional live fetch: current conditions and forecast requested
    /// concurrently, result cached under the city's key, city recorded as
    /// last selected.
    pub async fn refresh(&self, city: &City) -> Result<CityWeather, WeatherError> {
        let units = self.settings.unit_system()?;
        let (weather, raw_forecast) = tokio::try_join!(
            self.client.current_weather(city.lat, city.lon, units),
            self.client.forecast(city.lat, city.lon, units),
        )?;
        let forecast = raw_forecast.into_daily(DEFAULT_FORECAST_DAYS);

        let entry = CachedEntry {
            location_key: city.location_key(),
            stored_at_ms: Utc::now().timestamp_millis(),
            weather_json: serde_json::to_string(&weather)?,
            forecast_json: serde_json::to_string(&forecast)?,
        };
        self.snapshots.put(&entry)?;
        self.settings.set_last_selected(city.lat, city.lon)?;
        tracing::info!(city = %city.name, "weather refreshed");

        Ok(bundle(city, weather, forecast, false))
    }

    /// Cache-only read, ignoring age. Used when callers already know the
    /// device is offline.
    pub fn cached(&self, city: &City) -> Result<Option<CityWeather>, WeatherError> {
        let key = city.location_key();
        Ok(self
            .decode_cached(&key, i64::MAX)?
            .map(|(weather, forecast)| bundle(city, weather, forecast, true)))
    }

    /// Search cities by name via the provider's geocoding endpoint.
    pub async fn search_cities(&self, name: &str) -> Result<Vec<City>, WeatherError> {
        self.client.search_cities(name, 5).await
    }

    /// Coordinates of the most recently fetched location, if any.
    pub fn last_selected(&self) -> Result<Option<(f64, f64)>, WeatherError> {
        self.settings.last_selected()
    }

    /// Look up and decode a cache entry no older than `ttl_ms`. Undecodable
    /// payloads count as a miss, which pushes the caller to the next tier.
    fn decode_cached(
        &self,
        key: &str,
        ttl_ms: i64,
    ) -> Result<Option<(WeatherSnapshot, Vec<DailyForecast>)>, WeatherError> {
        let Some(entry) = self.snapshots.get_fresh(key, ttl_ms)? else {
            return Ok(None);
        };

        let weather = serde_json::from_str(&entry.weather_json);
        let forecast = serde_json::from_str(&entry.forecast_json);
        match (weather, forecast) {
            (Ok(weather), Ok(forecast)) => Ok(Some((weather, forecast))),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(key, "discarding unreadable cache entry: {e}");
                Ok(None)
            }
        }
    }
}

fn bundle(
    city: &City,
    weather: WeatherSnapshot,
    forecast: Vec<DailyForecast>,
    is_stale: bool,
) -> CityWeather {
    CityWeather { city: city.clone(), weather, forecast, is_stale }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::types::UnitSystem;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_city() -> City {
        City {
            name: "Warsaw".to_string(),
            country: "PL".to_string(),
            state: None,
            lat: 52.23,
            lon: 21.01,
        }
    }

    fn weather_body(temp: f64) -> serde_json::Value {
        serde_json::json!({
            "name": "Warsaw",
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
            "list": [{
                "dt": 1718010000u32,
                "main": {"temp": 11.0, "temp_min": 10.0, "temp_max": 12.0},
                "weather": [{"main": "Clouds", "description": "few clouds", "icon": "02d"}]
            }]
        })
    }

    async fn mount_success(server: &MockServer, temp: f64, expect: u64) {
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(weather_body(temp)))
            .expect(expect)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(expect)
            .mount(server)
            .await;
    }

    /// Write a cache entry for the city with the given age and temperature.
    fn seed_cache(db: &Database, city: &City, age_ms: i64, temp: f64) {
        let weather: WeatherSnapshot =
            serde_json::from_value(weather_body(temp)).unwrap();
        let forecast: Vec<DailyForecast> = vec![];
        db.snapshots()
            .put(&CachedEntry {
                location_key: city.location_key(),
                stored_at_ms: Utc::now().timestamp_millis() - age_ms,
                weather_json: serde_json::to_string(&weather).unwrap(),
                forecast_json: serde_json::to_string(&forecast).unwrap(),
            })
            .unwrap();
    }

    fn repository(db: &Database, base_url: &str) -> WeatherRepository {
        WeatherRepository::new(WeatherClient::new_with_base_url("test_key", base_url), db)
    }

    const MIN: i64 = 60_000;

    #[tokio::test]
    async fn test_fresh_cache_serves_without_network() {
        let mock_server = MockServer::start().await;
        mount_success(&mock_server, 99.0, 0).await;

        let db = Database::in_memory().unwrap();
        let city = test_city();
        seed_cache(&db, &city, 30 * MIN, 10.0);

        let repo = repository(&db, &mock_server.uri());
        let result = repo.get_weather(&city).await.unwrap();

        assert!(!result.is_stale);
        assert!((result.weather.main.temp - 10.0).abs() < f64::EPSILON);
        // expect(0) on the mocks verifies no request was made.
    }

    #[tokio::test]
    async fn test_cache_miss_fetches_once_and_writes_entry() {
        let mock_server = MockServer::start().await;
        mount_success(&mock_server, 12.0, 1).await;

        let db = Database::in_memory().unwrap();
        let city = test_city();
        let repo = repository(&db, &mock_server.uri());

        let before = Utc::now().timestamp_millis();
        let result = repo.get_weather(&city).await.unwrap();

        assert!(!result.is_stale);
        assert!((result.weather.main.temp - 12.0).abs() < f64::EPSILON);

        let entry = db.snapshots().get(&city.location_key()).unwrap().unwrap();
        assert!(entry.stored_at_ms >= before);
        assert_eq!(repo.last_selected().unwrap(), Some((city.lat, city.lon)));
    }

    #[tokio::test]
    async fn test_cache_miss_and_fetch_failure_is_no_data() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let db = Database::in_memory().unwrap();
        let repo = repository(&db, &mock_server.uri());

        let result = repo.get_weather(&test_city()).await;
        assert!(matches!(result, Err(WeatherError::NoData)));
    }

    #[tokio::test]
    async fn test_expired_cache_with_failing_fetch_returns_stale() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let db = Database::in_memory().unwrap();
        let city = test_city();
        seed_cache(&db, &city, 120 * MIN, 10.0);
        let stored_before =
            db.snapshots().get(&city.location_key()).unwrap().unwrap().stored_at_ms;

        let repo = repository(&db, &mock_server.uri());
        let result = repo.get_weather(&city).await.unwrap();

        assert!(result.is_stale);
        assert!((result.weather.main.temp - 10.0).abs() < f64::EPSILON);

        // The fallback must not restamp the entry.
        let stored_after =
            db.snapshots().get(&city.location_key()).unwrap().unwrap().stored_at_ms;
        assert_eq!(stored_before, stored_after);
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_hits_cache() {
        let mock_server = MockServer::start().await;
        mount_success(&mock_server, 12.0, 1).await;

        let db = Database::in_memory().unwrap();
        let city = test_city();
        let repo = repository(&db, &mock_server.uri());

        let first = repo.get_weather(&city).await.unwrap();
        let second = repo.get_weather(&city).await.unwrap();

        // expect(1) on the mocks verifies the second call made no request.
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_forces_refetch() {
        let mock_server = MockServer::start().await;
        mount_success(&mock_server, 12.0, 1).await;

        let db = Database::in_memory().unwrap();
        let city = test_city();
        db.snapshots()
            .put(&CachedEntry {
                location_key: city.location_key(),
                stored_at_ms: Utc::now().timestamp_millis(),
                weather_json: "not json".to_string(),
                forecast_json: "[]".to_string(),
            })
            .unwrap();

        let repo = repository(&db, &mock_server.uri());
        let result = repo.get_weather(&city).await.unwrap();

        assert!(!result.is_stale);
        assert!((result.weather.main.temp - 12.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unit_system_setting_reaches_provider() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("units", "imperial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(weather_body(50.0)))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .and(query_param("units", "imperial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let db = Database::in_memory().unwrap();
        db.settings().set_unit_system(UnitSystem::Imperial).unwrap();

        let repo = repository(&db, &mock_server.uri());
        repo.get_weather(&test_city()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cached_ignores_ttl_and_marks_stale() {
        let db = Database::in_memory().unwrap();
        let city = test_city();
        seed_cache(&db, &city, 999 * MIN, 7.0);

        let repo = repository(&db, "http://127.0.0.1:1");
        let result = repo.cached(&city).unwrap().unwrap();

        assert!(result.is_stale);
        assert!((result.weather.main.temp - 7.0).abs() < f64::EPSILON);
        assert!(repo.cached(&City { lat: 0.0, lon: 0.0, ..city }).unwrap().is_none());
    }

    /// TTL 60 min: fresh at T+30, refetch at T+90, stale fallback offline.
    #[tokio::test]
    async fn test_ttl_scenario_end_to_end() {
        let db = Database::in_memory().unwrap();
        let city = test_city();
        let key = city.location_key();

        // T+30min: entry stored 30 minutes ago is fresh; no network observed.
        seed_cache(&db, &city, 30 * MIN, 10.0);
        {
            let silent_server = MockServer::start().await;
            mount_success(&silent_server, 99.0, 0).await;
            let repo = repository(&db, &silent_server.uri());
            let result = repo.get_weather(&city).await.unwrap();
            assert!(!result.is_stale);
            assert!((result.weather.main.temp - 10.0).abs() < f64::EPSILON);
        }

        // T+90min: entry expired; fetch returns 12 degrees and restamps.
        seed_cache(&db, &city, 90 * MIN, 10.0);
        let mock_server = MockServer::start().await;
        mount_success(&mock_server, 12.0, 1).await;
        let repo = repository(&db, &mock_server.uri());
        let before = Utc::now().timestamp_millis();
        let result = repo.get_weather(&city).await.unwrap();
        assert!(!result.is_stale);
        assert!((result.weather.main.temp - 12.0).abs() < f64::EPSILON);
        let entry = db.snapshots().get(&key).unwrap().unwrap();
        assert!(entry.stored_at_ms >= before);

        // T+150min, offline: the 12-degree entry comes back marked stale.
        let entry = db.snapshots().get(&key).unwrap().unwrap();
        db.snapshots()
            .put(&CachedEntry { stored_at_ms: entry.stored_at_ms - 90 * MIN, ..entry })
            .unwrap();
        let offline_repo = repository(&db, "http://127.0.0.1:1");
        let result = offline_repo.get_weather(&city).await.unwrap();
        assert!(result.is_stale);
        assert!((result.weather.main.temp - 12.0).abs() < f64::EPSILON);
    }
}
