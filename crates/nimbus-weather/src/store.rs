//! SQLite-backed persistence: snapshot cache, favorites, and settings.
//!
//! One connection is opened at process start and shared by all store handles;
//! per-key writes are atomic (`INSERT OR REPLACE` / upsert), which is the only
//! cross-task guarantee callers get.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::WeatherError;
use crate::types::{CachedEntry, FavoriteCity, UnitSystem};

const KEY_UNITS: &str = "units";
const KEY_REFRESH_INTERVAL: &str = "refresh_interval_minutes";
const KEY_LAST_LAT: &str = "last_city_lat";
const KEY_LAST_LON: &str = "last_city_lon";

/// Fallback refresh interval when the stored value is missing or invalid.
pub const DEFAULT_REFRESH_INTERVAL_MINUTES: i64 = 60;

/// Handle to the on-device database. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WeatherError> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, WeatherError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), WeatherError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather_cache (
                location_key TEXT PRIMARY KEY,
                stored_at INTEGER NOT NULL,
                weather_json TEXT NOT NULL,
                forecast_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_stored_at ON weather_cache(stored_at);

            CREATE TABLE IF NOT EXISTS favorites (
                location_key TEXT PRIMARY KEY,
                city_json TEXT NOT NULL,
                weather_json TEXT,
                forecast_json TEXT,
                added_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore { conn: self.conn.clone() }
    }

    pub fn favorites(&self) -> FavoritesStore {
        FavoritesStore { conn: self.conn.clone() }
    }

    pub fn settings(&self) -> SettingsStore {
        SettingsStore { conn: self.conn.clone() }
    }
}

/// Cached weather+forecast payloads keyed by location.
#[derive(Clone)]
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    /// Insert or replace the entry for its location key.
    pub fn put(&self, entry: &CachedEntry) -> Result<(), WeatherError> {
        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO weather_cache
            (location_key, stored_at, weather_json, forecast_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                entry.location_key,
                entry.stored_at_ms,
                entry.weather_json,
                entry.forecast_json,
            ],
        )?;
        Ok(())
    }

    /// Fetch the entry for a key regardless of age.
    pub fn get(&self, key: &str) -> Result<Option<CachedEntry>, WeatherError> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT location_key, stored_at, weather_json, forecast_json
                 FROM weather_cache WHERE location_key = ?1",
                params![key],
                |row| {
                    Ok(CachedEntry {
                        location_key: row.get(0)?,
                        stored_at_ms: row.get(1)?,
                        weather_json: row.get(2)?,
                        forecast_json: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Fetch the entry for a key only if its age does not exceed `ttl_ms`.
    ///
    /// Freshness is `now - stored_at <= ttl_ms`, so a zero or negative TTL
    /// rejects everything but an entry written in the same millisecond.
    /// Callers pass `i64::MAX` to ignore the TTL entirely.
    pub fn get_fresh(&self, key: &str, ttl_ms: i64) -> Result<Option<CachedEntry>, WeatherError> {
        let Some(entry) = self.get(key)? else {
            return Ok(None);
        };
        let elapsed = Utc::now().timestamp_millis().saturating_sub(entry.stored_at_ms);
        if elapsed > ttl_ms {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn delete(&self, key: &str) -> Result<(), WeatherError> {
        self.conn.lock().execute(
            "DELETE FROM weather_cache WHERE location_key = ?1",
            params![key],
        )?;
        Ok(())
    }

    /// Drop all but the `max_entries` most recently stored entries.
    ///
    /// The cache itself never evicts; this is an explicit bounded-growth
    /// operation for callers that want one. Returns the number removed.
    pub fn prune(&self, max_entries: usize) -> Result<usize, WeatherError> {
        let removed = self.conn.lock().execute(
            r#"
            DELETE FROM weather_cache WHERE location_key NOT IN (
                SELECT location_key FROM weather_cache
                ORDER BY stored_at DESC LIMIT ?1
            )
            "#,
            params![max_entries as i64],
        )?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<u32, WeatherError> {
        let count =
            self.conn.lock().query_row("SELECT COUNT(*) FROM weather_cache", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Bookmarked cities with their last-known weather.
#[derive(Clone)]
pub struct FavoritesStore {
    conn: Arc<Mutex<Connection>>,
}

impl FavoritesStore {
    /// Insert a favorite, or replace the payload of an existing one.
    ///
    /// Distinctness is by location key, so two differently-named entries at
    /// the same coordinates collapse into one. The original insertion time is
    /// preserved on update so list order stays stable.
    pub fn upsert(&self, favorite: &FavoriteCity) -> Result<(), WeatherError> {
        let key = favorite.city.location_key();
        let city_json = serde_json::to_string(&favorite.city)?;
        let weather_json = match &favorite.weather {
            Some(w) => Some(serde_json::to_string(w)?),
            None => None,
        };
        let forecast_json = match &favorite.forecast {
            Some(f) => Some(serde_json::to_string(f)?),
            None => None,
        };
        let now = Utc::now().timestamp_millis();

        self.conn.lock().execute(
            r#"
            INSERT INTO favorites
            (location_key, city_json, weather_json, forecast_json, added_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(location_key) DO UPDATE SET
                city_json = excluded.city_json,
                weather_json = excluded.weather_json,
                forecast_json = excluded.forecast_json,
                updated_at = excluded.updated_at
            "#,
            params![key, city_json, weather_json, forecast_json, now],
        )?;
        Ok(())
    }

    /// All favorites in insertion order.
    pub fn list(&self) -> Result<Vec<FavoriteCity>, WeatherError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT city_json, weather_json, forecast_json
             FROM favorites ORDER BY added_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map([], Self::row_to_favorite)?;
        let favorites = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(favorites)
    }

    pub fn get(&self, key: &str) -> Result<Option<FavoriteCity>, WeatherError> {
        let conn = self.conn.lock();
        let favorite = conn
            .query_row(
                "SELECT city_json, weather_json, forecast_json
                 FROM favorites WHERE location_key = ?1",
                params![key],
                Self::row_to_favorite,
            )
            .optional()?;
        Ok(favorite)
    }

    pub fn remove(&self, key: &str) -> Result<(), WeatherError> {
        self.conn.lock().execute(
            "DELETE FROM favorites WHERE location_key = ?1",
            params![key],
        )?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), WeatherError> {
        self.conn.lock().execute("DELETE FROM favorites", [])?;
        Ok(())
    }

    fn row_to_favorite(row: &rusqlite::Row) -> rusqlite::Result<FavoriteCity> {
        let city_json: String = row.get(0)?;
        let weather_json: Option<String> = row.get(1)?;
        let forecast_json: Option<String> = row.get(2)?;

        let city = serde_json::from_str(&city_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        // Unreadable weather payloads degrade to "no last-known data" rather
        // than failing the whole listing.
        Ok(FavoriteCity {
            city,
            weather: weather_json.as_deref().and_then(|s| serde_json::from_str(s).ok()),
            forecast: forecast_json.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        })
    }
}

/// Process-wide user settings in a key-value table.
///
/// Values are validated on read, not write; invalid stored values silently
/// fall back to defaults.
#[derive(Clone)]
pub struct SettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SettingsStore {
    pub fn get_string(&self, key: &str, default: &str) -> Result<String, WeatherError> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    pub fn put_string(&self, key: &str, value: &str) -> Result<(), WeatherError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64, WeatherError> {
        let raw = self.get_string(key, &default.to_string())?;
        Ok(raw.parse().unwrap_or(default))
    }

    pub fn put_i64(&self, key: &str, value: i64) -> Result<(), WeatherError> {
        self.put_string(key, &value.to_string())
    }

    /// Configured unit system; unrecognized stored values fall back to metric.
    pub fn unit_system(&self) -> Result<UnitSystem, WeatherError> {
        let raw = self.get_string(KEY_UNITS, UnitSystem::default().as_query_param())?;
        Ok(UnitSystem::parse(&raw))
    }

    pub fn set_unit_system(&self, units: UnitSystem) -> Result<(), WeatherError> {
        self.put_string(KEY_UNITS, units.as_query_param())
    }

    /// Configured refresh interval; non-positive or unparsable values fall
    /// back to the default.
    pub fn refresh_interval_minutes(&self) -> Result<i64, WeatherError> {
        let minutes = self.get_i64(KEY_REFRESH_INTERVAL, DEFAULT_REFRESH_INTERVAL_MINUTES)?;
        if minutes <= 0 {
            return Ok(DEFAULT_REFRESH_INTERVAL_MINUTES);
        }
        Ok(minutes)
    }

    pub fn set_refresh_interval_minutes(&self, minutes: i64) -> Result<(), WeatherError> {
        self.put_i64(KEY_REFRESH_INTERVAL, minutes)
    }

    /// Coordinates of the most recently fetched location, if any.
    pub fn last_selected(&self) -> Result<Option<(f64, f64)>, WeatherError> {
        let lat = self.get_string(KEY_LAST_LAT, "")?;
        let lon = self.get_string(KEY_LAST_LON, "")?;
        match (lat.parse::<f64>(), lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) => Ok(Some((lat, lon))),
            _ => Ok(None),
        }
    }

    pub fn set_last_selected(&self, lat: f64, lon: f64) -> Result<(), WeatherError> {
        self.put_string(KEY_LAST_LAT, &lat.to_string())?;
        self.put_string(KEY_LAST_LON, &lon.to_string())
    }
}
