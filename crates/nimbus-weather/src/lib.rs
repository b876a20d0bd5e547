//! Weather data freshness and offline resilience for Nimbus.
//!
//! Fetches current conditions and multi-day forecasts, persists them per
//! location, and serves the best available data across three tiers: fresh
//! cache, live fetch, stale cache. A connectivity observer and a periodic
//! refresh scheduler keep the selected location and bookmarked cities warm.

pub mod connectivity;
pub mod error;
pub mod provider;
pub mod repository;
pub mod scheduler;
pub mod store;
pub mod types;

pub use connectivity::ConnectivityMonitor;
pub use error::WeatherError;
pub use provider::WeatherClient;
pub use repository::WeatherRepository;
pub use scheduler::RefreshScheduler;
pub use store::{Database, FavoritesStore, SettingsStore, SnapshotStore};
pub use types::*;
