//! Periodic background refresh of the selected location and all favorites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::repository::WeatherRepository;
use crate::store::FavoritesStore;
use crate::types::{City, FavoriteCity};

/// Repeating refresh task.
///
/// One worker at a time: `start` cancels any previous worker before spawning,
/// so restarting (e.g. after an interval change) never leaves two tickers
/// alive. The interval is re-read from settings on every iteration, so a
/// mid-cycle change takes effect on the next tick. Foreground and
/// connectivity are evaluated per tick rather than by suspending the timer.
pub struct RefreshScheduler {
    repository: Arc<WeatherRepository>,
    favorites: FavoritesStore,
    connectivity: watch::Receiver<bool>,
    foreground: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
    interval_override: Mutex<Option<Duration>>,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct TickContext {
    repository: Arc<WeatherRepository>,
    favorites: FavoritesStore,
    connectivity: watch::Receiver<bool>,
    foreground: Arc<AtomicBool>,
    interval_override: Option<Duration>,
}

impl RefreshScheduler {
    pub fn new(
        repository: Arc<WeatherRepository>,
        favorites: FavoritesStore,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        Self {
            repository,
            favorites,
            connectivity,
            foreground: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
            interval_override: Mutex::new(None),
        }
    }

    /// Start the repeating task, cancelling any previous one first.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if let Some(w) = worker.take() {
            w.token.cancel();
            w.handle.abort();
        }

        let token = CancellationToken::new();
        let ctx = TickContext {
            repository: self.repository.clone(),
            favorites: self.favorites.clone(),
            connectivity: self.connectivity.clone(),
            foreground: self.foreground.clone(),
            interval_override: *self.interval_override.lock(),
        };
        let handle = tokio::spawn(Self::run(ctx, token.clone()));
        *worker = Some(Worker { token, handle });
        tracing::debug!("refresh scheduler started");
    }

    /// Stop the repeating task; a tick already in its sleep phase never fires.
    pub fn stop(&self) {
        if let Some(w) = self.worker.lock().take() {
            w.token.cancel();
            w.handle.abort();
            tracing::debug!("refresh scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Foreground gate, driven by the app lifecycle.
    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::Relaxed);
    }

    /// Shrink the tick interval for tests; captured at the next `start`.
    #[cfg(test)]
    pub(crate) fn override_interval(&self, interval: Duration) {
        *self.interval_override.lock() = Some(interval);
    }

    async fn run(ctx: TickContext, token: CancellationToken) {
        loop {
            let interval = match ctx.interval_override {
                Some(interval) => interval,
                None => {
                    let minutes = ctx
                        .repository
                        .settings()
                        .refresh_interval_minutes()
                        .unwrap_or(crate::store::DEFAULT_REFRESH_INTERVAL_MINUTES);
                    Duration::from_secs(minutes as u64 * 60)
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if !ctx.foreground.load(Ordering::Relaxed) {
                tracing::debug!("skipping refresh tick: app in background");
                continue;
            }
            if !*ctx.connectivity.borrow() {
                tracing::debug!("skipping refresh tick: offline");
                continue;
            }

            Self::tick(&ctx).await;
        }
    }

    async fn tick(ctx: &TickContext) {
        if let Ok(Some((lat, lon))) = ctx.repository.last_selected() {
            let city = City {
                name: String::new(),
                country: String::new(),
                state: None,
                lat,
                lon,
            };
            if let Err(e) = ctx.repository.get_weather(&city).await {
                tracing::warn!(lat, lon, error = %e, "scheduled refresh failed for selected location");
            }
        }

        let favorites = match ctx.favorites.list() {
            Ok(favorites) => favorites,
            Err(e) => {
                tracing::warn!(error = %e, "could not list favorites for refresh");
                return;
            }
        };

        for favorite in favorites {
            match ctx.repository.get_weather(&favorite.city).await {
                // Only genuinely fresh data replaces the stored favorite;
                // stale fallbacks and failures leave last-known data intact.
                Ok(fresh) if !fresh.is_stale => {
                    let updated = FavoriteCity {
                        city: favorite.city,
                        weather: Some(fresh.weather),
                        forecast: Some(fresh.forecast),
                    };
                    if let Err(e) = ctx.favorites.upsert(&updated) {
                        tracing::warn!(error = %e, "could not store refreshed favorite");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(city = %favorite.city.name, error = %e, "favorite refresh failed, keeping last-known data");
                }
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(w) = self.worker.get_mut().take() {
            w.token.cancel();
            w.handle.abort();
        }
    }
}
