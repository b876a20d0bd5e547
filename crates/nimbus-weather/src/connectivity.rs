//! Connectivity observer: a continuously-updated "is the internet reachable"
//! boolean.
//!
//! Modeled as a watch channel rather than a registered callback, so consumers
//! subscribe or read the latest value without unregister bookkeeping. The
//! value is a hint for skipping doomed refresh attempts; the orchestrator's
//! source of truth is still attempting the fetch.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::WeatherError;

const DEFAULT_PROBE_URL: &str = "https://clients3.google.com/generate_204";
const PROBE_INTERVAL_SECS: u64 = 15;
const PROBE_TIMEOUT_SECS: u64 = 5;

pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    client: reqwest::Client,
    probe_url: String,
    probe_interval: Duration,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConnectivityMonitor {
    pub fn new() -> Result<Self, WeatherError> {
        Self::with_endpoint(DEFAULT_PROBE_URL, Duration::from_secs(PROBE_INTERVAL_SECS))
    }

    /// Monitor probing a custom endpoint at a custom cadence.
    pub fn with_endpoint(
        probe_url: &str,
        probe_interval: Duration,
    ) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()?;
        let (state, _) = watch::channel(false);

        Ok(Self {
            state,
            client,
            probe_url: probe_url.to_string(),
            probe_interval,
            worker: Mutex::new(None),
        })
    }

    /// Begin observation. Idempotent: a second call while the worker is alive
    /// is a no-op. An initial probe runs immediately.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                return;
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::run(
            self.client.clone(),
            self.probe_url.clone(),
            self.probe_interval,
            self.state.clone(),
            token.clone(),
        ));
        *worker = Some(Worker { token, handle });
        tracing::debug!("connectivity monitor started");
    }

    /// End observation. The worker exits promptly, even mid-probe or
    /// mid-sleep.
    pub fn stop(&self) {
        if let Some(w) = self.worker.lock().take() {
            w.token.cancel();
            w.handle.abort();
            tracing::debug!("connectivity monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Latest observed value, read synchronously.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that yields every online/offline transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Push an OS-level transition directly, for platform wiring that gets
    /// network callbacks instead of relying on the probe loop.
    pub fn set_online(&self, online: bool) {
        self.state.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }

    async fn run(
        client: reqwest::Client,
        probe_url: String,
        probe_interval: Duration,
        state: watch::Sender<bool>,
        token: CancellationToken,
    ) {
        loop {
            let online = tokio::select! {
                _ = token.cancelled() => break,
                online = Self::probe(&client, &probe_url) => online,
            };
            state.send_if_modified(|current| {
                if *current != online {
                    tracing::info!(online, "connectivity changed");
                    *current = online;
                    true
                } else {
                    false
                }
            });

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(probe_interval) => {}
            }
        }
    }

    async fn probe(client: &reqwest::Client, url: &str) -> bool {
        match client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("connectivity probe failed: {e}");
                false
            }
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(w) = self.worker.get_mut().take() {
            w.token.cancel();
            w.handle.abort();
        }
    }
}
