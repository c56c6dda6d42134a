//! Application state shared by every screen.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use studio_core::{GeminiLiveConnector, GeminiService, VoiceEngine};

use crate::settings::{save_settings, AppSettings};

#[cfg(feature = "audio-cpal")]
pub type Backend = studio_core::CpalBackend;
#[cfg(not(feature = "audio-cpal"))]
pub type Backend = studio_core::HeadlessBackend;

pub type Engine = VoiceEngine<Backend, GeminiLiveConnector>;

pub struct AppState {
    /// Blocking provider client. Call through `commands`, which moves calls
    /// onto the blocking pool.
    pub service: Arc<GeminiService>,
    /// Live voice sessions. Passed explicitly, never global.
    pub engine: Arc<Engine>,
    /// Persisted app settings cache.
    pub settings: Arc<Mutex<AppSettings>>,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    /// Provider call counts and latency.
    pub request_stats: Arc<Mutex<RequestStats>>,
}

impl AppState {
    pub fn new(settings: AppSettings, settings_path: PathBuf) -> anyhow::Result<Self> {
        let service = GeminiService::new(settings.service_config())?;
        let engine = VoiceEngine::new(
            Backend::default(),
            GeminiLiveConnector,
            settings.live_config(),
        );
        Ok(Self {
            service: Arc::new(service),
            engine: Arc::new(engine),
            settings: Arc::new(Mutex::new(settings)),
            settings_path,
            request_stats: Arc::new(Mutex::new(RequestStats::default())),
        })
    }

    /// Apply `change` to the cached settings, normalise and persist them.
    pub fn update_settings(&self, change: impl FnOnce(&mut AppSettings)) -> std::io::Result<AppSettings> {
        let mut settings = self.settings.lock();
        change(&mut settings);
        settings.normalize();
        save_settings(&self.settings_path, &settings)?;
        Ok(settings.clone())
    }

    pub fn request_summary(&self) -> BTreeMap<&'static str, LatencySummary> {
        self.request_stats.lock().summary()
    }
}

/// Recent calls kept per operation for the percentiles.
const RECENT_CALLS: usize = 32;

/// What the console reports for one provider operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub calls: u64,
    pub failures: u64,
    pub last_ms: f64,
    /// Over the recent calls only.
    pub median_ms: f64,
    pub p95_ms: f64,
    pub slowest_ms: f64,
}

/// Per-operation call counts and latencies, fed by every provider request.
#[derive(Debug, Default)]
pub struct RequestStats {
    operations: BTreeMap<&'static str, OperationLatency>,
}

impl RequestStats {
    pub fn record(&mut self, operation: &'static str, elapsed: Duration, succeeded: bool) {
        self.operations
            .entry(operation)
            .or_default()
            .push(elapsed, succeeded);
    }

    pub fn summary(&self) -> BTreeMap<&'static str, LatencySummary> {
        self.operations
            .iter()
            .map(|(name, latency)| (*name, latency.summary()))
            .collect()
    }
}

#[derive(Debug, Default)]
struct OperationLatency {
    recent_ms: VecDeque<f64>,
    calls: u64,
    failures: u64,
}

impl OperationLatency {
    fn push(&mut self, elapsed: Duration, succeeded: bool) {
        if self.recent_ms.len() == RECENT_CALLS {
            self.recent_ms.pop_front();
        }
        self.recent_ms.push_back(elapsed.as_nanos() as f64 / 1e6);
        self.calls += 1;
        if !succeeded {
            self.failures += 1;
        }
    }

    fn summary(&self) -> LatencySummary {
        let mut sorted: Vec<f64> = self.recent_ms.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        LatencySummary {
            calls: self.calls,
            failures: self.failures,
            last_ms: self.recent_ms.back().copied().unwrap_or_default(),
            median_ms: nearest_rank(&sorted, 50),
            p95_ms: nearest_rank(&sorted, 95),
            slowest_ms: sorted.last().copied().unwrap_or_default(),
        }
    }
}

/// Nearest-rank percentile of an ascending slice; 0 when empty.
fn nearest_rank(sorted: &[f64], percent: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (percent * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn summary_counts_calls_and_failures() {
        let mut stats = RequestStats::default();
        for n in [40, 10, 30, 20] {
            stats.record("chat", ms(n), true);
        }
        stats.record("chat", ms(900), false);

        let chat = stats.summary()["chat"];
        assert_eq!(chat.calls, 5);
        assert_eq!(chat.failures, 1);
        assert_eq!(chat.last_ms, 900.0);
        assert_eq!(chat.median_ms, 30.0);
        assert_eq!(chat.p95_ms, 900.0);
        assert_eq!(chat.slowest_ms, 900.0);
        assert!(!stats.summary().contains_key("speak"));
    }

    #[test]
    fn percentiles_follow_recent_calls_only() {
        let mut stats = RequestStats::default();
        for _ in 0..RECENT_CALLS {
            stats.record("image.generate", ms(5_000), true);
        }
        for _ in 0..RECENT_CALLS {
            stats.record("image.generate", ms(2), true);
        }

        let image = stats.summary()["image.generate"];
        assert_eq!(image.calls, 2 * RECENT_CALLS as u64);
        assert_eq!(image.p95_ms, 2.0);
        assert_eq!(image.slowest_ms, 2.0);
    }

    #[test]
    fn nearest_rank_edges() {
        assert_eq!(nearest_rank(&[], 95), 0.0);
        assert_eq!(nearest_rank(&[7.0], 50), 7.0);
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0, 4.0], 50), 2.0);
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0, 4.0], 95), 4.0);
    }

    #[test]
    fn update_settings_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let state = AppState::new(AppSettings::default(), path.clone()).unwrap();

        let updated = state
            .update_settings(|s| s.live_voice = "charon".into())
            .unwrap();
        assert_eq!(updated.live_voice, "Charon");
        assert_eq!(crate::settings::load_settings(&path).live_voice, "Charon");
    }
}
