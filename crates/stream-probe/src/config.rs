use std::{env, time::Duration};

use crate::candidates::MAX_CANDIDATES;

/// Lightweight checks never get less than this, however the timeout is configured.
pub const MIN_LIGHT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Probes in flight at once.
    pub concurrency: usize,
    /// Budget for one deep-probe decode. A candidate spends this on top of its Tier 1
    /// requests, each of which is bounded by `light_timeout` alone.
    pub probe_timeout: Duration,
    /// Per-attempt budget for Tier 1 checks.
    pub light_timeout: Duration,
    pub max_candidates: usize,
    pub deep_probe_bin: String,
    /// Seconds of media the deep probe reads.
    pub deep_probe_secs: u64,
    pub version_check_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            probe_timeout: Duration::from_millis(7000),
            light_timeout: Duration::from_millis(3000),
            max_candidates: MAX_CANDIDATES,
            deep_probe_bin: "ffmpeg".to_string(),
            deep_probe_secs: 3,
            version_check_timeout: Duration::from_millis(2000),
        }
    }
}

impl ProbeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let concurrency = env::var("PROBE_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.concurrency);

        let probe_timeout_ms = env::var("PROBE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(7000);

        let light_timeout_ms = env::var("PROBE_LIGHT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3000);

        let max_candidates = env::var("PROBE_MAX_CANDIDATES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.max_candidates);

        let deep_probe_bin = env::var("DEEP_PROBE_BIN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.deep_probe_bin);

        let deep_probe_secs = env::var("DEEP_PROBE_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.deep_probe_secs);

        let version_timeout_ms = env::var("DEEP_PROBE_VERSION_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(2000);

        Self {
            concurrency,
            probe_timeout: Duration::from_millis(probe_timeout_ms),
            light_timeout: Duration::from_millis(light_timeout_ms),
            max_candidates,
            deep_probe_bin,
            deep_probe_secs,
            version_check_timeout: Duration::from_millis(version_timeout_ms),
        }
        .normalized()
    }

    /// Clamp values into their working ranges.
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.max_candidates = self.max_candidates.clamp(1, MAX_CANDIDATES);
        self.probe_timeout = self.probe_timeout.max(MIN_LIGHT_TIMEOUT);
        self.light_timeout = self
            .light_timeout
            .min(self.probe_timeout)
            .max(MIN_LIGHT_TIMEOUT);
        self.deep_probe_secs = self.deep_probe_secs.max(1);
        self
    }
}
