//! Wall-clock profile of a run
//!
//! Seeded from the descriptor's `profile` object and written verbatim into
//! the output metadata, with one entry per stage in seconds.

use serde_json::{Map, Value};
use std::time::Instant;

/// Current wall-clock time as fractional Unix seconds
pub fn unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

#[derive(Debug, Clone, Default)]
pub struct RunProfile {
    entries: Map<String, Value>,
    latch: Option<f64>,
}

impl RunProfile {
    /// `latch` is the Unix time the surrounding job started, if known
    pub fn new(entries: Map<String, Value>, latch: Option<f64>) -> Self {
        Self { entries, latch }
    }

    pub fn record(&mut self, key: &str, seconds: f64) {
        self.entries.insert(key.to_string(), Value::from(seconds));
    }

    /// Run `f` and record its duration under `key`
    pub fn time<T>(&mut self, key: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        let elapsed = start.elapsed().as_secs_f64();
        log::debug!("{} took {:.3} s", key, elapsed);
        self.record(key, elapsed);
        out
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(Value::as_f64)
    }

    /// Record `total_duration` since the latch
    pub fn finish(&mut self) {
        if let Some(latch) = self.latch {
            let total = unix_seconds() - latch;
            log::info!("Total duration is {:.3} seconds", total);
            self.record("total_duration", total);
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_keeps_seed_entries() {
        let mut seed = Map::new();
        seed.insert("atl03_duration".to_string(), Value::from(4.5));
        let mut profile = RunProfile::new(seed, Some(unix_seconds() - 2.0));

        let n = profile.time("cshelph", || 7);
        assert_eq!(n, 7);
        profile.finish();

        assert_eq!(profile.get("atl03_duration"), Some(4.5));
        assert!(profile.get("cshelph").unwrap() >= 0.0);
        assert!(profile.get("total_duration").unwrap() >= 2.0);
        assert!(profile.to_json().get("cshelph").is_some());
    }

    #[test]
    fn test_no_latch_no_total() {
        let mut profile = RunProfile::default();
        profile.finish();
        assert!(profile.get("total_duration").is_none());
    }
}
