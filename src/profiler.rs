//! Per-task timing accumulation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One row of the profiling report.
#[derive(Clone, Debug)]
pub struct ProfileEntry {
    pub name: String,
    pub calls: u64,
    pub total: Duration,
}

/// Accumulates wall-clock time per task name.
///
/// Workers record every `process`/`generate`/`consume` invocation when the
/// profiler is enabled; disabled profilers cost one branch per call.
#[derive(Debug, Default)]
pub struct Profiler {
    enabled: bool,
    samples: Mutex<HashMap<String, (u64, Duration)>>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Profiler {
        Profiler {
            enabled,
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Enabled iff `ENGINE_PROFILE` is set and non-empty.
    pub fn from_env() -> Profiler {
        let enabled = std::env::var("ENGINE_PROFILE").map(|v| !v.is_empty()).unwrap_or(false);
        Profiler::new(enabled)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, name: &str, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let mut samples = self.samples.lock().unwrap();
        let entry = samples.entry(name.to_string()).or_insert((0, Duration::ZERO));
        entry.0 += 1;
        entry.1 += elapsed;
    }

    /// Accumulated entries, heaviest first.
    pub fn report(&self) -> Vec<ProfileEntry> {
        let samples = self.samples.lock().unwrap();
        let mut entries: Vec<ProfileEntry> = samples
            .iter()
            .map(|(name, &(calls, total))| ProfileEntry {
                name: name.clone(),
                calls,
                total,
            })
            .collect();
        entries.sort_by(|a, b| b.total.cmp(&a.total));
        entries
    }
}
