use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::warn;

/// How often a repeating advisory failure is logged.
pub const ADVISORY_LOG_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    opened_at: Instant,
    suppressed: u64,
}

static WINDOWS: OnceLock<Mutex<HashMap<&'static str, Window>>> = OnceLock::new();

/// Returns `Some(suppressed_count)` when an event for `key` should be logged now,
/// otherwise counts it as suppressed for the current window and returns `None`.
pub fn should_emit(key: &'static str, interval: Duration) -> Option<u64> {
    let mut windows = WINDOWS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let now = Instant::now();

    let Some(window) = windows.get_mut(key) else {
        windows.insert(
            key,
            Window {
                opened_at: now,
                suppressed: 0,
            },
        );
        return Some(0);
    };
    if now.duration_since(window.opened_at) >= interval {
        let suppressed = window.suppressed;
        window.opened_at = now;
        window.suppressed = 0;
        Some(suppressed)
    } else {
        window.suppressed += 1;
        None
    }
}

/// Logs the failure of a best-effort side channel, at most once per window per key.
pub fn advisory_failure(key: &'static str, error: &dyn std::fmt::Display) {
    if let Some(suppressed_count) = should_emit(key, ADVISORY_LOG_WINDOW) {
        warn!(
            event_name = key,
            event_domain = "advisory",
            suppressed_count,
            "best-effort operation failed: {}",
            error
        );
    }
}
