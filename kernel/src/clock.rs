// Clock
//
// Source of the ISO-8601 UTC timestamps stamped on versions,
// asset uploads and rendition uploads.

use chrono::{SecondsFormat, Utc};

/// Produces the "current time" used by manifest operations.
///
/// Injected everywhere a timestamp is assigned so that callers
/// (and tests) can make version histories deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> String;
}

/// Wall clock, e.g. `2018-08-05T22:33:49.795151Z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedClock(pub String);

impl FixedClock {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self(timestamp.into())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> String {
        self.0.clone()
    }
}
