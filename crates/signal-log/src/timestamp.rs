//! Per-signal timestamp monotonicity
//!
//! Every signal's timestamps must strictly increase, or be non-decreasing
//! when equal timestamps are allowed. The writer checks before appending;
//! the reader re-checks while iterating a range.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{LogError, Result};

/// Check that `new` may follow `previous` for `signal`
pub fn check_order(signal: &str, previous: Option<f64>, new: f64, allow_delta0: bool) -> Result<()> {
    let Some(old) = previous else {
        return Ok(());
    };
    let delta = new - old;
    if delta < 0.0 || (delta == 0.0 && !allow_delta0) {
        return Err(LogError::TimestampOrder {
            signal: signal.to_string(),
            old,
            new,
            delta,
        });
    }
    Ok(())
}

/// Last accepted timestamp per signal
#[derive(Debug, Clone, Default)]
pub struct TimestampValidator {
    allow_delta0: bool,
    last: HashMap<String, f64>,
}

impl TimestampValidator {
    pub fn new(allow_delta0: bool) -> Self {
        Self {
            allow_delta0,
            last: HashMap::new(),
        }
    }

    /// Validate one timestamp without recording it
    pub fn check(&self, signal: &str, timestamp: f64) -> Result<()> {
        check_order(signal, self.last(signal), timestamp, self.allow_delta0)
    }

    /// Validate a run of timestamps as if each were appended in turn
    pub fn check_all(&self, signal: &str, timestamps: &[f64]) -> Result<()> {
        let mut previous = self.last(signal);
        for &timestamp in timestamps {
            check_order(signal, previous, timestamp, self.allow_delta0)?;
            previous = Some(timestamp);
        }
        Ok(())
    }

    /// Record an accepted timestamp
    pub fn record(&mut self, signal: &str, timestamp: f64) {
        trace!(signal, timestamp, "Recorded timestamp");
        match self.last.get_mut(signal) {
            Some(last) => *last = timestamp,
            None => {
                self.last.insert(signal.to_string(), timestamp);
            }
        }
    }

    pub fn last(&self, signal: &str) -> Option<f64> {
        self.last.get(signal).copied()
    }

    pub fn allow_delta0(&self) -> bool {
        self.allow_delta0
    }
}

/// Running check over one signal's rows
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampTrack {
    last: Option<f64>,
}

impl TimestampTrack {
    /// Accept `timestamp` if it may follow the last accepted one
    pub fn advance(&mut self, signal: &str, timestamp: f64, allow_delta0: bool) -> Result<()> {
        check_order(signal, self.last, timestamp, allow_delta0)?;
        self.last = Some(timestamp);
        Ok(())
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}
