//! types/heartrate.rs
//!
//! Defines the Reading struct: one heart rate sample together with the
//! wall-clock time (milliseconds since the Unix epoch) it was captured at.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Heart rate sample
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Beats per minute as reported by the sensor.
    pub value: f32,
    /// Capture time in milliseconds since the Unix epoch.
    pub captured_at_millis: i64,
}

impl Reading {
    pub fn new(value: f32, captured_at_millis: i64) -> Self {
        Self {
            value,
            captured_at_millis,
        }
    }

    /// Stamp a sample with the current wall-clock time.
    pub fn now(value: f32) -> Self {
        Self::new(value, now_millis())
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_stamps_current_time() {
        let before = now_millis();
        let reading = Reading::now(64.0);
        let after = now_millis();
        assert!(reading.captured_at_millis >= before);
        assert!(reading.captured_at_millis <= after);
        assert_eq!(reading.value, 64.0);
    }
}
