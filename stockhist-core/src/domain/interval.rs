//! Bar sampling granularity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sampling interval of a price series.
///
/// The canonical code (`1d`, `1wk`, `1m`) is what the durable store keys on.
/// Providers translate it to their own wire codes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    #[default]
    Day,
    Week,
    Month,
}

impl Interval {
    pub const ALL: [Interval; 3] = [Interval::Day, Interval::Week, Interval::Month];

    /// Map a human label or native code to an interval.
    ///
    /// Unrecognized labels fall back to [`Interval::Day`]; the second element
    /// of the tuple is `false` when that fallback was taken.
    pub fn normalize(label: &str) -> (Self, bool) {
        match Self::from_label(label) {
            Some(interval) => (interval, true),
            None => (Interval::Day, false),
        }
    }

    /// Strict lookup; `None` for anything unrecognized.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" | "1d" => Some(Interval::Day),
            "week" | "weekly" | "1wk" => Some(Interval::Week),
            "month" | "monthly" | "1m" | "1mo" => Some(Interval::Month),
            _ => None,
        }
    }

    /// Canonical storage code.
    pub fn code(self) -> &'static str {
        match self {
            Interval::Day => "1d",
            Interval::Week => "1wk",
            Interval::Month => "1m",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
