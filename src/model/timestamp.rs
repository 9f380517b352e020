use std::fmt;

use chrono::{DateTime, Utc};

/// Fixed-width wall-clock form; textual order equals chronological order.
const WALL_CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Signed nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_secs(secs: i64, nanos: u32) -> Self {
        Self(secs.saturating_mul(1_000_000_000).saturating_add(i64::from(nanos)))
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }

    /// Human-readable UTC form stored in `dt` columns.
    pub fn wall_clock(self) -> String {
        self.to_datetime().format(WALL_CLOCK_FORMAT).to_string()
    }
}

impl From<i64> for Timestamp {
    fn from(nanos: i64) -> Self {
        Self(nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wall_clock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_is_fixed_width() {
        assert_eq!(Timestamp::from_nanos(0).wall_clock(), "1970-01-01 00:00:00.000000000");
        assert_eq!(
            Timestamp::from_secs(1, 5).wall_clock(),
            "1970-01-01 00:00:01.000000005"
        );
    }

    #[test]
    fn test_textual_order_matches_chronological() {
        let early = Timestamp::from_secs(9, 900_000_000).wall_clock();
        let late = Timestamp::from_secs(10, 0).wall_clock();
        assert!(early < late);
    }

    #[test]
    fn test_negative_nanos_before_epoch() {
        let ts = Timestamp::from_nanos(-1);
        assert_eq!(ts.wall_clock(), "1969-12-31 23:59:59.999999999");
    }
}
