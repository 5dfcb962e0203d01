//! Event time and query ranges.

/// Event time in milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Inclusive `[start, end]` range used to constrain dependency queries.
///
/// ```rust
/// use meshtopo_types::TimeRange;
///
/// let range = TimeRange::new(1_000, 2_000);
/// assert!(range.overlaps(Some(1_500), Some(3_000)));
/// assert!(!range.overlaps(Some(2_001), Some(2_500)));
/// assert!(TimeRange::new(5, 1).is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    /// Unbounded range; disables time filtering.
    pub const ALL: TimeRange = TimeRange {
        start: Timestamp::MIN,
        end: Timestamp::MAX,
    };

    pub const fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Build a range from query parameters where `0` on both ends means "no constraint".
    pub fn from_query(start: Timestamp, end: Timestamp) -> Self {
        if start == 0 && end == 0 {
            Self::ALL
        } else {
            Self::new(start, end)
        }
    }

    /// A range whose start lies after its end selects nothing.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn is_unbounded(&self) -> bool {
        *self == Self::ALL
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Whether an observed interval `[first, last]` intersects this range.
    ///
    /// Entities with no recorded observation time are always visible.
    pub fn overlaps(&self, first: Option<Timestamp>, last: Option<Timestamp>) -> bool {
        if self.is_empty() {
            return false;
        }
        match (first, last) {
            (None, None) => true,
            (Some(first), None) => first <= self.end,
            (None, Some(last)) => last >= self.start,
            (Some(first), Some(last)) => first <= self.end && last >= self.start,
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::ALL
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_query_is_unbounded() {
        assert!(TimeRange::from_query(0, 0).is_unbounded());
        assert!(!TimeRange::from_query(0, 10).is_unbounded());
    }

    #[test]
    fn test_empty_range_overlaps_nothing() {
        let range = TimeRange::new(10, 5);
        assert!(!range.overlaps(None, None));
        assert!(!range.contains(7));
    }

    #[test]
    fn test_half_open_observations() {
        let range = TimeRange::new(100, 200);
        assert!(range.overlaps(Some(150), None));
        assert!(!range.overlaps(Some(250), None));
        assert!(range.overlaps(None, Some(100)));
        assert!(!range.overlaps(None, Some(99)));
    }
}
