//! Time handling for multi-temporal coverages.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time range `[start, end)` where either end may be unbounded.
///
/// Coverage slices carry one of these; catalog queries carry another. An
/// unbounded end (`None`) behaves like +/- infinity for intersection tests,
/// which is what climatological layers without an expiry date need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound; `None` = unbounded past.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound; `None` = unbounded future.
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Create a bounded range.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Range covering all of time.
    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Range with only a lower bound.
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Range with only an upper bound.
    pub fn until(end: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// True when a bounded start lies after a bounded end.
    pub fn is_inverted(&self) -> bool {
        match (self.start, self.end) {
            (Some(s), Some(e)) => s > e,
            _ => false,
        }
    }

    /// Check whether an instant falls inside `[start, end)`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t < e)
    }

    /// Check whether two half-open ranges overlap.
    pub fn intersects(&self, other: &TimeRange) -> bool {
        let starts_before_other_ends = match (self.start, other.end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        };
        let ends_after_other_starts = match (self.end, other.start) {
            (Some(e), Some(s)) => e > s,
            _ => true,
        };
        starts_before_other_ends && ends_after_other_starts
    }

    /// Midpoint of a bounded range, or whichever bound exists.
    ///
    /// Used by the selection comparator to score temporal proximity; a fully
    /// unbounded range has no usable midpoint.
    pub fn midpoint(&self) -> Option<DateTime<Utc>> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Some(s + (e - s) / 2),
            (Some(s), None) => Some(s),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        }
    }

    /// Parse an ISO-8601 instant, accepting date-only and zone-less forms.
    pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Ok(Utc.from_utc_datetime(&ndt));
        }

        if let Ok(ndt) =
            NaiveDateTime::parse_from_str(&format!("{}T00:00:00", s), "%Y-%m-%dT%H:%M:%S")
        {
            return Ok(Utc.from_utc_datetime(&ndt));
        }

        Err(TimeParseError::InvalidFormat(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        TimeRange::parse_instant(s).unwrap()
    }

    #[test]
    fn test_half_open_containment() {
        let r = TimeRange::new(t("2019-06-01T00:00:00Z"), t("2019-06-02T00:00:00Z"));
        assert!(r.contains(t("2019-06-01T00:00:00Z")));
        assert!(r.contains(t("2019-06-01T23:59:59Z")));
        assert!(!r.contains(t("2019-06-02T00:00:00Z")));
    }

    #[test]
    fn test_unbounded_intersection() {
        let bounded = TimeRange::new(t("2019-06-01T00:00:00Z"), t("2019-06-02T00:00:00Z"));
        assert!(TimeRange::unbounded().intersects(&bounded));
        assert!(TimeRange::since(t("2019-06-01T12:00:00Z")).intersects(&bounded));
        assert!(!TimeRange::until(t("2019-06-01T00:00:00Z")).intersects(&bounded));
    }

    #[test]
    fn test_inverted_detection() {
        let r = TimeRange::new(t("2019-06-02T00:00:00Z"), t("2019-06-01T00:00:00Z"));
        assert!(r.is_inverted());
        assert!(!TimeRange::unbounded().is_inverted());
    }

    #[test]
    fn test_midpoint() {
        let r = TimeRange::new(t("2019-06-01T00:00:00Z"), t("2019-06-03T00:00:00Z"));
        assert_eq!(r.midpoint(), Some(t("2019-06-02T00:00:00Z")));
        assert_eq!(TimeRange::unbounded().midpoint(), None);
    }

    #[test]
    fn test_parse_date_only() {
        assert_eq!(t("2019-06-01"), t("2019-06-01T00:00:00Z"));
    }
}
