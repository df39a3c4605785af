//! A single past/future window pair produced by the rolling iterator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used in period labels.
pub const LABEL_DATE_FORMAT: &str = "%Y-%m-%d";

/// One walk-forward step: an observable past window followed immediately by
/// the future window to predict. Both windows are closed on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RollPeriod {
    /// First day of the past window. `None` means the window reaches back to
    /// the earliest available history.
    pub past_start: Option<NaiveDate>,
    /// Last day of the past window (the day before `future_start`).
    pub past_end: NaiveDate,
    /// First day of the future window.
    pub future_start: NaiveDate,
    /// Last day of the future window.
    pub future_end: NaiveDate,
}

impl RollPeriod {
    /// Human-readable key of the future window (`"YYYY-MM-DD~YYYY-MM-DD"`),
    /// used to index result tables.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{}~{}",
            self.future_start.format(LABEL_DATE_FORMAT),
            self.future_end.format(LABEL_DATE_FORMAT)
        )
    }

    /// Label of the past window. Unbounded windows start with `...`.
    #[must_use]
    pub fn past_label(&self) -> String {
        let start = self.past_start.map_or_else(
            || "...".to_string(),
            |d| d.format(LABEL_DATE_FORMAT).to_string(),
        );
        format!("{start}~{}", self.past_end.format(LABEL_DATE_FORMAT))
    }

    /// Length of the past window in days, or `None` when unbounded.
    #[must_use]
    pub fn past_days(&self) -> Option<i64> {
        self.past_start
            .map(|start| (self.past_end - start).num_days() + 1)
    }

    /// Length of the future window in days.
    #[must_use]
    pub fn future_days(&self) -> i64 {
        (self.future_end - self.future_start).num_days() + 1
    }
}

impl std::fmt::Display for RollPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X: {} -> Y: {}", self.past_label(), self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, LABEL_DATE_FORMAT).unwrap()
    }

    #[test]
    fn labels_and_lengths() {
        let period = RollPeriod {
            past_start: Some(date("2018-01-01")),
            past_end: date("2018-01-04"),
            future_start: date("2018-01-05"),
            future_end: date("2018-01-11"),
        };
        assert_eq!(period.label(), "2018-01-05~2018-01-11");
        assert_eq!(period.past_label(), "2018-01-01~2018-01-04");
        assert_eq!(period.past_days(), Some(4));
        assert_eq!(period.future_days(), 7);
        assert_eq!(
            period.to_string(),
            "X: 2018-01-01~2018-01-04 -> Y: 2018-01-05~2018-01-11"
        );
    }

    #[test]
    fn unbounded_past_window() {
        let period = RollPeriod {
            past_start: None,
            past_end: date("2018-01-04"),
            future_start: date("2018-01-05"),
            future_end: date("2018-01-06"),
        };
        assert_eq!(period.past_days(), None);
        assert_eq!(period.past_label(), "...~2018-01-04");
    }
}
