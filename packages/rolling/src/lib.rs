#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Walk-forward date windows.
//!
//! [`RollingConfig`] turns a date span, a step size and window lengths into
//! a gap-free sequence of [`RollPeriod`]s. Each period pairs an observable
//! past window with the immediately following future window, so a model
//! trained on the past never sees the days it is evaluated on.
//!
//! All windows are closed ranges of whole days: a window of `n` days starting
//! on `d` ends on `d + n - 1`.

pub mod period;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub use period::RollPeriod;

/// Default length of the future window, in days.
pub const DEFAULT_FUTURE_WINDOW_DAYS: u32 = 7;

/// Errors raised while generating periods.
#[derive(Debug, Error)]
pub enum RollingError {
    /// The rolling parameters are invalid or under-specified.
    #[error("Rolling configuration error: {message}")]
    Configuration {
        /// Description of what is wrong.
        message: String,
    },
}

impl RollingError {
    fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Order in which periods are reported.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    /// Oldest period first; anchored on the start date.
    #[default]
    Forward,
    /// Newest period first; anchored on the end date.
    Backward,
}

/// Rolling parameters.
///
/// Construction never validates; an under-specified configuration is
/// reported by [`Self::validate`] when periods are requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingConfig {
    /// Days the cursor advances per step.
    pub step_days: u32,
    /// First day of the rolling span.
    #[serde(default)]
    pub start: Option<NaiveDate>,
    /// Last day of the rolling span.
    #[serde(default)]
    pub end: Option<NaiveDate>,
    /// Number of steps used to derive a missing start or end date.
    #[serde(default)]
    pub step_count: Option<u32>,
    /// Length of the observable past. `None` reaches back to the earliest
    /// available history.
    #[serde(default)]
    pub past_window_days: Option<u32>,
    /// Length of the window to predict.
    #[serde(default = "default_future_window_days")]
    pub future_window_days: u32,
    /// Reporting order.
    #[serde(default)]
    pub direction: Direction,
}

const fn default_future_window_days() -> u32 {
    DEFAULT_FUTURE_WINDOW_DAYS
}

impl RollingConfig {
    /// Creates a configuration with the given step and defaults everywhere
    /// else (no bounds, unbounded past, 7-day future, forward).
    #[must_use]
    pub const fn new(step_days: u32) -> Self {
        Self {
            step_days,
            start: None,
            end: None,
            step_count: None,
            past_window_days: None,
            future_window_days: DEFAULT_FUTURE_WINDOW_DAYS,
            direction: Direction::Forward,
        }
    }

    /// Sets the start of the rolling span.
    #[must_use]
    pub const fn with_start(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    /// Sets the end of the rolling span.
    #[must_use]
    pub const fn with_end(mut self, end: NaiveDate) -> Self {
        self.end = Some(end);
        self
    }

    /// Sets the step count used to derive a missing bound.
    #[must_use]
    pub const fn with_step_count(mut self, step_count: u32) -> Self {
        self.step_count = Some(step_count);
        self
    }

    /// Fixes the past window length.
    #[must_use]
    pub const fn with_past_window(mut self, days: u32) -> Self {
        self.past_window_days = Some(days);
        self
    }

    /// Sets the future window length.
    #[must_use]
    pub const fn with_future_window(mut self, days: u32) -> Self {
        self.future_window_days = days;
        self
    }

    /// Sets the reporting direction.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Checks that the parameters are complete and consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::Configuration`] describing the first problem
    /// found.
    pub fn validate(&self) -> Result<(), RollingError> {
        if self.step_days == 0 {
            return Err(RollingError::config("step_days must be > 0"));
        }
        if self.future_window_days == 0 {
            return Err(RollingError::config("future_window_days must be > 0"));
        }
        if self.past_window_days == Some(0) {
            return Err(RollingError::config(
                "past_window_days must be > 0 (omit it for an unbounded past)",
            ));
        }

        match self.direction {
            Direction::Forward => {
                if self.start.is_none() {
                    return Err(RollingError::config(
                        "rolling forward requires a start date",
                    ));
                }
                if self.end.is_none() && self.step_count.is_none() {
                    return Err(RollingError::config(
                        "rolling forward requires an end date or a step count",
                    ));
                }
            }
            Direction::Backward => {
                if self.end.is_none() {
                    return Err(RollingError::config(
                        "rolling backward requires an end date",
                    ));
                }
                if self.start.is_none() && self.step_count.is_none() {
                    return Err(RollingError::config(
                        "rolling backward requires a start date or a step count",
                    ));
                }
            }
        }

        let (start, end) = self.resolved_span()?;
        if end < start {
            return Err(RollingError::config(format!(
                "end date {end} is before start date {start}"
            )));
        }

        Ok(())
    }

    /// Whether [`Self::validate`] succeeds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Resolves the `[start, end]` span, deriving a missing bound from the
    /// step count.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::Configuration`] if neither bound can be
    /// resolved or the derived date is out of range.
    pub fn resolved_span(&self) -> Result<(NaiveDate, NaiveDate), RollingError> {
        let derived_days = || {
            self.step_count
                .map(|count| u64::from(count) * u64::from(self.step_days))
        };

        match (self.start, self.end) {
            (Some(start), Some(end)) => Ok((start, end)),
            (Some(start), None) => {
                let days = derived_days()
                    .ok_or_else(|| RollingError::config("no end date and no step count"))?;
                Ok((start, add_days(start, days)?))
            }
            (None, Some(end)) => {
                let days = derived_days()
                    .ok_or_else(|| RollingError::config("no start date and no step count"))?;
                let start = end
                    .checked_sub_days(Days::new(days))
                    .ok_or_else(|| RollingError::config("derived start date out of range"))?;
                Ok((start, end))
            }
            (None, None) => Err(RollingError::config(
                "at least one of start or end date is required",
            )),
        }
    }

    /// Number of whole steps in the span. Uses the configured count unless
    /// both bounds are given, in which case it is derived from them.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::Configuration`] if the configuration is
    /// invalid.
    pub fn step_count(&self) -> Result<u32, RollingError> {
        self.validate()?;
        if let (Some(start), Some(end)) = (self.start, self.end) {
            let days = u64::try_from((end - start).num_days()).unwrap_or(0);
            return Ok(u32::try_from(days / u64::from(self.step_days)).unwrap_or(u32::MAX));
        }
        Ok(self.step_count.unwrap_or(0))
    }

    /// Generates every period whose future window fits inside the span.
    ///
    /// Forward configurations report the periods oldest first, backward
    /// configurations newest first. Both directions produce the same set.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::Configuration`] if the configuration is
    /// invalid.
    pub fn periods(&self) -> Result<Vec<RollPeriod>, RollingError> {
        let mut periods = self.periods_chronological()?;
        if self.direction == Direction::Backward {
            periods.reverse();
        }
        Ok(periods)
    }

    /// Generates the periods oldest first, whatever the direction.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::Configuration`] if the configuration is
    /// invalid.
    pub fn periods_chronological(&self) -> Result<Vec<RollPeriod>, RollingError> {
        self.validate()?;
        let (start, end) = self.resolved_span()?;
        let step = u64::from(self.step_days);
        let future = u64::from(self.future_window_days);

        let mut periods = Vec::new();
        let mut cursor = start;

        loop {
            let (past_start, past_end, future_start) = match self.past_window_days {
                Some(past) => {
                    let past_end = add_days(cursor, u64::from(past) - 1)?;
                    (Some(cursor), past_end, add_days(past_end, 1)?)
                }
                None => {
                    let past_end = cursor
                        .checked_sub_days(Days::new(1))
                        .ok_or_else(|| RollingError::config("past window out of range"))?;
                    (None, past_end, cursor)
                }
            };
            let future_end = add_days(future_start, future - 1)?;

            if future_end > end {
                break;
            }

            periods.push(RollPeriod {
                past_start,
                past_end,
                future_start,
                future_end,
            });
            cursor = add_days(cursor, step)?;
        }

        log::debug!(
            "Generated {} period(s) over {start}~{end} (step={}d, past={:?}, future={}d)",
            periods.len(),
            self.step_days,
            self.past_window_days,
            self.future_window_days,
        );

        Ok(periods)
    }

    /// The chronologically last period, regardless of direction. This is
    /// what a single (non-stacked) training run consumes.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::Configuration`] if the configuration is
    /// invalid.
    pub fn most_recent_period(&self) -> Result<Option<RollPeriod>, RollingError> {
        Ok(self.periods_chronological()?.last().copied())
    }
}

impl std::fmt::Display for RollingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |d: Option<NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
        writeln!(f, "Rolling:")?;
        writeln!(f, "\t- step_days: {}", self.step_days)?;
        writeln!(f, "\t- start: {}", show(self.start))?;
        writeln!(f, "\t- end: {}", show(self.end))?;
        writeln!(
            f,
            "\t- step_count: {}",
            self.step_count
                .map_or_else(|| "-".to_string(), |c| c.to_string())
        )?;
        writeln!(
            f,
            "\t- past_window_days: {}",
            self.past_window_days
                .map_or_else(|| "unbounded".to_string(), |d| d.to_string())
        )?;
        writeln!(f, "\t- future_window_days: {}", self.future_window_days)?;
        write!(f, "\t- direction: {}", self.direction)
    }
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate, RollingError> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| RollingError::config(format!("{date} + {days} days is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn labels(periods: &[RollPeriod]) -> Vec<String> {
        periods.iter().map(RollPeriod::label).collect()
    }

    #[test]
    fn fixed_past_window_going_forward() {
        let config = RollingConfig::new(8)
            .with_start(date("2018-01-01"))
            .with_end(date("2018-02-01"))
            .with_past_window(4);

        let periods = config.periods().unwrap();
        assert_eq!(
            labels(&periods),
            vec![
                "2018-01-05~2018-01-11",
                "2018-01-13~2018-01-19",
                "2018-01-21~2018-01-27",
            ]
        );
        assert_eq!(periods[0].past_start, Some(date("2018-01-01")));
        assert_eq!(periods[0].past_end, date("2018-01-04"));
    }

    #[test]
    fn periods_are_contiguous_and_never_overlap() {
        for step in [1, 2, 5, 7, 8] {
            for past in [None, Some(1), Some(4), Some(30)] {
                for future in [1, 2, 7] {
                    let mut config = RollingConfig::new(step)
                        .with_start(date("2018-01-01"))
                        .with_end(date("2018-04-30"))
                        .with_future_window(future);
                    config.past_window_days = past;

                    let periods = config.periods().unwrap();
                    assert!(!periods.is_empty(), "no periods for {config}");

                    for p in &periods {
                        assert_eq!(p.future_days(), i64::from(future));
                        assert_eq!(p.past_days(), past.map(i64::from));
                        assert_eq!(p.future_start, p.past_end.succ_opt().unwrap());
                        assert!(p.future_end <= date("2018-04-30"));
                    }

                    for pair in periods.windows(2) {
                        let advance = chrono::Duration::days(i64::from(step));
                        assert_eq!(pair[1].future_start, pair[0].future_start + advance);
                        if let (Some(a), Some(b)) = (pair[0].past_start, pair[1].past_start) {
                            assert_eq!(b, a + advance);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn backward_is_the_same_set_reversed() {
        let forward = RollingConfig::new(3)
            .with_start(date("2018-01-01"))
            .with_end(date("2018-03-01"))
            .with_past_window(10)
            .with_future_window(2);
        let backward = forward.clone().with_direction(Direction::Backward);

        let f = forward.periods().unwrap();
        let mut b = backward.periods().unwrap();
        assert!(b.first().unwrap().future_start > b.last().unwrap().future_start);

        b.reverse();
        assert_eq!(f, b);
    }

    #[test]
    fn most_recent_period_ignores_direction() {
        let forward = RollingConfig::new(5)
            .with_start(date("2018-01-01"))
            .with_end(date("2018-02-01"))
            .with_past_window(7);
        let backward = forward.clone().with_direction(Direction::Backward);

        let a = forward.most_recent_period().unwrap().unwrap();
        let b = backward.most_recent_period().unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, *forward.periods().unwrap().last().unwrap());
        assert_eq!(a, *backward.periods().unwrap().first().unwrap());
    }

    #[test]
    fn span_equal_to_future_window_yields_one_unbounded_period() {
        let config = RollingConfig::new(1)
            .with_start(date("2018-01-01"))
            .with_end(date("2018-01-07"));

        let periods = config.periods().unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].past_start, None);
        assert_eq!(periods[0].past_end, date("2017-12-31"));
        assert_eq!(periods[0].label(), "2018-01-01~2018-01-07");
    }

    #[test]
    fn span_shorter_than_future_window_yields_nothing() {
        let config = RollingConfig::new(1)
            .with_start(date("2018-01-01"))
            .with_end(date("2018-01-06"));
        assert!(config.periods().unwrap().is_empty());
        assert_eq!(config.most_recent_period().unwrap(), None);
    }

    #[test]
    fn missing_bound_is_derived_from_step_count() {
        let forward = RollingConfig::new(7)
            .with_start(date("2018-01-01"))
            .with_step_count(4);
        assert_eq!(
            forward.resolved_span().unwrap(),
            (date("2018-01-01"), date("2018-01-29"))
        );

        let backward = RollingConfig::new(7)
            .with_end(date("2018-01-29"))
            .with_step_count(4)
            .with_direction(Direction::Backward);
        assert_eq!(
            backward.resolved_span().unwrap(),
            (date("2018-01-01"), date("2018-01-29"))
        );
        assert_eq!(
            labels(&forward.periods_chronological().unwrap()),
            labels(&backward.periods_chronological().unwrap())
        );
    }

    #[test]
    fn step_count_is_derived_when_both_bounds_are_given() {
        let config = RollingConfig::new(7)
            .with_start(date("2018-01-01"))
            .with_end(date("2018-01-31"))
            .with_step_count(100);
        assert_eq!(config.step_count().unwrap(), 4);
    }

    #[test]
    fn invalid_configurations_fail_when_periods_are_requested() {
        let no_bounds = RollingConfig::new(5);
        assert!(!no_bounds.is_valid());
        assert!(matches!(
            no_bounds.periods(),
            Err(RollingError::Configuration { .. })
        ));

        let zero_step = RollingConfig::new(0)
            .with_start(date("2018-01-01"))
            .with_end(date("2018-02-01"));
        assert!(zero_step.periods().is_err());

        let forward_without_end = RollingConfig::new(1).with_start(date("2018-01-01"));
        assert!(forward_without_end.periods().is_err());

        let backward_without_end = RollingConfig::new(1)
            .with_start(date("2018-01-01"))
            .with_step_count(3)
            .with_direction(Direction::Backward);
        assert!(backward_without_end.periods().is_err());

        let inverted = RollingConfig::new(1)
            .with_start(date("2018-02-01"))
            .with_end(date("2018-01-01"));
        assert!(inverted.periods().is_err());
    }

    #[test]
    fn deserializes_from_toml() {
        let config: RollingConfig = toml::from_str(
            r#"
            step_days = 7
            start = "2016-07-01"
            end = "2017-06-30"
            past_window_days = 60
            direction = "backward"
            "#,
        )
        .unwrap();
        assert_eq!(config.future_window_days, DEFAULT_FUTURE_WINDOW_DAYS);
        assert_eq!(config.direction, Direction::Backward);
        assert_eq!(config.past_window_days, Some(60));
        assert!(config.is_valid());
    }

    #[test]
    fn direction_parses_with_strum() {
        assert_eq!("backward".parse::<Direction>().unwrap(), Direction::Backward);
        assert_eq!(Direction::Forward.to_string(), "forward");
    }
}
