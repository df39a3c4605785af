#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial risk estimators.
//!
//! Every estimator is fit on past events ending at an `as_of` date and then
//! scores arbitrary query coordinates (usually spatial unit centroids). The
//! scores are relative: only their ordering matters to the rank metrics.
//!
//! * [`KernelDensity`] smooths one event stream with a Gaussian kernel.
//! * [`Bower`] sums distance- and age-decayed contributions of nearby
//!   events (prospective hot-spotting).
//! * [`RiskTerrain`] builds one density layer per feature stream and adds up
//!   their standard-deviation bins.
//!
//! The variant is picked once from an [`EstimatorConfig`] and used through
//! the [`RiskEstimator`] trait.

pub mod bower;
pub mod kde;
pub mod rtm;

use chrono::NaiveDate;
use crime_risk_event_models::{Coordinate, EventStream, EventStreams};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bower::Bower;
pub use kde::{BandwidthSearch, KernelDensity, default_bandwidth_candidates, tune_bandwidth};
pub use rtm::RiskTerrain;

/// Default trailing window, in days, for every estimator.
pub const DEFAULT_TIME_WINDOW_DAYS: u32 = 60;

/// Errors raised while fitting or querying an estimator.
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// `predict` was called before a successful `fit`.
    #[error("{estimator} estimator used before it was fit")]
    Unfitted {
        /// Estimator name.
        estimator: &'static str,
    },

    /// A window that must hold at least one event is empty.
    #[error("No '{stream}' events between {} and {end}", describe_start(.start))]
    DataGap {
        /// Stream (or joined stream names) that came up empty.
        stream: String,
        /// First day of the window, `None` when unbounded.
        start: Option<NaiveDate>,
        /// Last day of the window.
        end: NaiveDate,
    },

    /// Invalid parameters or inputs.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what went wrong.
        message: String,
    },
}

#[allow(clippy::ref_option)]
fn describe_start(start: &Option<NaiveDate>) -> String {
    start.map_or_else(|| "the beginning".to_string(), |d| d.to_string())
}

impl EstimatorError {
    /// Whether this error only means "no data for this window".
    #[must_use]
    pub const fn is_data_gap(&self) -> bool {
        matches!(self, Self::DataGap { .. })
    }
}

/// Fit-then-predict contract shared by every estimator.
pub trait RiskEstimator {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether the last call to [`Self::fit`] succeeded.
    fn is_fitted(&self) -> bool;

    /// Discards any training state, leaving the estimator unfit.
    fn reset(&mut self);

    /// Fits on `streams`, using only events dated on or before `as_of`.
    /// Any previous training state is discarded first.
    ///
    /// # Errors
    ///
    /// * [`EstimatorError::DataGap`] if a required window has no events
    /// * [`EstimatorError::Configuration`] if the streams do not match what
    ///   the estimator expects
    fn fit(&mut self, streams: &EventStreams, as_of: NaiveDate) -> Result<(), EstimatorError>;

    /// Scores each location. Output order matches `locations`.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Unfitted`] if called before a successful
    /// fit.
    fn predict(&self, locations: &[Coordinate], as_of: NaiveDate)
    -> Result<Vec<f64>, EstimatorError>;
}

/// The closed set of estimator variants.
#[derive(Debug, Clone)]
pub enum Estimator {
    /// Gaussian kernel density.
    KernelDensity(KernelDensity),
    /// Distance/time decay.
    Bower(Bower),
    /// Risk terrain.
    RiskTerrain(RiskTerrain),
}

impl Estimator {
    fn inner(&self) -> &dyn RiskEstimator {
        match self {
            Self::KernelDensity(e) => e,
            Self::Bower(e) => e,
            Self::RiskTerrain(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn RiskEstimator {
        match self {
            Self::KernelDensity(e) => e,
            Self::Bower(e) => e,
            Self::RiskTerrain(e) => e,
        }
    }

    /// Whether the estimator consumes several feature streams (one layer
    /// each) rather than the single target stream.
    #[must_use]
    pub const fn uses_feature_layers(&self) -> bool {
        matches!(self, Self::RiskTerrain(_))
    }
}

impl RiskEstimator for Estimator {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }

    fn reset(&mut self) {
        self.inner_mut().reset();
    }

    fn fit(&mut self, streams: &EventStreams, as_of: NaiveDate) -> Result<(), EstimatorError> {
        self.inner_mut().fit(streams, as_of)
    }

    fn predict(
        &self,
        locations: &[Coordinate],
        as_of: NaiveDate,
    ) -> Result<Vec<f64>, EstimatorError> {
        self.inner().predict(locations, as_of)
    }
}

impl std::fmt::Display for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KernelDensity(e) => e.fmt(f),
            Self::Bower(e) => e.fmt(f),
            Self::RiskTerrain(e) => e.fmt(f),
        }
    }
}

const fn default_time_window_days() -> u32 {
    DEFAULT_TIME_WINDOW_DAYS
}

const fn default_kde_bandwidth() -> f64 {
    kde::DEFAULT_BANDWIDTH
}

const fn default_bower_bandwidth() -> f64 {
    bower::DEFAULT_BANDWIDTH
}

const fn default_rtm_bandwidth() -> f64 {
    rtm::DEFAULT_BANDWIDTH
}

/// Estimator selection and parameters, as written in the `[estimator]`
/// table of an evaluation config.
///
/// ```toml
/// [estimator]
/// type = "bower"
/// grid_size = 50.0
/// bandwidth = 400.0
/// time_window_days = 60
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EstimatorConfig {
    /// See [`KernelDensity`].
    KernelDensity {
        /// Kernel bandwidth in CRS units.
        #[serde(default = "default_kde_bandwidth")]
        bandwidth: f64,
        /// Trailing window length.
        #[serde(default = "default_time_window_days")]
        time_window_days: u32,
        /// Use every past event instead of a trailing window.
        #[serde(default)]
        full_history: bool,
    },
    /// See [`Bower`].
    Bower {
        /// Grid cell side length; sets the distance decay step.
        grid_size: f64,
        /// Search radius.
        #[serde(default = "default_bower_bandwidth")]
        bandwidth: f64,
        /// Trailing window length.
        #[serde(default = "default_time_window_days")]
        time_window_days: u32,
        /// Use every past event instead of a trailing window.
        #[serde(default)]
        full_history: bool,
    },
    /// See [`RiskTerrain`].
    RiskTerrain {
        /// Kernel bandwidth shared by every layer.
        #[serde(default = "default_rtm_bandwidth")]
        bandwidth: f64,
        /// Trailing window length.
        #[serde(default = "default_time_window_days")]
        time_window_days: u32,
        /// Use every past event instead of a trailing window.
        #[serde(default)]
        full_history: bool,
    },
}

const fn time_window(days: u32, full_history: bool) -> Option<u32> {
    if full_history { None } else { Some(days) }
}

impl EstimatorConfig {
    /// Builds an unfit estimator.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Configuration`] if a bandwidth, grid size or
    /// window length is not positive.
    pub fn build(&self) -> Result<Estimator, EstimatorError> {
        let estimator = match *self {
            Self::KernelDensity {
                bandwidth,
                time_window_days,
                full_history,
            } => Estimator::KernelDensity(KernelDensity::new(
                bandwidth,
                time_window(time_window_days, full_history),
            )?),
            Self::Bower {
                grid_size,
                bandwidth,
                time_window_days,
                full_history,
            } => Estimator::Bower(Bower::new(
                grid_size,
                bandwidth,
                time_window(time_window_days, full_history),
            )?),
            Self::RiskTerrain {
                bandwidth,
                time_window_days,
                full_history,
            } => Estimator::RiskTerrain(RiskTerrain::new(
                bandwidth,
                time_window(time_window_days, full_history),
            )?),
        };

        log::info!("Configured estimator: {estimator}");
        Ok(estimator)
    }
}

pub(crate) fn check_positive(what: &str, value: f64) -> Result<(), EstimatorError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EstimatorError::Configuration {
            message: format!("{what} must be a positive number, got {value}"),
        })
    }
}

pub(crate) fn check_time_window(days: Option<u32>) -> Result<(), EstimatorError> {
    if days == Some(0) {
        return Err(EstimatorError::Configuration {
            message: "time window must be at least one day".to_string(),
        });
    }
    Ok(())
}

/// The only stream of `streams`, for estimators that model one category.
pub(crate) fn single_stream<'a>(
    estimator: &str,
    streams: &'a EventStreams,
) -> Result<&'a EventStream, EstimatorError> {
    let mut iter = streams.iter();
    match (iter.next(), iter.next()) {
        (Some(stream), None) => Ok(stream),
        _ => Err(EstimatorError::Configuration {
            message: format!(
                "{estimator} expects exactly one event stream, got {}",
                streams.len()
            ),
        }),
    }
}

pub(crate) fn window_start(as_of: NaiveDate, days: Option<u32>) -> Option<NaiveDate> {
    crime_risk_event_models::trailing_start(as_of, days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_in() {
        let config: EstimatorConfig = toml::from_str(
            r#"
            type = "bower"
            grid_size = 50.0
            "#,
        )
        .unwrap();

        assert_eq!(
            config,
            EstimatorConfig::Bower {
                grid_size: 50.0,
                bandwidth: 400.0,
                time_window_days: 60,
                full_history: false,
            }
        );
    }

    #[test]
    fn config_builds_each_variant() {
        let kde: EstimatorConfig = toml::from_str(r#"type = "kernel_density""#).unwrap();
        let rtm: EstimatorConfig =
            toml::from_str("type = \"risk_terrain\"\nfull_history = true").unwrap();

        let kde = kde.build().unwrap();
        assert_eq!(kde.name(), "kde");
        assert!(!kde.is_fitted());
        assert!(!kde.uses_feature_layers());

        let rtm = rtm.build().unwrap();
        assert_eq!(rtm.name(), "rtm");
        assert!(rtm.uses_feature_layers());
        assert!(rtm.to_string().contains("full history"));
    }

    #[test]
    fn config_rejects_bad_parameters() {
        let config = EstimatorConfig::KernelDensity {
            bandwidth: -1.0,
            time_window_days: 60,
            full_history: false,
        };
        assert!(matches!(
            config.build(),
            Err(EstimatorError::Configuration { .. })
        ));

        let config = EstimatorConfig::Bower {
            grid_size: 50.0,
            bandwidth: 400.0,
            time_window_days: 0,
            full_history: false,
        };
        assert!(config.build().is_err());
    }

    #[test]
    fn data_gap_message_names_the_window() {
        let err = EstimatorError::DataGap {
            stream: "burglary".to_string(),
            start: None,
            end: NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
        };
        assert!(err.is_data_gap());
        assert_eq!(
            err.to_string(),
            "No 'burglary' events between the beginning and 2020-01-31"
        );
    }
}
