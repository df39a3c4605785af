#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Walk-forward evaluation of spatial risk estimators.
//!
//! For each rolling period, the estimator is fit on the feature streams'
//! past window, predicts risk at every spatial unit's centroid, and the
//! prediction is scored against the target events that actually happened in
//! the unit during the future window. One [`ResultTable`] per metric
//! collects the scores, one row per period.
//!
//! [`run`] wires everything from an [`EvaluationConfig`]: events and units
//! are loaded, event assignments go through the persistent cache, and the
//! tables are written to the output directory.

pub mod config;
pub mod data;
pub mod progress;
pub mod results;

use std::path::Path;
use std::sync::Arc;

use crime_risk_estimator::{Estimator, EstimatorError, RiskEstimator};
use crime_risk_event_models::{EventStream, EventStreams};
use crime_risk_metrics::{MetricKind, RankedUnit, Sampling};
use crime_risk_rolling::{RollPeriod, RollingConfig, RollingError};
use crime_risk_spatial::{Assignment, AssignmentCache, SpatialError, SpatialUnitAggregator};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub use config::{DataConfig, EvaluationConfig, EvaluationSettings, GridConfig};
pub use progress::{CancellationToken, NullProgress, ProgressCallback, null_progress};
pub use results::{EvaluationResults, ResultRow, ResultTable};

/// Errors that abort an evaluation run.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Period generation failed.
    #[error("Rolling error: {0}")]
    Rolling(#[from] RollingError),

    /// Spatial units or the assignment cache failed.
    #[error("Spatial error: {0}")]
    Spatial(#[from] SpatialError),

    /// The estimator failed in a way that is not a data gap.
    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),

    /// The configuration is inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },
}

impl EvaluationError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// When the estimator is refit.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefitPolicy {
    /// Fit on every period's own past window.
    #[default]
    PerPeriod,
    /// Fit once, on the first period whose window has data, and reuse it.
    Once,
}

/// Where the evaluator is in its fit/score cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EvaluatorState {
    /// No usable model.
    Idle,
    /// A model is fit and waiting to predict.
    Fitted,
    /// The current period has been predicted and scored.
    Scored,
}

/// Runs an estimator over rolling periods and scores each prediction.
pub struct WalkForwardEvaluator {
    rolling: RollingConfig,
    estimator: Estimator,
    aggregator: SpatialUnitAggregator,
    metrics: Vec<MetricKind>,
    sampling: Sampling,
    refit: RefitPolicy,
    state: EvaluatorState,
    progress: Arc<dyn ProgressCallback>,
    cancellation: CancellationToken,
}

impl WalkForwardEvaluator {
    /// Creates an evaluator computing the hit rate with default sampling,
    /// refitting every period.
    #[must_use]
    pub fn new(
        rolling: RollingConfig,
        estimator: Estimator,
        aggregator: SpatialUnitAggregator,
    ) -> Self {
        Self {
            rolling,
            estimator,
            aggregator,
            metrics: vec![MetricKind::HitRate],
            sampling: Sampling::default(),
            refit: RefitPolicy::default(),
            state: EvaluatorState::Idle,
            progress: null_progress(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Sets the metrics to compute, in output order.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Vec<MetricKind>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the sampling used by curve metrics.
    #[must_use]
    pub const fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Sets the refit policy.
    #[must_use]
    pub const fn with_refit(mut self, refit: RefitPolicy) -> Self {
        self.refit = refit;
        self
    }

    /// Sets the progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Uses `token` to stop the run between periods.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A handle that cancels this evaluator's run.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> EvaluatorState {
        self.state
    }

    /// The estimator, as last fit.
    #[must_use]
    pub const fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    fn transition(&mut self, next: EvaluatorState) {
        log::trace!("Evaluator state {} -> {next}", self.state);
        self.state = next;
    }

    /// Evaluates every period in chronological order. `features` trains the
    /// estimator; `target` supplies the counts predictions are scored
    /// against. With a cache, event assignments are read from and added to
    /// it.
    ///
    /// Every run starts from an unfit estimator. A period whose training
    /// window is empty, or whose metric fails, gets a missing row and the
    /// run continues.
    ///
    /// # Errors
    ///
    /// Returns an error if the rolling configuration is invalid or the
    /// estimator fails for any reason other than a data gap.
    pub fn evaluate(
        &mut self,
        target: &EventStream,
        features: &EventStreams,
        cache: Option<&mut AssignmentCache>,
    ) -> Result<EvaluationResults, EvaluationError> {
        let periods = self.rolling.periods_chronological()?;
        let assignment = match cache {
            Some(cache) => self.aggregator.assign_cached(cache, target.events()),
            None => self.aggregator.assign(target.events()),
        };

        log::info!(
            "Evaluating {} over {} period(s), {} unit(s), {} target event(s)",
            self.estimator,
            periods.len(),
            self.aggregator.units().len(),
            target.len()
        );

        let mut results = EvaluationResults {
            tables: self
                .metrics
                .iter()
                .map(|&m| ResultTable::new(m, m.labels(self.sampling)))
                .collect(),
            ..EvaluationResults::default()
        };

        self.estimator.reset();
        self.transition(EvaluatorState::Idle);
        self.progress.set_total(periods.len() as u64);

        for period in &periods {
            if self.cancellation.is_cancelled() {
                log::warn!("Evaluation cancelled before {}", period.label());
                results.cancelled = true;
                break;
            }
            self.progress.set_message(period.label());

            match self.evaluate_period(period, target, features, &assignment, &mut results)? {
                PeriodOutcome::Scored => results.periods_evaluated += 1,
                PeriodOutcome::Missing => {
                    results.periods_missing += 1;
                    for table in &mut results.tables {
                        table.push(period.label(), None);
                    }
                }
            }
            self.progress.inc(1);
        }

        let summary = format!(
            "{} period(s) evaluated, {} missing",
            results.periods_evaluated, results.periods_missing
        );
        log::info!("{summary}");
        self.progress.finish(summary);

        Ok(results)
    }

    fn evaluate_period(
        &mut self,
        period: &RollPeriod,
        target: &EventStream,
        features: &EventStreams,
        assignment: &Assignment,
        results: &mut EvaluationResults,
    ) -> Result<PeriodOutcome, EvaluationError> {
        let label = period.label();
        let needs_fit = match self.refit {
            RefitPolicy::PerPeriod => true,
            RefitPolicy::Once => !self.estimator.is_fitted(),
        };

        if needs_fit {
            let training = features.slice(period.past_start, period.past_end);
            match self.estimator.fit(&training, period.past_end) {
                Ok(()) => {
                    results.fits += 1;
                    self.transition(EvaluatorState::Fitted);
                }
                Err(e) if e.is_data_gap() => {
                    log::warn!("Period {label}: {e}");
                    self.transition(EvaluatorState::Idle);
                    return Ok(PeriodOutcome::Missing);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let units = self.aggregator.units();
        let risks = self
            .estimator
            .predict(&units.centroids(), period.future_start)?;
        let counts = self.aggregator.count_between(
            target,
            assignment,
            period.future_start,
            period.future_end,
        );

        let rows: Vec<RankedUnit<'_>> = units
            .units()
            .iter()
            .zip(risks.iter().zip(&counts))
            .map(|(unit, (&risk, &events))| RankedUnit {
                risk,
                events,
                area: unit.area(),
                geometry: unit.geometry(),
            })
            .collect();

        log::debug!(
            "Period {label}: {} event(s) to predict across {} unit(s)",
            counts.iter().sum::<u64>(),
            rows.len()
        );

        for table in &mut results.tables {
            match table.metric.compute(&rows, self.sampling) {
                Ok(curve) => table.push(label.clone(), Some(curve.values)),
                Err(e) => {
                    log::warn!("Period {label}: {} failed: {e}", table.metric);
                    table.push(label.clone(), None);
                }
            }
        }

        self.transition(EvaluatorState::Scored);
        Ok(PeriodOutcome::Scored)
    }
}

enum PeriodOutcome {
    Scored,
    Missing,
}

/// Loads the inputs named by `config`, evaluates, saves the assignment
/// cache, and writes the result tables to `output_dir` (or the configured
/// one, if any).
///
/// # Errors
///
/// Returns an error if inputs cannot be loaded, the estimator fails
/// outright, or outputs cannot be written.
pub fn run(
    config: &EvaluationConfig,
    output_dir: Option<&Path>,
    progress: Arc<dyn ProgressCallback>,
    cancellation: CancellationToken,
) -> Result<EvaluationResults, EvaluationError> {
    let events = data::load_events(&config.data.events)?;
    let target = data::target_stream(&config.data, &events);
    let features = data::feature_streams(&config.data, &events, &target);
    let units = data::load_units(&config.data, &events)?;

    let mut cache = config
        .data
        .assignment_cache
        .as_deref()
        .map(AssignmentCache::load)
        .transpose()?;

    let mut evaluator = WalkForwardEvaluator::new(
        config.rolling.clone(),
        config.estimator.build()?,
        SpatialUnitAggregator::new(units),
    )
    .with_metrics(config.evaluation.metrics.clone())
    .with_sampling(config.evaluation.sampling)
    .with_refit(config.evaluation.refit)
    .with_progress(progress)
    .with_cancellation(cancellation);

    let results = evaluator.evaluate(&target, &features, cache.as_mut())?;

    if let (Some(cache), Some(path)) = (cache.as_mut(), config.data.assignment_cache.as_deref()) {
        cache.save(path)?;
    }

    if let Some(dir) = output_dir.or(config.data.output_dir.as_deref()) {
        results.write_dir(dir)?;
    }

    Ok(results)
}
