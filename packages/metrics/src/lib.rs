#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Rank-based evaluation of risk maps.
//!
//! Units are ranked by predicted risk, highest first, and the observed event
//! counts are accumulated down the ranking. Reading the accumulated values at
//! a few sample points gives the familiar curves: hit rate, search
//! efficiency rate, prediction accuracy index (PAI) and the
//! area-to-perimeter ratio of the selected hot spots. Mean absolute error
//! and R² are also provided as single-number baselines.

pub mod sampling;

use std::cmp::Ordering;

use geo::{BooleanOps, MultiPolygon};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

pub use sampling::Sampling;

/// Square metres per square kilometre.
const M2_PER_KM2: f64 = 1e6;

/// Errors raised while computing a metric.
#[derive(Debug, Error)]
pub enum MetricError {
    /// There are no units to rank.
    #[error("Cannot compute a metric over an empty table")]
    EmptyTable,

    /// The sampling scheme cannot be applied.
    #[error("Invalid sampling: {message}")]
    InvalidSampling {
        /// Description of what went wrong.
        message: String,
    },
}

/// One spatial unit with its predicted risk and observed outcome.
#[derive(Debug, Clone, Copy)]
pub struct RankedUnit<'a> {
    /// Predicted risk (any scale; only the order matters).
    pub risk: f64,
    /// Events observed in the unit during the evaluation window.
    pub events: u64,
    /// Unit area in m².
    pub area: f64,
    /// Unit geometry, needed by [`area_perimeter_ratio`].
    pub geometry: &'a MultiPolygon<f64>,
}

/// A metric read at each sample point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCurve {
    /// Sample point labels (e.g. `"10%"`, `"rbin>=2"`, `"all"`).
    pub labels: Vec<String>,
    /// Metric value at each label.
    pub values: Vec<f64>,
}

impl MetricCurve {
    /// Value at `label`, if present.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|l| l == label)
            .and_then(|i| self.values.get(i).copied())
    }

    fn single(value: f64) -> Self {
        Self {
            labels: vec!["all".to_string()],
            values: vec![value],
        }
    }
}

/// Knobs of [`hit_to_pai`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitOptions {
    /// Divide cumulative hits by the total number of events.
    pub event_normalized: bool,
    /// Divide cumulative area by the total area (only with `event_by_area`).
    pub area_normalized: bool,
    /// Divide hits by cumulative area (km²).
    pub event_by_area: bool,
}

/// Metrics the evaluator can compute.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    /// Share of events captured by the top-ranked units.
    HitRate,
    /// Events captured per km² searched.
    SearchEfficiencyRate,
    /// Share of events captured divided by share of area searched.
    PredictionAccuracyIndex,
    /// Cumulative area over the perimeter of the merged top-ranked units.
    AreaPerimeterRatio,
    /// Mean absolute difference between risk and counts.
    MeanAbsoluteError,
    /// Coefficient of determination of risk against counts.
    RSquared,
}

impl MetricKind {
    /// Whether this metric produces one value per table instead of a curve.
    #[must_use]
    pub const fn is_single_number(self) -> bool {
        matches!(self, Self::MeanAbsoluteError | Self::RSquared)
    }

    /// Column labels this metric produces under `sampling`.
    #[must_use]
    pub fn labels(self, sampling: Sampling) -> Vec<String> {
        if self.is_single_number() {
            vec!["all".to_string()]
        } else {
            sampling.labels()
        }
    }

    /// Computes this metric.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is empty or the sampling is invalid.
    pub fn compute(
        self,
        rows: &[RankedUnit<'_>],
        sampling: Sampling,
    ) -> Result<MetricCurve, MetricError> {
        match self {
            Self::HitRate => hit_rate(rows, sampling),
            Self::SearchEfficiencyRate => search_efficiency_rate(rows, sampling),
            Self::PredictionAccuracyIndex => prediction_accuracy_index(rows, sampling),
            Self::AreaPerimeterRatio => area_perimeter_ratio(rows, sampling),
            Self::MeanAbsoluteError => mean_absolute_error(rows).map(MetricCurve::single),
            Self::RSquared => r_squared(rows).map(MetricCurve::single),
        }
    }
}

/// Orders rows by descending risk. Equal risks keep their input order and
/// NaN risks go last.
fn rank<'r, 'a>(rows: &'r [RankedUnit<'a>]) -> Vec<&'r RankedUnit<'a>> {
    let mut ranked: Vec<_> = rows.iter().collect();
    ranked.sort_by(|a, b| match (a.risk.is_nan(), b.risk.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.risk.partial_cmp(&a.risk).unwrap_or(Ordering::Equal),
    });
    ranked
}

/// Cumulative hits (optionally per cumulative area) down the risk ranking,
/// read at the sample points.
///
/// # Errors
///
/// Returns an error if `rows` is empty or the sampling is invalid.
#[allow(clippy::cast_precision_loss)]
pub fn hit_to_pai(
    rows: &[RankedUnit<'_>],
    options: HitOptions,
    sampling: Sampling,
) -> Result<MetricCurve, MetricError> {
    let risks: Vec<f64> = rows.iter().map(|r| r.risk).collect();
    let (positions, labels) = sampling.positions(&risks)?;
    let ranked = rank(rows);

    let total_events: u64 = rows.iter().map(|r| r.events).sum();
    let total_area: f64 = rows.iter().map(|r| r.area / M2_PER_KM2).sum();
    let event_factor = if options.event_normalized {
        total_events as f64
    } else {
        1.0
    };
    let area_factor = if options.area_normalized {
        total_area
    } else {
        1.0
    };

    let mut cumulative = Vec::with_capacity(ranked.len());
    let (mut hits, mut area) = (0u64, 0.0);
    for row in ranked {
        hits += row.events;
        area += row.area / M2_PER_KM2;
        let hit = hits as f64 / event_factor;
        cumulative.push(if options.event_by_area {
            hit / (area / area_factor)
        } else {
            hit
        });
    }

    Ok(MetricCurve {
        labels,
        values: positions.into_iter().map(|p| cumulative[p]).collect(),
    })
}

/// Share of all events that fall in the top-ranked units.
///
/// # Errors
///
/// Returns an error if `rows` is empty or the sampling is invalid.
pub fn hit_rate(rows: &[RankedUnit<'_>], sampling: Sampling) -> Result<MetricCurve, MetricError> {
    hit_to_pai(
        rows,
        HitOptions {
            event_normalized: true,
            ..HitOptions::default()
        },
        sampling,
    )
}

/// Events captured per km² of top-ranked units.
///
/// # Errors
///
/// Returns an error if `rows` is empty or the sampling is invalid.
pub fn search_efficiency_rate(
    rows: &[RankedUnit<'_>],
    sampling: Sampling,
) -> Result<MetricCurve, MetricError> {
    hit_to_pai(
        rows,
        HitOptions {
            event_by_area: true,
            ..HitOptions::default()
        },
        sampling,
    )
}

/// Hit rate divided by the share of the study area searched.
///
/// # Errors
///
/// Returns an error if `rows` is empty or the sampling is invalid.
pub fn prediction_accuracy_index(
    rows: &[RankedUnit<'_>],
    sampling: Sampling,
) -> Result<MetricCurve, MetricError> {
    hit_to_pai(
        rows,
        HitOptions {
            event_normalized: true,
            area_normalized: true,
            event_by_area: true,
        },
        sampling,
    )
}

/// Cumulative area (m²) of the top-ranked units over the perimeter of their
/// union. Adjacent units merge, so compact hot spots score higher than
/// scattered ones.
///
/// # Errors
///
/// Returns an error if `rows` is empty or the sampling is invalid.
pub fn area_perimeter_ratio(
    rows: &[RankedUnit<'_>],
    sampling: Sampling,
) -> Result<MetricCurve, MetricError> {
    let risks: Vec<f64> = rows.iter().map(|r| r.risk).collect();
    let (positions, labels) = sampling.positions(&risks)?;
    let ranked = rank(rows);

    // Sample positions never decrease, so one growing union serves them all.
    let mut values = Vec::with_capacity(positions.len());
    let mut merged = MultiPolygon::<f64>(vec![]);
    let mut area = 0.0;
    let mut next = 0;
    for &position in &positions {
        while next <= position {
            merged = merged.union(ranked[next].geometry);
            area += ranked[next].area;
            next += 1;
        }
        values.push(area / perimeter(&merged));
    }

    Ok(MetricCurve { labels, values })
}

fn perimeter(shape: &MultiPolygon<f64>) -> f64 {
    shape
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .flat_map(geo::LineString::lines)
        .map(|line| line.dx().hypot(line.dy()))
        .sum()
}

/// Mean absolute difference between predicted risk and observed counts.
///
/// # Errors
///
/// Returns [`MetricError::EmptyTable`] if `rows` is empty.
#[allow(clippy::cast_precision_loss)]
pub fn mean_absolute_error(rows: &[RankedUnit<'_>]) -> Result<f64, MetricError> {
    if rows.is_empty() {
        return Err(MetricError::EmptyTable);
    }
    let total: f64 = rows
        .iter()
        .map(|r| (r.events as f64 - r.risk).abs())
        .sum();
    Ok(total / rows.len() as f64)
}

/// Coefficient of determination of risk as a predictor of counts. When the
/// counts are constant the score is 1 for a perfect prediction and 0
/// otherwise.
///
/// # Errors
///
/// Returns [`MetricError::EmptyTable`] if `rows` is empty.
#[allow(clippy::cast_precision_loss)]
pub fn r_squared(rows: &[RankedUnit<'_>]) -> Result<f64, MetricError> {
    if rows.is_empty() {
        return Err(MetricError::EmptyTable);
    }
    let mean = rows.iter().map(|r| r.events as f64).sum::<f64>() / rows.len() as f64;
    let residual: f64 = rows
        .iter()
        .map(|r| (r.events as f64 - r.risk).powi(2))
        .sum();
    let total: f64 = rows.iter().map(|r| (r.events as f64 - mean).powi(2)).sum();

    if total == 0.0 {
        return Ok(if residual == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - residual / total)
}
