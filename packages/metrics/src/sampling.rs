//! Where along the ranked table a metric curve is read.

use serde::{Deserialize, Serialize};

use crate::MetricError;

/// Default number of points for [`Sampling::Percentile`].
pub const DEFAULT_PERCENTILE_POINTS: usize = 10;

/// Default number of bins for [`Sampling::Bin`].
pub const DEFAULT_RISK_BINS: usize = 5;

const fn default_percentile_points() -> usize {
    DEFAULT_PERCENTILE_POINTS
}

const fn default_risk_bins() -> usize {
    DEFAULT_RISK_BINS
}

/// Sampling scheme for metric curves.
///
/// ```toml
/// sampling = { type = "bin", n = 5 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Sampling {
    /// Read the curve after the top 1/n, 2/n, ... n/n of units.
    Percentile {
        /// Number of points.
        #[serde(default = "default_percentile_points")]
        n: usize,
    },
    /// Read the curve at the last unit whose risk reaches each of `n`
    /// evenly spaced thresholds between the highest and lowest risk.
    Bin {
        /// Number of bins.
        #[serde(default = "default_risk_bins")]
        n: usize,
    },
}

impl Default for Sampling {
    fn default() -> Self {
        Self::Percentile {
            n: DEFAULT_PERCENTILE_POINTS,
        }
    }
}

impl Sampling {
    /// Number of sample points.
    #[must_use]
    pub const fn points(&self) -> usize {
        match *self {
            Self::Percentile { n } | Self::Bin { n } => n,
        }
    }

    /// Labels of the sample points, in order.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn labels(&self) -> Vec<String> {
        let n = self.points();
        match self {
            Self::Percentile { .. } => (1..=n)
                .map(|i| format!("{:.0}%", i as f64 / n as f64 * 100.0))
                .collect(),
            Self::Bin { .. } => (1..=n).map(|i| format!("rbin>={i}")).collect(),
        }
    }

    /// Row positions (into the table sorted by descending risk) and labels
    /// of each sample point. `risks` may be in any order.
    ///
    /// # Errors
    ///
    /// * [`MetricError::EmptyTable`] if `risks` is empty
    /// * [`MetricError::InvalidSampling`] if `n` is zero, or bins are
    ///   requested and every risk is NaN
    pub fn positions(&self, risks: &[f64]) -> Result<(Vec<usize>, Vec<String>), MetricError> {
        if risks.is_empty() {
            return Err(MetricError::EmptyTable);
        }
        let n = self.points();
        if n == 0 {
            return Err(MetricError::InvalidSampling {
                message: "at least one sample point is required".to_string(),
            });
        }

        let positions = match self {
            Self::Percentile { .. } => percentile_positions(risks.len(), n),
            Self::Bin { .. } => bin_positions(risks, n)?,
        };
        Ok((positions, self.labels()))
    }
}

fn percentile_positions(len: usize, n: usize) -> Vec<usize> {
    let mut positions: Vec<usize> = (0..n - 1).map(|i| len * (i + 1) / n).collect();
    positions.push(len - 1);
    positions
}

#[allow(clippy::cast_precision_loss)]
fn bin_positions(risks: &[f64], n: usize) -> Result<Vec<usize>, MetricError> {
    let (min, max) = risks
        .iter()
        .filter(|r| !r.is_nan())
        .fold(None, |acc: Option<(f64, f64)>, &r| {
            Some(acc.map_or((r, r), |(lo, hi)| (lo.min(r), hi.max(r))))
        })
        .ok_or_else(|| MetricError::InvalidSampling {
            message: "risk bins need at least one risk that is not NaN".to_string(),
        })?;

    Ok((0..n)
        .map(|i| {
            let threshold = (max - min).mul_add(1.0 - (i + 1) as f64 / n as f64, min);
            // the maximum always reaches its own threshold
            risks
                .iter()
                .filter(|&&r| r >= threshold)
                .count()
                .saturating_sub(1)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_positions_match_integer_fractions() {
        let (positions, labels) = Sampling::default().positions(&[0.0; 25]).unwrap();
        assert_eq!(positions, vec![2, 5, 7, 10, 12, 15, 17, 20, 22, 24]);
        assert_eq!(labels[0], "10%");
        assert_eq!(labels[9], "100%");
    }

    #[test]
    fn percentile_positions_for_tiny_tables() {
        let (positions, _) = Sampling::Percentile { n: 10 }
            .positions(&[3.0, 2.0, 1.0])
            .unwrap();
        assert_eq!(positions, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn bin_positions_count_units_over_each_threshold() {
        // min 0, max 10 -> thresholds 8, 6, 4, 2, 0
        let risks = [10.0, 0.0, 7.0, 3.0, 5.0, 9.0];
        let (positions, labels) = Sampling::Bin { n: 5 }.positions(&risks).unwrap();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
        assert_eq!(labels, vec!["rbin>=1", "rbin>=2", "rbin>=3", "rbin>=4", "rbin>=5"]);
    }

    #[test]
    fn bin_positions_with_constant_risk_take_every_unit() {
        let (positions, _) = Sampling::Bin { n: 3 }.positions(&[1.0; 4]).unwrap();
        assert_eq!(positions, vec![3, 3, 3]);
    }

    #[test]
    fn empty_table_and_zero_points_are_errors() {
        assert!(matches!(
            Sampling::default().positions(&[]),
            Err(MetricError::EmptyTable)
        ));
        assert!(matches!(
            Sampling::Bin { n: 0 }.positions(&[1.0]),
            Err(MetricError::InvalidSampling { .. })
        ));
        assert!(matches!(
            Sampling::Bin { n: 2 }.positions(&[f64::NAN]),
            Err(MetricError::InvalidSampling { .. })
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let sampling: Sampling = serde_json::from_str(r#"{"type": "bin"}"#).unwrap();
        assert_eq!(sampling, Sampling::Bin { n: 5 });
        let sampling: Sampling = serde_json::from_str(r#"{"type": "percentile", "n": 4}"#).unwrap();
        assert_eq!(sampling, Sampling::Percentile { n: 4 });
    }
}
