//! TOML configuration for an evaluation run.
//!
//! ```toml
//! [rolling]
//! step_days = 7
//! start = "2020-01-01"
//! end = "2020-06-30"
//! past_window_days = 60
//!
//! [evaluation]
//! refit = "per_period"
//! metrics = ["hit_rate", "prediction_accuracy_index"]
//! sampling = { type = "percentile", n = 10 }
//!
//! [estimator]
//! type = "kernel_density"
//! bandwidth = 250.0
//!
//! [data]
//! events = "events.csv"
//! grid = { side = 250.0 }
//! target = ["burglary"]
//! ```

use std::path::{Path, PathBuf};

use crime_risk_estimator::EstimatorConfig;
use crime_risk_metrics::{MetricKind, Sampling};
use crime_risk_rolling::RollingConfig;
use serde::{Deserialize, Serialize};

use crate::{EvaluationError, RefitPolicy};

/// A complete evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Period generation.
    pub rolling: RollingConfig,
    /// Metrics and refit policy.
    #[serde(default)]
    pub evaluation: EvaluationSettings,
    /// Estimator selection.
    pub estimator: EstimatorConfig,
    /// Inputs and outputs.
    pub data: DataConfig,
}

fn default_metrics() -> Vec<MetricKind> {
    vec![
        MetricKind::HitRate,
        MetricKind::SearchEfficiencyRate,
        MetricKind::PredictionAccuracyIndex,
    ]
}

/// The `[evaluation]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    /// When to refit the estimator.
    #[serde(default)]
    pub refit: RefitPolicy,
    /// Metrics to compute, in output order.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricKind>,
    /// Sample points of every curve metric.
    #[serde(default)]
    pub sampling: Sampling,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            refit: RefitPolicy::default(),
            metrics: default_metrics(),
            sampling: Sampling::default(),
        }
    }
}

/// A regular grid of square units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cell side length in CRS units.
    pub side: f64,
    /// `[min_x, min_y, max_x, max_y]`. Defaults to the extent of the events.
    #[serde(default)]
    pub bounds: Option<[f64; 4]>,
    /// `GeoJSON` polygons; only cells touching them are kept.
    #[serde(default)]
    pub boundary: Option<PathBuf>,
}

/// The `[data]` table. Exactly one of `units` and `grid` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Events CSV (`id,date,time,x,y,category`).
    pub events: PathBuf,
    /// `GeoJSON` feature collection of unit polygons.
    #[serde(default)]
    pub units: Option<PathBuf>,
    /// Feature property holding the unit id (default: feature index).
    #[serde(default)]
    pub unit_id_property: Option<String>,
    /// Generated grid units.
    #[serde(default)]
    pub grid: Option<GridConfig>,
    /// Categories whose events are predicted (merged into one stream).
    pub target: Vec<String>,
    /// Categories used as separate feature layers. Empty means the target
    /// stream is the only feature.
    #[serde(default)]
    pub features: Vec<String>,
    /// Where event-to-unit assignments are cached between runs.
    #[serde(default)]
    pub assignment_cache: Option<PathBuf>,
    /// Directory for result tables.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl DataConfig {
    /// Name of the unit set, used as the assignment cache key.
    #[must_use]
    pub fn unit_set_name(&self) -> String {
        match (&self.units, &self.grid) {
            (Some(path), _) => path
                .file_stem()
                .map_or_else(|| "units".to_string(), |s| s.to_string_lossy().into_owned()),
            (None, Some(grid)) => format!("grid_{}", grid.side),
            (None, None) => "units".to_string(),
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.events);
        if let Some(p) = &mut self.units {
            resolve(p);
        }
        if let Some(p) = self.grid.as_mut().and_then(|g| g.boundary.as_mut()) {
            resolve(p);
        }
        if let Some(p) = &mut self.assignment_cache {
            resolve(p);
        }
        if let Some(p) = &mut self.output_dir {
            resolve(p);
        }
    }
}

impl EvaluationConfig {
    /// Parses a configuration from TOML text. Paths are left as written.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the configuration is
    /// inconsistent.
    pub fn from_toml(toml_str: &str) -> Result<Self, EvaluationError> {
        let config: Self = toml::de::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file. Relative data paths are resolved against
    /// the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// configuration is inconsistent.
    pub fn load(path: &Path) -> Result<Self, EvaluationError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&contents)?;
        if let Some(base) = path.parent() {
            config.data.resolve_paths(base);
        }
        log::info!("Loaded evaluation config from {}", path.display());
        Ok(config)
    }

    /// Checks cross-section consistency.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::Config`] for the first problem found, or
    /// the rolling error if the rolling parameters are invalid.
    pub fn validate(&self) -> Result<(), EvaluationError> {
        self.rolling.validate()?;

        if self.evaluation.metrics.is_empty() {
            return Err(EvaluationError::config("at least one metric is required"));
        }
        if self.evaluation.sampling.points() == 0 {
            return Err(EvaluationError::config("sampling needs at least one point"));
        }
        if self.data.target.is_empty() {
            return Err(EvaluationError::config(
                "data.target needs at least one category",
            ));
        }
        match (&self.data.units, &self.data.grid) {
            (Some(_), Some(_)) => {
                return Err(EvaluationError::config(
                    "set either data.units or data.grid, not both",
                ));
            }
            (None, None) => {
                return Err(EvaluationError::config(
                    "one of data.units or data.grid is required",
                ));
            }
            _ => {}
        }

        let layered = matches!(self.estimator, EstimatorConfig::RiskTerrain { .. });
        if !layered && self.data.features.len() > 1 {
            return Err(EvaluationError::config(
                "only the risk_terrain estimator accepts several feature categories",
            ));
        }
        Ok(())
    }
}
