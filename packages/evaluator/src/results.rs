//! Per-metric result tables.

use std::io::Write;
use std::path::Path;

use crime_risk_metrics::MetricKind;
use serde::{Deserialize, Serialize};

use crate::EvaluationError;

/// One period's values for one metric. `values` is `None` when the period
/// could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Period label (`"YYYY-MM-DD~YYYY-MM-DD"` of the evaluation window).
    pub period: String,
    /// Metric values in column order.
    pub values: Option<Vec<f64>>,
}

/// A metric's values for every period, one row per period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// Metric this table holds.
    pub metric: MetricKind,
    /// Column labels (sample points).
    pub columns: Vec<String>,
    /// Rows in chronological order.
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new(metric: MetricKind, columns: Vec<String>) -> Self {
        Self {
            metric,
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    pub fn push(&mut self, period: impl Into<String>, values: Option<Vec<f64>>) {
        self.rows.push(ResultRow {
            period: period.into(),
            values,
        });
    }

    /// Row for `period`, if present.
    #[must_use]
    pub fn row(&self, period: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.period == period)
    }

    /// Number of rows with values.
    #[must_use]
    pub fn present_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.values.is_some()).count()
    }

    /// Per-column mean over rows with values, skipping NaN cells. `None`
    /// for a column with no usable cell.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn column_means(&self) -> Vec<Option<f64>> {
        (0..self.columns.len())
            .map(|col| {
                let cells: Vec<f64> = self
                    .rows
                    .iter()
                    .filter_map(|r| r.values.as_ref()?.get(col).copied())
                    .filter(|v| !v.is_nan())
                    .collect();
                if cells.is_empty() {
                    None
                } else {
                    Some(cells.iter().sum::<f64>() / cells.len() as f64)
                }
            })
            .collect()
    }

    /// Writes the table as CSV: a `period` column followed by one column
    /// per sample point. Missing rows have empty cells.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), EvaluationError> {
        let mut csv = csv::Writer::from_writer(writer);

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push("period");
        header.extend(self.columns.iter().map(String::as_str));
        csv.write_record(&header)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(row.period.clone());
            match &row.values {
                Some(values) => record.extend(values.iter().map(f64::to_string)),
                None => record.extend(std::iter::repeat_n(String::new(), self.columns.len())),
            }
            csv.write_record(&record)?;
        }

        csv.flush()?;
        Ok(())
    }
}

/// Everything an evaluation run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResults {
    /// One table per configured metric, in configuration order.
    pub tables: Vec<ResultTable>,
    /// Periods that were fit, predicted and scored.
    pub periods_evaluated: usize,
    /// Periods recorded as missing because a training window was empty.
    pub periods_missing: usize,
    /// Number of successful estimator fits.
    pub fits: usize,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
}

impl EvaluationResults {
    /// Table for `metric`, if it was configured.
    #[must_use]
    pub fn table(&self, metric: MetricKind) -> Option<&ResultTable> {
        self.tables.iter().find(|t| t.metric == metric)
    }

    /// Writes `<metric>.csv` for every table and `results.json` with
    /// everything into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be created or written.
    pub fn write_dir(&self, dir: &Path) -> Result<(), EvaluationError> {
        std::fs::create_dir_all(dir)?;

        for table in &self.tables {
            let path = dir.join(format!("{}.csv", table.metric));
            table.write_csv(std::fs::File::create(&path)?)?;
            log::info!("Wrote {}", path.display());
        }

        let path = dir.join("results.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResultTable {
        let mut table = ResultTable::new(
            MetricKind::HitRate,
            vec!["50%".to_string(), "100%".to_string()],
        );
        table.push("2020-01-08~2020-01-14", Some(vec![0.5, 1.0]));
        table.push("2020-01-15~2020-01-21", None);
        table.push("2020-01-22~2020-01-28", Some(vec![0.25, 1.0]));
        table
    }

    #[test]
    fn csv_leaves_missing_rows_empty() {
        let mut out = Vec::new();
        table().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "period,50%,100%\n\
             2020-01-08~2020-01-14,0.5,1\n\
             2020-01-15~2020-01-21,,\n\
             2020-01-22~2020-01-28,0.25,1\n"
        );
    }

    #[test]
    fn column_means_skip_missing_rows() {
        let table = table();
        assert_eq!(table.present_rows(), 2);
        assert_eq!(table.column_means(), vec![Some(0.375), Some(1.0)]);
        assert!(table.row("2020-01-15~2020-01-21").unwrap().values.is_none());
    }

    #[test]
    fn results_round_trip_through_json() {
        let results = EvaluationResults {
            tables: vec![table()],
            periods_evaluated: 2,
            periods_missing: 1,
            fits: 2,
            cancelled: false,
        };
        let json = serde_json::to_string(&results).unwrap();
        let back: EvaluationResults = serde_json::from_str(&json).unwrap();
        assert_eq!(back, results);
        assert!(back.table(MetricKind::HitRate).is_some());
        assert!(back.table(MetricKind::RSquared).is_none());
    }

    #[test]
    fn writes_one_csv_per_metric() {
        let dir = std::env::temp_dir().join(format!(
            "crime_risk_results_test_{}",
            std::process::id()
        ));
        let results = EvaluationResults {
            tables: vec![table()],
            ..EvaluationResults::default()
        };
        results.write_dir(&dir).unwrap();

        assert!(dir.join("hit_rate.csv").exists());
        assert!(dir.join("results.json").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
