//! Gaussian kernel density estimator and bandwidth search.

use std::f64::consts::PI;

use chrono::NaiveDate;
use crime_risk_event_models::{Coordinate, EventStream, EventStreams};

use crate::{
    DEFAULT_TIME_WINDOW_DAYS, EstimatorError, RiskEstimator, check_positive, check_time_window,
    single_stream, window_start,
};

/// Default kernel bandwidth.
pub const DEFAULT_BANDWIDTH: f64 = 1.0;

/// Default number of cross-validation folds for [`tune_bandwidth`].
pub const DEFAULT_TUNING_FOLDS: usize = 20;

/// Kernel density over the event locations of one stream's trailing window.
#[derive(Debug, Clone)]
pub struct KernelDensity {
    bandwidth: f64,
    time_window_days: Option<u32>,
    samples: Option<Vec<Coordinate>>,
}

impl Default for KernelDensity {
    fn default() -> Self {
        Self {
            bandwidth: DEFAULT_BANDWIDTH,
            time_window_days: Some(DEFAULT_TIME_WINDOW_DAYS),
            samples: None,
        }
    }
}

impl KernelDensity {
    /// Creates an unfit estimator. `time_window_days` of `None` uses the
    /// full history before `as_of`.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Configuration`] if the bandwidth is not
    /// positive or the window is zero days long.
    pub fn new(bandwidth: f64, time_window_days: Option<u32>) -> Result<Self, EstimatorError> {
        check_positive("KDE bandwidth", bandwidth)?;
        check_time_window(time_window_days)?;
        Ok(Self {
            bandwidth,
            time_window_days,
            samples: None,
        })
    }

    /// Current bandwidth.
    #[must_use]
    pub const fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Trailing window length.
    #[must_use]
    pub const fn time_window_days(&self) -> Option<u32> {
        self.time_window_days
    }

    /// Number of training locations, `0` when unfit.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.as_ref().map_or(0, Vec::len)
    }

    /// Fits on a single stream.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::DataGap`] if the trailing window holds no
    /// events. The estimator is left unfit.
    pub fn fit_stream(
        &mut self,
        stream: &EventStream,
        as_of: NaiveDate,
    ) -> Result<(), EstimatorError> {
        self.reset();

        let events = stream.trailing(as_of, self.time_window_days);
        if events.is_empty() {
            return Err(EstimatorError::DataGap {
                stream: stream.name().to_string(),
                start: window_start(as_of, self.time_window_days),
                end: as_of,
            });
        }

        log::debug!(
            "KDE fit on {} '{}' event(s) up to {as_of}",
            events.len(),
            stream.name()
        );
        self.samples = Some(events.iter().map(|e| e.coord).collect());
        Ok(())
    }

    /// Picks the bandwidth for this estimator by cross-validation on the
    /// trailing window of `stream`, and keeps it.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Configuration`] if there are fewer events
    /// than folds or a candidate is not positive.
    pub fn tune(
        &mut self,
        stream: &EventStream,
        as_of: NaiveDate,
        candidates: &[f64],
        folds: usize,
    ) -> Result<BandwidthSearch, EstimatorError> {
        let samples: Vec<Coordinate> = stream
            .trailing(as_of, self.time_window_days)
            .iter()
            .map(|e| e.coord)
            .collect();
        let search = tune_bandwidth(&samples, candidates, folds)?;
        self.bandwidth = search.best;
        Ok(search)
    }

    fn density(&self, samples: &[Coordinate], location: &Coordinate) -> f64 {
        let two_h2 = 2.0 * self.bandwidth * self.bandwidth;
        let sum: f64 = samples
            .iter()
            .map(|s| (-s.distance_squared(location) / two_h2).exp())
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let n = samples.len() as f64;
        sum / (n * PI * two_h2)
    }
}

impl RiskEstimator for KernelDensity {
    fn name(&self) -> &'static str {
        "kde"
    }

    fn is_fitted(&self) -> bool {
        self.samples.is_some()
    }

    fn reset(&mut self) {
        self.samples = None;
    }

    fn fit(&mut self, streams: &EventStreams, as_of: NaiveDate) -> Result<(), EstimatorError> {
        self.reset();
        let stream = single_stream(self.name(), streams)?;
        self.fit_stream(stream, as_of)
    }

    fn predict(
        &self,
        locations: &[Coordinate],
        _as_of: NaiveDate,
    ) -> Result<Vec<f64>, EstimatorError> {
        let samples = self.samples.as_ref().ok_or(EstimatorError::Unfitted {
            estimator: self.name(),
        })?;
        Ok(locations
            .iter()
            .map(|loc| self.density(samples, loc))
            .collect())
    }
}

impl std::fmt::Display for KernelDensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KDE (bandwidth={}, ", self.bandwidth)?;
        match self.time_window_days {
            Some(days) => write!(f, "window={days} days)"),
            None => write!(f, "full history)"),
        }
    }
}

/// Result of a bandwidth search.
#[derive(Debug, Clone, PartialEq)]
pub struct BandwidthSearch {
    /// Winning bandwidth.
    pub best: f64,
    /// `(candidate, mean held-out log-likelihood)` in candidate order.
    pub scores: Vec<(f64, f64)>,
}

/// 30 evenly spaced bandwidths from 10 to 1000 inclusive.
#[must_use]
pub fn default_bandwidth_candidates() -> Vec<f64> {
    const COUNT: u32 = 30;
    let (lo, hi) = (10.0, 1000.0);
    let step = (hi - lo) / f64::from(COUNT - 1);
    (0..COUNT).map(|i| f64::from(i).mul_add(step, lo)).collect()
}

/// Chooses the bandwidth with the highest mean held-out log-likelihood over
/// `folds` contiguous folds of `samples`. Folds are as equal as possible,
/// with the first `len % folds` one element larger. Ties keep the earlier
/// candidate.
///
/// # Errors
///
/// Returns [`EstimatorError::Configuration`] if `folds < 2`, there are fewer
/// samples than folds, no candidates are given, or a candidate is not
/// positive.
pub fn tune_bandwidth(
    samples: &[Coordinate],
    candidates: &[f64],
    folds: usize,
) -> Result<BandwidthSearch, EstimatorError> {
    if folds < 2 {
        return Err(EstimatorError::Configuration {
            message: format!("bandwidth search needs at least 2 folds, got {folds}"),
        });
    }
    if samples.len() < folds {
        return Err(EstimatorError::Configuration {
            message: format!(
                "bandwidth search needs at least {folds} samples, got {}",
                samples.len()
            ),
        });
    }
    if candidates.is_empty() {
        return Err(EstimatorError::Configuration {
            message: "no bandwidth candidates given".to_string(),
        });
    }
    for &candidate in candidates {
        check_positive("bandwidth candidate", candidate)?;
    }

    let bounds = fold_bounds(samples.len(), folds);
    let mut scores = Vec::with_capacity(candidates.len());
    let mut best: Option<(f64, f64)> = None;

    for &bandwidth in candidates {
        let mut total = 0.0;
        for &(start, end) in &bounds {
            let train: Vec<Coordinate> = samples[..start]
                .iter()
                .chain(&samples[end..])
                .copied()
                .collect();
            total += samples[start..end]
                .iter()
                .map(|q| log_density(&train, bandwidth, q))
                .sum::<f64>();
        }
        #[allow(clippy::cast_precision_loss)]
        let score = total / folds as f64;

        log::debug!("bandwidth {bandwidth}: mean held-out log-likelihood {score}");
        scores.push((bandwidth, score));
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((bandwidth, score));
        }
    }

    let (best, score) = best.ok_or_else(|| EstimatorError::Configuration {
        message: "no bandwidth candidates given".to_string(),
    })?;
    log::info!(
        "Selected bandwidth {best} (log-likelihood {score}) from {} candidate(s), {folds} folds",
        candidates.len()
    );

    Ok(BandwidthSearch { best, scores })
}

fn fold_bounds(len: usize, folds: usize) -> Vec<(usize, usize)> {
    let base = len / folds;
    let extra = len % folds;
    let mut start = 0;
    (0..folds)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let bounds = (start, start + size);
            start += size;
            bounds
        })
        .collect()
}

/// Log of the Gaussian kernel density of `train` at `q`, computed with the
/// log-sum-exp shift so far-away points do not underflow to `-inf`.
fn log_density(train: &[Coordinate], bandwidth: f64, q: &Coordinate) -> f64 {
    let two_h2 = 2.0 * bandwidth * bandwidth;
    let exponents: Vec<f64> = train
        .iter()
        .map(|s| -s.distance_squared(q) / two_h2)
        .collect();
    let max = exponents.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = exponents.iter().map(|e| (e - max).exp()).sum();
    #[allow(clippy::cast_precision_loss)]
    let n = train.len() as f64;
    max + sum.ln() - n.ln() - (PI * two_h2).ln()
}

#[cfg(test)]
mod tests {
    use crime_risk_event_models::Event;

    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn event(id: u64, day: &str, x: f64, y: f64) -> Event {
        Event {
            id,
            date: date(day),
            time: None,
            coord: Coordinate::new(x, y),
            category: "burglary".to_string(),
        }
    }

    fn streams(events: Vec<Event>) -> EventStreams {
        EventStreams::single(EventStream::new("burglary", events))
    }

    #[test]
    fn predict_before_fit_is_unfitted() {
        let kde = KernelDensity::default();
        assert!(matches!(
            kde.predict(&[Coordinate::new(0.0, 0.0)], date("2020-01-01")),
            Err(EstimatorError::Unfitted { estimator: "kde" })
        ));
    }

    #[test]
    fn single_event_density_peaks_at_the_event() {
        let mut kde = KernelDensity::new(10.0, Some(60)).unwrap();
        kde.fit(&streams(vec![event(1, "2020-01-10", 0.0, 0.0)]), date("2020-01-31"))
            .unwrap();

        let out = kde
            .predict(
                &[
                    Coordinate::new(0.0, 0.0),
                    Coordinate::new(10.0, 0.0),
                    Coordinate::new(0.0, -30.0),
                ],
                date("2020-02-01"),
            )
            .unwrap();

        let peak = 1.0 / (2.0 * PI * 100.0);
        assert!((out[0] - peak).abs() < 1e-12);
        assert!((out[1] - peak * (-0.5_f64).exp()).abs() < 1e-12);
        assert!(out[2] < out[1]);
    }

    #[test]
    fn empty_window_is_a_data_gap_and_leaves_estimator_unfit() {
        let mut kde = KernelDensity::new(10.0, Some(7)).unwrap();
        kde.fit(&streams(vec![event(1, "2020-01-30", 0.0, 0.0)]), date("2020-01-31"))
            .unwrap();
        assert!(kde.is_fitted());

        let err = kde
            .fit(&streams(vec![event(1, "2020-01-01", 0.0, 0.0)]), date("2020-01-31"))
            .unwrap_err();
        assert!(matches!(
            err,
            EstimatorError::DataGap { ref stream, start: Some(s), end }
                if stream == "burglary" && s == date("2020-01-25") && end == date("2020-01-31")
        ));
        assert!(!kde.is_fitted());
    }

    #[test]
    fn trailing_window_excludes_old_events() {
        let mut kde = KernelDensity::new(5.0, Some(30)).unwrap();
        kde.fit(
            &streams(vec![
                event(1, "2019-06-01", 0.0, 0.0),
                event(2, "2020-01-20", 100.0, 0.0),
                event(3, "2020-02-15", 200.0, 0.0),
            ]),
            date("2020-01-31"),
        )
        .unwrap();

        assert_eq!(kde.sample_count(), 1);
        let out = kde
            .predict(
                &[
                    Coordinate::new(0.0, 0.0),
                    Coordinate::new(100.0, 0.0),
                    Coordinate::new(200.0, 0.0),
                ],
                date("2020-02-01"),
            )
            .unwrap();
        assert!(out[1] > out[0]);
        assert!(out[1] > out[2]);
    }

    #[test]
    fn full_history_keeps_everything_before_as_of() {
        let mut kde = KernelDensity::new(5.0, None).unwrap();
        kde.fit(
            &streams(vec![
                event(1, "2015-06-01", 0.0, 0.0),
                event(2, "2020-01-20", 100.0, 0.0),
            ]),
            date("2020-01-31"),
        )
        .unwrap();
        assert_eq!(kde.sample_count(), 2);
    }

    #[test]
    fn window_longer_than_the_calendar_acts_as_full_history() {
        let mut kde = KernelDensity::new(10.0, Some(200_000_000)).unwrap();
        kde.fit(
            &streams(vec![
                event(1, "1970-01-01", 0.0, 0.0),
                event(2, "2020-01-20", 100.0, 0.0),
            ]),
            date("2020-01-31"),
        )
        .unwrap();
        assert_eq!(kde.sample_count(), 2);
    }

    #[test]
    fn fit_requires_exactly_one_stream() {
        let mut kde = KernelDensity::default();
        let two: EventStreams = [
            EventStream::new("a", vec![event(1, "2020-01-01", 0.0, 0.0)]),
            EventStream::new("b", vec![event(2, "2020-01-01", 0.0, 0.0)]),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            kde.fit(&two, date("2020-01-31")),
            Err(EstimatorError::Configuration { .. })
        ));
    }

    #[test]
    fn default_candidates_span_ten_to_a_thousand() {
        let candidates = default_bandwidth_candidates();
        assert_eq!(candidates.len(), 30);
        assert!((candidates[0] - 10.0).abs() < 1e-12);
        assert!((candidates[29] - 1000.0).abs() < 1e-9);
        assert!((candidates[1] - 44.137_931_034_482_76).abs() < 1e-9);
    }

    #[test]
    fn fold_bounds_spread_the_remainder() {
        assert_eq!(fold_bounds(7, 3), vec![(0, 3), (3, 5), (5, 7)]);
    }

    #[test]
    fn tuning_prefers_the_lattice_spacing() {
        let samples: Vec<Coordinate> = (0..5)
            .flat_map(|row| (0..8).map(move |col| Coordinate::new(f64::from(col), f64::from(row))))
            .collect();

        let search = tune_bandwidth(&samples, &[0.001, 1.0, 1000.0], 5).unwrap();
        assert!((search.best - 1.0).abs() < f64::EPSILON);
        assert_eq!(search.scores.len(), 3);
        assert!(search.scores[1].1 > search.scores[0].1);
        assert!(search.scores[1].1 > search.scores[2].1);
    }

    #[test]
    fn tuning_ties_keep_the_first_candidate() {
        let samples = vec![Coordinate::new(0.0, 0.0); 4];
        let search = tune_bandwidth(&samples, &[2.0, 2.0], 2).unwrap();
        assert!((search.best - 2.0).abs() < f64::EPSILON);
        assert!((search.scores[0].1 - search.scores[1].1).abs() < f64::EPSILON);
    }

    #[test]
    fn tuning_needs_enough_samples() {
        let samples = vec![Coordinate::new(0.0, 0.0); 3];
        assert!(matches!(
            tune_bandwidth(&samples, &default_bandwidth_candidates(), DEFAULT_TUNING_FOLDS),
            Err(EstimatorError::Configuration { .. })
        ));
    }

    #[test]
    fn tune_updates_the_bandwidth() {
        let events: Vec<Event> = (0..10u32)
            .map(|i| event(u64::from(i), "2020-01-15", f64::from(i), 0.0))
            .collect();
        let stream = EventStream::new("burglary", events);

        let mut kde = KernelDensity::new(500.0, Some(60)).unwrap();
        let search = kde.tune(&stream, date("2020-01-31"), &[1.0, 500.0], 5).unwrap();
        assert!((kde.bandwidth() - search.best).abs() < f64::EPSILON);
        assert!((kde.bandwidth() - 1.0).abs() < f64::EPSILON);
    }
}
