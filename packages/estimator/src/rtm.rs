//! Risk terrain modelling: one kernel density layer per feature stream,
//! each reduced to standard-deviation bins and summed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use crime_risk_event_models::{Coordinate, EventStreams};

use crate::{
    DEFAULT_TIME_WINDOW_DAYS, EstimatorError, KernelDensity, RiskEstimator, check_positive,
    check_time_window, window_start,
};

/// Default kernel bandwidth for every layer.
pub const DEFAULT_BANDWIDTH: f64 = 304.8;

/// Sum of per-layer density bins.
#[derive(Debug, Clone)]
pub struct RiskTerrain {
    bandwidth: f64,
    time_window_days: Option<u32>,
    layers: Option<BTreeMap<String, KernelDensity>>,
}

impl Default for RiskTerrain {
    fn default() -> Self {
        Self {
            bandwidth: DEFAULT_BANDWIDTH,
            time_window_days: Some(DEFAULT_TIME_WINDOW_DAYS),
            layers: None,
        }
    }
}

impl RiskTerrain {
    /// Creates an unfit estimator.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Configuration`] if the bandwidth is not
    /// positive or the window is zero days long.
    pub fn new(bandwidth: f64, time_window_days: Option<u32>) -> Result<Self, EstimatorError> {
        check_positive("RTM bandwidth", bandwidth)?;
        check_time_window(time_window_days)?;
        Ok(Self {
            bandwidth,
            time_window_days,
            layers: None,
        })
    }

    /// Names of the layers kept by the last fit.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers
            .as_ref()
            .map(|layers| layers.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl RiskEstimator for RiskTerrain {
    fn name(&self) -> &'static str {
        "rtm"
    }

    fn is_fitted(&self) -> bool {
        self.layers.is_some()
    }

    fn reset(&mut self) {
        self.layers = None;
    }

    fn fit(&mut self, streams: &EventStreams, as_of: NaiveDate) -> Result<(), EstimatorError> {
        self.reset();

        if streams.is_empty() {
            return Err(EstimatorError::Configuration {
                message: "RTM needs at least one feature stream".to_string(),
            });
        }

        let mut layers = BTreeMap::new();
        for stream in streams.iter() {
            let mut layer = KernelDensity::new(self.bandwidth, self.time_window_days)?;
            match layer.fit_stream(stream, as_of) {
                Ok(()) => {
                    layers.insert(stream.name().to_string(), layer);
                }
                Err(e) if e.is_data_gap() => {
                    log::warn!("Skipping RTM layer: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        if layers.is_empty() {
            return Err(EstimatorError::DataGap {
                stream: streams.names().join("+"),
                start: window_start(as_of, self.time_window_days),
                end: as_of,
            });
        }

        log::debug!(
            "RTM fit with {} of {} layer(s) up to {as_of}",
            layers.len(),
            streams.len()
        );
        self.layers = Some(layers);
        Ok(())
    }

    fn predict(
        &self,
        locations: &[Coordinate],
        as_of: NaiveDate,
    ) -> Result<Vec<f64>, EstimatorError> {
        let layers = self.layers.as_ref().ok_or(EstimatorError::Unfitted {
            estimator: self.name(),
        })?;

        let mut scores = vec![0.0; locations.len()];
        for layer in layers.values() {
            let densities = layer.predict(locations, as_of)?;
            for (score, bin) in scores.iter_mut().zip(digitize(&densities)) {
                *score += f64::from(bin);
            }
        }
        Ok(scores)
    }
}

impl std::fmt::Display for RiskTerrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RTM (bandwidth={}, ", self.bandwidth)?;
        match self.time_window_days {
            Some(days) => write!(f, "window={days} days)"),
            None => write!(f, "full history)"),
        }
    }
}

/// Bins each value against `mean`, `mean + σ` and `mean + 2σ` (sample
/// standard deviation). A value equal to a threshold falls in the upper bin,
/// so results range over `0..=3`.
#[must_use]
pub fn digitize(values: &[f64]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }

    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() < 2 {
        0.0
    } else {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    };
    let thresholds = [mean, mean + std, 2.0f64.mul_add(std, mean)];

    values
        .iter()
        .map(|v| {
            thresholds
                .iter()
                .fold(0u8, |bin, t| if v >= t { bin + 1 } else { bin })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crime_risk_event_models::{Event, EventStream};

    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn stream(name: &str, day: &str, points: &[(f64, f64)]) -> EventStream {
        let events = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| Event {
                id: i as u64,
                date: date(day),
                time: None,
                coord: Coordinate::new(x, y),
                category: name.to_string(),
            })
            .collect();
        EventStream::new(name, events)
    }

    #[test]
    fn digitize_uses_sample_standard_deviation() {
        // mean 2.5, sample std 5 -> thresholds 2.5, 7.5, 12.5
        assert_eq!(digitize(&[0.0, 0.0, 0.0, 10.0]), vec![0, 0, 0, 2]);
    }

    #[test]
    fn digitize_thresholds_are_inclusive() {
        // mean 1, std 1 -> thresholds 1, 2, 3
        assert_eq!(digitize(&[0.0, 1.0, 2.0]), vec![0, 1, 2]);
        assert_eq!(digitize(&[4.0, 4.0]), vec![3, 3]);
        assert_eq!(digitize(&[7.0]), vec![3]);
        assert!(digitize(&[]).is_empty());
    }

    #[test]
    fn layers_sum_their_bins() {
        let streams: EventStreams = [
            stream("bars", "2020-05-01", &[(0.0, 0.0)]),
            stream("bus_stops", "2020-05-01", &[(0.0, 0.0), (10.0, 0.0)]),
        ]
        .into_iter()
        .collect();

        let mut rtm = RiskTerrain::new(5.0, Some(60)).unwrap();
        rtm.fit(&streams, date("2020-05-31")).unwrap();
        assert_eq!(rtm.layer_names(), vec!["bars", "bus_stops"]);

        let out = rtm
            .predict(
                &[
                    Coordinate::new(0.0, 0.0),
                    Coordinate::new(1000.0, 0.0),
                    Coordinate::new(2000.0, 0.0),
                ],
                date("2020-06-01"),
            )
            .unwrap();

        // the location next to both features tops each layer
        assert!(out[0] >= 2.0);
        assert!(out[0] > out[1]);
        assert!((out[1] - out[2]).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_layers_are_skipped() {
        let streams: EventStreams = [
            stream("bars", "2020-05-01", &[(0.0, 0.0)]),
            stream("liquor", "2018-01-01", &[(50.0, 0.0)]),
        ]
        .into_iter()
        .collect();

        let mut rtm = RiskTerrain::default();
        rtm.fit(&streams, date("2020-05-31")).unwrap();
        assert_eq!(rtm.layer_names(), vec!["bars"]);
    }

    #[test]
    fn all_empty_layers_are_a_data_gap() {
        let streams: EventStreams = [
            stream("bars", "2018-01-01", &[(0.0, 0.0)]),
            stream("liquor", "2018-01-01", &[(50.0, 0.0)]),
        ]
        .into_iter()
        .collect();

        let mut rtm = RiskTerrain::default();
        assert!(matches!(
            rtm.fit(&streams, date("2020-05-31")),
            Err(EstimatorError::DataGap { ref stream, .. }) if stream == "bars+liquor"
        ));
        assert!(!rtm.is_fitted());
        assert!(rtm.predict(&[], date("2020-06-01")).is_err());
    }
}
