//! Prospective hot-spotting (Bower et al.): nearby recent events raise the
//! risk of a location, with contributions decaying stepwise in distance and
//! in weeks of age.

use chrono::NaiveDate;
use crime_risk_event_models::{Coordinate, EventStreams};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::{
    DEFAULT_TIME_WINDOW_DAYS, EstimatorError, RiskEstimator, check_positive, check_time_window,
    single_stream,
};

/// Default search radius.
pub const DEFAULT_BANDWIDTH: f64 = 400.0;

type EventPoint = GeomWithData<[f64; 2], NaiveDate>;

/// Distance/time decay estimator over an R-tree of past event locations.
#[derive(Debug, Clone)]
pub struct Bower {
    grid_size: f64,
    bandwidth: f64,
    time_window_days: Option<u32>,
    index: Option<RTree<EventPoint>>,
}

impl Bower {
    /// Creates an unfit estimator.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Configuration`] if `grid_size` or
    /// `bandwidth` is not positive or the window is zero days long.
    pub fn new(
        grid_size: f64,
        bandwidth: f64,
        time_window_days: Option<u32>,
    ) -> Result<Self, EstimatorError> {
        check_positive("Bower grid size", grid_size)?;
        check_positive("Bower bandwidth", bandwidth)?;
        check_time_window(time_window_days)?;
        Ok(Self {
            grid_size,
            bandwidth,
            time_window_days,
            index: None,
        })
    }

    /// Creates an unfit estimator with the default radius and window.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Configuration`] if `grid_size` is not
    /// positive.
    pub fn with_grid_size(grid_size: f64) -> Result<Self, EstimatorError> {
        Self::new(grid_size, DEFAULT_BANDWIDTH, Some(DEFAULT_TIME_WINDOW_DAYS))
    }

    /// Number of indexed events, `0` when unfit.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.index.as_ref().map_or(0, RTree::size)
    }

    fn risk_at(&self, index: &RTree<EventPoint>, location: &Coordinate, as_of: NaiveDate) -> f64 {
        let step = self.grid_size / 2.0;
        let query = [location.x, location.y];

        index
            .locate_within_distance(query, self.bandwidth * self.bandwidth)
            .filter_map(|point| {
                let days = (as_of - point.data).num_days();
                if days < 0 {
                    return None;
                }
                let [x, y] = *point.geom();
                let distance = (x - location.x).hypot(y - location.y);
                let distance_decay = 1.0 / ((distance / step).floor() + 1.0);
                #[allow(clippy::cast_precision_loss)]
                let time_decay = 1.0 / ((days / 7) as f64 + 1.0);
                Some(distance_decay * time_decay)
            })
            .sum()
    }
}

impl RiskEstimator for Bower {
    fn name(&self) -> &'static str {
        "bower"
    }

    fn is_fitted(&self) -> bool {
        self.index.is_some()
    }

    fn reset(&mut self) {
        self.index = None;
    }

    fn fit(&mut self, streams: &EventStreams, as_of: NaiveDate) -> Result<(), EstimatorError> {
        self.reset();
        let stream = single_stream(self.name(), streams)?;

        let points: Vec<EventPoint> = stream
            .trailing(as_of, self.time_window_days)
            .iter()
            .map(|e| GeomWithData::new([e.coord.x, e.coord.y], e.date))
            .collect();

        if points.is_empty() {
            log::debug!("Bower fit on an empty '{}' window ending {as_of}", stream.name());
        } else {
            log::debug!(
                "Bower fit on {} '{}' event(s) up to {as_of}",
                points.len(),
                stream.name()
            );
        }

        self.index = Some(RTree::bulk_load(points));
        Ok(())
    }

    fn predict(
        &self,
        locations: &[Coordinate],
        as_of: NaiveDate,
    ) -> Result<Vec<f64>, EstimatorError> {
        let index = self.index.as_ref().ok_or(EstimatorError::Unfitted {
            estimator: self.name(),
        })?;
        Ok(locations
            .iter()
            .map(|loc| self.risk_at(index, loc, as_of))
            .collect())
    }
}

impl std::fmt::Display for Bower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bower (grid_size={}, bandwidth={}, ",
            self.grid_size, self.bandwidth
        )?;
        match self.time_window_days {
            Some(days) => write!(f, "window={days} days)"),
            None => write!(f, "full history)"),
        }
    }
}
