//! Loading events and spatial units for a run.

use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use crime_risk_event_models::{Coordinate, Event, EventStream, EventStreams};
use crime_risk_spatial::SpatialUnitSet;
use geo::{MultiPolygon, Rect, coord};
use serde::Deserialize;

use crate::EvaluationError;
use crate::config::{DataConfig, GridConfig};

/// One row of the events CSV.
#[derive(Debug, Deserialize)]
struct EventRecord {
    id: u64,
    date: NaiveDate,
    #[serde(default)]
    time: Option<NaiveTime>,
    x: f64,
    y: f64,
    category: String,
}

impl From<EventRecord> for Event {
    fn from(record: EventRecord) -> Self {
        Self {
            id: record.id,
            date: record.date,
            time: record.time,
            coord: Coordinate::new(record.x, record.y),
            category: record.category,
        }
    }
}

/// Reads events from CSV with the header `id,date,time,x,y,category`.
/// `time` may be empty.
///
/// # Errors
///
/// Returns an error if a row is malformed.
pub fn read_events<R: Read>(reader: R) -> Result<Vec<Event>, EvaluationError> {
    let mut csv = csv::Reader::from_reader(reader);
    let mut events = Vec::new();
    for record in csv.deserialize::<EventRecord>() {
        events.push(record?.into());
    }
    Ok(events)
}

/// Reads the events CSV at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a row is malformed.
pub fn load_events(path: &Path) -> Result<Vec<Event>, EvaluationError> {
    let events = read_events(std::fs::File::open(path)?)?;
    log::info!("Loaded {} event(s) from {}", events.len(), path.display());
    Ok(events)
}

/// The target stream: every event in one of the target categories.
#[must_use]
pub fn target_stream(data: &DataConfig, events: &[Event]) -> EventStream {
    EventStreams::group(events, &data.target)
}

/// Feature streams: one per configured feature category, or the target
/// stream alone when none are configured.
#[must_use]
pub fn feature_streams(data: &DataConfig, events: &[Event], target: &EventStream) -> EventStreams {
    if data.features.is_empty() {
        return EventStreams::single(target.clone());
    }
    data.features
        .iter()
        .map(|category| EventStreams::group(events, std::slice::from_ref(category)))
        .collect()
}

/// Builds the unit set described by `data`: polygons from `GeoJSON`, or a
/// grid over the configured bounds (or the extent of `events`).
///
/// # Errors
///
/// Returns an error if a file cannot be read, the geometry is invalid, or
/// a grid has no bounds and there are no events.
pub fn load_units(data: &DataConfig, events: &[Event]) -> Result<SpatialUnitSet, EvaluationError> {
    let name = data.unit_set_name();
    let units = match (&data.units, &data.grid) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(path)?;
            SpatialUnitSet::from_geojson(name, &text, data.unit_id_property.as_deref())?
        }
        (None, Some(grid)) => build_grid(name, grid, events)?,
        (None, None) => {
            return Err(EvaluationError::config(
                "one of data.units or data.grid is required",
            ));
        }
    };

    log::info!("Using {} spatial unit(s) from '{}'", units.len(), units.name());
    Ok(units)
}

fn build_grid(
    name: String,
    grid: &GridConfig,
    events: &[Event],
) -> Result<SpatialUnitSet, EvaluationError> {
    let bounds = match grid.bounds {
        Some([min_x, min_y, max_x, max_y]) => {
            Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
        }
        None => extent(events).ok_or_else(|| {
            EvaluationError::config("grid bounds are not set and there are no events")
        })?,
    };

    let boundary = match &grid.boundary {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let shapes = SpatialUnitSet::from_geojson("boundary", &text, None)?;
            Some(MultiPolygon(
                shapes
                    .units()
                    .iter()
                    .flat_map(|u| u.geometry().0.iter().cloned())
                    .collect(),
            ))
        }
        None => None,
    };

    Ok(SpatialUnitSet::grid(
        name,
        bounds,
        grid.side,
        boundary.as_ref(),
    )?)
}

fn extent(events: &[Event]) -> Option<Rect<f64>> {
    let first = events.first()?.coord;
    let (min, max) = events.iter().fold((first, first), |(lo, hi), e| {
        (
            Coordinate::new(lo.x.min(e.coord.x), lo.y.min(e.coord.y)),
            Coordinate::new(hi.x.max(e.coord.x), hi.y.max(e.coord.y)),
        )
    });
    Some(Rect::new(
        coord! { x: min.x, y: min.y },
        coord! { x: max.x, y: max.y },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &str = "id,date,time,x,y,category
1,2020-01-02,13:45:00,10.0,20.0,burglary
2,2020-01-03,,110.0,20.0,robbery
3,2020-01-01,08:00:00,150.0,180.0,burglary
";

    fn data(features: &[&str]) -> DataConfig {
        DataConfig {
            events: "events.csv".into(),
            units: None,
            unit_id_property: None,
            grid: Some(GridConfig {
                side: 100.0,
                bounds: None,
                boundary: None,
            }),
            target: vec!["burglary".to_string()],
            features: features.iter().map(ToString::to_string).collect(),
            assignment_cache: None,
            output_dir: None,
        }
    }

    #[test]
    fn reads_events_with_optional_time() {
        let events = read_events(EVENTS.as_bytes()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].time, NaiveTime::from_hms_opt(13, 45, 0));
        assert_eq!(events[1].time, None);
        assert_eq!(events[1].category, "robbery");
        assert_eq!(events[2].coord, Coordinate::new(150.0, 180.0));
    }

    #[test]
    fn malformed_rows_are_errors() {
        let bad = "id,date,time,x,y,category\n1,not-a-date,,0,0,burglary\n";
        assert!(matches!(read_events(bad.as_bytes()), Err(EvaluationError::Csv(_))));
    }

    #[test]
    fn target_and_feature_streams() {
        let events = read_events(EVENTS.as_bytes()).unwrap();

        let plain = data(&[]);
        let target = target_stream(&plain, &events);
        assert_eq!(target.len(), 2);
        assert_eq!(target.events()[0].id, 3);
        let features = feature_streams(&plain, &events, &target);
        assert_eq!(features.names(), vec!["burglary"]);

        let layered = data(&["robbery", "burglary"]);
        let features = feature_streams(&layered, &events, &target);
        assert_eq!(features.names(), vec!["burglary", "robbery"]);
        assert_eq!(features.get("robbery").map(EventStream::len), Some(1));
    }

    #[test]
    fn grid_defaults_to_the_event_extent() {
        let events = read_events(EVENTS.as_bytes()).unwrap();
        let units = load_units(&data(&[]), &events).unwrap();
        // extent 140 x 160 with 100 m cells -> 2 x 2
        assert_eq!(units.len(), 4);
        assert_eq!(units.name(), "grid_100");
    }
}
