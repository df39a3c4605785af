#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Timestamped point events and date-sorted event streams.
//!
//! Events arrive already cleaned and projected into a planar coordinate
//! reference system (metres). A category label partitions them into
//! independent [`EventStream`]s, which the estimators and the walk-forward
//! evaluator slice by inclusive date windows.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// First day of the trailing window of `days` days ending on `last_date`.
/// `None` when the window is unbounded, including windows reaching back
/// past the earliest representable date.
#[must_use]
pub fn trailing_start(last_date: NaiveDate, days: Option<u32>) -> Option<NaiveDate> {
    days.and_then(|d| last_date.checked_sub_days(Days::new(u64::from(d.saturating_sub(1)))))
}

/// A planar coordinate in the shared reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Easting (metres).
    pub x: f64,
    /// Northing (metres).
    pub y: f64,
}

impl Coordinate {
    /// Creates a coordinate from its two components.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Squared Euclidean distance to `other`.
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }
}

/// A single occurrence (crime report, emergency call) with a date and a
/// location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable identifier from the source data, used to cache spatial unit
    /// assignments across runs.
    pub id: u64,
    /// Calendar date the event occurred.
    pub date: NaiveDate,
    /// Time of day, when the source records one.
    pub time: Option<NaiveTime>,
    /// Location in the planar reference system.
    pub coord: Coordinate,
    /// Free-form category label (e.g. `"burglary"`).
    pub category: String,
}

/// Events of one category (or group of categories), sorted by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStream {
    name: String,
    events: Vec<Event>,
}

impl EventStream {
    /// Builds a stream, sorting the events by date and time. Events sharing
    /// a timestamp keep their input order.
    #[must_use]
    pub fn new(name: impl Into<String>, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| (e.date, e.time));
        Self {
            name: name.into(),
            events,
        }
    }

    /// Returns the stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all events in timestamp order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of events in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the stream has no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Earliest and latest event dates, or `None` for an empty stream.
    #[must_use]
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.events.first()?.date, self.events.last()?.date))
    }

    /// Events dated inside the closed range `[start, end]`. A `start` of
    /// `None` means "from the beginning of the stream".
    #[must_use]
    pub fn window(&self, start: Option<NaiveDate>, end: NaiveDate) -> &[Event] {
        let lo = start.map_or(0, |s| self.events.partition_point(|e| e.date < s));
        let hi = self.events.partition_point(|e| e.date <= end);
        if lo >= hi { &[] } else { &self.events[lo..hi] }
    }

    /// Events in the trailing window of `days` days ending on `last_date`
    /// (both ends inclusive). `None` keeps everything up to `last_date`.
    #[must_use]
    pub fn trailing(&self, last_date: NaiveDate, days: Option<u32>) -> &[Event] {
        if days == Some(0) {
            return &[];
        }
        self.window(trailing_start(last_date, days), last_date)
    }

    /// Owned copy of [`Self::window`] under the same name.
    #[must_use]
    pub fn slice(&self, start: Option<NaiveDate>, end: NaiveDate) -> Self {
        Self {
            name: self.name.clone(),
            events: self.window(start, end).to_vec(),
        }
    }

    /// Coordinates of every event, in stream order.
    #[must_use]
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.events.iter().map(|e| e.coord).collect()
    }
}

/// Named event streams, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStreams {
    streams: BTreeMap<String, EventStream>,
}

impl EventStreams {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a single stream.
    #[must_use]
    pub fn single(stream: EventStream) -> Self {
        let mut streams = Self::new();
        streams.insert(stream);
        streams
    }

    /// Adds (or replaces) a stream under its own name.
    pub fn insert(&mut self, stream: EventStream) {
        self.streams.insert(stream.name.clone(), stream);
    }

    /// Splits raw events into one stream per category.
    #[must_use]
    pub fn partition_by_category(events: &[Event]) -> Self {
        let mut by_category: BTreeMap<&str, Vec<Event>> = BTreeMap::new();
        for event in events {
            by_category
                .entry(event.category.as_str())
                .or_default()
                .push(event.clone());
        }

        let mut streams = Self::new();
        for (category, events) in by_category {
            streams.insert(EventStream::new(category, events));
        }
        streams
    }

    /// Builds one stream from every event whose category is in
    /// `categories`. The stream name joins the categories with `+`.
    #[must_use]
    pub fn group(events: &[Event], categories: &[String]) -> EventStream {
        let wanted: BTreeSet<&str> = categories.iter().map(String::as_str).collect();
        let selected = events
            .iter()
            .filter(|e| wanted.contains(e.category.as_str()))
            .cloned()
            .collect();
        EventStream::new(categories.join("+"), selected)
    }

    /// Looks up a stream by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EventStream> {
        self.streams.get(name)
    }

    /// Iterates over the streams in name order.
    pub fn iter(&self) -> impl Iterator<Item = &EventStream> {
        self.streams.values()
    }

    /// Stream names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.streams.keys().map(String::as_str).collect()
    }

    /// Number of streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether there are no streams.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Total number of events across all streams.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.streams.values().map(EventStream::len).sum()
    }

    /// Earliest and latest event date over all streams.
    #[must_use]
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.streams
            .values()
            .filter_map(EventStream::date_range)
            .reduce(|(lo, hi), (s, e)| (lo.min(s), hi.max(e)))
    }

    /// Applies [`EventStream::slice`] to every stream.
    #[must_use]
    pub fn slice(&self, start: Option<NaiveDate>, end: NaiveDate) -> Self {
        Self {
            streams: self
                .streams
                .iter()
                .map(|(name, stream)| (name.clone(), stream.slice(start, end)))
                .collect(),
        }
    }
}

impl FromIterator<EventStream> for EventStreams {
    fn from_iter<I: IntoIterator<Item = EventStream>>(iter: I) -> Self {
        let mut streams = Self::new();
        for stream in iter {
            streams.insert(stream);
        }
        streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn event(id: u64, d: &str, category: &str) -> Event {
        Event {
            id,
            date: date(d),
            time: None,
            coord: Coordinate::new(0.0, 0.0),
            category: category.to_string(),
        }
    }

    #[test]
    fn stream_sorts_by_date() {
        let stream = EventStream::new(
            "burglary",
            vec![
                event(1, "2018-01-03", "burglary"),
                event(2, "2018-01-01", "burglary"),
                event(3, "2018-01-02", "burglary"),
            ],
        );
        let ids: Vec<u64> = stream.events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(
            stream.date_range(),
            Some((date("2018-01-01"), date("2018-01-03")))
        );
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let stream = EventStream::new(
            "x",
            (1..=9)
                .map(|d| event(d, &format!("2018-01-0{d}"), "x"))
                .collect(),
        );
        let w = stream.window(Some(date("2018-01-03")), date("2018-01-05"));
        let ids: Vec<u64> = w.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        assert_eq!(stream.window(None, date("2018-01-02")).len(), 2);
        assert!(
            stream
                .window(Some(date("2018-01-05")), date("2018-01-04"))
                .is_empty()
        );
    }

    #[test]
    fn trailing_window_covers_exactly_n_days() {
        let stream = EventStream::new(
            "x",
            (1..=9)
                .map(|d| event(d, &format!("2018-01-0{d}"), "x"))
                .collect(),
        );
        let w = stream.trailing(date("2018-01-08"), Some(3));
        let ids: Vec<u64> = w.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![6, 7, 8]);
        assert_eq!(stream.trailing(date("2018-01-08"), None).len(), 8);
        assert!(stream.trailing(date("2018-01-08"), Some(0)).is_empty());
    }

    #[test]
    fn trailing_window_longer_than_the_calendar_is_unbounded() {
        let stream = EventStream::new(
            "x",
            vec![event(1, "1900-01-01", "x"), event(2, "2018-01-01", "x")],
        );
        assert_eq!(trailing_start(date("2018-01-08"), Some(u32::MAX)), None);
        assert_eq!(stream.trailing(date("2018-01-08"), Some(u32::MAX)).len(), 2);
        assert_eq!(
            trailing_start(date("2018-01-08"), Some(8)),
            Some(date("2018-01-01"))
        );
    }

    #[test]
    fn partitions_and_groups_categories() {
        let events = vec![
            event(1, "2018-01-01", "burglary"),
            event(2, "2018-01-02", "theft"),
            event(3, "2018-01-03", "burglary"),
            event(4, "2018-01-04", "assault"),
        ];
        let streams = EventStreams::partition_by_category(&events);
        assert_eq!(streams.names(), vec!["assault", "burglary", "theft"]);
        assert_eq!(streams.get("burglary").map(EventStream::len), Some(2));
        assert_eq!(streams.total_events(), 4);

        let grouped =
            EventStreams::group(&events, &["burglary".to_string(), "theft".to_string()]);
        assert_eq!(grouped.name(), "burglary+theft");
        assert_eq!(grouped.len(), 3);
    }

    #[test]
    fn streams_date_range_spans_all_streams() {
        let events = vec![
            event(1, "2018-02-01", "a"),
            event(2, "2018-01-15", "b"),
            event(3, "2018-03-01", "b"),
        ];
        let streams = EventStreams::partition_by_category(&events);
        assert_eq!(
            streams.date_range(),
            Some((date("2018-01-15"), date("2018-03-01")))
        );
        assert_eq!(EventStreams::new().date_range(), None);
    }
}
