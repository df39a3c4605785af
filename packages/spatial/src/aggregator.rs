//! Event-to-unit assignment and per-unit counting.
//!
//! Unit envelopes live in an R-tree; each event point is tested against the
//! polygons whose envelope contains it. Points on a shared edge intersect
//! several units, in which case the first unit in set order wins.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use crime_risk_event_models::{Coordinate, Event, EventStream};
use geo::Intersects;
use rstar::{AABB, RTree, RTreeObject};

use crate::cache::AssignmentCache;
use crate::unit::SpatialUnitSet;

/// A unit envelope stored in the R-tree, pointing back into the unit set.
struct UnitEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for UnitEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Result of locating one point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitMatch {
    /// The point lies outside every unit.
    Outside,
    /// Exactly one unit contains the point.
    Unique(usize),
    /// Several units intersect the point (sorted by unit order).
    Ambiguous(Vec<usize>),
}

impl UnitMatch {
    /// Best-effort unit: the only match, or the first in set order.
    #[must_use]
    pub fn best(&self) -> Option<usize> {
        match self {
            Self::Outside => None,
            Self::Unique(i) => Some(*i),
            Self::Ambiguous(all) => all.first().copied(),
        }
    }
}

/// Event id → unit index mapping for one unit set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    units: BTreeMap<u64, Option<usize>>,
    unassigned: usize,
    ambiguous: usize,
}

impl Assignment {
    /// Unit assigned to an event: `None` if the event was never assigned,
    /// `Some(None)` if it lies outside every unit.
    #[must_use]
    pub fn unit_of(&self, event_id: u64) -> Option<Option<usize>> {
        self.units.get(&event_id).copied()
    }

    /// Number of assigned events (including those outside every unit).
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether no events were assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Events that matched no unit in the last fresh computation.
    #[must_use]
    pub const fn unassigned(&self) -> usize {
        self.unassigned
    }

    /// Events that matched more than one unit in the last fresh computation.
    #[must_use]
    pub const fn ambiguous(&self) -> usize {
        self.ambiguous
    }

    fn record(&mut self, event_id: u64, unit: Option<usize>) {
        self.units.insert(event_id, unit);
    }
}

/// Assigns events to spatial units and counts events per unit.
pub struct SpatialUnitAggregator {
    units: SpatialUnitSet,
    tree: RTree<UnitEntry>,
    positions: BTreeMap<String, usize>,
}

impl SpatialUnitAggregator {
    /// Builds the R-tree over the unit envelopes.
    #[must_use]
    pub fn new(units: SpatialUnitSet) -> Self {
        let entries = units
            .units()
            .iter()
            .enumerate()
            .map(|(index, unit)| UnitEntry {
                index,
                envelope: unit.envelope(),
            })
            .collect();
        let positions = units
            .units()
            .iter()
            .enumerate()
            .map(|(index, unit)| (unit.id().to_string(), index))
            .collect();

        log::info!(
            "Loaded {} spatial units of '{}' into spatial index",
            units.len(),
            units.name()
        );

        Self {
            units,
            tree: RTree::bulk_load(entries),
            positions,
        }
    }

    /// The indexed unit set.
    #[must_use]
    pub const fn units(&self) -> &SpatialUnitSet {
        &self.units
    }

    /// Finds every unit intersecting `coord`.
    #[must_use]
    pub fn locate(&self, coord: Coordinate) -> UnitMatch {
        let point = geo::Point::new(coord.x, coord.y);
        let query_env = AABB::from_point([coord.x, coord.y]);

        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| self.units.units()[entry.index].geometry().intersects(&point))
            .map(|entry| entry.index)
            .collect();
        hits.sort_unstable();

        match hits.len() {
            0 => UnitMatch::Outside,
            1 => UnitMatch::Unique(hits[0]),
            _ => UnitMatch::Ambiguous(hits),
        }
    }

    /// Assigns every event to its best-effort unit. Events outside every
    /// unit or on several units are reported with a warning; neither stops
    /// processing.
    #[must_use]
    pub fn assign(&self, events: &[Event]) -> Assignment {
        self.assign_fresh(events.iter())
    }

    /// Like [`Self::assign`], but reuses assignments stored in `cache` for
    /// this unit set and records the newly computed ones. Entries are keyed
    /// by [`SpatialUnitSet::cache_key`], so a set with the same name but
    /// different geometry starts from nothing.
    ///
    /// Cached entries that point to a unit id missing from the current set
    /// are recomputed.
    pub fn assign_cached(&self, cache: &mut AssignmentCache, events: &[Event]) -> Assignment {
        let key = self.units.cache_key();
        let mut assignment = Assignment::default();
        let mut fresh = Vec::new();

        if !cache.contains_unit_set(&key) {
            log::info!("No cached assignments for '{key}', computing all");
        }

        for event in events {
            match cache.get(&key, event.id) {
                Some(Some(unit_id)) => match self.positions.get(unit_id) {
                    Some(&index) => assignment.record(event.id, Some(index)),
                    None => fresh.push(event),
                },
                Some(None) => assignment.record(event.id, None),
                None => fresh.push(event),
            }
        }

        log::debug!(
            "Assignment cache for '{key}': {} hit(s), {} to compute",
            assignment.len(),
            fresh.len()
        );

        if !fresh.is_empty() {
            let computed = self.assign_fresh(fresh.into_iter());
            for (&event_id, &unit) in &computed.units {
                let unit_id = unit.map(|i| self.units.units()[i].id().to_string());
                cache.record(&key, event_id, unit_id);
                assignment.record(event_id, unit);
            }
            assignment.unassigned = computed.unassigned;
            assignment.ambiguous = computed.ambiguous;
        }

        assignment
    }

    fn assign_fresh<'a>(&self, events: impl Iterator<Item = &'a Event>) -> Assignment {
        let mut assignment = Assignment::default();

        for event in events {
            let found = self.locate(event.coord);
            match &found {
                UnitMatch::Outside => assignment.unassigned += 1,
                UnitMatch::Ambiguous(all) => {
                    assignment.ambiguous += 1;
                    log::trace!("Event {} intersects {} units", event.id, all.len());
                }
                UnitMatch::Unique(_) => {}
            }
            assignment.record(event.id, found.best());
        }

        if assignment.unassigned > 0 {
            log::warn!(
                "{} event(s) fall outside every unit of '{}'",
                assignment.unassigned,
                self.units.name()
            );
        }
        if assignment.ambiguous > 0 {
            log::warn!(
                "{} event(s) intersect more than one unit of '{}'; using the first match",
                assignment.ambiguous,
                self.units.name()
            );
        }

        assignment
    }

    /// Counts events per unit (in unit order). Events missing from
    /// `assignment` are located on the fly.
    #[must_use]
    pub fn count(&self, events: &[Event], assignment: &Assignment) -> Vec<u64> {
        let mut counts = vec![0_u64; self.units.len()];
        for event in events {
            let unit = assignment
                .unit_of(event.id)
                .unwrap_or_else(|| self.locate(event.coord).best());
            if let Some(index) = unit {
                counts[index] += 1;
            }
        }
        counts
    }

    /// Counts the events of `stream` dated inside `[start, end]`.
    #[must_use]
    pub fn count_between(
        &self,
        stream: &EventStream,
        assignment: &Assignment,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<u64> {
        self.count(stream.window(Some(start), end), assignment)
    }
}
