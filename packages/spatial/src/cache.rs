//! Persisted event-to-unit assignments.
//!
//! Assignment is deterministic for a fixed unit set and event identity, so
//! results are kept per unit set name and reused across runs. The cache is
//! an explicit value handed to the aggregator by `&mut`, so only one writer
//! can touch it at a time. Entries are added or refreshed, never removed.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SpatialError;

/// Unit set name → event id → unit id (`None` = outside every unit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentCache {
    unit_sets: BTreeMap<String, BTreeMap<u64, Option<String>>>,
    #[serde(skip)]
    dirty: bool,
}

impl AssignmentCache {
    /// Loads a cache from a JSON file. A missing file yields an empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SpatialError> {
        if !path.exists() {
            log::info!(
                "No assignment cache at {}, starting empty",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let cache: Self = serde_json::from_str(&contents)?;
        log::info!(
            "Loaded assignment cache from {} ({} unit set(s))",
            path.display(),
            cache.unit_sets.len()
        );
        Ok(cache)
    }

    /// Writes the cache if it changed since it was loaded. The file is
    /// written next to `path` first and then renamed over it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails.
    pub fn save(&mut self, path: &Path) -> Result<(), SpatialError> {
        if !self.dirty {
            log::debug!("Assignment cache unchanged, not writing");
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(self)?)?;
        std::fs::rename(&tmp, path)?;
        self.dirty = false;

        log::info!("Saved assignment cache to {}", path.display());
        Ok(())
    }

    /// Cached unit for an event: `None` if unknown, `Some(None)` if the
    /// event was found outside every unit.
    #[must_use]
    pub fn get(&self, unit_set: &str, event_id: u64) -> Option<Option<&str>> {
        self.unit_sets
            .get(unit_set)?
            .get(&event_id)
            .map(Option::as_deref)
    }

    /// Records an assignment.
    pub fn record(&mut self, unit_set: &str, event_id: u64, unit_id: Option<String>) {
        self.unit_sets
            .entry(unit_set.to_string())
            .or_default()
            .insert(event_id, unit_id);
        self.dirty = true;
    }

    /// Whether any assignment exists for `unit_set`.
    #[must_use]
    pub fn contains_unit_set(&self, unit_set: &str) -> bool {
        self.unit_sets.contains_key(unit_set)
    }

    /// Number of cached events for `unit_set`.
    #[must_use]
    pub fn len(&self, unit_set: &str) -> usize {
        self.unit_sets.get(unit_set).map_or(0, BTreeMap::len)
    }

    /// Whether there are unsaved changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reads_back() {
        let mut cache = AssignmentCache::default();
        assert!(!cache.is_dirty());
        cache.record("grid_50", 10, Some("3".to_string()));
        cache.record("grid_50", 11, None);

        assert!(cache.is_dirty());
        assert!(cache.contains_unit_set("grid_50"));
        assert!(!cache.contains_unit_set("bnia_nbh"));
        assert_eq!(cache.get("grid_50", 10), Some(Some("3")));
        assert_eq!(cache.get("grid_50", 11), Some(None));
        assert_eq!(cache.get("grid_50", 12), None);
        assert_eq!(cache.len("grid_50"), 2);
    }

    #[test]
    fn saves_and_loads_json() {
        let dir = std::env::temp_dir().join(format!(
            "crime_risk_cache_test_{}",
            std::process::id()
        ));
        let path = dir.join("assignments.json");

        let mut cache = AssignmentCache::default();
        cache.record("grid_50", 1, Some("a".to_string()));
        cache.record("grid_50", 2, None);
        cache.save(&path).unwrap();
        assert!(!cache.is_dirty());

        let loaded = AssignmentCache::load(&path).unwrap();
        assert_eq!(loaded, cache);
        assert_eq!(loaded.get("grid_50", 1), Some(Some("a")));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_an_empty_cache() {
        let path = std::env::temp_dir().join("crime_risk_definitely_missing_cache.json");
        let cache = AssignmentCache::load(&path).unwrap();
        assert_eq!(cache.len("anything"), 0);
    }
}
