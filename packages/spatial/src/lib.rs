#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial units and event aggregation.
//!
//! A [`SpatialUnitSet`] holds the grid cells or neighborhoods predictions are
//! made for. [`SpatialUnitAggregator`] indexes their envelopes in an R-tree,
//! assigns point events to units with point-in-polygon tests, and counts
//! events per unit for a date window. Assignments can be persisted in an
//! [`AssignmentCache`] and reused across runs.

pub mod aggregator;
pub mod cache;
pub mod unit;

use thiserror::Error;

pub use aggregator::{Assignment, SpatialUnitAggregator, UnitMatch};
pub use cache::AssignmentCache;
pub use unit::{SpatialUnit, SpatialUnitSet};

/// Errors that can occur while building units or persisting assignments.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// I/O error (cache file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `GeoJSON` parsing failed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// A geometry is missing, empty, or of the wrong type.
    #[error("Geometry error: {message}")]
    Geometry {
        /// Description of what went wrong.
        message: String,
    },

    /// Two units in one set share an identifier.
    #[error("Duplicate spatial unit id: {id}")]
    DuplicateUnit {
        /// The repeated identifier.
        id: String,
    },

    /// Grid parameters are invalid.
    #[error("Invalid grid: {message}")]
    InvalidGrid {
        /// Description of what went wrong.
        message: String,
    },
}
