//! Spatial units (grid cells or neighborhoods) and unit sets.

use std::collections::BTreeSet;

use crime_risk_event_models::Coordinate;
use geo::{
    Area, BoundingRect, Centroid, CoordsIter, Intersects, MultiPolygon, Polygon, Rect, coord,
};
use geojson::GeoJson;
use rstar::AABB;
use sha2::{Digest, Sha256};

use crate::SpatialError;

/// A named polygon used as the unit of prediction and evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialUnit {
    id: String,
    geometry: MultiPolygon<f64>,
    centroid: Coordinate,
    area: f64,
}

impl SpatialUnit {
    /// Builds a unit, computing its centroid and planar area.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Geometry`] if the geometry is empty (no
    /// centroid can be computed).
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>) -> Result<Self, SpatialError> {
        let id = id.into();
        let centroid = geometry.centroid().ok_or_else(|| SpatialError::Geometry {
            message: format!("unit {id} has an empty geometry"),
        })?;
        let area = geometry.unsigned_area();

        Ok(Self {
            id,
            centroid: Coordinate::new(centroid.x(), centroid.y()),
            area,
            geometry,
        })
    }

    /// Stable identifier, unique within its unit set.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Polygon geometry.
    #[must_use]
    pub const fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// Centroid, used as the density query location.
    #[must_use]
    pub const fn centroid(&self) -> Coordinate {
        self.centroid
    }

    /// Planar area in squared CRS units (m²).
    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    pub(crate) fn envelope(&self) -> AABB<[f64; 2]> {
        compute_envelope(&self.geometry)
    }
}

/// A collection of spatial units that tile a shared reference area.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialUnitSet {
    name: String,
    units: Vec<SpatialUnit>,
    fingerprint: String,
}

impl SpatialUnitSet {
    /// Creates a unit set.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::DuplicateUnit`] if two units share an id.
    pub fn new(name: impl Into<String>, units: Vec<SpatialUnit>) -> Result<Self, SpatialError> {
        let mut seen = BTreeSet::new();
        for unit in &units {
            if !seen.insert(unit.id.as_str()) {
                return Err(SpatialError::DuplicateUnit {
                    id: unit.id.clone(),
                });
            }
        }

        let fingerprint = geometry_fingerprint(&units);
        Ok(Self {
            name: name.into(),
            units,
            fingerprint,
        })
    }

    /// Builds a regular square grid of side `side` covering `bounds`. When
    /// `clip` is given, only cells intersecting it are kept. Cells are
    /// numbered row by row from the south-west corner.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::InvalidGrid`] if `side` is not a positive
    /// finite number.
    pub fn grid(
        name: impl Into<String>,
        bounds: Rect<f64>,
        side: f64,
        clip: Option<&MultiPolygon<f64>>,
    ) -> Result<Self, SpatialError> {
        if !side.is_finite() || side <= 0.0 {
            return Err(SpatialError::InvalidGrid {
                message: format!("grid side must be > 0, got {side}"),
            });
        }

        let min = bounds.min();
        let cols = cell_count(bounds.width(), side);
        let rows = cell_count(bounds.height(), side);

        let mut units = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                #[allow(clippy::cast_precision_loss)]
                let (x0, y0) = (min.x + col as f64 * side, min.y + row as f64 * side);
                let cell = square(x0, y0, side);
                if clip.is_some_and(|boundary| !cell.intersects(boundary)) {
                    continue;
                }
                let id = units.len().to_string();
                units.push(SpatialUnit::new(id, MultiPolygon(vec![cell]))?);
            }
        }

        log::debug!(
            "Built {} grid cells ({rows} rows x {cols} cols, side={side})",
            units.len()
        );

        Self::new(name, units)
    }

    /// Parses a `GeoJSON` `FeatureCollection` of `Polygon`/`MultiPolygon`
    /// features. The unit id comes from `id_property` when given, otherwise
    /// from the feature's position in the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a feature collection, a
    /// feature has no polygon geometry, or ids collide.
    pub fn from_geojson(
        name: impl Into<String>,
        geojson_str: &str,
        id_property: Option<&str>,
    ) -> Result<Self, SpatialError> {
        let GeoJson::FeatureCollection(collection) = geojson_str.parse::<GeoJson>()? else {
            return Err(SpatialError::Geometry {
                message: "expected a GeoJSON FeatureCollection".to_string(),
            });
        };

        let mut units = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.into_iter().enumerate() {
            let id = match id_property {
                Some(key) => match feature.property(key) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(value) => value.to_string(),
                    None => {
                        return Err(SpatialError::Geometry {
                            message: format!("feature {index} has no '{key}' property"),
                        });
                    }
                },
                None => index.to_string(),
            };

            let Some(geometry) = feature.geometry else {
                return Err(SpatialError::Geometry {
                    message: format!("feature {id} has no geometry"),
                });
            };

            let geo_geom: geo::Geometry<f64> =
                geometry.try_into().map_err(|e: geojson::Error| SpatialError::Geometry {
                    message: format!("feature {id}: {e}"),
                })?;
            let polygon = match geo_geom {
                geo::Geometry::MultiPolygon(mp) => mp,
                geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
                _ => {
                    return Err(SpatialError::Geometry {
                        message: format!("feature {id} is not a polygon"),
                    });
                }
            };

            units.push(SpatialUnit::new(id, polygon)?);
        }

        Self::new(name, units)
    }

    /// Name of the unit set (e.g. `"grid_50"`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hex SHA-256 of the unit ids and vertices, in unit order. Two sets
    /// with the same fingerprint assign every point identically.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Key under which assignments to this set are cached: the name plus a
    /// fingerprint prefix.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}@{}", self.name, &self.fingerprint[..16])
    }

    /// Units in their stable order.
    #[must_use]
    pub fn units(&self) -> &[SpatialUnit] {
        &self.units
    }

    /// Number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the set has no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit centroids in unit order.
    #[must_use]
    pub fn centroids(&self) -> Vec<Coordinate> {
        self.units.iter().map(SpatialUnit::centroid).collect()
    }

    /// Unit areas in unit order.
    #[must_use]
    pub fn areas(&self) -> Vec<f64> {
        self.units.iter().map(SpatialUnit::area).collect()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn cell_count(extent: f64, side: f64) -> usize {
    ((extent / side).ceil() as usize).max(1)
}

/// Builds a square polygon from its south-west corner.
#[must_use]
pub fn square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
    Rect::new(coord! { x: x0, y: y0 }, coord! { x: x0 + side, y: y0 + side }).to_polygon()
}

fn geometry_fingerprint(units: &[SpatialUnit]) -> String {
    let mut hasher = Sha256::new();
    for unit in units {
        hasher.update(unit.id.as_bytes());
        hasher.update([0_u8]);
        for c in unit.geometry.coords_iter() {
            hasher.update(c.x.to_le_bytes());
            hasher.update(c.y.to_le_bytes());
        }
        hasher.update([0xff_u8]);
    }
    hex::encode(hasher.finalize())
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
