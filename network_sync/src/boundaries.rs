//! Facility boundary polygons and the planar point-in-polygon test used to
//! assign aircraft to facilities.
//!
//! Boundaries are loaded once at startup from a JSON file of
//! `{ "id": "ZDV", "coords": [[lon, lat], ...] }` entries and never change
//! afterwards, so the index is shared read-only behind an `Arc`.
//!
//! The test is planar: latitude/longitude are treated as Cartesian `y`/`x`.
//! That is accurate enough for facility-sized polygons away from the poles and
//! the antimeridian, which the continental prefilter excludes anyway.

use crate::error::BoundaryError;
use serde::Deserialize;
use std::path::Path;
use tracing::{Level, debug, event_enabled, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    fn enclosing(points: &[Point]) -> Self {
        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min.latitude = min.latitude.min(p.latitude);
            min.longitude = min.longitude.min(p.longitude);
            max.latitude = max.latitude.max(p.latitude);
            max.longitude = max.longitude.max(p.longitude);
        }
        Self { min, max }
    }

    pub fn contains(&self, pt: Point) -> bool {
        pt.latitude >= self.min.latitude
            && pt.latitude <= self.max.latitude
            && pt.longitude >= self.min.longitude
            && pt.longitude <= self.max.longitude
    }
}

/// A simple polygon with its bounding box computed once at construction.
#[derive(Debug, Clone)]
pub struct Polygon {
    vertices: Vec<Point>,
    bbox: BoundingBox,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        let bbox = BoundingBox::enclosing(&vertices);
        Some(Self { vertices, bbox })
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub const fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn contains(&self, pt: Point) -> bool {
        point_in_polygon(pt, self)
    }
}

pub const fn bounding_box(polygon: &Polygon) -> BoundingBox {
    polygon.bbox
}

/// Ray-casting parity test. Points outside the cached bounding box are rejected
/// before any edge is looked at. Points exactly on an edge may land on either
/// side.
pub fn point_in_polygon(pt: Point, polygon: &Polygon) -> bool {
    if !polygon.bbox.contains(pt) {
        return false;
    }

    let verts = &polygon.vertices;
    let mut inside = false;
    // Start with the closing edge (last -> first); a ring that repeats its first
    // vertex just contributes one degenerate edge that never crosses.
    let mut j = verts.len() - 1;
    for (i, vi) in verts.iter().enumerate() {
        let vj = verts[j];
        if (vi.latitude > pt.latitude) != (vj.latitude > pt.latitude)
            && pt.longitude
                < (vj.longitude - vi.longitude) * (pt.latitude - vi.latitude)
                    / (vj.latitude - vi.latitude)
                    + vi.longitude
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

#[derive(Debug, Clone)]
pub struct FacilityBoundary {
    pub id: String,
    pub polygon: Polygon,
}

#[derive(Deserialize)]
struct RawFacility {
    id: String,
    coords: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct BoundaryIndex {
    facilities: Vec<FacilityBoundary>,
}

impl BoundaryIndex {
    pub fn new(facilities: Vec<FacilityBoundary>) -> Self {
        Self { facilities }
    }

    pub fn load(path: &Path) -> Result<Self, BoundaryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| BoundaryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::from_json(&raw)?;
        debug!(
            path = %path.display(),
            facilities = index.len(),
            "loaded facility boundaries"
        );
        Ok(index)
    }

    /// Parses boundary definitions. Coordinates are `[longitude, latitude]`.
    pub fn from_json(raw: &str) -> Result<Self, BoundaryError> {
        let raw_facilities: Vec<RawFacility> = serde_json::from_str(raw)?;
        let mut facilities = Vec::with_capacity(raw_facilities.len());

        for facility in raw_facilities {
            let mut vertices = Vec::with_capacity(facility.coords.len());
            for (index, coord) in facility.coords.iter().enumerate() {
                match coord.as_slice() {
                    [lon, lat] if lon.is_finite() && lat.is_finite() => {
                        vertices.push(Point::new(*lat, *lon));
                    }
                    _ => {
                        return Err(BoundaryError::InvalidCoordinate {
                            facility: facility.id,
                            index,
                        });
                    }
                }
            }

            let count = vertices.len();
            let polygon = Polygon::new(vertices).ok_or(BoundaryError::TooFewVertices {
                facility: facility.id.clone(),
                count,
            })?;
            facilities.push(FacilityBoundary {
                id: facility.id,
                polygon,
            });
        }

        Ok(Self { facilities })
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FacilityBoundary> {
        self.facilities.iter()
    }

    /// Returns the facility containing `pt`. When polygons overlap the last one
    /// in load order wins; this does not model overlapping airspace correctly.
    pub fn classify(&self, pt: Point) -> Option<&str> {
        let mut matched: Option<&str> = None;
        for facility in &self.facilities {
            if point_in_polygon(pt, &facility.polygon) {
                if let Some(previous) = matched
                    && event_enabled!(Level::TRACE)
                {
                    trace!(
                        previous,
                        current = facility.id,
                        latitude = pt.latitude,
                        longitude = pt.longitude,
                        "point falls inside overlapping facility boundaries"
                    );
                }
                matched = Some(&facility.id);
            }
        }
        matched
    }
}
