//! Geometry validation, repair and reprojection.
//!
//! Every record leaving the normaliser satisfies [`Validation::is_valid`] in
//! the harvest's target reference. Geometries that cannot be brought there
//! are dropped and counted, never passed on.

use geo::{
    Area, BooleanOps, Coord, Geometry, GeometryCollection, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon, RemoveRepeatedPoints, Validation,
};
use log::{debug, warn};
use thiserror::Error;

use crate::{DecodedPage, FeatureRecord, HarvestContext, ReprojectError, Srid, reproject};

/// Reasons a geometry was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryRepairError {
    /// Repair could not produce a valid geometry.
    #[error("geometry is invalid and could not be repaired")]
    Unrepairable,
    /// Coordinates fell outside the source reference's domain.
    #[error(transparent)]
    Reproject(#[from] ReprojectError),
    /// The reprojected geometry was invalid and could not be repaired.
    #[error("geometry became invalid after reprojection to {0}")]
    InvalidAfterReprojection(Srid),
}

/// Output of [`GeometryNormalizer::normalize_page`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Valid records in the target reference.
    pub records: Vec<FeatureRecord>,
    /// Geometries that needed repair and were kept.
    pub repaired: u64,
    /// Features dropped, including those discarded during decoding.
    pub dropped: u64,
}

/// A geometry that passed normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Valid geometry in the target reference.
    pub geometry: Geometry<f64>,
    /// Whether repair was needed.
    pub repaired: bool,
}

/// Validates, repairs and reprojects decoded features.
#[derive(Debug, Clone)]
pub struct GeometryNormalizer {
    context: HarvestContext,
    target: Srid,
}

impl GeometryNormalizer {
    /// Normalise into `target` and log against `context`.
    #[must_use]
    pub const fn new(context: HarvestContext, target: Srid) -> Self {
        Self { context, target }
    }

    /// Reference every output geometry is expressed in.
    #[must_use]
    pub const fn target(&self) -> Srid {
        self.target
    }

    /// Normalise a single geometry expressed in `source`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryRepairError`] when no valid geometry in the target
    /// reference can be produced.
    ///
    /// # Examples
    ///
    /// ```
    /// use geo::{Coord, Geometry, MultiPolygon, Rect, Validation};
    /// use harvest_core::{GeometryNormalizer, HarvestContext, Srid};
    ///
    /// let square = |x: f64| Rect::new(Coord { x, y: 0.0 }, Coord { x: x + 2.0, y: 2.0 }).to_polygon();
    /// // Two parts overlapping on [1, 2] x [0, 2].
    /// let overlapping = MultiPolygon::new(vec![square(0.0), square(1.0)]);
    /// let normalizer = GeometryNormalizer::new(HarvestContext::new("ws", "layer"), Srid::WGS84);
    /// let out = normalizer.normalize(Geometry::MultiPolygon(overlapping), Srid::SIRGAS_2000)?;
    /// assert!(out.repaired);
    /// assert!(out.geometry.is_valid());
    /// # Ok::<(), harvest_core::GeometryRepairError>(())
    /// ```
    pub fn normalize(
        &self,
        geometry: Geometry<f64>,
        source: Srid,
    ) -> Result<Normalized, GeometryRepairError> {
        let (valid, mut repaired) = if geometry.is_valid() {
            (geometry, false)
        } else {
            (
                make_valid(&geometry).ok_or(GeometryRepairError::Unrepairable)?,
                true,
            )
        };
        if source == self.target {
            return Ok(Normalized {
                geometry: valid,
                repaired,
            });
        }
        let projected = reproject(&valid, source, self.target)?;
        if projected.is_valid() {
            return Ok(Normalized {
                geometry: projected,
                repaired,
            });
        }
        let fixed = make_valid(&projected)
            .ok_or(GeometryRepairError::InvalidAfterReprojection(self.target))?;
        repaired = true;
        Ok(Normalized {
            geometry: fixed,
            repaired,
        })
    }

    /// Normalise every feature of a decoded page.
    ///
    /// Dropped features are logged as warnings and counted; the batch keeps
    /// the page's feature order.
    #[must_use]
    pub fn normalize_page(&self, page: DecodedPage) -> NormalizedBatch {
        let mut batch = NormalizedBatch {
            records: Vec::with_capacity(page.features.len()),
            repaired: 0,
            dropped: page.discarded,
        };
        for feature in page.features {
            match self.normalize(feature.geometry, page.source_srid) {
                Ok(normalized) => {
                    if normalized.repaired {
                        debug!("{} repaired geometry of feature {}", self.context, feature.id);
                        batch.repaired += 1;
                    }
                    batch.records.push(FeatureRecord {
                        id: feature.id,
                        attributes: feature.attributes,
                        geometry: normalized.geometry,
                    });
                }
                Err(err) => {
                    warn!("{} dropping feature {}: {err}", self.context, feature.id);
                    batch.dropped += 1;
                }
            }
        }
        batch
    }
}

/// Attempt to turn an invalid geometry into a valid one.
///
/// Non-finite coordinates and repeated points are removed, degenerate rings
/// and lines are discarded, and polygonal parts are unioned so that
/// self-intersections and overlaps resolve into valid rings. Returns `None`
/// when nothing valid remains.
///
/// ```
/// use geo::{Geometry, LineString, Validation};
/// use harvest_core::make_valid;
///
/// let repeated = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (0.0, 0.0)]));
/// assert!(!repeated.is_valid());
/// assert_eq!(make_valid(&repeated), None);
/// ```
#[must_use]
pub fn make_valid(geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    repair(geometry).filter(Validation::is_valid)
}

fn repair(geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(point) => is_finite(point.0).then_some(Geometry::Point(*point)),
        Geometry::MultiPoint(points) => {
            let kept: Vec<Point<f64>> = points.iter().filter(|p| is_finite(p.0)).copied().collect();
            (!kept.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(kept)))
        }
        Geometry::Line(line) => {
            repair_line(&LineString::new(vec![line.start, line.end])).map(Geometry::LineString)
        }
        Geometry::LineString(line) => repair_line(line).map(Geometry::LineString),
        Geometry::MultiLineString(lines) => {
            let kept: Vec<LineString<f64>> = lines.iter().filter_map(repair_line).collect();
            (!kept.is_empty()).then(|| Geometry::MultiLineString(MultiLineString::new(kept)))
        }
        Geometry::Polygon(polygon) => repair_polygons(std::slice::from_ref(polygon)),
        Geometry::MultiPolygon(polygons) => repair_polygons(&polygons.0),
        Geometry::Rect(rect) => repair_polygons(&[rect.to_polygon()]),
        Geometry::Triangle(triangle) => repair_polygons(&[triangle.to_polygon()]),
        Geometry::GeometryCollection(collection) => {
            let kept: Vec<Geometry<f64>> = collection
                .iter()
                .filter_map(|member| {
                    if member.is_valid() {
                        Some(member.clone())
                    } else {
                        repair(member)
                    }
                })
                .collect();
            (!kept.is_empty()).then(|| Geometry::GeometryCollection(GeometryCollection::from(kept)))
        }
    }
}

const fn is_finite(coord: Coord<f64>) -> bool {
    coord.x.is_finite() && coord.y.is_finite()
}

fn finite_coords(line: &LineString<f64>) -> LineString<f64> {
    LineString::new(line.coords().copied().filter(|c| is_finite(*c)).collect())
}

fn repair_line(line: &LineString<f64>) -> Option<LineString<f64>> {
    let cleaned = finite_coords(line).remove_repeated_points();
    (cleaned.0.len() >= 2).then_some(cleaned)
}

fn repair_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut cleaned = finite_coords(ring).remove_repeated_points();
    cleaned.close();
    // A closed ring needs three distinct vertices plus the closing one.
    (cleaned.0.len() >= 4).then_some(cleaned)
}

fn repair_polygon(polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = repair_ring(polygon.exterior())?;
    let interiors = polygon.interiors().iter().filter_map(repair_ring).collect();
    Some(Polygon::new(exterior, interiors))
}

fn repair_polygons(polygons: &[Polygon<f64>]) -> Option<Geometry<f64>> {
    let cleaned: Vec<Polygon<f64>> = polygons.iter().filter_map(repair_polygon).collect();
    if cleaned.is_empty() {
        return None;
    }
    // Union part by part: each part is resolved under the even-odd rule on
    // its own, and overlaps between parts merge instead of cancelling.
    let merged = cleaned.iter().fold(MultiPolygon::new(Vec::new()), |acc, part| {
        acc.union(&MultiPolygon::new(vec![part.clone()]))
    });
    let mut parts: Vec<Polygon<f64>> = merged
        .0
        .into_iter()
        .filter(|p| p.unsigned_area() > 0.0)
        .collect();
    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(parts))),
    }
}
