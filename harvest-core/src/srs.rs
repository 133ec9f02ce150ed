//! Spatial reference identifiers and the reprojections the harvester needs.
//!
//! Only three references are supported. EPSG:4326 (WGS 84) and EPSG:4674
//! (SIRGAS 2000) are geographic and differ by less than the precision of the
//! source data, so they are treated as coincident. EPSG:3857 is the
//! spherical Web Mercator projection.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;
use std::str::FromStr;

use geo::{Coord, Geometry, MapCoords};
use thiserror::Error;

/// Sphere radius used by Web Mercator, in metres.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude at which Web Mercator's square extent is cut off.
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Half the width of the Web Mercator extent, in metres.
const MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// An EPSG spatial reference code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Srid(u32);

/// Errors raised when parsing a spatial reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SridError {
    /// The text is not a recognised reference notation.
    #[error("unrecognised spatial reference `{0}`")]
    Unrecognised(String),
    /// The code is well-formed but not one the harvester can reproject.
    #[error("unsupported spatial reference EPSG:{0}")]
    Unsupported(u32),
}

/// Broad kind of a coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsFamily {
    /// Longitude/latitude in degrees.
    Geographic,
    /// Spherical Web Mercator metres.
    WebMercator,
}

impl Srid {
    /// WGS 84 geographic coordinates.
    pub const WGS84: Self = Self(4326);
    /// SIRGAS 2000 geographic coordinates.
    pub const SIRGAS_2000: Self = Self(4674);
    /// Spherical Web Mercator.
    pub const WEB_MERCATOR: Self = Self(3857);

    /// Validate an EPSG code.
    ///
    /// # Errors
    ///
    /// Returns [`SridError::Unsupported`] for codes outside the supported set.
    pub const fn new(code: u32) -> Result<Self, SridError> {
        match code {
            4326 | 4674 | 3857 => Ok(Self(code)),
            // Legacy alias for Web Mercator still emitted by some servers.
            900_913 => Ok(Self::WEB_MERCATOR),
            other => Err(SridError::Unsupported(other)),
        }
    }

    /// Numeric EPSG code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Coordinate system family.
    #[must_use]
    pub const fn family(self) -> CrsFamily {
        match self.0 {
            3857 => CrsFamily::WebMercator,
            _ => CrsFamily::Geographic,
        }
    }

    /// Value for the WFS `srsName` parameter.
    #[must_use]
    pub fn srs_name(self) -> String {
        format!("EPSG:{}", self.0)
    }

    /// Well-known text name used in the reference registry.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self.0 {
            4674 => "SIRGAS 2000",
            3857 => "WGS 84 / Pseudo-Mercator",
            _ => "WGS 84",
        }
    }
}

impl fmt::Display for Srid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Srid {
    type Err = SridError;

    /// Accept bare codes, `EPSG:n`, OGC URNs and the `opengis.net` URI form.
    ///
    /// ```
    /// use harvest_core::Srid;
    ///
    /// for text in ["4674", "EPSG:4674", "urn:ogc:def:crs:EPSG::4674",
    ///              "http://www.opengis.net/def/crs/EPSG/0/4674"] {
    ///     assert_eq!(text.parse::<Srid>(), Ok(Srid::SIRGAS_2000));
    /// }
    /// assert_eq!("urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Srid>(), Ok(Srid::WGS84));
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.eq_ignore_ascii_case("urn:ogc:def:crs:OGC:1.3:CRS84")
            || text.eq_ignore_ascii_case("CRS:84")
        {
            return Ok(Self::WGS84);
        }
        let code = text
            .rsplit([':', '/'])
            .next()
            .filter(|tail| !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|tail| tail.parse::<u32>().ok())
            .filter(|_| {
                let upper = text.to_ascii_uppercase();
                upper.bytes().all(|b| b.is_ascii_digit()) || upper.contains("EPSG")
            })
            .ok_or_else(|| SridError::Unrecognised(text.to_owned()))?;
        Self::new(code)
    }
}

/// Errors raised while reprojecting a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ReprojectError {
    /// A coordinate lies outside the source reference's valid domain.
    #[error("coordinate ({x}, {y}) lies outside the domain of {srid}")]
    OutOfDomain {
        /// Source reference.
        srid: Srid,
        /// Offending x ordinate.
        x: f64,
        /// Offending y ordinate.
        y: f64,
    },
}

/// Reproject `geometry` from `from` to `to`.
///
/// # Errors
///
/// Returns [`ReprojectError::OutOfDomain`] when any coordinate is not finite
/// or lies outside the source reference's domain.
///
/// # Examples
///
/// ```
/// use geo::{Geometry, Point};
/// use harvest_core::{Srid, reproject};
///
/// let meridian = Geometry::Point(Point::new(0.0, 0.0));
/// let Geometry::Point(p) = reproject(&meridian, Srid::SIRGAS_2000, Srid::WEB_MERCATOR)? else {
///     unreachable!("points map to points");
/// };
/// assert!(p.x().abs() < 1e-6 && p.y().abs() < 1e-6);
/// # Ok::<(), harvest_core::ReprojectError>(())
/// ```
pub fn reproject(
    geometry: &Geometry<f64>,
    from: Srid,
    to: Srid,
) -> Result<Geometry<f64>, ReprojectError> {
    let source = from.family();
    let target = to.family();
    geometry.try_map_coords(move |coord| {
        let geographic = match source {
            CrsFamily::Geographic => check_geographic(coord, from)?,
            CrsFamily::WebMercator => mercator_to_geographic(coord, from)?,
        };
        Ok(match target {
            CrsFamily::Geographic => geographic,
            CrsFamily::WebMercator => geographic_to_mercator(geographic),
        })
    })
}

fn check_geographic(coord: Coord<f64>, srid: Srid) -> Result<Coord<f64>, ReprojectError> {
    if (-180.0..=180.0).contains(&coord.x) && (-90.0..=90.0).contains(&coord.y) {
        Ok(coord)
    } else {
        Err(out_of_domain(coord, srid))
    }
}

fn mercator_to_geographic(coord: Coord<f64>, srid: Srid) -> Result<Coord<f64>, ReprojectError> {
    let limit = MERCATOR_HALF_EXTENT * (1.0 + 1e-9);
    if !(coord.x.is_finite() && coord.y.is_finite()) || coord.x.abs() > limit {
        return Err(out_of_domain(coord, srid));
    }
    let lon = (coord.x / EARTH_RADIUS).to_degrees().clamp(-180.0, 180.0);
    let lat = (2.0 * (coord.y / EARTH_RADIUS).exp().atan() - FRAC_PI_2).to_degrees();
    Ok(Coord { x: lon, y: lat })
}

fn geographic_to_mercator(coord: Coord<f64>) -> Coord<f64> {
    let lat = coord.y.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    Coord {
        x: EARTH_RADIUS * coord.x.to_radians(),
        y: EARTH_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

const fn out_of_domain(coord: Coord<f64>, srid: Srid) -> ReprojectError {
    ReprojectError::OutOfDomain {
        srid,
        x: coord.x,
        y: coord.y,
    }
}
