use crate::error::{PlaceError, Result};
use crate::spatial::Point;
use geo::Centroid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A GeoJSON position: `[longitude, latitude]`, optionally followed by altitude.
pub type Position = Vec<f64>;

/// The geometries a place may carry, in GeoJSON shape:
/// `{"type": "Point", "coordinates": [lon, lat]}` and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    /// Exterior ring followed by any holes
    Polygon(Vec<Vec<Position>>),
}

impl Geometry {
    /// Convenience constructor for a point from lat/lon order
    pub fn point(lat: f64, lon: f64) -> Self {
        Geometry::Point(vec![lon, lat])
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
        }
    }

    /// Check coordinate shape and ranges.
    pub fn validate(&self) -> Result<()> {
        match self {
            Geometry::Point(position) => {
                to_coord(position)?;
            }
            Geometry::LineString(positions) => {
                if positions.len() < 2 {
                    return Err(PlaceError::validation(
                        "LineString needs at least 2 positions",
                    ));
                }
                positions.iter().try_for_each(|p| to_coord(p).map(drop))?;
            }
            Geometry::Polygon(rings) => {
                if rings.is_empty() {
                    return Err(PlaceError::validation("Polygon has no exterior ring"));
                }
                for ring in rings {
                    if ring.len() < 3 {
                        return Err(PlaceError::validation(
                            "Polygon ring needs at least 3 positions",
                        ));
                    }
                    ring.iter().try_for_each(|p| to_coord(p).map(drop))?;
                }
            }
        }
        Ok(())
    }

    /// The point used to place this geometry in the spatial index: the point itself, the
    /// length-weighted centroid of a line, or the area-weighted centroid of a polygon
    /// (holes subtracted). Degenerate lines and polygons fall back to the centroid of
    /// their lower-dimensional shape.
    pub fn representative_point(&self) -> Result<Point> {
        self.validate()?;

        let centroid = match self {
            Geometry::Point(position) => {
                let c = to_coord(position)?;
                return Ok(Point::new(c.y, c.x));
            }
            Geometry::LineString(positions) => to_line_string(positions)?.centroid(),
            Geometry::Polygon(rings) => {
                let mut rings = rings.iter().map(|r| to_line_string(r));
                let exterior = rings
                    .next()
                    .ok_or_else(|| PlaceError::validation("Polygon has no exterior ring"))??;
                let interiors = rings.collect::<Result<Vec<_>>>()?;
                geo::Polygon::new(exterior, interiors).centroid()
            }
        };

        let centroid = centroid.ok_or_else(|| {
            PlaceError::validation(format!("{} has no centroid", self.kind()))
        })?;
        Ok(Point::new(centroid.y(), centroid.x()))
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Geometry::Point(p) => write!(f, "Point({p:?})"),
            Geometry::LineString(ps) => write!(f, "LineString({} positions)", ps.len()),
            Geometry::Polygon(rings) => write!(f, "Polygon({} rings)", rings.len()),
        }
    }
}

fn to_coord(position: &[f64]) -> Result<geo::Coord<f64>> {
    let [lon, lat] = match position {
        [lon, lat, ..] => [*lon, *lat],
        _ => {
            return Err(PlaceError::validation(format!(
                "position needs [lon, lat], got {} values",
                position.len()
            )));
        }
    };
    if !Point::new(lat, lon).is_valid() {
        return Err(PlaceError::validation(format!(
            "position [{lon}, {lat}] is outside WGS84 bounds"
        )));
    }
    Ok(geo::Coord { x: lon, y: lat })
}

fn to_line_string(positions: &[Position]) -> Result<geo::LineString<f64>> {
    let coords = positions
        .iter()
        .map(|p| to_coord(p))
        .collect::<Result<Vec<_>>>()?;
    Ok(geo::LineString::new(coords))
}
