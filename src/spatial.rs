//! Spatial primitives and the geohash codec
//!
//! Geohashes are used purely as fixed-precision bucket keys. Besides encoding and
//! decoding single points, this module computes the covering set of a bounding box:
//! every cell at a given precision that intersects the box.

use crate::error::{PlaceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A geographic point in WGS84 degrees.
///
/// Note the field order: latitude first, the way geohashes are usually described.
/// GeoJSON positions use the opposite `[lon, lat]` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in decimal degrees (-90.0 to +90.0)
    pub lat: f64,
    /// Longitude in decimal degrees (-180.0 to +180.0)
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both coordinates are finite and inside WGS84 bounds
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Generate a geohash string for this point.
    ///
    /// ```rust
    /// use placestore::Point;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let sagrada_familia = Point::new(41.4036, 2.1744);
    /// assert_eq!(sagrada_familia.to_geohash(4)?, "sp3e");
    /// # Ok(())
    /// # }
    /// ```
    pub fn to_geohash(&self, precision: usize) -> Result<String> {
        encode(self.lat, self.lon, precision)
    }

    pub fn within_bounds(&self, bbox: &BoundingBox) -> bool {
        bbox.contains(self)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Bounding box in lat/lon degrees. Serializes as `{minLat, minLon, maxLat, maxLon}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Reject boxes a query cannot be answered for: non-finite corners or a
    /// minimum that is not strictly below its maximum.
    pub fn validate(&self) -> Result<()> {
        let corners = [self.min_lat, self.min_lon, self.max_lat, self.max_lon];
        if corners.iter().any(|v| !v.is_finite()) {
            return Err(PlaceError::validation("bounding box has non-finite corner"));
        }
        if self.min_lat >= self.max_lat || self.min_lon >= self.max_lon {
            return Err(PlaceError::validation(format!(
                "invalid bounding box: min ({}, {}) must be below max ({}, {})",
                self.min_lat, self.min_lon, self.max_lat, self.max_lon
            )));
        }
        Ok(())
    }

    /// Inclusive containment test
    pub fn contains(&self, point: &Point) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_lat < other.min_lat
            || self.min_lat > other.max_lat
            || self.max_lon < other.min_lon
            || self.min_lon > other.max_lon)
    }
}

/// Encode a point as a geohash of `precision` characters (1..=12).
pub fn encode(lat: f64, lon: f64, precision: usize) -> Result<String> {
    if !(1..=12).contains(&precision) {
        return Err(PlaceError::InvalidGeohash(format!(
            "precision {precision} outside 1..=12"
        )));
    }
    geohash::encode(geo::Coord { x: lon, y: lat }, precision)
        .map_err(|e| PlaceError::InvalidGeohash(e.to_string()))
}

/// Decode a geohash to the center of its cell.
pub fn decode(hash: &str) -> Result<Point> {
    let (coord, _, _) =
        geohash::decode(hash).map_err(|e| PlaceError::InvalidGeohash(e.to_string()))?;
    Ok(Point::new(coord.y, coord.x))
}

/// Decode a geohash to the bounds of its cell.
pub fn decode_bounds(hash: &str) -> Result<BoundingBox> {
    let rect =
        geohash::decode_bbox(hash).map_err(|e| PlaceError::InvalidGeohash(e.to_string()))?;
    Ok(BoundingBox::new(
        rect.min().y,
        rect.min().x,
        rect.max().y,
        rect.max().x,
    ))
}

/// Cells of a covering set, possibly capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellCovering {
    /// Cells to consult, row by row from the south-west corner
    pub cells: Vec<String>,
    /// Size of the full covering set before the cap was applied
    pub total: u64,
}

impl CellCovering {
    pub fn is_truncated(&self) -> bool {
        (self.cells.len() as u64) < self.total
    }
}

/// Number of grid columns and rows at a precision. Longitude receives the extra bit
/// when `5 * precision` is odd.
fn grid_dimensions(precision: usize) -> (u64, u64) {
    let bits = 5 * precision as u32;
    let lon_bits = bits.div_ceil(2);
    let lat_bits = bits / 2;
    (1u64 << lon_bits, 1u64 << lat_bits)
}

/// Grid column and row of the cell containing a point. Derived from the geohash crate's
/// own cell so boundary points land where `encode` would put them.
fn cell_index(lat: f64, lon: f64, precision: usize) -> Result<(u64, u64)> {
    let (cols, rows) = grid_dimensions(precision);
    let cell = decode_bounds(&encode(lat, lon, precision)?)?;
    let width = 360.0 / cols as f64;
    let height = 180.0 / rows as f64;
    let col = ((cell.min_lon + 180.0) / width).round() as u64;
    let row = ((cell.min_lat + 90.0) / height).round() as u64;
    Ok((col.min(cols - 1), row.min(rows - 1)))
}

/// Compute the geohash cells at `precision` intersecting a box, capped at `max_cells`.
///
/// Edge cells are always included: a box whose edge lies exactly on a cell boundary also
/// returns the neighbouring cell. Latitudes are clamped to the poles. A box whose
/// `min_lon` is greater than its `max_lon` is treated as crossing the anti-meridian and
/// covers both sides. When the set exceeds `max_cells` the returned cells are the first
/// `max_cells` in row-major order from the south-west and `total` reports the true size.
pub fn covering_cells(bbox: &BoundingBox, precision: usize, max_cells: usize) -> Result<CellCovering> {
    let clamp_lat = |v: f64| v.clamp(-90.0, 90.0);
    let clamp_lon = |v: f64| v.clamp(-180.0, 180.0);

    let (min_col, min_row) = cell_index(clamp_lat(bbox.min_lat), clamp_lon(bbox.min_lon), precision)?;
    let (max_col, max_row) = cell_index(clamp_lat(bbox.max_lat), clamp_lon(bbox.max_lon), precision)?;
    if min_row > max_row {
        return Ok(CellCovering {
            cells: Vec::new(),
            total: 0,
        });
    }

    let (cols, rows) = grid_dimensions(precision);
    let columns: Vec<(u64, u64)> = if min_col <= max_col {
        vec![(min_col, max_col)]
    } else {
        vec![(min_col, cols - 1), (0, max_col)]
    };
    let col_count: u64 = columns.iter().map(|(lo, hi)| hi - lo + 1).sum();
    let total = col_count * (max_row - min_row + 1);

    let width = 360.0 / cols as f64;
    let height = 180.0 / rows as f64;
    let capacity = total.min(max_cells as u64) as usize;
    let mut cells = Vec::with_capacity(capacity);

    'rows: for row in min_row..=max_row {
        let lat = -90.0 + (row as f64 + 0.5) * height;
        for &(lo, hi) in &columns {
            for col in lo..=hi {
                if cells.len() >= max_cells {
                    break 'rows;
                }
                let lon = -180.0 + (col as f64 + 0.5) * width;
                cells.push(encode(lat, lon, precision)?);
            }
        }
    }

    Ok(CellCovering { cells, total })
}
