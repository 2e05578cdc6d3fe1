//! Geo-cell derivation
//!
//! A cell is `floor(lat * 100):floor(lng * 100)`, a grid of roughly
//! 1.1 km x 0.8 km at New York latitudes. Cells narrow in longitude toward
//! the poles, which is fine for a single metro area.

use common::GeoPoint;

/// Scaled-coordinate slack so `40.71` lands in cell 4071, not 4070
const EPSILON: f64 = 1e-9;

pub type CellId = String;

fn grid(value: f64) -> i64 {
    (value * 100.0 + EPSILON).floor() as i64
}

/// Cell containing `(lat, lng)`.
///
/// ```
/// assert_eq!(realtime::cell::cell_id(40.7128, -74.0060), "4071:-7401");
/// ```
pub fn cell_id(lat: f64, lng: f64) -> CellId {
    format!("{}:{}", grid(lat), grid(lng))
}

/// Cell containing `point`
pub fn cell_of(point: &GeoPoint) -> CellId {
    cell_id(point.lat, point.lng)
}
