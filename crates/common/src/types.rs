//! Common types used across Orbit
//!
//! Drivers, their status, and the coordinates everything is keyed on.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean Earth radius used for great-circle distances, in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Unique identifier for drivers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub String);

impl DriverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DriverId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DriverId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DriverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Driver availability as recorded in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    /// Free to be matched
    Available,
    /// Claimed by a ride
    Busy,
}

impl DriverStatus {
    /// Wire form used in the driver state hash
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "AVAILABLE",
            DriverStatus::Busy => "BUSY",
        }
    }

    /// Parse the wire form. Unknown values are `None`, never `Available`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(DriverStatus::Available),
            "BUSY" => Some(DriverStatus::Busy),
            _ => None,
        }
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a point without validation
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Create a point, rejecting coordinates outside lat [-90, 90] / lng [-180, 180]
    pub fn validated(lat: f64, lng: f64) -> Result<Self> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    /// Check coordinate ranges
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::invalid_input(format!(
                "lat must be between -90 and 90, got {}",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::invalid_input(format!(
                "lng must be between -180 and 180, got {}",
                self.lng
            )));
        }
        Ok(())
    }

    /// Great-circle (haversine) distance to another point, in meters
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.lat, self.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ranges() {
        assert!(GeoPoint::validated(40.7128, -74.0060).is_ok());
        assert!(GeoPoint::validated(90.0, 180.0).is_ok());
        assert!(GeoPoint::validated(-90.0, -180.0).is_ok());
        assert!(GeoPoint::validated(90.1, 0.0).is_err());
        assert!(GeoPoint::validated(0.0, -180.5).is_err());
        assert!(GeoPoint::validated(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_distance() {
        let a = GeoPoint::new(40.7128, -74.0060);
        assert_eq!(a.distance_m(&a), 0.0);

        // Lower Manhattan to Times Square is roughly 5.3 km
        let b = GeoPoint::new(40.7580, -73.9855);
        let d = a.distance_m(&b);
        assert!(d > 5_000.0 && d < 5_600.0, "distance was {}", d);
        assert!((d - b.distance_m(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_driver_status_wire_form() {
        assert_eq!(DriverStatus::parse("AVAILABLE"), Some(DriverStatus::Available));
        assert_eq!(DriverStatus::parse("BUSY"), Some(DriverStatus::Busy));
        assert_eq!(DriverStatus::parse("available"), None);
        assert_eq!(DriverStatus::Busy.to_string(), "BUSY");
        assert_eq!(serde_json::to_string(&DriverStatus::Available).unwrap(), "\"AVAILABLE\"");
    }
}
