//! Great-circle math on WGS84 coordinates
//!
//! Pure functions, no state. All inputs are range-checked so that a bad
//! sample from a client surfaces as [`EngineError::InvalidCoordinate`]
//! instead of a silently wrong distance.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    /// Build a validated position
    pub fn new(lat: f64, lng: f64) -> EngineResult<Self> {
        let position = Self { lat, lng };
        position.validate()?;
        Ok(position)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(EngineError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

/// Circular region: center plus radius in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Position,
    pub radius_m: f64,
}

impl Circle {
    pub fn new(center: Position, radius_m: f64) -> EngineResult<Self> {
        center.validate()?;
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "radius must be a non-negative number of meters, got {radius_m}"
            )));
        }
        Ok(Self { center, radius_m })
    }
}

/// Haversine distance between two positions, in meters
pub fn distance_meters(a: Position, b: Position) -> EngineResult<f64> {
    a.validate()?;
    b.validate()?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // clamp guards asin against rounding just above 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    Ok(EARTH_RADIUS_M * c)
}

/// Whether `point` lies inside `circle`; the boundary counts as inside
pub fn contains(circle: &Circle, point: Position) -> EngineResult<bool> {
    Ok(distance_meters(circle.center, point)? <= circle.radius_m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng).unwrap()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        for (lat, lng) in [(0.0, 0.0), (17.458, 78.3974), (-90.0, 180.0), (89.9, -179.9)] {
            assert_eq!(distance_meters(pos(lat, lng), pos(lat, lng)).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (pos(17.452, 78.3974), pos(17.458, 78.3974)),
            (pos(51.5074, -0.1278), pos(48.8566, 2.3522)),
            (pos(-33.8688, 151.2093), pos(35.6762, 139.6503)),
        ];
        for (a, b) in pairs {
            let ab = distance_meters(a, b).unwrap();
            let ba = distance_meters(b, a).unwrap();
            assert!((ab - ba).abs() < 1e-6, "{ab} != {ba}");
        }
    }

    #[test]
    fn test_known_distances() {
        // London to Paris is about 343.9 km
        let d = distance_meters(pos(51.5074, -0.1278), pos(48.8566, 2.3522)).unwrap();
        assert!((d - 343_900.0).abs() < 1_000.0, "got {d}");

        // one thousandth of a degree of latitude is about 111 m
        let d = distance_meters(pos(17.457, 78.3974), pos(17.458, 78.3974)).unwrap();
        assert!((d - 111.2).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_meters(pos(0.0, 0.0), pos(0.0, 180.0)).unwrap();
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        let bad = [
            Position { lat: 90.1, lng: 0.0 },
            Position { lat: -91.0, lng: 0.0 },
            Position { lat: 0.0, lng: 180.5 },
            Position { lat: f64::NAN, lng: 0.0 },
            Position { lat: 0.0, lng: f64::INFINITY },
        ];
        for p in bad {
            let err = distance_meters(p, pos(0.0, 0.0)).unwrap_err();
            assert!(matches!(err, EngineError::InvalidCoordinate { .. }));
            assert!(Position::new(p.lat, p.lng).is_err());
        }
    }

    #[test]
    fn test_contains_boundary_is_inclusive() {
        let center = pos(17.458, 78.3974);
        let edge = pos(17.457, 78.3974);
        let d = distance_meters(center, edge).unwrap();

        let exact = Circle::new(center, d).unwrap();
        assert!(contains(&exact, edge).unwrap());

        let smaller = Circle::new(center, d - 0.01).unwrap();
        assert!(!contains(&smaller, edge).unwrap());
    }

    #[test]
    fn test_circle_rejects_negative_radius() {
        assert!(Circle::new(pos(0.0, 0.0), -1.0).is_err());
        assert!(Circle::new(pos(0.0, 0.0), f64::NAN).is_err());
        assert!(Circle::new(pos(0.0, 0.0), 0.0).is_ok());
    }
}
