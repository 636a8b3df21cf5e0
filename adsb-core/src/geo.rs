//! Great-circle distance.

use crate::types::Coordinate;

const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance in nautical miles (haversine).
pub fn distance_nm(a: Coordinate, b: Coordinate) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_NM * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SFO: Coordinate = Coordinate {
        lat: 37.6189,
        lon: -122.3750,
    };
    const LAX: Coordinate = Coordinate {
        lat: 33.9425,
        lon: -118.4081,
    };
    const JFK: Coordinate = Coordinate {
        lat: 40.6413,
        lon: -73.7781,
    };

    fn within(actual: f64, expected: f64, pct: f64) -> bool {
        (actual - expected).abs() / expected <= pct / 100.0
    }

    #[test]
    fn test_same_point_is_zero() {
        for c in [SFO, LAX, JFK, Coordinate::new(0.0, 0.0), Coordinate::new(-89.9, 179.9)] {
            assert_eq!(distance_nm(c, c), 0.0);
        }
    }

    #[test]
    fn test_symmetric() {
        assert_eq!(distance_nm(SFO, JFK), distance_nm(JFK, SFO));
        assert_eq!(distance_nm(LAX, SFO), distance_nm(SFO, LAX));
    }

    #[test]
    fn test_known_airport_pairs() {
        // SFO-LAX ~293 nm, LAX-JFK ~2145 nm
        let d = distance_nm(SFO, LAX);
        assert!(within(d, 293.0, 0.5), "SFO-LAX should be ~293nm, got {d}");
        let d = distance_nm(LAX, JFK);
        assert!(within(d, 2145.0, 0.5), "LAX-JFK should be ~2145nm, got {d}");
    }

    #[test]
    fn test_antimeridian() {
        let a = Coordinate::new(0.0, 179.5);
        let b = Coordinate::new(0.0, -179.5);
        let d = distance_nm(a, b);
        assert!((d - 60.0).abs() < 0.5, "1 deg of equator is ~60nm, got {d}");
    }
}
