use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and inside the WGS84 lat/lng ranges. Distance results are only
    /// meaningful for valid points, so callers check this first.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance in meters between two points.
pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    // clamp: rounding can push h slightly above 1 for antipodal points
    let h = ((d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2))
        .clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_to_self_is_zero() {
        let points = [
            GeoPoint::new(37.7250, -8.7830),
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(-89.9, 179.9),
        ];
        for p in points {
            assert_eq!(haversine_meters(&p, &p), 0.0);
        }
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (GeoPoint::new(37.7250, -8.7830), GeoPoint::new(37.7251, -8.7831)),
            (GeoPoint::new(38.7223, -9.1393), GeoPoint::new(41.1579, -8.6291)),
            (GeoPoint::new(10.0, 170.0), GeoPoint::new(-10.0, -170.0)),
        ];
        for (a, b) in pairs {
            let ab = haversine_meters(&a, &b);
            let ba = haversine_meters(&b, &a);
            assert!((ab - ba).abs() < 1e-6, "{ab} != {ba}");
        }
    }

    #[test]
    fn test_known_distance_lisbon_porto() {
        let lisbon = GeoPoint::new(38.7223, -9.1393);
        let porto = GeoPoint::new(41.1579, -8.6291);
        let d = haversine_meters(&lisbon, &porto);
        // ~274 km
        assert!((d - 274_000.0).abs() < 2_000.0, "got {d}");
    }

    #[test]
    fn test_small_offset_is_meters() {
        let a = GeoPoint::new(37.7250, -8.7830);
        let b = GeoPoint::new(37.7251, -8.7831);
        let d = haversine_meters(&a, &b);
        assert!(d > 10.0 && d < 20.0, "got {d}");
    }

    #[test]
    fn test_antipodal_is_finite() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 180.0);
        let d = haversine_meters(&a, &b);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_is_valid() {
        assert!(GeoPoint::new(37.7, -8.7).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
    }
}
