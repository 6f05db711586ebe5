// Great-circle distance

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Haversine distance between two `(latitude, longitude)` points in degrees.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        assert_eq!(haversine_km((52.52, 13.40), (52.52, 13.40)), 0.0);
    }

    #[test]
    fn berlin_to_paris() {
        let d = haversine_km((52.5200, 13.4050), (48.8566, 2.3522));
        assert!((d - 878.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn symmetric() {
        let a = (40.0, -3.7);
        let b = (41.4, 2.17);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }
}
