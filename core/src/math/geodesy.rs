//! WGS-84 geodetic to earth-centred, earth-fixed conversion.

use crate::dataset::Fix;

pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257_223_563;

/// Converts longitude/latitude in degrees and ellipsoidal height in metres to
/// ECEF `[x, y, z]` metres.
pub fn geodetic_to_ecef(lon_deg: f64, lat_deg: f64, hgt: f64) -> [f64; 3] {
    let e2 = WGS84_FLATTENING * (2.0 - WGS84_FLATTENING);
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    let prime_vertical = WGS84_SEMI_MAJOR_AXIS / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    [
        (prime_vertical + hgt) * cos_lat * cos_lon,
        (prime_vertical + hgt) * cos_lat * sin_lon,
        (prime_vertical * (1.0 - e2) + hgt) * sin_lat,
    ]
}

/// Straight-line distance between consecutive fixes, one entry per pair.
pub fn step_distances(fixes: &[Fix]) -> Vec<f64> {
    let points: Vec<[f64; 3]> = fixes
        .iter()
        .map(|fix| geodetic_to_ecef(fix.lon, fix.lat, fix.hgt))
        .collect();

    points
        .windows(2)
        .map(|pair| {
            let [x0, y0, z0] = pair[0];
            let [x1, y1, z1] = pair[1];
            ((x1 - x0).powi(2) + (y1 - y0).powi(2) + (z1 - z0).powi(2)).sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::epoch;

    #[test]
    fn equator_prime_meridian_lies_on_x_axis() {
        let [x, y, z] = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert!((x - WGS84_SEMI_MAJOR_AXIS).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
        assert!(z.abs() < 1e-6);
    }

    #[test]
    fn pole_uses_semi_minor_axis() {
        let [_, _, z] = geodetic_to_ecef(0.0, 90.0, 10.0);
        let semi_minor = WGS84_SEMI_MAJOR_AXIS * (1.0 - WGS84_FLATTENING);
        assert!((z - semi_minor - 10.0).abs() < 1e-6);
    }

    #[test]
    fn vertical_step_distance_equals_height_change() {
        let fixes = vec![
            Fix::new(-145.0, 63.0, 1000.0, epoch()),
            Fix::new(-145.0, 63.0, 1003.5, epoch()),
        ];
        let steps = step_distances(&fixes);
        assert_eq!(steps.len(), 1);
        assert!((steps[0] - 3.5).abs() < 1e-6);
    }
}
