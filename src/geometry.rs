use map_3d::{ecef2geodetic, Ellipsoid};
use nalgebra::{Matrix3, Vector3};

use crate::constants::{
    EARTH_ANGULAR_VEL_RAD, EARTH_SEMI_MAJOR_AXIS_WGS84, SPEED_OF_LIGHT_M_S,
};

/// Geodetic coordinates (lat rad, long rad, height m above ellipsoid)
pub(crate) type GeodeticPos = (f64, f64, f64);

pub(crate) fn geodetic(ecef_m: Vector3<f64>) -> GeodeticPos {
    ecef2geodetic(ecef_m[0], ecef_m[1], ecef_m[2], Ellipsoid::WGS84)
}

/// Geometric range between satellite and receiver, with first order
/// earth rotation (Sagnac) compensation, and the receiver to satellite
/// unit line of sight. None when the proposed geometry is not physical.
pub(crate) fn geometric_range(
    sat_ecef_m: Vector3<f64>,
    rcv_ecef_m: Vector3<f64>,
) -> Option<(f64, Vector3<f64>)> {
    if sat_ecef_m.norm() < EARTH_SEMI_MAJOR_AXIS_WGS84 {
        return None;
    }

    let dr = sat_ecef_m - rcv_ecef_m;
    let r = dr.norm();

    if r <= 0.0 {
        return None;
    }

    let sagnac = EARTH_ANGULAR_VEL_RAD
        * (sat_ecef_m[0] * rcv_ecef_m[1] - sat_ecef_m[1] * rcv_ecef_m[0])
        / SPEED_OF_LIGHT_M_S;

    Some((r + sagnac, dr / r))
}

/// Rotation matrix from ECEF to local (east, north, up) frame
pub(crate) fn ecef_to_enu_rotation(pos: GeodeticPos) -> Matrix3<f64> {
    let (lat, lon, _) = pos;
    let (sin_lat, cos_lat) = (lat.sin(), lat.cos());
    let (sin_lon, cos_lon) = (lon.sin(), lon.cos());

    Matrix3::new(
        -sin_lon,
        cos_lon,
        0.0,
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        cos_lat * cos_lon,
        cos_lat * sin_lon,
        sin_lat,
    )
}

/// Azimuth and elevation (rad) of the line of sight unit vector,
/// at the given geodetic position. Azimuth is reported in [0, 2π[.
pub(crate) fn azimuth_elevation(pos: GeodeticPos, los: Vector3<f64>) -> (f64, f64) {
    let enu = ecef_to_enu_rotation(pos) * los;

    let el = enu[2].asin();
    let mut az = enu[0].atan2(enu[1]);

    if az < 0.0 {
        az += 2.0 * std::f64::consts::PI;
    }

    (az, el)
}

/// Rotates a local (east, north, up) covariance into the ECEF frame
pub(crate) fn enu_covariance_to_ecef(pos: GeodeticPos, q_enu: Matrix3<f64>) -> Matrix3<f64> {
    let e = ecef_to_enu_rotation(pos);
    e.transpose() * q_enu * e
}

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector3;

    fn rcv() -> Vector3<f64> {
        // mid latitude site
        Vector3::new(3977260.0, 1022249.0, 4858614.0)
    }

    #[test]
    fn range_rejects_underground_satellites() {
        assert!(geometric_range(Vector3::new(1.0E3, 1.0E3, 1.0E3), rcv()).is_none());
    }

    #[test]
    fn sagnac_magnitude() {
        let sat = Vector3::new(15600.0E3, 7540.0E3, 20140.0E3);
        let (r, e) = geometric_range(sat, rcv()).unwrap();

        let euclidian = (sat - rcv()).norm();

        // sagnac correction is metric, not kilometric
        assert!((r - euclidian).abs() < 50.0);
        assert!((r - euclidian).abs() > 1.0E-3);
        assert!((e.norm() - 1.0).abs() < 1.0E-12);
    }

    #[test]
    fn zenith_elevation() {
        let pos = geodetic(rcv());
        let up = rcv() / rcv().norm();

        // radial direction is close to geodetic zenith (not identical:
        // the ellipsoid normal differs from the radial direction)
        let (_, el) = azimuth_elevation(pos, up);
        assert!(el.to_degrees() > 89.0);
    }

    #[test]
    fn north_azimuth() {
        let pos = geodetic(rcv());
        let north = ecef_to_enu_rotation(pos).transpose() * Vector3::new(0.0, 1.0, 0.0);

        let (az, el) = azimuth_elevation(pos, north);
        assert!(az.abs() < 1.0E-9 || (az - 2.0 * std::f64::consts::PI).abs() < 1.0E-9);
        assert!(el.abs() < 1.0E-9);
    }
}
