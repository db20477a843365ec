use crate::error::{AttendanceError, Result};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Rejects coordinates outside [-90, 90] x [-180, 180].
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(AttendanceError::Validation(format!(
            "latitude {latitude} must be within [-90, 90]"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(AttendanceError::Validation(format!(
            "longitude {longitude} must be within [-180, 180]"
        )));
    }
    Ok(())
}

/// Great-circle distance between two coordinates in meters, via the
/// haversine formula with R = 6371 km.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c * 1000.0
}
