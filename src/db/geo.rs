use crate::models::Location;

/// Mean earth radius the geo index measures with, in metres.
pub const EARTH_RADIUS_METRES: f64 = 6372797.560856;

/// Great-circle distance in metres.
pub fn distance(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((b.longitude - a.longitude).to_radians() / 2.0).sin();

    2.0 * EARTH_RADIUS_METRES * (u * u + lat1.cos() * lat2.cos() * v * v).sqrt().asin()
}
