//! Pure geospatial math: great-circle distance, geohash encoding, and
//! polygon containment. No state, no I/O.

use crate::models::GeoLocation;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers per degree of latitude (and of longitude at the equator)
const KM_PER_DEGREE: f64 = 111.32;

/// Standard geohash base-32 alphabet
const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Great-circle distance between two points in kilometers (haversine)
///
/// Deterministic; out-of-range coordinates produce NaN/garbage rather than
/// an error. Callers are responsible for validating ranges.
pub fn distance_km(a: &GeoLocation, b: &GeoLocation) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Encode a location as a base-32 geohash string at the given precision
pub fn geohash(location: &GeoLocation, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);

    let mut hash = String::with_capacity(precision);
    let mut bits: u8 = 0;
    let mut bit_count = 0;
    let mut even_bit = true; // longitude first

    while hash.len() < precision {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if location.longitude >= mid {
                bits = (bits << 1) | 1;
                lon_range.0 = mid;
            } else {
                bits <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if location.latitude >= mid {
                bits = (bits << 1) | 1;
                lat_range.0 = mid;
            } else {
                bits <<= 1;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;
        bit_count += 1;

        if bit_count == 5 {
            hash.push(BASE32[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}

/// Geohash character precision whose cell size bounds the given radius
///
/// Thresholds follow the standard geohash cell dimensions.
pub fn precision_for_radius_km(radius_km: f64) -> usize {
    if radius_km <= 0.019 {
        9
    } else if radius_km <= 0.076 {
        8
    } else if radius_km <= 0.61 {
        7
    } else if radius_km <= 2.4 {
        6
    } else if radius_km <= 19.5 {
        5
    } else if radius_km <= 78.0 {
        4
    } else if radius_km <= 625.0 {
        3
    } else {
        2
    }
}

/// Geohash range covering a radius around a center point
///
/// Builds a bounding box with a linear degree/km approximation and encodes
/// its corners at the precision matching the radius. Adequate for
/// city-scale candidate filtering; degrades near the poles and across the
/// antimeridian. Never a final membership decision.
pub fn geohash_range(center: &GeoLocation, radius_km: f64) -> (String, String) {
    let lat_change = radius_km / KM_PER_DEGREE;
    let lon_change = radius_km / (KM_PER_DEGREE * center.latitude.to_radians().cos());

    let precision = precision_for_radius_km(radius_km);
    let lower = GeoLocation::new(center.latitude - lat_change, center.longitude - lon_change);
    let upper = GeoLocation::new(center.latitude + lat_change, center.longitude + lon_change);

    (geohash(&lower, precision), geohash(&upper, precision))
}

/// Whether a point lies inside a polygon (ray casting, even-odd rule)
///
/// O(n) in vertex count. Degenerate or self-intersecting polygons give
/// undefined results; callers must supply simple polygons.
pub fn point_in_polygon(point: &GeoLocation, polygon: &[GeoLocation]) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);

    for i in 0..polygon.len() {
        let xi = polygon[i].longitude;
        let yi = polygon[i].latitude;
        let xj = polygon[j].longitude;
        let yj = polygon[j].latitude;

        let intersects = ((yi > point.latitude) != (yj > point.latitude))
            && (point.longitude < (xj - xi) * (point.latitude - yi) / (yj - yi) + xi);
        if intersects {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Grid of sample points covering a radius around a center, for zone
/// coverage analysis. Each point carries its precision-9 geohash.
pub fn grid_points(center: &GeoLocation, radius_km: f64, grid_size: usize) -> Vec<GeoLocation> {
    let lat_change = radius_km / KM_PER_DEGREE;
    let lon_change = radius_km / (KM_PER_DEGREE * center.latitude.to_radians().cos());

    let lat_step = lat_change * 2.0 / grid_size as f64;
    let lon_step = lon_change * 2.0 / grid_size as f64;

    let mut points = Vec::new();
    let mut lat = center.latitude - lat_change;
    while lat <= center.latitude + lat_change {
        let mut lon = center.longitude - lon_change;
        while lon <= center.longitude + lon_change {
            let mut point = GeoLocation::new(lat, lon);
            point.geohash = Some(geohash(&point, 9));
            points.push(point);
            lon += lon_step;
        }
        lat += lat_step;
    }

    points
}
