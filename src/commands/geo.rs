use std::collections::BTreeMap;

use crate::{
    commands::CommandError,
    key_value_store::{DataType, KeyValueStore, SharedStore},
};

const EARTH_RADIUS_M: f64 = 6372797.560856;

/// Latitude is clamped tighter than the poles so the interleaved encoding
/// stays invertible.
const LAT_MIN: f64 = -85.05112878;
const LAT_MAX: f64 = 85.05112878;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;

/// Interleaving depth: 26 bits per coordinate, 52 bits total, which fits
/// losslessly in an f64 mantissa so positions can live in a sorted set.
const GEO_STEP: u32 = 26;

/// Distance unit for range queries and distance reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeoUnit {
    Meters,
    Kilometers,
    Miles,
}

impl GeoUnit {
    fn meters_per_unit(self) -> f64 {
        match self {
            GeoUnit::Meters => 1.0,
            GeoUnit::Kilometers => 1000.0,
            GeoUnit::Miles => 1609.34,
        }
    }
}

/// A member returned by a radius search, with its decoded position and
/// distance from the search center.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoMatch {
    pub member: String,
    pub longitude: f64,
    pub latitude: f64,
    pub distance: f64,
}

/// Records named positions in the index at `key`. Returns how many members
/// were newly added (repositioning an existing member counts 0).
///
/// # Arguments
///
/// * `store` - A thread-safe reference to the key-value store
/// * `key` - The index key
/// * `positions` - `(longitude, latitude, member)` triples
///
/// # Returns
///
/// * `Ok(usize)` - Number of newly added members
/// * `Err(CommandError::InvalidArgument)` - A coordinate is out of range
/// * `Err(CommandError::TypeMismatch)` - The key holds an incompatible value
pub async fn geo_add(
    store: &SharedStore,
    key: &str,
    positions: &[(f64, f64, String)],
) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_geo_add(&mut store_guard, key, positions)
}

/// Distance between two recorded members, in `unit`.
pub async fn geo_dist(
    store: &SharedStore,
    key: &str,
    member_a: &str,
    member_b: &str,
    unit: GeoUnit,
) -> Result<f64, CommandError> {
    let mut store_guard = store.lock().await;
    apply_geo_dist(&mut store_guard, key, member_a, member_b, unit)
}

/// All members within `radius` (in `unit`) of the given center, sorted by
/// ascending distance. An absent key yields an empty result.
pub async fn geo_search(
    store: &SharedStore,
    key: &str,
    longitude: f64,
    latitude: f64,
    radius: f64,
    unit: GeoUnit,
) -> Result<Vec<GeoMatch>, CommandError> {
    let mut store_guard = store.lock().await;
    apply_geo_search(&mut store_guard, key, longitude, latitude, radius, unit)
}

pub(crate) fn apply_geo_add(
    store: &mut KeyValueStore,
    key: &str,
    positions: &[(f64, f64, String)],
) -> Result<usize, CommandError> {
    for (longitude, latitude, _) in positions {
        validate_coordinates(*longitude, *latitude)?;
    }

    let value = store.get_or_insert_with(key, || DataType::SortedSet(BTreeMap::new()));

    let DataType::SortedSet(ref mut index) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let mut added = 0;
    for (longitude, latitude, member) in positions {
        let score = encode(*longitude, *latitude) as f64;
        if index.insert(member.clone(), score).is_none() {
            added += 1;
        }
    }

    Ok(added)
}

pub(crate) fn apply_geo_dist(
    store: &mut KeyValueStore,
    key: &str,
    member_a: &str,
    member_b: &str,
    unit: GeoUnit,
) -> Result<f64, CommandError> {
    let Some(value) = store.get(key) else {
        return Err(CommandError::NotFound);
    };

    let DataType::SortedSet(ref index) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let (lon_a, lat_a) = position_of(index, member_a)?;
    let (lon_b, lat_b) = position_of(index, member_b)?;

    Ok(haversine(lon_a, lat_a, lon_b, lat_b) / unit.meters_per_unit())
}

pub(crate) fn apply_geo_search(
    store: &mut KeyValueStore,
    key: &str,
    longitude: f64,
    latitude: f64,
    radius: f64,
    unit: GeoUnit,
) -> Result<Vec<GeoMatch>, CommandError> {
    validate_coordinates(longitude, latitude)?;

    let Some(value) = store.get(key) else {
        return Ok(Vec::new());
    };

    let DataType::SortedSet(ref index) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let radius_meters = radius * unit.meters_per_unit();

    let mut matches: Vec<GeoMatch> = index
        .iter()
        .filter_map(|(member, score)| {
            let (member_lon, member_lat) = decode(*score as u64);
            let distance = haversine(longitude, latitude, member_lon, member_lat);
            (distance <= radius_meters).then(|| GeoMatch {
                member: member.clone(),
                longitude: member_lon,
                latitude: member_lat,
                distance: distance / unit.meters_per_unit(),
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.member.cmp(&b.member))
    });

    Ok(matches)
}

fn position_of(
    index: &BTreeMap<String, f64>,
    member: &str,
) -> Result<(f64, f64), CommandError> {
    let Some(score) = index.get(member) else {
        return Err(CommandError::NotFound);
    };

    Ok(decode(*score as u64))
}

fn validate_coordinates(longitude: f64, latitude: f64) -> Result<(), CommandError> {
    if !(LON_MIN..=LON_MAX).contains(&longitude) || !(LAT_MIN..=LAT_MAX).contains(&latitude) {
        return Err(CommandError::InvalidArgument(format!(
            "invalid longitude,latitude pair {:.6},{:.6}",
            longitude, latitude
        )));
    }

    Ok(())
}

/// Encodes a position into a 52-bit value by quantizing each coordinate to
/// 26 bits and interleaving them, longitude in the even bit positions.
fn encode(longitude: f64, latitude: f64) -> u64 {
    let lon_offset = (longitude - LON_MIN) / (LON_MAX - LON_MIN);
    let lat_offset = (latitude - LAT_MIN) / (LAT_MAX - LAT_MIN);

    // clamp so the range maximum still lands in the last cell
    let max_cell = (1u64 << GEO_STEP) - 1;
    let lon_bits = ((lon_offset * f64::from(1u32 << GEO_STEP)) as u64).min(max_cell);
    let lat_bits = ((lat_offset * f64::from(1u32 << GEO_STEP)) as u64).min(max_cell);

    interleave(lat_bits, lon_bits)
}

/// Inverse of `encode`: recovers the center of the cell the position was
/// quantized into, accurate to well under a meter.
fn decode(bits: u64) -> (f64, f64) {
    let (lat_bits, lon_bits) = deinterleave(bits);

    let scale = f64::from(1u32 << GEO_STEP);
    let lon_unit = (lon_bits as f64 + 0.5) / scale;
    let lat_unit = (lat_bits as f64 + 0.5) / scale;

    (
        LON_MIN + lon_unit * (LON_MAX - LON_MIN),
        LAT_MIN + lat_unit * (LAT_MAX - LAT_MIN),
    )
}

fn interleave(odd: u64, even: u64) -> u64 {
    spread(even) | (spread(odd) << 1)
}

fn deinterleave(bits: u64) -> (u64, u64) {
    (squash(bits >> 1), squash(bits))
}

/// Spreads the low 26 bits of `value` so they occupy the even positions.
fn spread(value: u64) -> u64 {
    let mut value = value & 0x3ffffff;
    value = (value | (value << 16)) & 0x0000ffff0000ffff;
    value = (value | (value << 8)) & 0x00ff00ff00ff00ff;
    value = (value | (value << 4)) & 0x0f0f0f0f0f0f0f0f;
    value = (value | (value << 2)) & 0x3333333333333333;
    value = (value | (value << 1)) & 0x5555555555555555;
    value
}

/// Collects the even-position bits of `value` back into the low 26 bits.
fn squash(value: u64) -> u64 {
    let mut value = value & 0x5555555555555555;
    value = (value | (value >> 1)) & 0x3333333333333333;
    value = (value | (value >> 2)) & 0x0f0f0f0f0f0f0f0f;
    value = (value | (value >> 4)) & 0x00ff00ff00ff00ff;
    value = (value | (value >> 8)) & 0x0000ffff0000ffff;
    value = (value | (value >> 16)) & 0x00000000ffffffff;
    value & 0x3ffffff
}

/// Great-circle distance between two positions, in meters.
fn haversine(lon_a: f64, lat_a: f64, lon_b: f64, lat_b: f64) -> f64 {
    let lat_a_rad = lat_a.to_radians();
    let lat_b_rad = lat_b.to_radians();
    let delta_lat = (lat_b - lat_a).to_radians();
    let delta_lon = (lon_b - lon_a).to_radians();

    let half_chord = (delta_lat / 2.0).sin().powi(2)
        + lat_a_rad.cos() * lat_b_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * half_chord.sqrt().asin()
}
