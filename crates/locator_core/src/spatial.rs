//! Spatial operations: H3-based cell indexing and great-circle geometry.
//!
//! This module provides:
//!
//! - **GeoPoint**: validated WGS84 coordinate, the only way coordinates reach the index
//! - **GeoIndex**: wrapper for one H3 resolution
//! - **CellIndexer**: fine (matching) and coarse (surge) resolutions plus a memoised k-ring
//! - **Distance helpers**: Haversine distance, initial bearing, destination point
//!
//! Resolution 8 (~0.46 km² cells) is used for matching, resolution 7 (~5.16 km² cells)
//! for surge zones.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;

use crate::error::{LocatorError, LocatorResult};

/// Fine resolution used for agent matching.
pub const MATCH_RESOLUTION: Resolution = Resolution::Eight;

/// Coarse resolution used for surge zones.
pub const SURGE_RESOLUTION: Resolution = Resolution::Seven;

/// Ring size for nearby search (~2.8 km practical coverage at resolution 8).
pub const MATCH_RING_K: u32 = 2;

/// Ring size for surge aggregation.
pub const SURGE_RING_K: u32 = 1;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

const DEFAULT_RING_CACHE_CAPACITY: usize = 1_000;

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    inner: LatLng,
}

impl GeoPoint {
    /// Validate and build a point. Latitude must lie in [-90, 90] and longitude in
    /// [-180, 180]; non-finite values are rejected.
    pub fn new(lat: f64, lng: f64) -> LocatorResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(LocatorError::validation(format!(
                "latitude {lat} is outside [-90, 90]"
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(LocatorError::validation(format!(
                "longitude {lng} is outside [-180, 180]"
            )));
        }
        let inner = LatLng::new(lat, lng)
            .map_err(|err| LocatorError::validation(format!("invalid coordinate: {err}")))?;
        Ok(Self { inner })
    }

    pub fn lat(&self) -> f64 {
        self.inner.lat()
    }

    pub fn lng(&self) -> f64 {
        self.inner.lng()
    }

    pub fn to_cell(self, resolution: Resolution) -> CellIndex {
        self.inner.to_cell(resolution)
    }
}

impl From<CellIndex> for GeoPoint {
    /// Center of the cell.
    fn from(cell: CellIndex) -> Self {
        Self { inner: cell.into() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeoIndex {
    resolution: Resolution,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn cell_of(&self, point: GeoPoint) -> CellIndex {
        point.to_cell(self.resolution)
    }

    pub fn grid_disk(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        debug_assert_eq!(
            origin.resolution(),
            self.resolution,
            "origin resolution must match GeoIndex resolution"
        );
        origin.grid_disk::<Vec<_>>(k)
    }
}

/// Cell index shared by ingestion, search and surge.
///
/// Owns an LRU memo of k-ring results keyed by `(origin, k)`. The memo is per
/// instance, so separately constructed services never share state.
pub struct CellIndexer {
    fine: GeoIndex,
    coarse: GeoIndex,
    rings: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl CellIndexer {
    pub fn new(fine: Resolution, coarse: Resolution, ring_cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(ring_cache_capacity)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            fine: GeoIndex::new(fine),
            coarse: GeoIndex::new(coarse),
            rings: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn fine(&self) -> GeoIndex {
        self.fine
    }

    pub fn coarse(&self) -> GeoIndex {
        self.coarse
    }

    /// Deterministic point → cell mapping at an arbitrary resolution.
    pub fn cell_of(&self, point: GeoPoint, resolution: Resolution) -> CellIndex {
        point.to_cell(resolution)
    }

    pub fn fine_cell(&self, point: GeoPoint) -> CellIndex {
        self.fine.cell_of(point)
    }

    pub fn coarse_cell(&self, point: GeoPoint) -> CellIndex {
        self.coarse.cell_of(point)
    }

    /// Center cell plus every cell within `k` hex steps. `origin` must be at the fine or
    /// coarse resolution.
    pub fn ring_of(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let index = self.index_for(origin);
        let mut cache = match self.rings.lock() {
            Ok(guard) => guard,
            Err(_) => return index.grid_disk(origin, k), // Fallback: compute without cache if mutex poisoned
        };
        cache
            .get_or_insert((origin, k), || index.grid_disk(origin, k))
            .clone()
    }

    fn index_for(&self, cell: CellIndex) -> GeoIndex {
        if cell.resolution() == self.coarse.resolution() {
            self.coarse
        } else {
            self.fine
        }
    }

    /// Descendants of `cell` at the finer `resolution`. Empty when `resolution` is
    /// coarser than the cell's own.
    pub fn children_of(&self, cell: CellIndex, resolution: Resolution) -> Vec<CellIndex> {
        if resolution < cell.resolution() {
            return Vec::new();
        }
        cell.children(resolution).collect()
    }
}

impl Default for CellIndexer {
    fn default() -> Self {
        Self::new(MATCH_RESOLUTION, SURGE_RESOLUTION, DEFAULT_RING_CACHE_CAPACITY)
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat().to_radians(), a.lng().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lng().to_radians());
    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon = ((lon2 - lon1) * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Initial bearing from `from` to `to`, normalised to [0, 360).
pub fn bearing_deg(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.lat().to_radians();
    let lat2 = to.lat().to_radians();
    let dlon = (to.lng() - from.lng()).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Point reached by travelling `distance_km` from `origin` along `bearing`.
pub fn destination_point(origin: GeoPoint, distance_km: f64, bearing: f64) -> LocatorResult<GeoPoint> {
    let lat = origin.lat().to_radians();
    let lng = origin.lng().to_radians();
    let theta = bearing.to_radians();
    let delta = distance_km / EARTH_RADIUS_KM;

    let dest_lat = (lat.sin() * delta.cos() + lat.cos() * delta.sin() * theta.cos()).asin();
    let dest_lng = lng
        + (theta.sin() * delta.sin() * lat.cos()).atan2(delta.cos() - lat.sin() * dest_lat.sin());

    let lng_deg = (dest_lng.to_degrees() + 540.0) % 360.0 - 180.0;
    GeoPoint::new(dest_lat.to_degrees(), lng_deg)
}
