use chrono::{DateTime, Duration, Utc};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Geolocation tie-point from the annotation geolocation grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiePoint {
    pub line: usize,
    pub pixel: usize,
    pub longitude: f64,       // degrees
    pub latitude: f64,        // degrees
    pub height: f64,          // meters
    pub incidence_angle: f64, // radians
    pub azimuth_time: DateTime<Utc>,
    pub slant_range_time: f64, // seconds (two-way)
}

/// One TOPS burst with its raw and valid line ranges (inclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Burst {
    pub index: usize,
    pub first_line: usize,
    pub last_line: usize,
    pub first_valid_line: usize,
    pub last_valid_line: usize,
    pub first_azimuth_time: DateTime<Utc>,
    pub last_azimuth_time: DateTime<Utc>,
    /// Valid sample span (first, last), when the annotation provides it
    #[serde(default)]
    pub valid_pixels: Option<(usize, usize)>,
}

impl Burst {
    /// Number of raw lines in this burst
    pub fn lines(&self) -> usize {
        self.last_line.saturating_sub(self.first_line) + 1
    }

    /// Number of valid lines in this burst
    pub fn valid_lines(&self) -> usize {
        self.last_valid_line.saturating_sub(self.first_valid_line) + 1
    }

    pub fn contains_raw(&self, line: usize) -> bool {
        line >= self.first_line && line <= self.last_line
    }

    pub fn contains_valid(&self, line: usize) -> bool {
        line >= self.first_valid_line && line <= self.last_valid_line
    }
}

/// Native line/pixel span covered by a raster, inclusive, in native coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterExtent {
    pub first_line: f64,
    pub last_line: f64,
    pub first_pixel: f64,
    pub last_pixel: f64,
}

impl RasterExtent {
    pub fn contains(&self, line: f64, pixel: f64, tolerance: f64) -> bool {
        line >= self.first_line - tolerance
            && line <= self.last_line + tolerance
            && pixel >= self.first_pixel - tolerance
            && pixel <= self.last_pixel + tolerance
    }
}

/// Named per-pixel fields exposed by a [`Raster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RasterField {
    Longitude,
    Latitude,
    Height,
    IncidenceAngle,
    AzimuthTime,
    GroundRangeSpacing,
}

impl RasterField {
    pub const ALL: [RasterField; 6] = [
        RasterField::Longitude,
        RasterField::Latitude,
        RasterField::Height,
        RasterField::IncidenceAngle,
        RasterField::AzimuthTime,
        RasterField::GroundRangeSpacing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RasterField::Longitude => "longitude",
            RasterField::Latitude => "latitude",
            RasterField::Height => "height",
            RasterField::IncidenceAngle => "incidence_angle",
            RasterField::AzimuthTime => "azimuth_time",
            RasterField::GroundRangeSpacing => "ground_range_spacing",
        }
    }
}

impl std::fmt::Display for RasterField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for RasterField {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        RasterField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == normalized || field.name().replace('_', "") == normalized)
            .ok_or_else(|| GeoError::Config(format!("Unknown raster field: {}", s)))
    }
}

/// Dense geolocation raster over a (line, pixel) grid.
///
/// Rows follow the azimuth (line) axis, columns the range (pixel) axis. `lines`
/// and `pixels` hold the native coordinate of every row and column: integers at
/// native resolution, block centres after decimation. Azimuth time is stored as
/// seconds relative to `time_reference`.
#[derive(Debug, Clone)]
pub struct Raster {
    pub lines: Array1<f64>,
    pub pixels: Array1<f64>,
    pub longitude: Array2<f64>,
    pub latitude: Array2<f64>,
    pub height: Array2<f64>,
    pub incidence_angle: Array2<f64>,
    pub azimuth_time: Array2<f64>,
    pub ground_range_spacing: Array2<f64>,
    pub burst_provenance: Array2<usize>,
    pub time_reference: DateTime<Utc>,
    pub extent: RasterExtent,
    /// Native lines per row
    pub line_step: usize,
    /// Native pixels per column
    pub pixel_step: usize,
}

impl Raster {
    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.longitude.dim()
    }

    pub fn field(&self, field: RasterField) -> ArrayView2<'_, f64> {
        match field {
            RasterField::Longitude => self.longitude.view(),
            RasterField::Latitude => self.latitude.view(),
            RasterField::Height => self.height.view(),
            RasterField::IncidenceAngle => self.incidence_angle.view(),
            RasterField::AzimuthTime => self.azimuth_time.view(),
            RasterField::GroundRangeSpacing => self.ground_range_spacing.view(),
        }
    }

    pub fn burst_provenance(&self) -> ArrayView2<'_, usize> {
        self.burst_provenance.view()
    }

    /// Absolute azimuth time of one raster cell
    pub fn azimuth_time_at(&self, row: usize, col: usize) -> GeoResult<DateTime<Utc>> {
        let seconds = self.azimuth_time.get((row, col)).ok_or_else(|| {
            let (rows, cols) = self.dim();
            GeoError::OutOfBounds(format!(
                "Cell ({}, {}) outside raster of {}x{}",
                row, col, rows, cols
            ))
        })?;
        Ok(offset_time(self.time_reference, *seconds))
    }

    /// Mean ground range spacing over the whole raster
    pub fn mean_ground_range_spacing(&self) -> Option<f64> {
        self.ground_range_spacing.mean()
    }
}

/// Cooperative cancellation flag shared between a caller and long-running builds
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Cancelled` once the flag is set
    pub fn check(&self, what: &str) -> GeoResult<()> {
        if self.is_cancelled() {
            log::warn!("{} cancelled", what);
            return Err(GeoError::Cancelled(format!("{} was cancelled", what)));
        }
        Ok(())
    }
}

/// Wrap a longitude into [-180, 180). Values already in range are returned untouched.
pub fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Bring `lon` within 180 degrees of `reference` so the pair is continuous
pub fn unwrap_longitude(lon: f64, reference: f64) -> f64 {
    let delta = lon - reference;
    if (-180.0..180.0).contains(&delta) {
        lon
    } else {
        reference + (delta + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Seconds between two instants, with nanosecond resolution
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 * 1e-9,
        None => delta.num_milliseconds() as f64 * 1e-3,
    }
}

/// Instant `seconds` after `reference`
pub fn offset_time(reference: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    reference + Duration::nanoseconds((seconds * 1e9).round() as i64)
}

/// Error taxonomy for geolocation processing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("Data error: {0}")]
    Data(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Numeric error: {0}")]
    Numeric(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoErrorKind {
    Data,
    Geometry,
    Numeric,
    Config,
    OutOfBounds,
    Cancelled,
}

impl GeoError {
    pub fn kind(&self) -> GeoErrorKind {
        match self {
            GeoError::Data(_) => GeoErrorKind::Data,
            GeoError::Geometry(_) => GeoErrorKind::Geometry,
            GeoError::Numeric(_) => GeoErrorKind::Numeric,
            GeoError::Config(_) => GeoErrorKind::Config,
            GeoError::OutOfBounds(_) => GeoErrorKind::OutOfBounds,
            GeoError::Cancelled(_) => GeoErrorKind::Cancelled,
        }
    }
}

/// Result type for geolocation operations
pub type GeoResult<T> = Result<T, GeoError>;
