//! Subswath dataset session
//!
//! Owns the immutable tie-point table and burst timeline of one subswath plus
//! the single current raster. Every replacement of the current raster builds
//! the raster, its transform and both footprint sets before publishing them
//! together; a failed or cancelled replacement leaves the previous state in
//! place.

use crate::core::decimate::{Resolution, ResolutionDecimator};
use crate::core::footprint::{subswath_footprint, BurstFootprint, BurstGeometryBuilder, FootprintParams};
use crate::core::ground_spacing::GroundSpacingCalculator;
use crate::core::interpolate::{GeolocationInterpolator, InterpolationParams};
use crate::core::tie_points::TiePointTable;
use crate::core::timeline::BurstTimeline;
use crate::core::transform::{CoordinateTransform, ImageCoords, RasterIndex, TransformParams};
use crate::types::{Burst, CancellationToken, GeoError, GeoResult, Raster, TiePoint};
use chrono::{DateTime, Utc};
use geo::Polygon;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::{Arc, RwLock};

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Native slant range pixel spacing in meters
    pub slant_range_spacing: f64,
    /// Native azimuth pixel spacing in meters
    pub azimuth_pixel_spacing: f64,
    pub interpolation: InterpolationParams,
    pub transform: TransformParams,
    pub footprint: FootprintParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        // Sentinel-1 IW nominal spacings
        Self {
            slant_range_spacing: 2.329562,
            azimuth_pixel_spacing: 13.94,
            interpolation: InterpolationParams::default(),
            transform: TransformParams::default(),
            footprint: FootprintParams::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> GeoResult<()> {
        if !self.slant_range_spacing.is_finite() || self.slant_range_spacing <= 0.0 {
            return Err(GeoError::Config(format!(
                "slant_range_spacing must be positive, got {}",
                self.slant_range_spacing
            )));
        }
        if !self.azimuth_pixel_spacing.is_finite() || self.azimuth_pixel_spacing <= 0.0 {
            return Err(GeoError::Config(format!(
                "azimuth_pixel_spacing must be positive, got {}",
                self.azimuth_pixel_spacing
            )));
        }
        self.interpolation.validate()?;
        self.transform.validate()?;
        self.footprint.validate()?;
        Ok(())
    }
}

/// A raster together with everything derived from it
#[derive(Debug)]
pub struct BoundRaster {
    raster: Arc<Raster>,
    /// Native-resolution source of `raster`; the same allocation at native resolution
    native: Arc<Raster>,
    transform: CoordinateTransform,
    valid_footprints: Vec<BurstFootprint>,
    raw_footprints: Vec<BurstFootprint>,
}

impl BoundRaster {
    pub fn raster(&self) -> &Arc<Raster> {
        &self.raster
    }

    /// Native-resolution raster this one was derived from
    pub fn native(&self) -> &Arc<Raster> {
        &self.native
    }

    pub fn transform(&self) -> &CoordinateTransform {
        &self.transform
    }

    /// Valid (tiling) or raw (overlapping) burst footprints
    pub fn footprints(&self, only_valid: bool) -> &[BurstFootprint] {
        if only_valid {
            &self.valid_footprints
        } else {
            &self.raw_footprints
        }
    }

    /// Outline of the whole subswath window
    pub fn subswath_footprint(&self) -> Polygon<f64> {
        subswath_footprint(&self.valid_footprints)
    }

    pub fn coords_to_ll(&self, line: f64, pixel: f64) -> GeoResult<(f64, f64)> {
        self.transform.coords_to_ll(line, pixel)
    }

    pub fn ll_to_coords(&self, lon: f64, lat: f64) -> GeoResult<ImageCoords> {
        self.transform.ll_to_coords(lon, lat)
    }

    /// Nearest cell of this raster to a geographic position
    pub fn ll_to_index(&self, lon: f64, lat: f64) -> GeoResult<RasterIndex> {
        self.transform.ll_to_index(&self.raster, lon, lat)
    }
}

/// One opened subswath
#[derive(Debug)]
pub struct SubswathDataset {
    tie_points: Arc<TiePointTable>,
    timeline: Arc<BurstTimeline>,
    config: SessionConfig,
    spacing: GroundSpacingCalculator,
    /// Native line and pixel window covered by both the timeline and the tie-points
    full_window: (Range<usize>, Range<usize>),
    current: RwLock<Arc<BoundRaster>>,
}

impl SubswathDataset {
    /// Build the tables and the native raster over the full subswath.
    ///
    /// Any construction failure aborts the open.
    pub fn open(points: Vec<TiePoint>, bursts: Vec<Burst>, config: SessionConfig) -> GeoResult<Self> {
        Self::open_with_cancel(points, bursts, config, None)
    }

    pub fn open_with_cancel(
        points: Vec<TiePoint>,
        bursts: Vec<Burst>,
        config: SessionConfig,
        cancel: Option<&CancellationToken>,
    ) -> GeoResult<Self> {
        config.validate()?;
        let spacing = GroundSpacingCalculator::new(config.slant_range_spacing)?;
        let tie_points = Arc::new(TiePointTable::build(points)?);
        let timeline = Arc::new(BurstTimeline::build(bursts)?);

        let (first_line, last_line) = timeline.line_extent();
        let (min_line, max_line, min_pixel, max_pixel) = tie_points.bounds();
        let lines = if config.interpolation.allow_extrapolation {
            first_line..last_line + 1
        } else {
            first_line.max(min_line)..last_line.min(max_line) + 1
        };
        let pixels = min_pixel..max_pixel + 1;
        if lines.is_empty() {
            return Err(GeoError::Data(format!(
                "Tie-points (lines {}-{}) do not cover the burst lines {}-{}",
                min_line, max_line, first_line, last_line
            )));
        }

        log::info!(
            "Opening subswath: {} bursts, {} tie-points, lines {:?}, pixels {:?}",
            timeline.len(),
            tie_points.len(),
            lines,
            pixels
        );

        let native = Arc::new(rasterize_native(
            &tie_points,
            &timeline,
            spacing,
            &config.interpolation,
            lines.clone(),
            pixels.clone(),
            cancel,
        )?);
        let bound = bind_raster(&tie_points, &timeline, &config, Arc::clone(&native), native)?;

        Ok(Self {
            tie_points,
            timeline,
            config,
            spacing,
            full_window: (lines, pixels),
            current: RwLock::new(Arc::new(bound)),
        })
    }

    pub fn tie_points(&self) -> &TiePointTable {
        &self.tie_points
    }

    pub fn timeline(&self) -> &BurstTimeline {
        &self.timeline
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Native line and pixel window available for rasterization
    pub fn full_window(&self) -> (Range<usize>, Range<usize>) {
        self.full_window.clone()
    }

    /// Snapshot of the current raster and its dependents
    pub fn current(&self) -> Arc<BoundRaster> {
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&*guard)
    }

    pub fn azimuth_time_at_line(&self, line: usize) -> GeoResult<DateTime<Utc>> {
        self.timeline.azimuth_time_at_line(line)
    }

    pub fn coords_to_ll(&self, line: f64, pixel: f64) -> GeoResult<(f64, f64)> {
        self.current().coords_to_ll(line, pixel)
    }

    pub fn ll_to_coords(&self, lon: f64, lat: f64) -> GeoResult<ImageCoords> {
        self.current().ll_to_coords(lon, lat)
    }

    pub fn ll_to_index(&self, lon: f64, lat: f64) -> GeoResult<RasterIndex> {
        self.current().ll_to_index(lon, lat)
    }

    pub fn footprints(&self, only_valid: bool) -> Vec<BurstFootprint> {
        self.current().footprints(only_valid).to_vec()
    }

    /// Replace the current raster with a decimated copy of its native source.
    ///
    /// Ground targets resolve against the native spacing; factors resolving to
    /// `1x1` rebind the native raster itself.
    pub fn set_resolution(
        &self,
        resolution: Resolution,
        cancel: Option<&CancellationToken>,
    ) -> GeoResult<Arc<BoundRaster>> {
        let current = self.current();
        let native = Arc::clone(&current.native);
        let decimator = ResolutionDecimator::new(self.spacing, self.config.azimuth_pixel_spacing)?
            .with_parallel(self.config.interpolation.enable_parallel);

        let result = decimator
            .block_factors(&native, &resolution)
            .and_then(|factors| match factors {
                (1, 1) => Ok(Arc::clone(&native)),
                (line, pixel) => decimator.decimate(&native, line, pixel, cancel).map(Arc::new),
            })
            .and_then(|raster| self.bind(raster, native));
        self.publish(result, &format!("resolution {:?}", resolution))
    }

    /// Replace the current raster with a native rasterization of a sub-window
    pub fn rasterize_window(
        &self,
        lines: Range<usize>,
        pixels: Range<usize>,
        cancel: Option<&CancellationToken>,
    ) -> GeoResult<Arc<BoundRaster>> {
        let (full_lines, full_pixels) = &self.full_window;
        let inside = |window: &Range<usize>, full: &Range<usize>| {
            window.start >= full.start && window.end <= full.end
        };
        if !inside(&lines, full_lines) || !inside(&pixels, full_pixels) {
            return Err(GeoError::OutOfBounds(format!(
                "Window lines {:?}, pixels {:?} outside subswath lines {:?}, pixels {:?}",
                lines, pixels, full_lines, full_pixels
            )));
        }

        let label = format!("window lines {:?}, pixels {:?}", lines, pixels);
        let result = self.rasterize(lines, pixels, cancel).and_then(|raster| {
            let native = Arc::new(raster);
            self.bind(Arc::clone(&native), native)
        });
        self.publish(result, &label)
    }

    fn rasterize(
        &self,
        lines: Range<usize>,
        pixels: Range<usize>,
        cancel: Option<&CancellationToken>,
    ) -> GeoResult<Raster> {
        rasterize_native(
            &self.tie_points,
            &self.timeline,
            self.spacing,
            &self.config.interpolation,
            lines,
            pixels,
            cancel,
        )
    }

    fn bind(&self, raster: Arc<Raster>, native: Arc<Raster>) -> GeoResult<BoundRaster> {
        bind_raster(&self.tie_points, &self.timeline, &self.config, raster, native)
    }

    /// Swap in a fully built replacement, or keep the current state on error
    fn publish(&self, result: GeoResult<BoundRaster>, label: &str) -> GeoResult<Arc<BoundRaster>> {
        match result {
            Ok(bound) => {
                let bound = Arc::new(bound);
                let mut guard = match self.current.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *guard = Arc::clone(&bound);
                let (rows, cols) = bound.raster.dim();
                log::info!("Current raster replaced ({}): {}x{}", label, rows, cols);
                Ok(bound)
            }
            Err(e) => {
                log::warn!("Keeping current raster after failed {}: {}", label, e);
                Err(e)
            }
        }
    }
}

fn rasterize_native(
    tie_points: &TiePointTable,
    timeline: &BurstTimeline,
    spacing: GroundSpacingCalculator,
    params: &InterpolationParams,
    lines: Range<usize>,
    pixels: Range<usize>,
    cancel: Option<&CancellationToken>,
) -> GeoResult<Raster> {
    GeolocationInterpolator::new(tie_points, timeline, spacing, params.clone()).rasterize(lines, pixels, cancel)
}

/// Derive the transform and footprints for `raster`
fn bind_raster(
    tie_points: &Arc<TiePointTable>,
    timeline: &Arc<BurstTimeline>,
    config: &SessionConfig,
    raster: Arc<Raster>,
    native: Arc<Raster>,
) -> GeoResult<BoundRaster> {
    let transform = CoordinateTransform::for_raster(
        Arc::clone(tie_points),
        Arc::clone(timeline),
        &raster,
        config.transform.clone(),
    )?;
    let builder = BurstGeometryBuilder::new(config.footprint.clone())?;
    let valid_footprints = builder.footprints(timeline, &transform, true)?;
    let raw_footprints = builder.footprints(timeline, &transform, false)?;
    Ok(BoundRaster {
        raster,
        native,
        transform,
        valid_footprints,
        raw_footprints,
    })
}
