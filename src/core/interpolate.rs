use crate::core::ground_spacing::GroundSpacingCalculator;
use crate::core::tie_points::TiePointTable;
use crate::core::timeline::BurstTimeline;
use crate::types::{
    wrap_longitude, CancellationToken, GeoError, GeoResult, Raster, RasterExtent,
};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Parameters for sparse-to-dense geolocation interpolation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationParams {
    /// Allow positions outside the tie-point convex hull (edge-cell extrapolation)
    pub allow_extrapolation: bool,
    /// Lines per parallel work chunk
    pub chunk_lines: usize,
    /// Enable parallel processing
    pub enable_parallel: bool,
}

impl Default for InterpolationParams {
    fn default() -> Self {
        Self {
            allow_extrapolation: false,
            chunk_lines: 64,
            enable_parallel: true,
        }
    }
}

impl InterpolationParams {
    pub fn validate(&self) -> GeoResult<()> {
        if self.chunk_lines == 0 {
            return Err(GeoError::Config("chunk_lines must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Interpolated values of one raster row
#[derive(Debug)]
struct RowValues {
    longitude: Vec<f64>,
    latitude: Vec<f64>,
    height: Vec<f64>,
    incidence_angle: Vec<f64>,
    azimuth_time: f64,
    burst: usize,
}

/// Dense lon/lat/height/incidence/time rasters from the tie-point grid and
/// burst timeline
pub struct GeolocationInterpolator<'a> {
    tie_points: &'a TiePointTable,
    timeline: &'a BurstTimeline,
    spacing: GroundSpacingCalculator,
    params: InterpolationParams,
}

impl<'a> GeolocationInterpolator<'a> {
    pub fn new(
        tie_points: &'a TiePointTable,
        timeline: &'a BurstTimeline,
        spacing: GroundSpacingCalculator,
        params: InterpolationParams,
    ) -> Self {
        Self {
            tie_points,
            timeline,
            spacing,
            params,
        }
    }

    /// Native-resolution raster over `lines` x `pixels` (half-open ranges).
    ///
    /// Azimuth time comes from the burst timeline, not the tie-point time
    /// fields, so burst discontinuities are preserved.
    pub fn rasterize(
        &self,
        lines: Range<usize>,
        pixels: Range<usize>,
        cancel: Option<&CancellationToken>,
    ) -> GeoResult<Raster> {
        self.params.validate()?;
        if lines.is_empty() || pixels.is_empty() {
            return Err(GeoError::Config(format!(
                "Empty rasterization window: lines {:?}, pixels {:?}",
                lines, pixels
            )));
        }

        let (rows, cols) = (lines.len(), pixels.len());
        log::info!(
            "Rasterizing geolocation: {} lines x {} pixels (lines {}-{}, pixels {}-{})",
            rows,
            cols,
            lines.start,
            lines.end - 1,
            pixels.start,
            pixels.end - 1
        );

        let line_indices: Vec<usize> = lines.clone().collect();
        let process_chunk = |chunk: &[usize]| -> GeoResult<Vec<RowValues>> {
            if let Some(token) = cancel {
                token.check("Rasterization")?;
            }
            chunk
                .iter()
                .map(|&line| self.interpolate_row(line, &pixels))
                .collect()
        };

        let chunks: Vec<Vec<RowValues>> = if self.params.enable_parallel && rows > self.params.chunk_lines {
            line_indices
                .par_chunks(self.params.chunk_lines)
                .map(process_chunk)
                .collect::<GeoResult<_>>()?
        } else {
            line_indices
                .chunks(self.params.chunk_lines)
                .map(process_chunk)
                .collect::<GeoResult<_>>()?
        };

        let mut longitude = Array2::zeros((rows, cols));
        let mut latitude = Array2::zeros((rows, cols));
        let mut height = Array2::zeros((rows, cols));
        let mut incidence_angle = Array2::zeros((rows, cols));
        let mut azimuth_time = Array2::zeros((rows, cols));
        let mut burst_provenance = Array2::zeros((rows, cols));

        for (row, values) in chunks.into_iter().flatten().enumerate() {
            longitude.row_mut(row).assign(&Array1::from_vec(values.longitude));
            latitude.row_mut(row).assign(&Array1::from_vec(values.latitude));
            height.row_mut(row).assign(&Array1::from_vec(values.height));
            incidence_angle.row_mut(row).assign(&Array1::from_vec(values.incidence_angle));
            azimuth_time.row_mut(row).fill(values.azimuth_time);
            burst_provenance.row_mut(row).fill(values.burst);
        }

        let ground_range_spacing = self.spacing.over_grid(incidence_angle.view())?;

        let raster = Raster {
            lines: lines.clone().map(|l| l as f64).collect(),
            pixels: pixels.clone().map(|p| p as f64).collect(),
            longitude,
            latitude,
            height,
            incidence_angle,
            azimuth_time,
            ground_range_spacing,
            burst_provenance,
            time_reference: self.timeline.time_reference(),
            extent: RasterExtent {
                first_line: lines.start as f64,
                last_line: (lines.end - 1) as f64,
                first_pixel: pixels.start as f64,
                last_pixel: (pixels.end - 1) as f64,
            },
            line_step: 1,
            pixel_step: 1,
        };

        log::info!("✅ Geolocation raster completed: {}x{}", rows, cols);
        Ok(raster)
    }

    fn interpolate_row(&self, line: usize, pixels: &Range<usize>) -> GeoResult<RowValues> {
        let burst = self.timeline.line_to_burst(line)?;
        let azimuth_time = self.timeline.azimuth_seconds_at_line(line)?;

        let cols = pixels.len();
        let mut values = RowValues {
            longitude: Vec::with_capacity(cols),
            latitude: Vec::with_capacity(cols),
            height: Vec::with_capacity(cols),
            incidence_angle: Vec::with_capacity(cols),
            azimuth_time,
            burst,
        };

        let line_f = line as f64;
        for pixel in pixels.clone() {
            let cell = self
                .tie_points
                .bilinear_cell(line_f, pixel as f64, self.params.allow_extrapolation)?;
            let lon = cell.interpolate(self.tie_points.corner_longitudes(&cell));
            values.longitude.push(wrap_longitude(lon));
            values
                .latitude
                .push(cell.interpolate(self.tie_points.corner_values(&cell, |p| p.latitude)));
            values
                .height
                .push(cell.interpolate(self.tie_points.corner_values(&cell, |p| p.height)));
            values.incidence_angle.push(
                cell.interpolate(self.tie_points.corner_values(&cell, |p| p.incidence_angle)),
            );
        }

        Ok(values)
    }
}
