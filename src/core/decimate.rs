use crate::core::ground_spacing::GroundSpacingCalculator;
use crate::types::{
    unwrap_longitude, wrap_longitude, CancellationToken, GeoError, GeoResult, Raster, RasterExtent,
};
use ndarray::{s, Array1, Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Requested output resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// Explicit block factors along the line and pixel axes
    Factors { line: usize, pixel: usize },
    /// Target ground distance in meters
    Ground { meters: f64 },
}

impl FromStr for Resolution {
    type Err = GeoError;

    /// Parses `"200m"` as a ground target and `"4x2"` as line x pixel factors
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if let Some(meters) = text.strip_suffix('m') {
            let meters: f64 = meters.trim().parse().map_err(|_| {
                GeoError::Config(format!("Invalid ground resolution: {}", s))
            })?;
            return Ok(Resolution::Ground { meters });
        }
        if let Some((line, pixel)) = text.split_once(['x', 'X']) {
            let parse = |v: &str| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| GeoError::Config(format!("Invalid block factors: {}", s)))
            };
            return Ok(Resolution::Factors {
                line: parse(line)?,
                pixel: parse(pixel)?,
            });
        }
        Err(GeoError::Config(format!(
            "Unrecognised resolution '{}': expected '<meters>m' or '<line>x<pixel>'",
            s
        )))
    }
}

/// One reduced output row
struct BlockRow {
    longitude: Vec<f64>,
    latitude: Vec<f64>,
    height: Vec<f64>,
    incidence_angle: Vec<f64>,
    azimuth_time: Vec<f64>,
    burst: Vec<usize>,
}

/// Block-mean coarsening of geolocation rasters
#[derive(Debug, Clone)]
pub struct ResolutionDecimator {
    /// Native slant range spacing
    spacing: GroundSpacingCalculator,
    /// Native azimuth pixel spacing in meters
    azimuth_pixel_spacing: f64,
    enable_parallel: bool,
}

impl ResolutionDecimator {
    pub fn new(spacing: GroundSpacingCalculator, azimuth_pixel_spacing: f64) -> GeoResult<Self> {
        if !azimuth_pixel_spacing.is_finite() || azimuth_pixel_spacing <= 0.0 {
            return Err(GeoError::Config(format!(
                "Azimuth pixel spacing must be positive, got {}",
                azimuth_pixel_spacing
            )));
        }
        Ok(Self {
            spacing,
            azimuth_pixel_spacing,
            enable_parallel: true,
        })
    }

    pub fn with_parallel(mut self, enable_parallel: bool) -> Self {
        self.enable_parallel = enable_parallel;
        self
    }

    /// Resolve a requested resolution into block factors relative to `raster`.
    ///
    /// Ground targets divide by the raster's current mean ground range spacing
    /// (pixels) and azimuth spacing (lines), rounded to the nearest integer.
    pub fn block_factors(&self, raster: &Raster, resolution: &Resolution) -> GeoResult<(usize, usize)> {
        let (line, pixel) = match *resolution {
            Resolution::Factors { line, pixel } => (line, pixel),
            Resolution::Ground { meters } => {
                if !meters.is_finite() || meters <= 0.0 {
                    return Err(GeoError::Config(format!(
                        "Ground resolution must be positive, got {}",
                        meters
                    )));
                }
                let range_spacing = raster.mean_ground_range_spacing().ok_or_else(|| {
                    GeoError::Config("Raster has no ground range spacing".to_string())
                })?;
                let azimuth_spacing = self.azimuth_pixel_spacing * raster.line_step as f64;
                log::debug!(
                    "Resolving {}m with range spacing {:.3}m and azimuth spacing {:.3}m",
                    meters,
                    range_spacing,
                    azimuth_spacing
                );
                (
                    (meters / azimuth_spacing).round() as usize,
                    (meters / range_spacing).round() as usize,
                )
            }
        };

        if line < 1 || pixel < 1 {
            return Err(GeoError::Config(format!(
                "Block factors must be at least 1, resolved to {}x{}",
                line, pixel
            )));
        }
        Ok((line, pixel))
    }

    /// Decimate `raster` to the requested resolution
    pub fn apply(
        &self,
        raster: &Raster,
        resolution: &Resolution,
        cancel: Option<&CancellationToken>,
    ) -> GeoResult<Raster> {
        let (factor_line, factor_pixel) = self.block_factors(raster, resolution)?;
        self.decimate(raster, factor_line, factor_pixel, cancel)
    }

    /// Block-reduce every field by `factor_line` x `factor_pixel`.
    ///
    /// Trailing rows/columns that do not fill a block are dropped. Ground range
    /// spacing is recomputed from the reduced incidence angle.
    pub fn decimate(
        &self,
        raster: &Raster,
        factor_line: usize,
        factor_pixel: usize,
        cancel: Option<&CancellationToken>,
    ) -> GeoResult<Raster> {
        if factor_line < 1 || factor_pixel < 1 {
            return Err(GeoError::Config(format!(
                "Block factors must be at least 1, got {}x{}",
                factor_line, factor_pixel
            )));
        }
        if factor_line == 1 && factor_pixel == 1 {
            log::debug!("Decimation by 1x1 is the identity");
            return Ok(raster.clone());
        }

        let (rows, cols) = raster.dim();
        let out_rows = rows / factor_line;
        let out_cols = cols / factor_pixel;
        if out_rows == 0 || out_cols == 0 {
            return Err(GeoError::Config(format!(
                "Block factors {}x{} too large for a {}x{} raster",
                factor_line, factor_pixel, rows, cols
            )));
        }

        log::info!(
            "Decimating geolocation raster {}x{} by {}x{} -> {}x{}",
            rows,
            cols,
            factor_line,
            factor_pixel,
            out_rows,
            out_cols
        );

        let reduce = |i: usize| -> GeoResult<BlockRow> {
            if let Some(token) = cancel {
                token.check("Decimation")?;
            }
            Ok(reduce_row(raster, i, factor_line, factor_pixel, out_cols))
        };
        let block_rows: Vec<BlockRow> = if self.enable_parallel {
            (0..out_rows).into_par_iter().map(reduce).collect::<GeoResult<_>>()?
        } else {
            (0..out_rows).map(reduce).collect::<GeoResult<_>>()?
        };

        let mut longitude = Array2::zeros((out_rows, out_cols));
        let mut latitude = Array2::zeros((out_rows, out_cols));
        let mut height = Array2::zeros((out_rows, out_cols));
        let mut incidence_angle = Array2::zeros((out_rows, out_cols));
        let mut azimuth_time = Array2::zeros((out_rows, out_cols));
        let mut burst_provenance = Array2::zeros((out_rows, out_cols));
        for (i, row) in block_rows.into_iter().enumerate() {
            longitude.row_mut(i).assign(&Array1::from_vec(row.longitude));
            latitude.row_mut(i).assign(&Array1::from_vec(row.latitude));
            height.row_mut(i).assign(&Array1::from_vec(row.height));
            incidence_angle.row_mut(i).assign(&Array1::from_vec(row.incidence_angle));
            azimuth_time.row_mut(i).assign(&Array1::from_vec(row.azimuth_time));
            burst_provenance.row_mut(i).assign(&Array1::from_vec(row.burst));
        }

        let line_step = raster.line_step * factor_line;
        let pixel_step = raster.pixel_step * factor_pixel;
        let ground_range_spacing = self
            .spacing
            .for_pixel_step(pixel_step)
            .over_grid(incidence_angle.view())?;

        let lines = block_means_1d(&raster.lines, factor_line, out_rows);
        let pixels = block_means_1d(&raster.pixels, factor_pixel, out_cols);
        let extent = RasterExtent {
            first_line: raster.extent.first_line,
            last_line: raster.extent.first_line + (out_rows * line_step) as f64 - 1.0,
            first_pixel: raster.extent.first_pixel,
            last_pixel: raster.extent.first_pixel + (out_cols * pixel_step) as f64 - 1.0,
        };

        Ok(Raster {
            lines,
            pixels,
            longitude,
            latitude,
            height,
            incidence_angle,
            azimuth_time,
            ground_range_spacing,
            burst_provenance,
            time_reference: raster.time_reference,
            extent,
            line_step,
            pixel_step,
        })
    }
}

fn block_mean(block: ArrayView2<'_, f64>) -> f64 {
    block.sum() / block.len() as f64
}

/// Mean longitude of a block, unwrapped around its first value
fn block_mean_longitude(block: ArrayView2<'_, f64>) -> f64 {
    let reference = block[[0, 0]];
    let offset = block
        .iter()
        .map(|&lon| unwrap_longitude(lon, reference) - reference)
        .sum::<f64>()
        / block.len() as f64;
    wrap_longitude(reference + offset)
}

fn block_means_1d(values: &Array1<f64>, factor: usize, count: usize) -> Array1<f64> {
    (0..count)
        .map(|i| {
            let block = values.slice(s![i * factor..(i + 1) * factor]);
            block.sum() / factor as f64
        })
        .collect()
}

fn reduce_row(raster: &Raster, i: usize, factor_line: usize, factor_pixel: usize, out_cols: usize) -> BlockRow {
    let r0 = i * factor_line;
    let mut row = BlockRow {
        longitude: Vec::with_capacity(out_cols),
        latitude: Vec::with_capacity(out_cols),
        height: Vec::with_capacity(out_cols),
        incidence_angle: Vec::with_capacity(out_cols),
        azimuth_time: Vec::with_capacity(out_cols),
        burst: Vec::with_capacity(out_cols),
    };

    for j in 0..out_cols {
        let c0 = j * factor_pixel;
        let block = s![r0..r0 + factor_line, c0..c0 + factor_pixel];
        row.longitude.push(block_mean_longitude(raster.longitude.slice(block)));
        row.latitude.push(block_mean(raster.latitude.slice(block)));
        row.height.push(block_mean(raster.height.slice(block)));
        row.incidence_angle.push(block_mean(raster.incidence_angle.slice(block)));
        row.azimuth_time.push(block_mean(raster.azimuth_time.slice(block)));
        row.burst
            .push(raster.burst_provenance[[r0 + factor_line / 2, c0 + factor_pixel / 2]]);
    }
    row
}
