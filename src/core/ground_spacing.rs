use crate::types::{GeoError, GeoResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::f64::consts::PI;

/// Ground range spacing for one incidence angle (radians):
/// `slant_spacing / sin(incidence)`.
///
/// Incidence angles at or outside (0, pi) are a `Numeric` error; they are
/// never clamped.
pub fn ground_spacing(incidence_angle: f64, slant_spacing: f64) -> GeoResult<f64> {
    if !incidence_angle.is_finite() || incidence_angle <= 0.0 || incidence_angle >= PI {
        return Err(GeoError::Numeric(format!(
            "Incidence angle {} rad is outside (0, pi); ground spacing is singular",
            incidence_angle
        )));
    }
    let sine = incidence_angle.sin();
    if sine <= f64::EPSILON {
        return Err(GeoError::Numeric(format!(
            "sin({}) is zero to machine precision",
            incidence_angle
        )));
    }
    Ok(slant_spacing / sine)
}

/// Converts slant range pixel spacing to ground range spacing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundSpacingCalculator {
    slant_range_spacing: f64,
}

impl GroundSpacingCalculator {
    /// Create a calculator for a slant range spacing in meters
    pub fn new(slant_range_spacing: f64) -> GeoResult<Self> {
        if !slant_range_spacing.is_finite() || slant_range_spacing <= 0.0 {
            return Err(GeoError::Config(format!(
                "Slant range spacing must be positive, got {}",
                slant_range_spacing
            )));
        }
        Ok(Self { slant_range_spacing })
    }

    pub fn slant_range_spacing(&self) -> f64 {
        self.slant_range_spacing
    }

    /// Calculator for a grid whose columns each span `pixel_step` native pixels
    pub fn for_pixel_step(&self, pixel_step: usize) -> Self {
        Self {
            slant_range_spacing: self.slant_range_spacing * pixel_step.max(1) as f64,
        }
    }

    /// Ground spacing at a single incidence angle
    pub fn at(&self, incidence_angle: f64) -> GeoResult<f64> {
        ground_spacing(incidence_angle, self.slant_range_spacing)
    }

    /// Ground spacing along one raster row (range axis)
    pub fn along_row(&self, incidence_row: ArrayView1<'_, f64>) -> GeoResult<Array1<f64>> {
        let values = incidence_row
            .iter()
            .map(|&angle| self.at(angle))
            .collect::<GeoResult<Vec<f64>>>()?;
        Ok(Array1::from_vec(values))
    }

    /// Ground spacing for every cell of an incidence angle grid, rows in parallel
    pub fn over_grid(&self, incidence: ArrayView2<'_, f64>) -> GeoResult<Array2<f64>> {
        let (rows, cols) = incidence.dim();
        let row_values = incidence
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.along_row(row))
            .collect::<GeoResult<Vec<Array1<f64>>>>()?;

        let mut spacing = Array2::zeros((rows, cols));
        for (mut out, values) in spacing.axis_iter_mut(Axis(0)).zip(row_values) {
            out.assign(&values);
        }
        Ok(spacing)
    }
}
