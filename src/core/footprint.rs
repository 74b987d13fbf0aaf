use crate::core::timeline::BurstTimeline;
use crate::core::transform::CoordinateTransform;
use crate::types::{Burst, GeoError, GeoResult, RasterExtent};
use geo::{ConvexHull, Coord, LineString, MultiPoint, Point, Polygon};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters for burst footprint construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FootprintParams {
    /// Segments per polygon edge (1 = corners only)
    pub samples_per_edge: usize,
}

impl Default for FootprintParams {
    fn default() -> Self {
        Self { samples_per_edge: 1 }
    }
}

impl FootprintParams {
    pub fn validate(&self) -> GeoResult<()> {
        if self.samples_per_edge == 0 {
            return Err(GeoError::Config("samples_per_edge must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Ground outline of one burst
#[derive(Debug, Clone, PartialEq)]
pub struct BurstFootprint {
    /// Annotation index of the burst
    pub burst: usize,
    /// Line span of the outline, in pixel-edge coordinates
    pub lines: (f64, f64),
    /// Ring in (continuous longitude, latitude)
    pub polygon: Polygon<f64>,
}

/// Builds per-burst footprint polygons from the burst timeline
#[derive(Debug, Clone)]
pub struct BurstGeometryBuilder {
    params: FootprintParams,
}

impl BurstGeometryBuilder {
    pub fn new(params: FootprintParams) -> GeoResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Footprints of every burst intersecting the transform's extent, in
    /// timeline order.
    ///
    /// With `only_valid` each outline spans the burst's valid lines (and valid
    /// pixels when known), so consecutive outlines share an edge. Otherwise the
    /// full raw range is used and neighbours overlap.
    pub fn footprints(
        &self,
        timeline: &BurstTimeline,
        transform: &CoordinateTransform,
        only_valid: bool,
    ) -> GeoResult<Vec<BurstFootprint>> {
        let extent = transform.extent();
        let footprints: Vec<BurstFootprint> = timeline
            .bursts()
            .par_iter()
            .filter_map(|burst| {
                let (lines, pixels) = burst_window(burst, &extent, only_valid)?;
                let polygon = self.outline(transform, lines, pixels);
                Some(BurstFootprint {
                    burst: burst.index,
                    lines,
                    polygon,
                })
            })
            .collect();

        if footprints.is_empty() {
            return Err(GeoError::OutOfBounds(format!(
                "No burst intersects lines {}-{}",
                extent.first_line, extent.last_line
            )));
        }

        log::debug!(
            "Built {} {} burst footprints",
            footprints.len(),
            if only_valid { "valid" } else { "raw" }
        );
        Ok(footprints)
    }

    /// Closed ring around the (line, pixel) rectangle, sampled along each edge
    fn outline(
        &self,
        transform: &CoordinateTransform,
        (line0, line1): (f64, f64),
        (pixel0, pixel1): (f64, f64),
    ) -> Polygon<f64> {
        let n = self.params.samples_per_edge;
        let step = |from: f64, to: f64, k: usize| from + (to - from) * k as f64 / n as f64;

        let mut image = Vec::with_capacity(4 * n + 1);
        for k in 0..n {
            image.push((line0, step(pixel0, pixel1, k)));
        }
        for k in 0..n {
            image.push((step(line0, line1, k), pixel1));
        }
        for k in 0..n {
            image.push((line1, step(pixel1, pixel0, k)));
        }
        for k in 0..n {
            image.push((step(line1, line0, k), pixel0));
        }

        let ring: Vec<Coord<f64>> = image
            .into_iter()
            .map(|(line, pixel)| {
                let (x, y) = transform.coords_to_ll_continuous(line, pixel);
                Coord { x, y }
            })
            .collect();
        Polygon::new(LineString::from(ring), vec![])
    }
}

/// Convex hull of a set of footprints, in the same continuous longitudes
pub fn subswath_footprint(footprints: &[BurstFootprint]) -> Polygon<f64> {
    let points: Vec<Point<f64>> = footprints
        .iter()
        .flat_map(|f| f.polygon.exterior().points())
        .collect();
    MultiPoint::from(points).convex_hull()
}

/// Pixel-edge line and pixel spans of a burst clipped to `extent`
fn burst_window(
    burst: &Burst,
    extent: &RasterExtent,
    only_valid: bool,
) -> Option<((f64, f64), (f64, f64))> {
    let (first, last) = if only_valid {
        (burst.first_valid_line, burst.last_valid_line)
    } else {
        (burst.first_line, burst.last_line)
    };
    let line0 = (first as f64 - 0.5).max(extent.first_line - 0.5);
    let line1 = (last as f64 + 0.5).min(extent.last_line + 0.5);
    if line1 <= line0 {
        return None;
    }

    let (pixel_first, pixel_last) = match (only_valid, burst.valid_pixels) {
        (true, Some((p0, p1))) => (p0 as f64, p1 as f64),
        _ => (extent.first_pixel, extent.last_pixel),
    };
    let pixel0 = (pixel_first - 0.5).max(extent.first_pixel - 0.5);
    let pixel1 = (pixel_last + 0.5).min(extent.last_pixel + 0.5);
    if pixel1 <= pixel0 {
        return None;
    }
    Some(((line0, line1), (pixel0, pixel1)))
}
