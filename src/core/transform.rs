use crate::core::tie_points::TiePointTable;
use crate::core::timeline::BurstTimeline;
use crate::types::{
    offset_time, unwrap_longitude, GeoError, GeoResult, Raster, RasterExtent,
};
use chrono::{DateTime, Utc};
use geo::{ConvexHull, EuclideanDistance, MultiPoint, Point, Polygon};
use kiddo::{KdTree, SquaredEuclidean};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Distance (degrees) beyond the tie-point hull still accepted by `ll_to_coords`
const HULL_TOLERANCE: f64 = 1e-9;

/// Which burst a geographic query is attributed to when its line falls where
/// raw burst ranges overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// The burst whose valid range owns the solved line
    ValidBurst,
    /// The burst owning the tie-point nearest to the query, as long as its raw
    /// range contains the solved line
    NearestTiePoint,
}

/// Parameters for geographic/image coordinate conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformParams {
    /// Newton iterations per starting guess
    pub max_iterations: usize,
    /// Convergence threshold on the Newton step, in pixels
    pub tolerance_pixels: f64,
    /// Nearest tie-points tried as starting guesses
    pub candidates: usize,
    pub overlap_policy: OverlapPolicy,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance_pixels: 1e-4,
            candidates: 4,
            overlap_policy: OverlapPolicy::ValidBurst,
        }
    }
}

impl TransformParams {
    pub fn validate(&self) -> GeoResult<()> {
        if self.max_iterations == 0 {
            return Err(GeoError::Config("max_iterations must be at least 1".to_string()));
        }
        if self.candidates == 0 {
            return Err(GeoError::Config("candidates must be at least 1".to_string()));
        }
        if !(self.tolerance_pixels.is_finite() && self.tolerance_pixels > 0.0) {
            return Err(GeoError::Config(format!(
                "tolerance_pixels must be positive, got {}",
                self.tolerance_pixels
            )));
        }
        Ok(())
    }
}

/// Continuous image position of a geographic query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageCoords {
    pub line: f64,
    pub pixel: f64,
    /// Burst the position is attributed to (see [`OverlapPolicy`])
    pub burst: usize,
    /// Acquisition time of the line within that burst
    pub azimuth_time: DateTime<Utc>,
}

/// Position of a query snapped to an existing raster cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterIndex {
    pub row: usize,
    pub col: usize,
    /// Native coordinates of the cell
    pub line: f64,
    pub pixel: f64,
}

/// Bidirectional geographic <-> (line, pixel) mapping for one raster extent
pub struct CoordinateTransform {
    tie_points: Arc<TiePointTable>,
    timeline: Arc<BurstTimeline>,
    extent: RasterExtent,
    /// Convex hull of the tie-points and the extent in (continuous lon, lat)
    geo_hull: Polygon<f64>,
    /// Tie-point index in (scaled continuous lon, lat)
    geo_index: KdTree<f64, 2>,
    lon_scale: f64,
    params: TransformParams,
}

impl std::fmt::Debug for CoordinateTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinateTransform")
            .field("extent", &self.extent)
            .field("tie_points", &self.tie_points.len())
            .field("params", &self.params)
            .finish()
    }
}

impl CoordinateTransform {
    pub fn new(
        tie_points: Arc<TiePointTable>,
        timeline: Arc<BurstTimeline>,
        extent: RasterExtent,
        params: TransformParams,
    ) -> GeoResult<Self> {
        params.validate()?;

        let n = tie_points.len();
        let mean_lat = tie_points.points().iter().map(|p| p.latitude).sum::<f64>() / n as f64;
        let lon_scale = mean_lat.to_radians().cos().max(1e-2);

        let mut geo_index: KdTree<f64, 2> = KdTree::with_capacity(n);
        for (i, point) in tie_points.points().iter().enumerate() {
            let lon = tie_points.continuous_longitude(i);
            geo_index.add(&[lon * lon_scale, point.latitude], i as u64);
        }
        let geo_hull = coverage_hull(&tie_points, &extent);

        log::debug!(
            "Coordinate transform over lines {}-{}, pixels {}-{}",
            extent.first_line,
            extent.last_line,
            extent.first_pixel,
            extent.last_pixel
        );

        Ok(Self {
            tie_points,
            timeline,
            extent,
            geo_hull,
            geo_index,
            lon_scale,
            params,
        })
    }

    /// Transform for the extent of `raster`
    pub fn for_raster(
        tie_points: Arc<TiePointTable>,
        timeline: Arc<BurstTimeline>,
        raster: &Raster,
        params: TransformParams,
    ) -> GeoResult<Self> {
        Self::new(tie_points, timeline, raster.extent, params)
    }

    pub fn extent(&self) -> RasterExtent {
        self.extent
    }

    pub fn params(&self) -> &TransformParams {
        &self.params
    }

    fn check_extent(&self, line: f64, pixel: f64) -> GeoResult<()> {
        if !self.extent.contains(line, pixel, 1e-6) {
            return Err(GeoError::OutOfBounds(format!(
                "Position (line {:.3}, pixel {:.3}) outside raster extent lines {}-{}, pixels {}-{}",
                line,
                pixel,
                self.extent.first_line,
                self.extent.last_line,
                self.extent.first_pixel,
                self.extent.last_pixel
            )));
        }
        Ok(())
    }

    /// (longitude, latitude) of a continuous image position inside the extent
    pub fn coords_to_ll(&self, line: f64, pixel: f64) -> GeoResult<(f64, f64)> {
        self.check_extent(line, pixel)?;
        let cell = self.tie_points.cell_at(line, pixel);
        Ok(self.tie_points.evaluate_lonlat(&cell))
    }

    /// (continuous longitude, latitude) at any image position, extrapolating at the edges
    pub(crate) fn coords_to_ll_continuous(&self, line: f64, pixel: f64) -> (f64, f64) {
        let cell = self.tie_points.cell_at(line, pixel);
        (
            cell.interpolate(self.tie_points.corner_longitudes(&cell)),
            cell.interpolate(self.tie_points.corner_values(&cell, |p| p.latitude)),
        )
    }

    /// Continuous image position of (lon, lat) by inverse-bilinear Newton iteration
    pub fn ll_to_coords(&self, lon: f64, lat: f64) -> GeoResult<ImageCoords> {
        let lon = unwrap_longitude(lon, self.tie_points.longitude_reference());
        let query = Point::new(lon, lat);
        if self.geo_hull.euclidean_distance(&query) > HULL_TOLERANCE {
            return Err(GeoError::OutOfBounds(format!(
                "({:.6}, {:.6}) is outside the tie-point coverage",
                lon, lat
            )));
        }

        let neighbours = self
            .geo_index
            .nearest_n::<SquaredEuclidean>(&[lon * self.lon_scale, lat], self.params.candidates);

        let nearest = neighbours.first().map(|n| n.item as usize);
        let mut outside = None;
        for neighbour in &neighbours {
            let start = self.tie_points.point(neighbour.item as usize);
            let Some((line, pixel)) = self.newton(lon, lat, start.line as f64, start.pixel as f64) else {
                continue;
            };
            match self.check_extent(line, pixel) {
                Ok(()) => return self.attribute(line, pixel, nearest),
                Err(err) => outside = Some(err),
            }
        }

        Err(outside.unwrap_or_else(|| {
            GeoError::OutOfBounds(format!(
                "Inverse geolocation of ({:.6}, {:.6}) did not converge",
                lon, lat
            ))
        }))
    }

    fn newton(&self, lon: f64, lat: f64, mut line: f64, mut pixel: f64) -> Option<(f64, f64)> {
        for _ in 0..self.params.max_iterations {
            let cell = self.tie_points.cell_at(line, pixel);
            let lons = self.tie_points.corner_longitudes(&cell);
            let lats = self.tie_points.corner_values(&cell, |p| p.latitude);

            let f_lon = cell.interpolate(lons) - lon;
            let f_lat = cell.interpolate(lats) - lat;
            let (lon_l, lon_p) = cell.gradient(lons);
            let (lat_l, lat_p) = cell.gradient(lats);

            let det = lon_l * lat_p - lon_p * lat_l;
            if !det.is_finite() || det.abs() < f64::MIN_POSITIVE {
                return None;
            }
            let d_line = -(lat_p * f_lon - lon_p * f_lat) / det;
            let d_pixel = -(lon_l * f_lat - lat_l * f_lon) / det;
            line += d_line;
            pixel += d_pixel;

            if d_line.abs() < self.params.tolerance_pixels && d_pixel.abs() < self.params.tolerance_pixels {
                return Some((line, pixel));
            }
        }
        None
    }

    fn attribute(&self, line: f64, pixel: f64, nearest: Option<usize>) -> GeoResult<ImageCoords> {
        let (first_line, last_line) = self.timeline.line_extent();
        let owner_line = line.round().clamp(first_line as f64, last_line as f64) as usize;
        let owner = self.timeline.burst(self.timeline.line_to_burst(owner_line)?)?;

        let burst = match (self.params.overlap_policy, nearest) {
            (OverlapPolicy::NearestTiePoint, Some(index)) => {
                let tie_line = self.tie_points.point(index).line.clamp(first_line, last_line);
                let candidate = self.timeline.burst(self.timeline.line_to_burst(tie_line)?)?;
                if candidate.contains_raw(owner_line) {
                    candidate
                } else {
                    owner
                }
            }
            _ => owner,
        };

        let seconds = self.timeline.azimuth_seconds_in_burst(burst, line);
        Ok(ImageCoords {
            line,
            pixel,
            burst: burst.index,
            azimuth_time: offset_time(self.timeline.time_reference(), seconds),
        })
    }

    /// `ll_to_coords` snapped to the nearest existing cell of `raster`
    pub fn ll_to_index(&self, raster: &Raster, lon: f64, lat: f64) -> GeoResult<RasterIndex> {
        let coords = self.ll_to_coords(lon, lat)?;
        let row = nearest_index(&raster.lines, coords.line).ok_or_else(|| {
            GeoError::OutOfBounds("Raster has no rows".to_string())
        })?;
        let col = nearest_index(&raster.pixels, coords.pixel).ok_or_else(|| {
            GeoError::OutOfBounds("Raster has no columns".to_string())
        })?;
        Ok(RasterIndex {
            row,
            col,
            line: raster.lines[row],
            pixel: raster.pixels[col],
        })
    }
}

/// Convex hull in (continuous lon, lat) of the tie-point grid together with
/// `extent`.
///
/// Every tie line and pixel, plus the extent bounds, splits the image into
/// rectangles on which the bilinear mapping (extrapolated at the edges) stays
/// inside the hull of its four corners, so the hull of all those corners covers
/// every position of the extent.
fn coverage_hull(tie_points: &TiePointTable, extent: &RasterExtent) -> Polygon<f64> {
    let mut lines: Vec<f64> = tie_points.points().iter().map(|p| p.line as f64).collect();
    let mut pixels: Vec<f64> = tie_points.points().iter().map(|p| p.pixel as f64).collect();
    lines.extend([extent.first_line, extent.last_line]);
    pixels.extend([extent.first_pixel, extent.last_pixel]);
    for axis in [&mut lines, &mut pixels] {
        axis.sort_by(f64::total_cmp);
        axis.dedup();
    }

    let mut corners = Vec::with_capacity(lines.len() * pixels.len());
    for &line in &lines {
        for &pixel in &pixels {
            let cell = tie_points.cell_at(line, pixel);
            let lon = cell.interpolate(tie_points.corner_longitudes(&cell));
            let lat = cell.interpolate(tie_points.corner_values(&cell, |p| p.latitude));
            corners.push(Point::new(lon, lat));
        }
    }
    MultiPoint::from(corners).convex_hull()
}

/// Index of the value closest to `x` in an ascending coordinate vector
fn nearest_index(values: &Array1<f64>, x: f64) -> Option<usize> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let upper = match values.as_slice() {
        Some(sorted) => sorted.partition_point(|&v| v < x),
        None => values.iter().take_while(|&&v| v < x).count(),
    };
    if upper == 0 {
        return Some(0);
    }
    if upper == n {
        return Some(n - 1);
    }
    if (x - values[upper - 1]).abs() <= (values[upper] - x).abs() {
        Some(upper - 1)
    } else {
        Some(upper)
    }
}
