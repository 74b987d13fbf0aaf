use crate::types::{unwrap_longitude, wrap_longitude, GeoError, GeoResult, TiePoint};
use geo::{ConvexHull, Intersects, MultiPoint, Point, Polygon};

/// Minimum number of tie-points for a bilinear solve
pub const MIN_TIE_POINTS: usize = 4;

/// One grid row: all tie-points sharing a line
#[derive(Debug, Clone)]
struct GridRow {
    line: usize,
    start: usize,
    end: usize, // exclusive
}

/// Four tie-points surrounding a (line, pixel) position with their bilinear weights.
///
/// Corner order is `[top-left, top-right, bottom-left, bottom-right]`, where top is
/// the row with the smaller line. Weights outside [0, 1] mean the position is
/// extrapolated from the nearest edge cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TieCell {
    pub corners: [usize; 4],
    /// Fraction along the line axis between the two rows
    pub line_weight: f64,
    /// Fraction along the pixel axis in the top row
    pub top_weight: f64,
    /// Fraction along the pixel axis in the bottom row
    pub bottom_weight: f64,
    line_span: f64,
    top_span: f64,
    bottom_span: f64,
}

impl TieCell {
    /// Bilinear weights matching `corners`
    pub fn weights(&self) -> [f64; 4] {
        let u = self.line_weight;
        [
            (1.0 - u) * (1.0 - self.top_weight),
            (1.0 - u) * self.top_weight,
            u * (1.0 - self.bottom_weight),
            u * self.bottom_weight,
        ]
    }

    pub fn is_interior(&self) -> bool {
        let inside = |w: f64| (0.0..=1.0).contains(&w);
        inside(self.line_weight) && inside(self.top_weight) && inside(self.bottom_weight)
    }

    /// Interpolate corner values
    pub fn interpolate(&self, values: [f64; 4]) -> f64 {
        let w = self.weights();
        w[0] * values[0] + w[1] * values[1] + w[2] * values[2] + w[3] * values[3]
    }

    /// Partial derivatives (d/dline, d/dpixel) of the bilinear surface through `values`
    pub fn gradient(&self, values: [f64; 4]) -> (f64, f64) {
        let u = self.line_weight;
        let top = values[0] + self.top_weight * (values[1] - values[0]);
        let bottom = values[2] + self.bottom_weight * (values[3] - values[2]);
        let d_line = (bottom - top) / self.line_span;
        let d_pixel = (1.0 - u) * (values[1] - values[0]) / self.top_span
            + u * (values[3] - values[2]) / self.bottom_span;
        (d_line, d_pixel)
    }
}

/// Immutable sparse geolocation grid of one subswath.
///
/// Rows are groups of tie-points sharing a line, in ascending line order; within a
/// row pixels strictly increase. Rows may sample different pixels.
#[derive(Debug, Clone)]
pub struct TiePointTable {
    points: Vec<TiePoint>,
    rows: Vec<GridRow>,
    /// Longitudes made continuous around the first tie-point's longitude
    continuous_longitude: Vec<f64>,
    longitude_reference: f64,
    image_hull: Polygon<f64>,
}

impl TiePointTable {
    /// Build the table, enforcing line/pixel monotonicity
    pub fn build(points: Vec<TiePoint>) -> GeoResult<Self> {
        if points.len() < MIN_TIE_POINTS {
            return Err(GeoError::Data(format!(
                "At least {} tie-points are required, got {}",
                MIN_TIE_POINTS,
                points.len()
            )));
        }

        let mut rows: Vec<GridRow> = Vec::new();
        for (i, point) in points.iter().enumerate() {
            let finite = [
                point.longitude,
                point.latitude,
                point.height,
                point.incidence_angle,
                point.slant_range_time,
            ]
            .iter()
            .all(|v| v.is_finite());
            if !finite {
                return Err(GeoError::Data(format!(
                    "Tie-point {} at ({}, {}) has non-finite values",
                    i, point.line, point.pixel
                )));
            }
            if !(-90.0..=90.0).contains(&point.latitude) {
                return Err(GeoError::Data(format!(
                    "Tie-point {} latitude {} out of range",
                    i, point.latitude
                )));
            }

            let current_line = rows.last().map(|row| row.line);
            match current_line {
                Some(line) if line == point.line => {
                    let previous = &points[i - 1];
                    if point.pixel <= previous.pixel {
                        return Err(GeoError::Data(format!(
                            "Pixels not strictly increasing on line {}: {} after {}",
                            point.line, point.pixel, previous.pixel
                        )));
                    }
                    if let Some(row) = rows.last_mut() {
                        row.end = i + 1;
                    }
                }
                Some(line) if point.line < line => {
                    return Err(GeoError::Data(format!(
                        "Lines not monotonic: {} after {}",
                        point.line, line
                    )));
                }
                _ => rows.push(GridRow {
                    line: point.line,
                    start: i,
                    end: i + 1,
                }),
            }
        }

        if rows.len() < 2 {
            return Err(GeoError::Data(
                "Tie-points must span at least two lines".to_string(),
            ));
        }
        if let Some(row) = rows.iter().find(|r| r.end - r.start < 2) {
            return Err(GeoError::Data(format!(
                "Line {} has a single tie-point; at least two per line are required",
                row.line
            )));
        }

        let longitude_reference = points[0].longitude;
        let continuous_longitude = points
            .iter()
            .map(|p| unwrap_longitude(p.longitude, longitude_reference))
            .collect();

        let image_hull = MultiPoint::from(
            points
                .iter()
                .map(|p| Point::new(p.pixel as f64, p.line as f64))
                .collect::<Vec<_>>(),
        )
        .convex_hull();

        log::debug!(
            "Tie-point table: {} points in {} rows, lines {}-{}",
            points.len(),
            rows.len(),
            rows[0].line,
            rows[rows.len() - 1].line
        );

        Ok(Self {
            points,
            rows,
            continuous_longitude,
            longitude_reference,
            image_hull,
        })
    }

    pub fn points(&self) -> &[TiePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> &TiePoint {
        &self.points[index]
    }

    /// Longitude the continuous longitudes are unwrapped around
    pub fn longitude_reference(&self) -> f64 {
        self.longitude_reference
    }

    /// Longitude of tie-point `index`, continuous across the antimeridian
    pub fn continuous_longitude(&self, index: usize) -> f64 {
        self.continuous_longitude[index]
    }

    /// (min line, max line, min pixel, max pixel) over all tie-points
    pub fn bounds(&self) -> (usize, usize, usize, usize) {
        let min_pixel = self.points.iter().map(|p| p.pixel).min().unwrap_or(0);
        let max_pixel = self.points.iter().map(|p| p.pixel).max().unwrap_or(0);
        (
            self.rows[0].line,
            self.rows[self.rows.len() - 1].line,
            min_pixel,
            max_pixel,
        )
    }

    /// Whether (line, pixel) lies inside or on the convex hull of the tie-points
    pub fn hull_contains(&self, line: f64, pixel: f64) -> bool {
        self.image_hull.intersects(&Point::new(pixel, line))
    }

    /// The `k` tie-points closest to (line, pixel) in image space, nearest first
    pub fn neighbors(&self, line: f64, pixel: f64, k: usize) -> Vec<&TiePoint> {
        let mut ranked: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let dl = p.line as f64 - line;
                let dp = p.pixel as f64 - pixel;
                (dl * dl + dp * dp, i)
            })
            .collect();
        let k = k.min(ranked.len());
        if k == 0 {
            return Vec::new();
        }
        ranked.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
        ranked.truncate(k);
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, i)| &self.points[i]).collect()
    }

    /// Lower index of the bracketing segment in a sequence of `len >= 2` items,
    /// given how many leading items are `<=` the value. Values outside the
    /// sequence use the edge segment.
    fn bracket(len: usize, at_or_below: usize) -> usize {
        at_or_below.clamp(1, len - 1) - 1
    }

    /// Surrounding cell of (line, pixel), extrapolating from the edge cell when
    /// the position is outside the grid
    pub fn cell_at(&self, line: f64, pixel: f64) -> TieCell {
        let r = Self::bracket(
            self.rows.len(),
            self.rows.partition_point(|row| row.line as f64 <= line),
        );
        let (top, bottom) = (&self.rows[r], &self.rows[r + 1]);

        let segment = |row: &GridRow| -> (usize, f64, f64) {
            let len = row.end - row.start;
            let below = self.points[row.start..row.end].partition_point(|p| p.pixel as f64 <= pixel);
            let c = row.start + Self::bracket(len, below);
            let p0 = self.points[c].pixel as f64;
            let span = self.points[c + 1].pixel as f64 - p0;
            (c, (pixel - p0) / span, span)
        };
        let (top_c, top_weight, top_span) = segment(top);
        let (bottom_c, bottom_weight, bottom_span) = segment(bottom);

        let line_span = (bottom.line - top.line) as f64;
        TieCell {
            corners: [top_c, top_c + 1, bottom_c, bottom_c + 1],
            line_weight: (line - top.line as f64) / line_span,
            top_weight,
            bottom_weight,
            line_span,
            top_span,
            bottom_span,
        }
    }

    /// Surrounding cell of (line, pixel). Positions outside the tie-point convex
    /// hull are a `Data` error unless `allow_extrapolation` is set.
    pub fn bilinear_cell(&self, line: f64, pixel: f64, allow_extrapolation: bool) -> GeoResult<TieCell> {
        if !allow_extrapolation && !self.hull_contains(line, pixel) {
            return Err(GeoError::Data(format!(
                "Position (line {}, pixel {}) is outside the tie-point hull",
                line, pixel
            )));
        }
        Ok(self.cell_at(line, pixel))
    }

    /// Corner values of `field` for a cell
    pub fn corner_values(&self, cell: &TieCell, field: impl Fn(&TiePoint) -> f64) -> [f64; 4] {
        cell.corners.map(|i| field(&self.points[i]))
    }

    /// Continuous corner longitudes of a cell
    pub fn corner_longitudes(&self, cell: &TieCell) -> [f64; 4] {
        cell.corners.map(|i| self.continuous_longitude[i])
    }

    /// Bilinear (longitude, latitude) at (line, pixel), longitude wrapped to [-180, 180)
    pub fn evaluate_lonlat(&self, cell: &TieCell) -> (f64, f64) {
        let lon = cell.interpolate(self.corner_longitudes(cell));
        let lat = cell.interpolate(self.corner_values(cell, |p| p.latitude));
        (wrap_longitude(lon), lat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn point(line: usize, pixel: usize, lon: f64, lat: f64) -> TiePoint {
        TiePoint {
            line,
            pixel,
            longitude: lon,
            latitude: lat,
            height: 0.0,
            incidence_angle: 0.6,
            azimuth_time: Utc.with_ymd_and_hms(2020, 1, 3, 17, 8, 15).unwrap(),
            slant_range_time: 5.4e-3,
        }
    }

    fn square() -> Vec<TiePoint> {
        vec![
            point(0, 0, 10.0, 45.0),
            point(0, 100, 11.0, 45.0),
            point(100, 0, 10.0, 44.0),
            point(100, 100, 11.0, 44.0),
        ]
    }

    #[test]
    fn test_cell_lookup_on_irregular_rows() {
        // Rows at lines 0, 50, 150; the middle row samples different pixels
        let points = vec![
            point(0, 0, 10.0, 45.0),
            point(0, 100, 11.0, 45.1),
            point(0, 200, 12.0, 45.2),
            point(50, 0, 10.0, 44.5),
            point(50, 80, 10.8, 44.6),
            point(50, 160, 11.6, 44.7),
            point(50, 240, 12.4, 44.8),
            point(150, 0, 10.0, 43.5),
            point(150, 200, 12.0, 43.7),
        ];
        let table = TiePointTable::build(points).unwrap();

        // Between rows 0 and 50, pixel 130: top segment 100-200, bottom 80-160
        let cell = table.cell_at(20.0, 130.0);
        assert_eq!(cell.corners, [1, 2, 4, 5]);
        assert_abs_diff_eq!(cell.line_weight, 0.4);

        // Exactly on a row and a node uses the segment starting there
        let cell = table.cell_at(50.0, 160.0);
        assert_eq!(cell.corners, [5, 6, 7, 8]);
        assert_abs_diff_eq!(cell.line_weight, 0.0);

        // Beyond the last row and the last pixel extrapolates from the edge cell
        let cell = table.cell_at(180.0, 260.0);
        assert_eq!(cell.corners, [5, 6, 7, 8]);
        assert_abs_diff_eq!(cell.line_weight, 1.3);
        assert!(!cell.is_interior());

        // Before the first row and pixel
        let cell = table.cell_at(-10.0, -5.0);
        assert_eq!(cell.corners, [0, 1, 3, 4]);
        assert!(cell.line_weight < 0.0);
    }

    #[test]
    fn test_rejects_too_few_points() {
        let mut points = square();
        points.pop();
        assert!(matches!(TiePointTable::build(points), Err(GeoError::Data(_))));
    }

    #[test]
    fn test_rejects_non_monotonic_pixels() {
        let mut points = square();
        points.swap(0, 1);
        assert!(matches!(TiePointTable::build(points), Err(GeoError::Data(_))));
    }

    #[test]
    fn test_rejects_decreasing_lines() {
        let mut points = square();
        points.swap(1, 2);
        points.swap(0, 2);
        assert!(matches!(TiePointTable::build(points), Err(GeoError::Data(_))));
    }

    #[test]
    fn test_bilinear_cell_weights() {
        let table = TiePointTable::build(square()).unwrap();
        let cell = table.bilinear_cell(25.0, 75.0, false).unwrap();
        assert_eq!(cell.corners, [0, 1, 2, 3]);
        assert_abs_diff_eq!(cell.line_weight, 0.25);
        assert_abs_diff_eq!(cell.top_weight, 0.75);
        assert_abs_diff_eq!(cell.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        let (lon, lat) = table.evaluate_lonlat(&cell);
        assert_abs_diff_eq!(lon, 10.75, epsilon = 1e-12);
        assert_abs_diff_eq!(lat, 44.75, epsilon = 1e-12);
    }

    #[test]
    fn test_outside_hull_requires_extrapolation() {
        let table = TiePointTable::build(square()).unwrap();
        assert!(matches!(
            table.bilinear_cell(150.0, 50.0, false),
            Err(GeoError::Data(_))
        ));
        let cell = table.bilinear_cell(150.0, 50.0, true).unwrap();
        assert!(!cell.is_interior());
        let (_, lat) = table.evaluate_lonlat(&cell);
        assert_abs_diff_eq!(lat, 43.5, epsilon = 1e-12);
    }

    #[test]
    fn test_hull_includes_boundary() {
        let table = TiePointTable::build(square()).unwrap();
        assert!(table.hull_contains(0.0, 0.0));
        assert!(table.hull_contains(100.0, 50.0));
        assert!(!table.hull_contains(-1.0, 50.0));
    }

    #[test]
    fn test_neighbors_nearest_first() {
        let table = TiePointTable::build(square()).unwrap();
        let nearest = table.neighbors(90.0, 10.0, 2);
        assert_eq!(nearest.len(), 2);
        assert_eq!((nearest[0].line, nearest[0].pixel), (100, 0));
        assert_eq!(table.neighbors(0.0, 0.0, 10).len(), 4);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let points = vec![
            point(0, 0, 10.0, 45.0),
            point(0, 100, 11.2, 45.1),
            point(100, 0, 9.9, 44.0),
            point(100, 100, 11.0, 44.3),
        ];
        let table = TiePointTable::build(points).unwrap();
        let cell = table.cell_at(30.0, 40.0);
        let values = table.corner_values(&cell, |p| p.latitude);
        let (d_line, d_pixel) = cell.gradient(values);

        let h = 1e-4;
        let f = |l: f64, p: f64| {
            let c = table.cell_at(l, p);
            c.interpolate(table.corner_values(&c, |p| p.latitude))
        };
        assert_abs_diff_eq!(d_line, (f(30.0 + h, 40.0) - f(30.0 - h, 40.0)) / (2.0 * h), epsilon = 1e-8);
        assert_abs_diff_eq!(d_pixel, (f(30.0, 40.0 + h) - f(30.0, 40.0 - h)) / (2.0 * h), epsilon = 1e-8);
    }

    #[test]
    fn test_antimeridian_longitudes_are_continuous() {
        let points = vec![
            point(0, 0, 179.5, 10.0),
            point(0, 100, -179.5, 10.0),
            point(100, 0, 179.5, 9.0),
            point(100, 100, -179.5, 9.0),
        ];
        let table = TiePointTable::build(points).unwrap();
        assert_abs_diff_eq!(table.continuous_longitude(1), 180.5, epsilon = 1e-12);

        let (lon, _) = table.evaluate_lonlat(&table.cell_at(50.0, 25.0));
        assert_abs_diff_eq!(lon, 179.75, epsilon = 1e-12);
        let (lon, _) = table.evaluate_lonlat(&table.cell_at(50.0, 75.0));
        assert_abs_diff_eq!(lon, -179.75, epsilon = 1e-12);
    }
}
