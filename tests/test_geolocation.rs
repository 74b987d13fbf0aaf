mod common;

use approx::assert_abs_diff_eq;
use common::{bursts, open, open_with, tie_points, LINE_INTERVAL};
use topsgeo::types::{seconds_between, wrap_longitude};
use topsgeo::{GeoErrorKind, OverlapPolicy, RasterField, SessionConfig, SubswathDataset};

#[test]
fn test_native_raster_covers_subswath() {
    let dataset = open(12.5);
    let current = dataset.current();
    let raster = current.raster();

    assert_eq!(raster.dim(), (300, 1001));
    assert_eq!((raster.line_step, raster.pixel_step), (1, 1));
    assert_eq!(raster.extent.first_line, 0.0);
    assert_eq!(raster.extent.last_line, 299.0);
    assert_eq!(raster.extent.last_pixel, 1000.0);
    assert_eq!(raster.time_reference, common::t0());

    // Tie-point values are reproduced exactly at grid nodes
    let tie = &dataset.tie_points().points()[7];
    assert_abs_diff_eq!(raster.latitude[[tie.line, tie.pixel]], tie.latitude, epsilon = 1e-12);
    assert_abs_diff_eq!(raster.height[[tie.line, tie.pixel]], tie.height, epsilon = 1e-9);
}

#[test]
fn test_round_trip_inside_extent() {
    let dataset = open(12.5);
    let mut checked = 0;
    for line in (0..300).step_by(23) {
        for pixel in (0..=1000).step_by(77) {
            let (lon, lat) = dataset.coords_to_ll(line as f64, pixel as f64).unwrap();
            let coords = dataset
                .ll_to_coords(lon, lat)
                .unwrap_or_else(|e| panic!("inverse of ({}, {}) failed: {}", line, pixel, e));
            assert_abs_diff_eq!(coords.line, line as f64, epsilon = 1e-3);
            assert_abs_diff_eq!(coords.pixel, pixel as f64, epsilon = 1e-3);
            checked += 1;
        }
    }
    println!("Round-tripped {} positions", checked);
}

#[test]
fn test_azimuth_time_jumps_at_burst_boundary() {
    let dataset = open(12.5);
    let before = dataset.azimuth_time_at_line(109).unwrap();
    let after = dataset.azimuth_time_at_line(110).unwrap();

    // Line 110 is acquired by the next burst, a full burst cycle later
    let jump = seconds_between(before, after);
    assert!(jump > 100.0 * LINE_INTERVAL, "expected a time jump, got {} s", jump);

    let current = dataset.current();
    let raster = current.raster();
    assert_eq!(raster.azimuth_time_at(109, 0).unwrap(), before);
    assert_eq!(raster.azimuth_time_at(110, 500).unwrap(), after);
    assert_eq!(raster.burst_provenance()[[109, 0]], 0);
    assert_eq!(raster.burst_provenance()[[110, 0]], 1);
    assert_eq!(raster.burst_provenance()[[209, 0]], 1);
    assert_eq!(raster.burst_provenance()[[210, 0]], 2);

    // Within a burst time advances by one line interval per line
    let next = dataset.azimuth_time_at_line(111).unwrap();
    assert_abs_diff_eq!(seconds_between(after, next), LINE_INTERVAL, epsilon = 1e-6);
}

#[test]
fn test_named_fields_and_ground_spacing() {
    let dataset = open(12.5);
    let current = dataset.current();
    let raster = current.raster();

    let field: RasterField = "ground_range_spacing".parse().unwrap();
    assert_eq!(raster.field(field), raster.ground_range_spacing.view());
    assert_eq!(raster.field("incidenceAngle".parse().unwrap()), raster.incidence_angle.view());
    assert!("backscatter".parse::<RasterField>().is_err());

    // Incidence grows with range below 90 degrees, so ground spacing shrinks
    let row = raster.ground_range_spacing.row(150);
    for pair in row.as_slice().unwrap().windows(2) {
        assert!(pair[1] < pair[0]);
    }
    let slant = dataset.config().slant_range_spacing;
    assert_abs_diff_eq!(
        raster.ground_range_spacing[[0, 0]],
        slant / raster.incidence_angle[[0, 0]].sin(),
        epsilon = 1e-12
    );
}

#[test]
fn test_queries_outside_coverage() {
    let dataset = open(12.5);
    let err = dataset.ll_to_coords(-40.0, 10.0).unwrap_err();
    assert_eq!(err.kind(), GeoErrorKind::OutOfBounds);

    let err = dataset.coords_to_ll(400.0, 10.0).unwrap_err();
    assert_eq!(err.kind(), GeoErrorKind::OutOfBounds);

    let err = dataset.azimuth_time_at_line(300).unwrap_err();
    assert_eq!(err.kind(), GeoErrorKind::OutOfBounds);
}

#[test]
fn test_overlap_policy_attribution() {
    // Line 102 is raw in bursts 0 and 1 but valid only in burst 0; the nearest
    // tie-point row (line 120) belongs to burst 1
    let (lon, lat) = open(12.5).coords_to_ll(102.0, 510.0).unwrap();

    let valid = open(12.5).ll_to_coords(lon, lat).unwrap();
    assert_eq!(valid.burst, 0);

    let mut config = SessionConfig::default();
    config.transform.overlap_policy = OverlapPolicy::NearestTiePoint;
    let nearest = open_with(12.5, config).ll_to_coords(lon, lat).unwrap();
    assert_eq!(nearest.burst, 1);
    assert_abs_diff_eq!(nearest.line, valid.line, epsilon = 1e-6);

    // Burst 1 saw the line roughly one burst cycle later
    assert!(seconds_between(valid.azimuth_time, nearest.azimuth_time) > 2.0);
}

#[test]
fn test_antimeridian_raster_is_continuous() {
    let dataset = open(179.7);
    let current = dataset.current();
    let raster = current.raster();

    assert!(raster.longitude.iter().any(|&lon| lon > 179.0));
    assert!(raster.longitude.iter().any(|&lon| lon < -179.0));
    for row in raster.longitude.rows() {
        for pair in row.as_slice().unwrap().windows(2) {
            let step = wrap_longitude(pair[1] - pair[0]);
            assert!(step.abs() < 0.01, "longitude jumps by {}", step);
        }
    }

    let (lon, lat) = dataset.coords_to_ll(150.0, 900.0).unwrap();
    assert!(lon < 0.0);
    let coords = dataset.ll_to_coords(lon, lat).unwrap();
    assert_abs_diff_eq!(coords.line, 150.0, epsilon = 1e-3);
    assert_abs_diff_eq!(coords.pixel, 900.0, epsilon = 1e-3);
}

#[test]
fn test_round_trip_with_extrapolated_lines() {
    common::init_logging();

    // Tie-points stop at line 240 while the bursts run to line 299
    let mut points = tie_points(12.5);
    points.retain(|p| p.line <= 240);
    let mut config = SessionConfig::default();
    config.interpolation.allow_extrapolation = true;
    let dataset = SubswathDataset::open(points, bursts(), config).unwrap();

    let current = dataset.current();
    assert_eq!(current.raster().extent.last_line, 299.0);

    for &(line, pixel) in &[(295.0, 500.0), (299.0, 1000.0), (260.0, 0.0)] {
        let (lon, lat) = dataset.coords_to_ll(line, pixel).unwrap();
        let coords = dataset
            .ll_to_coords(lon, lat)
            .unwrap_or_else(|e| panic!("inverse of ({}, {}) failed: {}", line, pixel, e));
        assert_abs_diff_eq!(coords.line, line, epsilon = 1e-3);
        assert_abs_diff_eq!(coords.pixel, pixel, epsilon = 1e-3);
        assert_eq!(coords.burst, 2);
    }
}
