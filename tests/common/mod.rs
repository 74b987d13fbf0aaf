//! Synthetic three-burst subswath shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use topsgeo::types::wrap_longitude;
use topsgeo::{Burst, SessionConfig, SubswathDataset, TiePoint};

/// Azimuth time interval between lines, seconds
pub const LINE_INTERVAL: f64 = 0.002055;
/// Time between the starts of consecutive bursts, seconds
pub const BURST_CYCLE: f64 = 2.758;

pub const TIE_ROWS: usize = 6;
pub const TIE_COLS: usize = 6;
pub const TIE_LINE_STEP: usize = 60;
pub const TIE_PIXEL_STEP: usize = 200;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 3, 17, 8, 15).unwrap()
}

fn after(seconds: f64) -> DateTime<Utc> {
    t0() + Duration::nanoseconds((seconds * 1e9).round() as i64)
}

/// 6x6 tie-point grid over lines 0-300 and pixels 0-1000 starting at `lon0`
pub fn tie_points(lon0: f64) -> Vec<TiePoint> {
    let mut points = Vec::with_capacity(TIE_ROWS * TIE_COLS);
    for r in 0..TIE_ROWS {
        for c in 0..TIE_COLS {
            let (l, p) = (r as f64, c as f64);
            points.push(TiePoint {
                line: r * TIE_LINE_STEP,
                pixel: c * TIE_PIXEL_STEP,
                longitude: wrap_longitude(lon0 + 0.25 * p - 0.03 * l + 0.002 * l * p),
                latitude: 38.0 - 0.1 * l - 0.015 * p + 0.0005 * p * p,
                height: 100.0 + 5.0 * l + 2.0 * p,
                incidence_angle: 0.53 + 0.05 * p,
                azimuth_time: after((r * TIE_LINE_STEP) as f64 * LINE_INTERVAL),
                slant_range_time: 5.36e-3 + 1.5e-6 * (c * TIE_PIXEL_STEP) as f64 / 100.0,
            });
        }
    }
    points
}

fn burst(index: usize, raw: (usize, usize), valid: (usize, usize)) -> Burst {
    let start = index as f64 * BURST_CYCLE;
    Burst {
        index,
        first_line: raw.0,
        last_line: raw.1,
        first_valid_line: valid.0,
        last_valid_line: valid.1,
        first_azimuth_time: after(start),
        last_azimuth_time: after(start + (raw.1 - raw.0) as f64 * LINE_INTERVAL),
        valid_pixels: None,
    }
}

/// Three bursts with overlapping raw ranges; valid ranges tile lines 0-299
pub fn bursts() -> Vec<Burst> {
    vec![
        burst(0, (0, 119), (0, 109)),
        burst(1, (100, 219), (110, 209)),
        burst(2, (200, 299), (210, 299)),
    ]
}

pub fn open(lon0: f64) -> SubswathDataset {
    open_with(lon0, SessionConfig::default())
}

pub fn open_with(lon0: f64, config: SessionConfig) -> SubswathDataset {
    init_logging();
    SubswathDataset::open(tie_points(lon0), bursts(), config).expect("Failed to open synthetic subswath")
}
