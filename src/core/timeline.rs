use crate::types::{offset_time, seconds_between, Burst, GeoError, GeoResult};
use chrono::{DateTime, Utc};

/// Valid extent of a burst derived from its per-line valid sample arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidLocation {
    /// First valid line, relative to the burst's first line
    pub first_line_offset: usize,
    /// Last valid line, relative to the burst's first line
    pub last_line_offset: usize,
    pub first_pixel: usize,
    pub last_pixel: usize,
}

impl ValidLocation {
    /// Derive the valid extent from `firstValidSample`/`lastValidSample` arrays.
    ///
    /// A line is valid when either entry is not `-1`. The pixel span is the
    /// minimum first sample and maximum last sample over the valid lines.
    pub fn from_sample_masks(first_valid_sample: &[i32], last_valid_sample: &[i32]) -> GeoResult<Self> {
        if first_valid_sample.len() != last_valid_sample.len() {
            return Err(GeoError::Data(format!(
                "Valid sample arrays differ in length: {} vs {}",
                first_valid_sample.len(),
                last_valid_sample.len()
            )));
        }

        let mut first_line = None;
        let mut last_line = 0;
        let mut first_pixel = i32::MAX;
        let mut last_pixel = i32::MIN;

        for (offset, (&fvs, &lvs)) in first_valid_sample.iter().zip(last_valid_sample).enumerate() {
            if fvs == -1 && lvs == -1 {
                continue;
            }
            first_line.get_or_insert(offset);
            last_line = offset;
            if fvs != -1 {
                first_pixel = first_pixel.min(fvs);
            }
            if lvs != -1 {
                last_pixel = last_pixel.max(lvs);
            }
        }

        let first_line_offset = first_line
            .ok_or_else(|| GeoError::Data("Burst has no valid line".to_string()))?;
        if first_pixel < 0 || last_pixel < first_pixel {
            return Err(GeoError::Data(format!(
                "Invalid valid sample span: {}-{}",
                first_pixel, last_pixel
            )));
        }

        Ok(Self {
            first_line_offset,
            last_line_offset: last_line,
            first_pixel: first_pixel as usize,
            last_pixel: last_pixel as usize,
        })
    }

    /// Apply this extent to a burst whose raw range starts at `burst.first_line`
    pub fn apply_to(&self, burst: &mut Burst) {
        burst.first_valid_line = burst.first_line + self.first_line_offset;
        burst.last_valid_line = burst.first_line + self.last_line_offset;
        burst.valid_pixels = Some((self.first_pixel, self.last_pixel));
    }
}

/// Per-burst azimuth timing and line bookkeeping for one subswath.
///
/// Valid ranges tile the subswath line axis; raw ranges may overlap.
#[derive(Debug, Clone)]
pub struct BurstTimeline {
    bursts: Vec<Burst>,
    /// first_valid_line of each burst, ascending
    valid_starts: Vec<usize>,
    time_reference: DateTime<Utc>,
}

impl BurstTimeline {
    /// Build and validate the timeline from bursts ordered by index
    pub fn build(bursts: Vec<Burst>) -> GeoResult<Self> {
        log::debug!("Building burst timeline from {} bursts", bursts.len());

        let first = bursts
            .first()
            .ok_or_else(|| GeoError::Geometry("No burst information available".to_string()))?;
        let time_reference = first.first_azimuth_time;

        for (i, burst) in bursts.iter().enumerate() {
            if burst.first_line > burst.last_line {
                return Err(GeoError::Geometry(format!(
                    "Burst {} has invalid line range: {}-{}",
                    burst.index, burst.first_line, burst.last_line
                )));
            }
            if burst.first_valid_line > burst.last_valid_line
                || burst.first_valid_line < burst.first_line
                || burst.last_valid_line > burst.last_line
            {
                return Err(GeoError::Geometry(format!(
                    "Burst {} valid range {}-{} is not inside raw range {}-{}",
                    burst.index,
                    burst.first_valid_line,
                    burst.last_valid_line,
                    burst.first_line,
                    burst.last_line
                )));
            }
            if burst.last_azimuth_time < burst.first_azimuth_time {
                return Err(GeoError::Geometry(format!(
                    "Burst {} ends before it starts ({} < {})",
                    burst.index, burst.last_azimuth_time, burst.first_azimuth_time
                )));
            }
            if let Some((first_pixel, last_pixel)) = burst.valid_pixels {
                if first_pixel > last_pixel {
                    return Err(GeoError::Geometry(format!(
                        "Burst {} has invalid valid pixel span: {}-{}",
                        burst.index, first_pixel, last_pixel
                    )));
                }
            }

            if i > 0 {
                let prev = &bursts[i - 1];
                if burst.index <= prev.index {
                    return Err(GeoError::Geometry(format!(
                        "Bursts are not ordered by index: {} follows {}",
                        burst.index, prev.index
                    )));
                }
                if prev.last_valid_line + 1 != burst.first_valid_line {
                    return Err(GeoError::Geometry(format!(
                        "Valid ranges of bursts {} and {} do not tile: {} + 1 != {}",
                        prev.index, burst.index, prev.last_valid_line, burst.first_valid_line
                    )));
                }
            }
        }

        let valid_starts = bursts.iter().map(|b| b.first_valid_line).collect();
        let timeline = Self {
            bursts,
            valid_starts,
            time_reference,
        };

        let (first_line, last_line) = timeline.line_extent();
        log::info!(
            "Burst timeline: {} bursts covering valid lines {}-{}",
            timeline.bursts.len(),
            first_line,
            last_line
        );
        Ok(timeline)
    }

    pub fn bursts(&self) -> &[Burst] {
        &self.bursts
    }

    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }

    /// First burst's first azimuth time; raster times are seconds after it
    pub fn time_reference(&self) -> DateTime<Utc> {
        self.time_reference
    }

    /// Inclusive line span tiled by the valid ranges
    pub fn line_extent(&self) -> (usize, usize) {
        match (self.bursts.first(), self.bursts.last()) {
            (Some(first), Some(last)) => (first.first_valid_line, last.last_valid_line),
            _ => (0, 0),
        }
    }

    /// Look up a burst by its annotation index
    pub fn burst(&self, index: usize) -> GeoResult<&Burst> {
        self.bursts
            .iter()
            .find(|b| b.index == index)
            .ok_or_else(|| GeoError::OutOfBounds(format!("No burst with index {}", index)))
    }

    fn position_of_line(&self, line: usize) -> GeoResult<usize> {
        let (first_line, last_line) = self.line_extent();
        if line < first_line || line > last_line {
            return Err(GeoError::OutOfBounds(format!(
                "Line {} outside subswath valid lines {}-{}",
                line, first_line, last_line
            )));
        }
        Ok(self.valid_starts.partition_point(|&start| start <= line) - 1)
    }

    /// Index of the burst whose valid range owns `line`
    pub fn line_to_burst(&self, line: usize) -> GeoResult<usize> {
        let position = self.position_of_line(line)?;
        Ok(self.bursts[position].index)
    }

    /// Indices of every burst whose raw range contains `line`
    pub fn line_to_bursts_overlapping(&self, line: usize) -> Vec<usize> {
        self.bursts
            .iter()
            .filter(|b| b.contains_raw(line))
            .map(|b| b.index)
            .collect()
    }

    /// Seconds after the time reference at which `burst` acquired `line`.
    ///
    /// Interpolates linearly over the burst's raw range.
    pub fn azimuth_seconds_in_burst(&self, burst: &Burst, line: f64) -> f64 {
        let start = seconds_between(self.time_reference, burst.first_azimuth_time);
        let stop = seconds_between(self.time_reference, burst.last_azimuth_time);
        if burst.last_line == burst.first_line {
            return start;
        }
        let fraction = (line - burst.first_line as f64) / (burst.last_line - burst.first_line) as f64;
        start + fraction * (stop - start)
    }

    /// Azimuth time of `line` in seconds after the time reference, taken from
    /// the owning valid burst. Jumps at valid-range boundaries.
    pub fn azimuth_seconds_at_line(&self, line: usize) -> GeoResult<f64> {
        let position = self.position_of_line(line)?;
        Ok(self.azimuth_seconds_in_burst(&self.bursts[position], line as f64))
    }

    /// Azimuth time of `line` from the owning valid burst
    pub fn azimuth_time_at_line(&self, line: usize) -> GeoResult<DateTime<Utc>> {
        let seconds = self.azimuth_seconds_at_line(line)?;
        Ok(offset_time(self.time_reference, seconds))
    }

    /// Number of raw lines shared by consecutive bursts
    pub fn overlap_lines(&self) -> Vec<usize> {
        self.bursts
            .windows(2)
            .map(|pair| {
                (pair[0].last_line + 1).saturating_sub(pair[1].first_line)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 3, 17, 8, 15).unwrap()
    }

    fn burst(index: usize, raw: (usize, usize), valid: (usize, usize), start_s: f64) -> Burst {
        Burst {
            index,
            first_line: raw.0,
            last_line: raw.1,
            first_valid_line: valid.0,
            last_valid_line: valid.1,
            first_azimuth_time: offset_time(t0(), start_s),
            last_azimuth_time: offset_time(t0(), start_s + 3.0),
            valid_pixels: None,
        }
    }

    fn two_bursts() -> Vec<Burst> {
        vec![
            burst(1, (0, 1099), (0, 999), 0.0),
            burst(2, (900, 1999), (1000, 1999), 2.0),
        ]
    }

    #[test]
    fn test_line_to_burst() {
        let timeline = BurstTimeline::build(two_bursts()).unwrap();
        assert_eq!(timeline.line_to_burst(0).unwrap(), 1);
        assert_eq!(timeline.line_to_burst(999).unwrap(), 1);
        assert_eq!(timeline.line_to_burst(1000).unwrap(), 2);
        assert_eq!(timeline.line_to_burst(1999).unwrap(), 2);
        assert!(timeline.line_to_burst(2000).is_err());
    }

    #[test]
    fn test_overlapping_lookup() {
        let timeline = BurstTimeline::build(two_bursts()).unwrap();
        assert_eq!(timeline.line_to_bursts_overlapping(500), vec![1]);
        assert_eq!(timeline.line_to_bursts_overlapping(950), vec![1, 2]);
        assert_eq!(timeline.line_to_bursts_overlapping(1500), vec![2]);
        assert!(timeline.line_to_bursts_overlapping(5000).is_empty());
        assert_eq!(timeline.overlap_lines(), vec![200]);
    }

    #[test]
    fn test_time_jump_at_valid_boundary() {
        let timeline = BurstTimeline::build(two_bursts()).unwrap();
        let before = timeline.azimuth_time_at_line(999).unwrap();
        let after = timeline.azimuth_time_at_line(1000).unwrap();

        // Line 999 is late in burst 1, line 1000 is early in burst 2
        let expected_before = 3.0 * 999.0 / 1099.0;
        let expected_after = 2.0 + 3.0 * 100.0 / 1099.0;
        assert_abs_diff_eq!(seconds_between(t0(), before), expected_before, epsilon = 1e-6);
        assert_abs_diff_eq!(seconds_between(t0(), after), expected_after, epsilon = 1e-6);
        assert!(after < before, "expected the time to restart at the burst boundary");
    }

    #[test]
    fn test_rejects_gap_between_valid_ranges() {
        let mut bursts = two_bursts();
        bursts[1].first_valid_line = 1001;
        let err = BurstTimeline::build(bursts).unwrap_err();
        assert!(matches!(err, GeoError::Geometry(_)));
    }

    #[test]
    fn test_rejects_duplicated_valid_line() {
        let mut bursts = two_bursts();
        bursts[1].first_valid_line = 999;
        assert!(matches!(BurstTimeline::build(bursts), Err(GeoError::Geometry(_))));
    }

    #[test]
    fn test_rejects_empty_and_unordered() {
        assert!(matches!(BurstTimeline::build(vec![]), Err(GeoError::Geometry(_))));
        let mut bursts = two_bursts();
        bursts[1].index = 0;
        assert!(matches!(BurstTimeline::build(bursts), Err(GeoError::Geometry(_))));
    }

    #[test]
    fn test_single_line_burst_time() {
        let mut single = burst(0, (0, 0), (0, 0), 0.0);
        single.last_azimuth_time = single.first_azimuth_time + Duration::milliseconds(2);
        let timeline = BurstTimeline::build(vec![single]).unwrap();
        assert_eq!(timeline.azimuth_time_at_line(0).unwrap(), t0());
    }

    #[test]
    fn test_valid_location_from_sample_masks() {
        let fvs = [-1, -1, 12, 10, 11, -1];
        let lvs = [-1, -1, 980, 990, 985, -1];
        let location = ValidLocation::from_sample_masks(&fvs, &lvs).unwrap();
        assert_eq!(
            location,
            ValidLocation {
                first_line_offset: 2,
                last_line_offset: 4,
                first_pixel: 10,
                last_pixel: 990
            }
        );

        let mut b = burst(3, (100, 105), (100, 105), 0.0);
        location.apply_to(&mut b);
        assert_eq!((b.first_valid_line, b.last_valid_line), (102, 104));
        assert_eq!(b.valid_pixels, Some((10, 990)));
    }

    #[test]
    fn test_valid_location_errors() {
        assert!(ValidLocation::from_sample_masks(&[-1, -1], &[-1, -1]).is_err());
        assert!(ValidLocation::from_sample_masks(&[1], &[1, 2]).is_err());
    }
}
