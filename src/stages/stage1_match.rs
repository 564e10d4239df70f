use tracing::debug;

use crate::models::{
    Annotation, Segment, SegmentId, TimeRange, WaveformRecord, Window, WindowGrid,
};

/// Pick a unique annotator name for one signal
///
/// A missing or blank identity becomes `placeholder`. A name already used on
/// the signal gets a numeric suffix (`name_0`, `name_1`, ...).
pub fn resolve_annotator(requested: Option<&str>, existing: &[&str], placeholder: &str) -> String {
    let base = requested
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(placeholder);

    let mut candidate = base.to_string();
    let mut suffix = 0usize;
    while existing.contains(&candidate.as_str()) {
        candidate = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    candidate
}

/// Stage 1: label every window of a grid for one annotator
///
/// Ranges not fully inside the record's time span are discarded. A window is
/// anomalous when a surviving range covers its start or its end (see
/// [`Window::overlaps`]). With no ranges at all, every window is good.
/// Every window lands in exactly one of the two lists.
pub fn match_ranges(
    record: &WaveformRecord,
    grid: &WindowGrid,
    ranges: &[TimeRange],
    annotator: &str,
) -> Annotation {
    let valid: Vec<TimeRange> = ranges
        .iter()
        .copied()
        .filter(|r| r.within(record.start_us(), record.end_us()))
        .collect();

    if valid.len() < ranges.len() {
        debug!(
            "{} ({}): {} of {} ranges from '{}' fall outside the signal",
            record.name(),
            record.source_id(),
            ranges.len() - valid.len(),
            ranges.len(),
            annotator
        );
    }

    let patient_id = record.patient_id();
    let mut good = Vec::new();
    let mut anomalies = Vec::new();

    for window in &grid.windows {
        let anomalous = valid.iter().any(|r| window.overlaps(r.start_us, r.end_us));
        let segment = new_segment(record, window, &patient_id, annotator, anomalous);
        if anomalous {
            anomalies.push(segment);
        } else {
            good.push(segment);
        }
    }

    Annotation {
        annotator: annotator.to_string(),
        good,
        anomalies,
    }
}

fn new_segment(
    record: &WaveformRecord,
    window: &Window,
    patient_id: &str,
    annotator: &str,
    anomalous: bool,
) -> Segment {
    Segment {
        id: SegmentId::compute(window.start_us, window.end_us, record.source_id()),
        signal_name: record.name().to_string(),
        source_id: record.source_id().to_string(),
        patient_id: patient_id.to_string(),
        start_us: window.start_us,
        end_us: window.end_us,
        frequency: record.frequency(),
        anomalous,
        weight: 0.0,
        annotators: vec![annotator.to_string()],
        anomaly_annotators: Vec::new(),
        data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WindowConfig;
    use crate::stages::build_window_grid;

    const START: i64 = 1_600_000_000_000_000;
    const SECOND: i64 = 1_000_000;

    fn setup() -> (WaveformRecord, WindowGrid) {
        let record = WaveformRecord::new("TBI_001.wave.json", "icp", START, 100.0, vec![0.0; 10_000]);
        let grid = build_window_grid(&record, &WindowConfig::default()).unwrap();
        (record, grid)
    }

    fn anomalous_indices(annotation: &Annotation) -> Vec<i64> {
        annotation
            .anomalies
            .iter()
            .map(|s| (s.start_us - START) / (10 * SECOND))
            .collect()
    }

    #[test]
    fn test_range_across_two_windows() {
        let (record, grid) = setup();
        let ranges = [TimeRange::new(START + 15 * SECOND, START + 25 * SECOND)];
        let annotation = match_ranges(&record, &grid, &ranges, "alice");

        assert_eq!(anomalous_indices(&annotation), vec![1, 2]);
        assert_eq!(annotation.good.len(), 8);
        assert_eq!(annotation.len(), grid.len());
        assert!(annotation.anomalies.iter().all(|s| s.anomalous));
        assert!(annotation.good.iter().all(|s| !s.anomalous));
    }

    #[test]
    fn test_no_ranges_means_all_good() {
        let (record, grid) = setup();
        let annotation = match_ranges(&record, &grid, &[], "alice");

        assert_eq!(annotation.good.len(), 10);
        assert!(annotation.anomalies.is_empty());
        assert!(annotation.good.iter().all(|s| s.annotators == vec!["alice"]));
    }

    #[test]
    fn test_out_of_bounds_ranges_are_discarded() {
        let (record, grid) = setup();
        let ranges = [
            // starts before the signal
            TimeRange::new(START - SECOND, START + 5 * SECOND),
            // ends after the signal
            TimeRange::new(START + 95 * SECOND, START + 101 * SECOND),
        ];
        let annotation = match_ranges(&record, &grid, &ranges, "alice");

        assert!(annotation.anomalies.is_empty());
        assert_eq!(annotation.good.len(), 10);
    }

    #[test]
    fn test_range_bounding_one_window_exactly() {
        let (record, grid) = setup();
        let ranges = [TimeRange::new(START + 30 * SECOND, START + 40 * SECOND)];
        let annotation = match_ranges(&record, &grid, &ranges, "alice");

        assert_eq!(anomalous_indices(&annotation), vec![3]);
    }

    #[test]
    fn test_range_touching_window_edges() {
        let (record, grid) = setup();

        // ends exactly at the start of window 3: only window 2 flagged
        let ranges = [TimeRange::new(START + 25 * SECOND, START + 30 * SECOND)];
        let annotation = match_ranges(&record, &grid, &ranges, "alice");
        assert_eq!(anomalous_indices(&annotation), vec![2]);

        // starts exactly at the start of window 3 and stays inside it
        let ranges = [TimeRange::new(START + 30 * SECOND, START + 35 * SECOND)];
        let annotation = match_ranges(&record, &grid, &ranges, "alice");
        assert_eq!(anomalous_indices(&annotation), vec![3]);

        // strictly inside window 3, touching neither edge
        let ranges = [TimeRange::new(START + 32 * SECOND, START + 35 * SECOND)];
        let annotation = match_ranges(&record, &grid, &ranges, "alice");
        assert!(annotation.anomalies.is_empty());
    }

    #[test]
    fn test_segment_identity_independent_of_annotator() {
        let (record, grid) = setup();
        let a = match_ranges(&record, &grid, &[], "alice");
        let b = match_ranges(&record, &grid, &[], "bob");

        let ids_a: Vec<_> = a.segments().map(|s| s.id.clone()).collect();
        let ids_b: Vec<_> = b.segments().map(|s| s.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_resolve_annotator() {
        assert_eq!(resolve_annotator(Some("alice"), &[], "Unknown"), "alice");
        assert_eq!(resolve_annotator(None, &[], "Unknown"), "Unknown");
        assert_eq!(resolve_annotator(Some("  "), &[], "Unknown"), "Unknown");
        assert_eq!(
            resolve_annotator(None, &["Unknown"], "Unknown"),
            "Unknown_0"
        );
        assert_eq!(
            resolve_annotator(None, &["Unknown", "Unknown_0"], "Unknown"),
            "Unknown_1"
        );
        assert_eq!(resolve_annotator(Some("alice"), &["alice"], "Unknown"), "alice_0");
    }
}
