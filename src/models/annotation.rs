use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{normalize_signal_name, Segment};

/// One annotator's raw artefact range in Unix microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_us: i64,
    pub end_us: i64,
}

impl TimeRange {
    pub fn new(start_us: i64, end_us: i64) -> Self {
        Self { start_us, end_us }
    }

    /// Whether the range lies fully within `[start_us, end_us]`
    pub fn within(&self, start_us: i64, end_us: i64) -> bool {
        self.start_us >= start_us && self.end_us <= end_us
    }
}

/// One annotator's pass over one waveform source
#[derive(Debug, Clone, Default)]
pub struct AnnotationRun {
    /// Annotator identity, if the run carried one
    pub annotator: Option<String>,
    /// Name of the waveform source this run refers to
    pub waveform_source: String,
    /// Ranges applying to every signal of the source
    pub global: Vec<TimeRange>,
    /// Ranges scoped to one signal, keyed by normalized signal name
    pub by_signal: HashMap<String, Vec<TimeRange>>,
}

impl AnnotationRun {
    pub fn new(annotator: Option<String>, waveform_source: impl Into<String>) -> Self {
        Self {
            annotator,
            waveform_source: waveform_source.into(),
            ..Default::default()
        }
    }

    /// Add a range scoped to one signal
    pub fn add_signal_range(&mut self, signal: &str, range: TimeRange) {
        self.by_signal
            .entry(normalize_signal_name(signal))
            .or_default()
            .push(range);
    }

    /// Ranges that apply to `signal`: global ranges first, then scoped ones
    pub fn ranges_for(&self, signal: &str) -> Vec<TimeRange> {
        let mut ranges = self.global.clone();
        if let Some(scoped) = self.by_signal.get(&normalize_signal_name(signal)) {
            ranges.extend_from_slice(scoped);
        }
        ranges
    }
}

/// One annotator's complete labeling of one signal
#[derive(Debug, Clone)]
pub struct Annotation {
    /// Resolved annotator identity (unique within the signal)
    pub annotator: String,
    /// Windows labeled good, in time order
    pub good: Vec<Segment>,
    /// Windows labeled anomalous, in time order
    pub anomalies: Vec<Segment>,
}

impl Annotation {
    /// All labeled segments, good first
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.good.iter().chain(self.anomalies.iter())
    }

    /// Total number of labeled windows
    pub fn len(&self) -> usize {
        self.good.len() + self.anomalies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.good.is_empty() && self.anomalies.is_empty()
    }
}
