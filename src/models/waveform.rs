use std::path::Path;
use std::sync::Arc;

use super::MICROS_PER_SECOND;

/// Immutable view of one named waveform taken from a source
///
/// The samples live in shared storage so several records carved out of one
/// contiguous buffer never copy it. The sample count is the length of the
/// view, which keeps count and data in agreement by construction.
#[derive(Debug, Clone)]
pub struct WaveformRecord {
    /// Lower-cased signal name
    name: String,
    /// Identifier of the owning source (e.g. its file path)
    source_id: String,
    /// Start timestamp in Unix microseconds (UTC)
    start_us: i64,
    /// Sampling frequency in Hz
    frequency: f64,
    storage: Arc<[f64]>,
    offset: usize,
    len: usize,
}

impl WaveformRecord {
    /// Create a record that owns its samples outright
    pub fn new(
        source_id: impl Into<String>,
        name: &str,
        start_us: i64,
        frequency: f64,
        samples: Vec<f64>,
    ) -> Self {
        let len = samples.len();
        Self::from_shared(source_id, name, start_us, frequency, samples.into(), 0, len)
    }

    /// Create a record over `len` samples of shared storage starting at `offset`
    ///
    /// The view is clamped to the storage bounds.
    pub fn from_shared(
        source_id: impl Into<String>,
        name: &str,
        start_us: i64,
        frequency: f64,
        storage: Arc<[f64]>,
        offset: usize,
        len: usize,
    ) -> Self {
        let offset = offset.min(storage.len());
        let len = len.min(storage.len() - offset);
        Self {
            name: normalize_signal_name(name),
            source_id: source_id.into(),
            start_us,
            frequency,
            storage,
            offset,
            len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn start_us(&self) -> i64 {
        self.start_us
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn sample_count(&self) -> usize {
        self.len
    }

    /// The record's samples (missing values are NaN)
    pub fn samples(&self) -> &[f64] {
        &self.storage[self.offset..self.offset + self.len]
    }

    /// Duration covered by the samples, in microseconds
    pub fn duration_us(&self) -> i64 {
        if self.frequency <= 0.0 {
            return 0;
        }
        (self.len as f64 * MICROS_PER_SECOND as f64 / self.frequency) as i64
    }

    /// End timestamp (exclusive) in Unix microseconds
    pub fn end_us(&self) -> i64 {
        self.start_us + self.duration_us()
    }

    /// Patient identifier embedded in the source identifier
    pub fn patient_id(&self) -> String {
        patient_id_from_source(&self.source_id)
    }
}

/// Normalize a signal name for lookups
pub fn normalize_signal_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Extract the first `_NNN` (three digits) group from a source's file name
pub fn patient_id_from_source(source_id: &str) -> String {
    let file_name = Path::new(source_id)
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| source_id.into());
    let bytes = file_name.as_bytes();
    bytes
        .windows(4)
        .find(|w| w[0] == b'_' && w[1..].iter().all(u8::is_ascii_digit))
        .map(|w| String::from_utf8_lossy(&w[1..]).into_owned())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_span() {
        let record = WaveformRecord::new("data/TBI_011.wave.json", "ICP", 1_000, 100.0, vec![0.0; 250]);

        assert_eq!(record.name(), "icp");
        assert_eq!(record.sample_count(), 250);
        assert_eq!(record.duration_us(), 2_500_000);
        assert_eq!(record.end_us(), 2_501_000);
        assert_eq!(record.patient_id(), "011");
    }

    #[test]
    fn test_shared_storage_views() {
        let storage: Arc<[f64]> = (0..10).map(|v| v as f64).collect::<Vec<_>>().into();
        let first = WaveformRecord::from_shared("f", "abp", 0, 1.0, storage.clone(), 0, 4);
        let second = WaveformRecord::from_shared("f", "abp_0", 0, 1.0, storage.clone(), 4, 100);

        assert_eq!(first.samples(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(second.sample_count(), 6);
        assert_eq!(second.samples()[0], 4.0);
    }

    #[test]
    fn test_patient_id_fallback() {
        assert_eq!(patient_id_from_source("recording.wave.json"), "Unknown");
        assert_eq!(patient_id_from_source("x_12_345.wave.json"), "345");
        assert_eq!(patient_id_from_source("/srv/run_999/TBI_011.wave.json"), "011");
    }
}
