use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{dt_from_unix, MICROS_PER_SECOND};

/// Content-stable identity of a window within one source
///
/// Hex SHA-256 of the decimal start, the decimal end and the source
/// identifier concatenated. Annotators labeling the same window of the same
/// source always produce the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    pub fn compute(start_us: i64, end_us: i64, source_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(start_us.to_string().as_bytes());
        hasher.update(end_us.to_string().as_bytes());
        hasher.update(source_id.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a segment came from, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentSpan {
    pub source_id: String,
    pub start_us: i64,
    pub end_us: i64,
}

impl fmt::Display for SegmentSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {})", self.source_id, self.start_us, self.end_us)
    }
}

/// A window's resolved label for one signal of one source
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// Identity derived from (start, end, source)
    pub id: SegmentId,
    /// Lower-cased signal name
    pub signal_name: String,
    /// Identifier of the source the window belongs to
    pub source_id: String,
    /// Patient identifier derived from the source identifier
    pub patient_id: String,
    /// Start timestamp in microseconds
    pub start_us: i64,
    /// End timestamp in microseconds (exclusive)
    pub end_us: i64,
    /// Sampling frequency of the signal in Hz
    pub frequency: f64,
    /// Whether any annotator flagged this window
    pub anomalous: bool,
    /// Fraction of labeling annotators who flagged the window (0-1)
    pub weight: f64,
    /// Annotators who labeled this window at all
    pub annotators: Vec<String>,
    /// Annotators who flagged this window as anomalous
    pub anomaly_annotators: Vec<String>,
    /// Samples, present only after an explicit load
    #[serde(skip)]
    pub data: Option<Vec<f64>>,
}

impl Segment {
    /// Duration in microseconds
    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    pub fn span(&self) -> SegmentSpan {
        SegmentSpan {
            source_id: self.source_id.clone(),
            start_us: self.start_us,
            end_us: self.end_us,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Summary of the loaded samples, ignoring NaN
    pub fn data_summary(&self) -> Option<DataSummary> {
        self.data.as_deref().map(DataSummary::from_samples)
    }

    /// Human-readable description of the segment
    pub fn describe(&self) -> String {
        let mut lines = vec![
            format!("Signal Name: {}", self.signal_name),
            format!("Patient ID: {}", self.patient_id),
            format!("Annotators: {}", self.annotators.join(", ")),
            format!("Frequency (Hz): {}", self.frequency),
            format!("Start Time: {}", dt_from_unix(self.start_us)),
            format!("End Time: {}", dt_from_unix(self.end_us)),
            format!(
                "Duration (s): {}",
                self.duration_us() as f64 / MICROS_PER_SECOND as f64
            ),
            format!("Anomalous: {}", self.anomalous),
            format!("Weight: {:.2}", self.weight),
            format!("Data Loaded: {}", self.is_loaded()),
        ];

        if let Some(summary) = self.data_summary() {
            lines.push(String::new());
            lines.push("Data Summary:".to_string());
            lines.push(format!("   Count: {}", summary.count));
            lines.push(format!("   NaN Count: {}", summary.nan_count));
            let stats = [
                ("Mean", summary.mean),
                ("Standard Deviation", summary.std_dev),
                ("Min", summary.min),
                ("25th Percentile", summary.p25),
                ("Median", summary.median),
                ("75th Percentile", summary.p75),
                ("Max", summary.max),
            ];
            for (label, value) in stats {
                match value {
                    Some(v) => lines.push(format!("   {}: {:.4}", label, v)),
                    None => lines.push(format!("   {}: n/a", label)),
                }
            }
        }

        lines.join("\n")
    }
}

/// NaN-aware statistics over a segment's samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSummary {
    pub count: usize,
    pub nan_count: usize,
    pub mean: Option<f64>,
    /// Population standard deviation
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub p25: Option<f64>,
    pub median: Option<f64>,
    pub p75: Option<f64>,
    pub max: Option<f64>,
}

impl DataSummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut valid: Vec<f64> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
        valid.sort_by(|a, b| a.total_cmp(b));

        let nan_count = samples.len() - valid.len();
        let (mean, std_dev) = if valid.is_empty() {
            (None, None)
        } else {
            let n = valid.len() as f64;
            let mean = valid.iter().sum::<f64>() / n;
            let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            (Some(mean), Some(variance.sqrt()))
        };

        Self {
            count: samples.len(),
            nan_count,
            mean,
            std_dev,
            min: valid.first().copied(),
            p25: percentile(&valid, 25.0),
            median: percentile(&valid, 50.0),
            p75: percentile(&valid, 75.0),
            max: valid.last().copied(),
        }
    }
}

/// Linear-interpolated percentile of sorted values
fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}
