use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::extractor::{Extraction, Extractor, IdentityCollision};
use crate::models::Segment;
use crate::stages::AgreementMatrix;

/// Machine-readable result of one `extract` run
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport<'a> {
    pub signal: String,
    pub good_count: usize,
    pub anomalous_count: usize,
    pub annotated_anomalies: BTreeMap<String, usize>,
    pub agreement: Option<AgreementMatrix>,
    pub collisions: &'a [IdentityCollision],
    pub good: &'a [Segment],
    pub anomalous: &'a [Segment],
}

impl<'a> ExtractionReport<'a> {
    pub fn new(
        signal: &str,
        extraction: &'a Extraction,
        annotated_anomalies: BTreeMap<String, usize>,
        agreement: Option<AgreementMatrix>,
    ) -> Self {
        Self {
            signal: signal.to_string(),
            good_count: extraction.good.len(),
            anomalous_count: extraction.anomalous.len(),
            annotated_anomalies,
            agreement,
            collisions: &extraction.collisions,
            good: &extraction.good,
            anomalous: &extraction.anomalous,
        }
    }

    /// Write to a JSON file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).context("Failed to write JSON")?;
        Ok(())
    }
}

/// Counts from a CSV export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub signals_exported: usize,
    pub signals_skipped: usize,
    pub files_written: usize,
    /// (source, signal) pairs whose data could not be loaded or written
    pub sources_failed: usize,
}

/// `n` evenly spaced timestamps from `start` to `end` inclusive
pub fn linspace(start_us: i64, end_us: i64, n: usize) -> Vec<i64> {
    match n {
        0 => Vec::new(),
        1 => vec![start_us],
        _ => {
            let step = (end_us - start_us) as f64 / (n - 1) as f64;
            (0..n)
                .map(|i| (start_us as f64 + step * i as f64) as i64)
                .collect()
        }
    }
}

/// File name for an exported segment: `{signal}_{weight}_{id}.csv`
pub fn segment_file_name(segment: &Segment) -> String {
    format!("{}_{:?}_{}.csv", segment.signal_name, segment.weight, segment.id)
}

/// Write one loaded segment as `timestamp,value` lines
///
/// A segment without loaded data produces an empty file.
pub fn write_segment_csv(segment: &Segment, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(segment_file_name(segment));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    let mut writer = BufWriter::new(file);

    let data = segment.data.as_deref().unwrap_or(&[]);
    for (timestamp, value) in linspace(segment.start_us, segment.end_us, data.len())
        .into_iter()
        .zip(data)
    {
        writeln!(writer, "{},{}", timestamp, value)?;
    }
    writer.flush()?;
    Ok(path)
}

/// Export every annotated signal's segments as CSV files under `dir`
///
/// Signals without annotations are skipped. Segments are loaded one source at
/// a time; a source that fails to load or write is logged and left out while
/// the remaining sources are still exported.
pub fn export_csv(extractor: &dyn Extractor, dir: &Path) -> Result<ExportSummary> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;

    let mut summary = ExportSummary::default();
    for signal in extractor.signal_names().all() {
        let extraction = match extractor.extract(&signal) {
            Ok(extraction) => extraction,
            Err(e) => {
                info!("Signal {} is not annotated, skipping export ({})", signal, e);
                summary.signals_skipped += 1;
                continue;
            }
        };

        let mut by_source: BTreeMap<String, Vec<Segment>> = BTreeMap::new();
        for segment in extraction.good.into_iter().chain(extraction.anomalous) {
            by_source
                .entry(segment.source_id.clone())
                .or_default()
                .push(segment);
        }

        let mut written = 0;
        for (source, mut segments) in by_source {
            match export_source(extractor, &mut segments, dir) {
                Ok(count) => written += count,
                Err(e) => {
                    warn!("Skipping export of {} from {}: {:#}", signal, source, e);
                    summary.sources_failed += 1;
                }
            }
        }

        if written > 0 {
            summary.signals_exported += 1;
            summary.files_written += written;
            info!("Exported {} segments of {}", written, signal);
        } else {
            summary.signals_skipped += 1;
        }
    }

    Ok(summary)
}

/// Load and write the segments of one source
fn export_source(extractor: &dyn Extractor, segments: &mut [Segment], dir: &Path) -> Result<usize> {
    extractor.load_data(segments)?;
    for segment in segments.iter() {
        write_segment_csv(segment, dir)?;
    }
    Ok(segments.len())
}

/// Write text to a file, creating parent directories as needed
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsensusError;
    use crate::extractor::NameSet;
    use crate::models::SegmentId;

    fn segment(weight: f64, data: Option<Vec<f64>>) -> Segment {
        Segment {
            id: SegmentId::compute(0, 4_000_000, "src"),
            signal_name: "icp".to_string(),
            source_id: "src".to_string(),
            patient_id: "Unknown".to_string(),
            start_us: 0,
            end_us: 4_000_000,
            frequency: 1.0,
            anomalous: weight > 0.0,
            weight,
            annotators: vec!["alice".to_string()],
            anomaly_annotators: vec![],
            data,
        }
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0, 10, 0), Vec::<i64>::new());
        assert_eq!(linspace(0, 10, 1), vec![0]);
        assert_eq!(linspace(0, 10, 3), vec![0, 5, 10]);
        assert_eq!(linspace(0, 10, 4), vec![0, 3, 6, 10]);
    }

    #[test]
    fn test_segment_file_name() {
        let name = segment_file_name(&segment(0.0, None));
        assert!(name.starts_with("icp_0.0_"));
        assert!(name.ends_with(".csv"));
        assert!(segment_file_name(&segment(0.33, None)).starts_with("icp_0.33_"));
    }

    #[test]
    fn test_write_segment_csv() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(1.0, Some(vec![1.0, 2.0, f64::NAN, 4.0, 5.0]));

        let path = write_segment_csv(&seg, dir.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "0,1");
        assert_eq!(lines[2], "2000000,NaN");
        assert_eq!(lines[4], "4000000,5");
    }

    /// Two sources of one signal; loading from `broken` always fails
    struct TwoSources;

    impl Extractor for TwoSources {
        fn signal_names(&self) -> NameSet {
            NameSet {
                consistent: vec!["icp".to_string()],
                outliers: BTreeMap::new(),
            }
        }

        fn annotators(&self, _signal: &str) -> crate::Result<NameSet> {
            Ok(NameSet::default())
        }

        fn extract(&self, _signal: &str) -> crate::Result<Extraction> {
            let mut broken = segment(0.0, None);
            broken.source_id = "broken".to_string();
            broken.id = SegmentId::compute(0, 4_000_000, "broken");
            Ok(Extraction {
                good: vec![segment(0.0, None), broken],
                anomalous: vec![],
                collisions: vec![],
            })
        }

        fn load_data(&self, segments: &mut [Segment]) -> crate::Result<()> {
            for segment in segments.iter_mut() {
                if segment.source_id == "broken" {
                    return Err(ConsensusError::SegmentOutOfRange {
                        signal: "icp".to_string(),
                        span: segment.span(),
                    });
                }
                segment.data = Some(vec![1.0, 2.0]);
            }
            Ok(())
        }

        fn consensus_matrix(&self, _signal: &str, include_good: bool) -> crate::Result<AgreementMatrix> {
            Ok(crate::stages::agreement_matrix(&[], include_good))
        }

        fn annotated_anomalies(&self, _signal: &str) -> crate::Result<BTreeMap<String, usize>> {
            Ok(BTreeMap::new())
        }

        fn describe(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn test_export_continues_past_failing_source() {
        let dir = tempfile::tempdir().unwrap();

        let summary = export_csv(&TwoSources, dir.path()).unwrap();

        assert_eq!(summary.signals_exported, 1);
        assert_eq!(summary.files_written, 1);
        assert_eq!(summary.sources_failed, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_report_serializes_without_data() {
        let extraction = Extraction {
            good: vec![segment(0.0, Some(vec![1.0]))],
            anomalous: vec![],
            collisions: vec![],
        };
        let report = ExtractionReport::new("icp", &extraction, BTreeMap::new(), None);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["good_count"], 1);
        assert!(json["good"][0].get("data").is_none());
        assert_eq!(json["good"][0]["annotators"][0], "alice");
    }
}
