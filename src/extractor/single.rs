use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::{debug, info, warn};

use super::{Extraction, Extractor, ExtractorConfig, NameSet};
use crate::error::{ConsensusError, Result};
use crate::models::{
    dt_from_unix, normalize_signal_name, Annotation, AnnotationRun, Segment, TimeRange,
    WaveformRecord, WindowGrid,
};
use crate::stages::{
    agreement_matrix, build_window_grid, execute_consensus, match_ranges, resolve_annotator,
    AgreementMatrix,
};

/// Extractor over the signals and annotations of one waveform source
#[derive(Debug, Clone)]
pub struct SingleSourceExtractor {
    source_id: String,
    config: ExtractorConfig,
    records: Vec<WaveformRecord>,
    /// Normalized signal name -> index of the first record with that name
    index: HashMap<String, usize>,
    /// Normalized signal name -> annotations in arrival order
    annotations: HashMap<String, Vec<Annotation>>,
}

impl SingleSourceExtractor {
    pub fn new(
        source_id: impl Into<String>,
        records: Vec<WaveformRecord>,
        config: ExtractorConfig,
    ) -> Self {
        let source_id = source_id.into();
        let mut index = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            if record.source_id() != source_id {
                warn!(
                    "Record '{}' claims source {} but was loaded from {}",
                    record.name(),
                    record.source_id(),
                    source_id
                );
            }
            index.entry(record.name().to_string()).or_insert(i);
        }

        Self {
            source_id,
            config,
            records,
            index,
            annotations: HashMap::new(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// File name of the source (last path component)
    pub fn source_name(&self) -> &str {
        file_name(&self.source_id)
    }

    pub fn records(&self) -> &[WaveformRecord] {
        &self.records
    }

    /// Look up a record by signal name (case-insensitive)
    pub fn record(&self, signal: &str) -> Result<&WaveformRecord> {
        let name = normalize_signal_name(signal);
        self.index
            .get(&name)
            .map(|&i| &self.records[i])
            .ok_or(ConsensusError::SignalNotFound(name))
    }

    /// Samples of a signal
    pub fn raw_data(&self, signal: &str) -> Result<&[f64]> {
        self.record(signal).map(WaveformRecord::samples)
    }

    /// Annotations recorded for a signal
    ///
    /// Fails with `SignalNotFound` when the signal is unknown or has not been
    /// annotated yet.
    pub fn annotations(&self, signal: &str) -> Result<&[Annotation]> {
        let name = self.record(signal)?.name();
        match self.annotations.get(name) {
            Some(list) if !list.is_empty() => Ok(list.as_slice()),
            _ => Err(ConsensusError::SignalNotFound(name.to_string())),
        }
    }

    pub fn is_annotated(&self, signal: &str) -> bool {
        self.annotations(signal).is_ok()
    }

    /// Label one signal with one annotator's ranges
    ///
    /// Returns the resolved annotator name, which is unique within the signal.
    pub fn add_annotation(
        &mut self,
        signal: &str,
        ranges: &[TimeRange],
        annotator: Option<&str>,
    ) -> Result<String> {
        let name = normalize_signal_name(signal);
        let record = self
            .index
            .get(&name)
            .map(|&i| &self.records[i])
            .ok_or_else(|| ConsensusError::SignalNotFound(name.clone()))?;
        let grid = build_window_grid(record, &self.config.window)?;

        let existing = self.annotations.entry(name).or_default();
        let taken: Vec<&str> = existing.iter().map(|a| a.annotator.as_str()).collect();
        let resolved = resolve_annotator(annotator, &taken, &self.config.unknown_annotator);

        let annotation = match_ranges(record, &grid, ranges, &resolved);
        debug!(
            "{} ({}): '{}' flagged {} of {} windows",
            record.name(),
            self.source_id,
            resolved,
            annotation.anomalies.len(),
            annotation.len()
        );
        existing.push(annotation);

        Ok(resolved)
    }

    /// Apply an annotation run to every signal of this source
    ///
    /// Signals that cannot be windowed are logged and skipped. Returns the
    /// number of signals annotated.
    pub fn annotate(&mut self, run: &AnnotationRun) -> Result<usize> {
        if !self.accepts(run) {
            return Err(ConsensusError::SourceMismatch {
                expected: self.source_name().to_string(),
                found: run.waveform_source.clone(),
            });
        }

        let names = self.signal_names().consistent;
        let mut annotated = 0;
        for name in names {
            let ranges = run.ranges_for(&name);
            match self.add_annotation(&name, &ranges, run.annotator.as_deref()) {
                Ok(_) => annotated += 1,
                Err(e) => warn!("Skipping signal {} of {}: {}", name, self.source_name(), e),
            }
        }

        Ok(annotated)
    }

    /// Whether an annotation run refers to this source
    pub fn accepts(&self, run: &AnnotationRun) -> bool {
        file_name(&run.waveform_source) == self.source_name()
    }

    /// Apply every run that refers to this source, ignoring the rest
    ///
    /// Returns the number of runs applied.
    pub fn auto_annotate(&mut self, runs: &[AnnotationRun]) -> usize {
        let matching: Vec<&AnnotationRun> = runs.iter().filter(|run| self.accepts(run)).collect();
        let mut applied = 0;
        for run in matching {
            match self.annotate(run) {
                Ok(_) => applied += 1,
                Err(e) => warn!("Annotation run skipped for {}: {}", self.source_name(), e),
            }
        }
        if applied > 0 {
            info!("{}: applied {} annotation runs", self.source_name(), applied);
        }
        applied
    }

    /// Load samples into segments belonging to this source
    pub(crate) fn load_segments<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a mut Segment>,
    ) -> Result<()> {
        let mut by_signal: HashMap<String, Vec<&'a mut Segment>> = HashMap::new();
        for segment in segments {
            if segment.source_id != self.source_id {
                return Err(ConsensusError::SourceMismatch {
                    expected: self.source_id.clone(),
                    found: segment.source_id.clone(),
                });
            }
            by_signal
                .entry(segment.signal_name.clone())
                .or_default()
                .push(segment);
        }

        for (signal, segments) in by_signal {
            let record = self.record(&signal)?;
            let grid = build_window_grid(record, &self.config.window)?;
            for segment in segments {
                segment.data = Some(slice_for(record, &grid, segment)?.to_vec());
            }
        }

        Ok(())
    }
}

/// Samples of the grid window `segment` was cut from
fn slice_for<'a>(
    record: &'a WaveformRecord,
    grid: &WindowGrid,
    segment: &Segment,
) -> Result<&'a [f64]> {
    grid.find(segment.start_us, segment.end_us)
        .and_then(|w| record.samples().get(w.start_sample..w.end_sample))
        .ok_or_else(|| ConsensusError::SegmentOutOfRange {
            signal: record.name().to_string(),
            span: segment.span(),
        })
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

impl Extractor for SingleSourceExtractor {
    fn signal_names(&self) -> NameSet {
        let mut seen = BTreeSet::new();
        let consistent = self
            .records
            .iter()
            .map(|r| r.name().to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect();
        NameSet {
            consistent,
            outliers: BTreeMap::new(),
        }
    }

    fn annotators(&self, signal: &str) -> Result<NameSet> {
        let names: BTreeSet<String> = self
            .annotations(signal)?
            .iter()
            .map(|a| a.annotator.clone())
            .collect();
        Ok(NameSet {
            consistent: names.into_iter().collect(),
            outliers: BTreeMap::new(),
        })
    }

    fn extract(&self, signal: &str) -> Result<Extraction> {
        let consensus = execute_consensus(self.annotations(signal)?);
        Ok(Extraction {
            good: consensus.good,
            anomalous: consensus.anomalous,
            collisions: Vec::new(),
        })
    }

    fn load_data(&self, segments: &mut [Segment]) -> Result<()> {
        self.load_segments(segments.iter_mut())
    }

    fn consensus_matrix(&self, signal: &str, include_good: bool) -> Result<AgreementMatrix> {
        Ok(agreement_matrix(self.annotations(signal)?, include_good))
    }

    fn annotated_anomalies(&self, signal: &str) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for annotation in self.annotations(signal)? {
            counts.entry(annotation.annotator.clone()).or_insert(0);
            for segment in &annotation.anomalies {
                for annotator in &segment.annotators {
                    *counts.entry(annotator.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    fn describe(&self) -> String {
        let mut out = String::from("\n~~Signal File Description~~\n\n");
        out.push_str(&format!(" File Name: {}\n", self.source_name()));

        for record in &self.records {
            out.push('\n');
            out.push_str(&format!(" Signal Name: {}\n", record.name()));
            out.push_str(&format!("   Frequency: {} Hz\n", record.frequency()));
            out.push_str(&format!("   Start Time: {}\n", dt_from_unix(record.start_us())));
            out.push_str(&format!("   End Time: {}\n", dt_from_unix(record.end_us())));
            let hours = if record.frequency() > 0.0 {
                record.sample_count() as f64 / record.frequency() / 3600.0
            } else {
                0.0
            };
            out.push_str(&format!(
                "   Length: {:.2}h ({} samples)\n",
                hours,
                record.sample_count()
            ));

            let Ok(annotations) = self.annotations(record.name()) else {
                out.push_str("   Annotated: No\n");
                continue;
            };
            out.push_str("   Annotated: Yes\n");

            let matrix = agreement_matrix(annotations, true);
            for annotation in annotations {
                out.push_str(&format!(
                    "\n     {} - Good Segments: {}, Anomalies: {}\n",
                    annotation.annotator,
                    annotation.good.len(),
                    annotation.anomalies.len()
                ));
                for other in annotations.iter().filter(|a| a.annotator != annotation.annotator) {
                    if let Some(score) = matrix.score(&annotation.annotator, &other.annotator) {
                        out.push_str(&format!(
                            "       Consensus with {}: {:.2}%\n",
                            other.annotator,
                            score * 100.0
                        ));
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_600_000_000_000_000;
    const SECOND: i64 = 1_000_000;
    const SOURCE: &str = "data/TBI_001.wave.json";

    fn extractor() -> SingleSourceExtractor {
        let records = vec![
            WaveformRecord::new(SOURCE, "ICP", START, 100.0, (0..10_000).map(|v| v as f64).collect()),
            WaveformRecord::new(SOURCE, "abp", START, 50.0, vec![1.0; 5_000]),
            WaveformRecord::new(SOURCE, "empty", START, 50.0, vec![]),
        ];
        SingleSourceExtractor::new(SOURCE, records, ExtractorConfig::default())
    }

    fn run(annotator: Option<&str>, ranges: &[(i64, i64)]) -> AnnotationRun {
        let mut run = AnnotationRun::new(annotator.map(str::to_string), "TBI_001.wave.json");
        run.global = ranges
            .iter()
            .map(|&(s, e)| TimeRange::new(START + s * SECOND, START + e * SECOND))
            .collect();
        run
    }

    #[test]
    fn test_signal_lookup_is_case_insensitive() {
        let ex = extractor();
        assert_eq!(ex.record("Icp").unwrap().name(), "icp");
        assert_eq!(ex.raw_data("ICP").unwrap().len(), 10_000);
        assert!(matches!(
            ex.record("spo2"),
            Err(ConsensusError::SignalNotFound(_))
        ));
    }

    #[test]
    fn test_extract_requires_annotations() {
        let ex = extractor();
        assert!(matches!(
            ex.extract("icp"),
            Err(ConsensusError::SignalNotFound(_))
        ));
        assert!(!ex.is_annotated("icp"));
    }

    #[test]
    fn test_annotate_skips_unwindowable_signals() {
        let mut ex = extractor();
        let annotated = ex.annotate(&run(Some("alice"), &[(15, 25)])).unwrap();

        assert_eq!(annotated, 2);
        assert!(ex.is_annotated("icp"));
        assert!(ex.is_annotated("abp"));
        assert!(!ex.is_annotated("empty"));
    }

    #[test]
    fn test_annotate_rejects_other_source() {
        let mut ex = extractor();
        let mut other = run(Some("alice"), &[]);
        other.waveform_source = "TBI_002.wave.json".to_string();

        assert!(matches!(
            ex.annotate(&other),
            Err(ConsensusError::SourceMismatch { .. })
        ));
        assert_eq!(ex.auto_annotate(&[other]), 0);
    }

    #[test]
    fn test_unknown_annotators_are_disambiguated() {
        let mut ex = extractor();
        ex.annotate(&run(None, &[])).unwrap();
        ex.annotate(&run(None, &[(15, 25)])).unwrap();
        ex.annotate(&run(Some(""), &[])).unwrap();

        let names = ex.annotators("icp").unwrap();
        assert_eq!(names.consistent, vec!["Unknown", "Unknown_0", "Unknown_1"]);
    }

    #[test]
    fn test_extract_weights() {
        let mut ex = extractor();
        ex.auto_annotate(&[run(Some("alice"), &[(20, 30)]), run(Some("bob"), &[])]);

        let extraction = ex.extract("icp").unwrap();
        assert_eq!(extraction.anomalous.len(), 1);
        assert_eq!(extraction.good.len(), 9);
        assert_eq!(extraction.anomalous[0].weight, 0.5);
        assert!(extraction.collisions.is_empty());

        let again = ex.extract("icp").unwrap();
        assert_eq!(again.anomalous[0].weight, extraction.anomalous[0].weight);
        assert_eq!(again.anomalous[0].id, extraction.anomalous[0].id);
    }

    #[test]
    fn test_annotated_anomalies() {
        let mut ex = extractor();
        ex.auto_annotate(&[run(Some("alice"), &[(15, 25), (60, 70)]), run(Some("bob"), &[])]);

        let counts = ex.annotated_anomalies("icp").unwrap();
        assert_eq!(counts.get("alice"), Some(&3));
        assert_eq!(counts.get("bob"), Some(&0));
    }

    #[test]
    fn test_load_data_is_idempotent() {
        let mut ex = extractor();
        ex.auto_annotate(&[run(Some("alice"), &[(20, 30)])]);

        let mut extraction = ex.extract("icp").unwrap();
        ex.load_data(&mut extraction.anomalous).unwrap();
        let first = extraction.anomalous[0].data.clone().unwrap();
        ex.load_data(&mut extraction.anomalous).unwrap();

        assert_eq!(first.len(), 1_000);
        assert_eq!(first[0], 2_000.0);
        assert_eq!(extraction.anomalous[0].data.as_deref(), Some(first.as_slice()));
        assert!(extraction.good.iter().all(|s| s.data.is_none()));
    }

    #[test]
    fn test_load_data_at_fractional_frequency() {
        // 33.33 Hz gives 333-sample windows that drift off the time axis
        let record = WaveformRecord::new(SOURCE, "icp", START, 33.33, (0..3_330).map(|v| v as f64).collect());
        let mut ex = SingleSourceExtractor::new(SOURCE, vec![record], ExtractorConfig::default());
        ex.auto_annotate(&[run(Some("alice"), &[])]);

        let mut extraction = ex.extract("icp").unwrap();
        assert_eq!(extraction.good.len(), 10);
        ex.load_data(&mut extraction.good).unwrap();

        assert!(extraction.good.iter().all(|s| s.data.as_ref().map(Vec::len) == Some(333)));
        let last = extraction.good[9].data.as_deref().unwrap();
        assert_eq!(last[0], 2_997.0);
        assert_eq!(last[332], 3_329.0);
    }

    #[test]
    fn test_load_data_rejects_off_grid_segment() {
        let mut ex = extractor();
        ex.auto_annotate(&[run(Some("alice"), &[])]);
        let mut extraction = ex.extract("icp").unwrap();
        extraction.good[0].start_us += 1;

        assert!(matches!(
            ex.load_data(&mut extraction.good),
            Err(ConsensusError::SegmentOutOfRange { .. })
        ));
    }

    #[test]
    fn test_duplicate_record_names_annotated_once() {
        let records = vec![
            WaveformRecord::new(SOURCE, "ICP", START, 100.0, vec![0.0; 10_000]),
            WaveformRecord::new(SOURCE, "icp", START, 100.0, vec![0.0; 10_000]),
        ];
        let mut ex = SingleSourceExtractor::new(SOURCE, records, ExtractorConfig::default());

        assert_eq!(ex.annotate(&run(Some("alice"), &[(20, 30)])).unwrap(), 1);
        assert_eq!(ex.annotators("icp").unwrap().consistent, vec!["alice"]);
        assert_eq!(ex.annotated_anomalies("icp").unwrap().get("alice"), Some(&1));
    }

    #[test]
    fn test_load_data_rejects_foreign_segment() {
        let mut ex = extractor();
        ex.auto_annotate(&[run(Some("alice"), &[])]);
        let mut extraction = ex.extract("abp").unwrap();
        extraction.good[0].source_id = "elsewhere".to_string();

        assert!(matches!(
            ex.load_data(&mut extraction.good),
            Err(ConsensusError::SourceMismatch { .. })
        ));
    }

    #[test]
    fn test_consensus_matrix() {
        let mut ex = extractor();
        ex.auto_annotate(&[run(Some("bob"), &[(40, 50)]), run(Some("alice"), &[(40, 50)])]);

        let matrix = ex.consensus_matrix("icp", true).unwrap();
        assert_eq!(matrix.annotators, vec!["alice", "bob"]);
        assert_eq!(matrix.score("alice", "bob"), Some(1.0));
    }

    #[test]
    fn test_describe_mentions_annotations() {
        let mut ex = extractor();
        ex.auto_annotate(&[run(Some("alice"), &[(40, 50)]), run(Some("bob"), &[])]);

        let text = ex.describe();
        assert!(text.contains("File Name: TBI_001.wave.json"));
        assert!(text.contains("Signal Name: icp"));
        assert!(text.contains("Consensus with bob: 81.82%"));
        assert!(text.contains("Annotated: No"));
    }
}
