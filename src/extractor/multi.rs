use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;
use tracing::{info, warn};

use super::{find_collisions, Extraction, Extractor, NameSet, SingleSourceExtractor};
use crate::error::{ConsensusError, Result};
use crate::models::{normalize_signal_name, AnnotationRun, Segment};
use crate::stages::{mean_matrix, AgreementMatrix};

/// Extractor that fans queries out over many sources and folds the results
///
/// Sources are processed independently (in parallel where it pays off) and
/// combined in source order. A source that fails for a signal is logged and
/// left out of that signal's result.
#[derive(Debug, Clone, Default)]
pub struct MultiSourceExtractor {
    extractors: Vec<SingleSourceExtractor>,
}

impl MultiSourceExtractor {
    pub fn new(extractors: Vec<SingleSourceExtractor>) -> Self {
        Self { extractors }
    }

    pub fn push(&mut self, extractor: SingleSourceExtractor) {
        self.extractors.push(extractor);
    }

    pub fn sources(&self) -> impl Iterator<Item = &SingleSourceExtractor> {
        self.extractors.iter()
    }

    /// Identifiers of all sources, in order
    pub fn source_ids(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.source_id()).collect()
    }

    pub fn source(&self, source_id: &str) -> Option<&SingleSourceExtractor> {
        self.extractors.iter().find(|e| e.source_id() == source_id)
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Apply each run to the source it refers to
    ///
    /// Returns the total number of runs applied.
    pub fn auto_annotate(&mut self, runs: &[AnnotationRun]) -> usize {
        let applied: usize = self
            .extractors
            .par_iter_mut()
            .map(|extractor| extractor.auto_annotate(runs))
            .sum();
        if applied < runs.len() {
            warn!(
                "{} of {} annotation runs matched no source",
                runs.len() - applied,
                runs.len()
            );
        }
        applied
    }

    /// Samples of a signal for every source that has it
    pub fn raw_data(&self, signal: &str) -> BTreeMap<String, &[f64]> {
        self.extractors
            .iter()
            .filter_map(|e| {
                e.raw_data(signal)
                    .ok()
                    .map(|data| (e.source_id().to_string(), data))
            })
            .collect()
    }

    /// Run `query` against every source, keeping the successes in order
    ///
    /// Fails only when there is at least one source and every source failed.
    fn per_source<T, F>(&self, signal: &str, query: F) -> Result<Vec<(String, T)>>
    where
        T: Send,
        F: Fn(&SingleSourceExtractor) -> Result<T> + Sync,
    {
        let outcomes: Vec<(String, Result<T>)> = self
            .extractors
            .par_iter()
            .map(|e| (e.source_id().to_string(), query(e)))
            .collect();

        let total = outcomes.len();
        let mut results = Vec::with_capacity(total);
        for (source, outcome) in outcomes {
            match outcome {
                Ok(value) => results.push((source, value)),
                Err(e) => warn!("Skipping signal {} of {}: {}", signal, source, e),
            }
        }

        if total > 0 && results.is_empty() {
            return Err(ConsensusError::SignalNotFound(normalize_signal_name(signal)));
        }
        Ok(results)
    }
}

impl Extractor for MultiSourceExtractor {
    fn signal_names(&self) -> NameSet {
        let per_source: Vec<(String, BTreeSet<String>)> = self
            .extractors
            .iter()
            .map(|e| {
                (
                    e.source_id().to_string(),
                    e.signal_names().consistent.into_iter().collect(),
                )
            })
            .collect();
        NameSet::classify(&per_source)
    }

    fn annotators(&self, signal: &str) -> Result<NameSet> {
        let per_source: Vec<(String, BTreeSet<String>)> = self
            .per_source(signal, |e| e.annotators(signal))?
            .into_iter()
            .map(|(source, names)| (source, names.consistent.into_iter().collect()))
            .collect();
        Ok(NameSet::classify(&per_source))
    }

    fn extract(&self, signal: &str) -> Result<Extraction> {
        let mut combined = Extraction::default();
        for (_, extraction) in self.per_source(signal, |e| e.extract(signal))? {
            combined.good.extend(extraction.good);
            combined.anomalous.extend(extraction.anomalous);
        }

        combined.collisions = find_collisions(combined.segments());
        if !combined.collisions.is_empty() {
            warn!(
                "Found {} segments sharing an identity with another segment",
                combined.collisions.len()
            );
            for collision in &combined.collisions {
                warn!("{}", collision.to_error());
            }
        }

        info!(
            "{}: {} good and {} anomalous segments from {} sources",
            normalize_signal_name(signal),
            combined.good.len(),
            combined.anomalous.len(),
            self.extractors.len()
        );
        Ok(combined)
    }

    fn load_data(&self, segments: &mut [Segment]) -> Result<()> {
        let mut by_source: HashMap<String, Vec<&mut Segment>> = HashMap::new();
        for segment in segments.iter_mut() {
            by_source
                .entry(segment.source_id.clone())
                .or_default()
                .push(segment);
        }

        let mut jobs = Vec::with_capacity(by_source.len());
        for (source_id, group) in by_source {
            let extractor = self.source(&source_id).ok_or_else(|| {
                ConsensusError::SourceMismatch {
                    expected: self.source_ids().join(", "),
                    found: source_id.clone(),
                }
            })?;
            jobs.push((extractor, group));
        }

        jobs.into_par_iter()
            .map(|(extractor, group)| extractor.load_segments(group))
            .collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    fn consensus_matrix(&self, signal: &str, include_good: bool) -> Result<AgreementMatrix> {
        let matrices: Vec<AgreementMatrix> = self
            .per_source(signal, |e| e.consensus_matrix(signal, include_good))?
            .into_iter()
            .map(|(_, matrix)| matrix)
            .collect();
        Ok(mean_matrix(&matrices))
    }

    fn annotated_anomalies(&self, signal: &str) -> Result<BTreeMap<String, usize>> {
        let mut totals = BTreeMap::new();
        for (_, counts) in self.per_source(signal, |e| e.annotated_anomalies(signal))? {
            for (annotator, count) in counts {
                *totals.entry(annotator).or_insert(0) += count;
            }
        }
        Ok(totals)
    }

    fn describe(&self) -> String {
        self.extractors
            .iter()
            .map(|e| e.describe())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
