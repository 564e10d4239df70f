pub mod multi;
pub mod single;

pub use multi::*;
pub use single::*;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::error::{ConsensusError, Result};
use crate::models::{Segment, SegmentId, SegmentSpan, WindowConfig};
use crate::stages::AgreementMatrix;

/// Configuration shared by both extractor variants
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Window grid settings
    pub window: WindowConfig,
    /// Name given to annotation runs without an annotator identity
    pub unknown_annotator: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            unknown_annotator: "Unknown".to_string(),
        }
    }
}

/// Names split into those every source has and per-source leftovers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NameSet {
    /// Names present in every source
    pub consistent: Vec<String>,
    /// Source identifier -> names missing from at least one other source
    pub outliers: BTreeMap<String, Vec<String>>,
}

impl NameSet {
    /// Every name, consistent or not, sorted and deduplicated
    pub fn all(&self) -> Vec<String> {
        self.consistent
            .iter()
            .chain(self.outliers.values().flatten())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Classify per-source name sets against their intersection
    pub fn classify(per_source: &[(String, BTreeSet<String>)]) -> Self {
        let mut sets = per_source.iter().map(|(_, names)| names);
        let Some(first) = sets.next() else {
            return Self::default();
        };
        let common: BTreeSet<String> = sets.fold(first.clone(), |acc, names| {
            acc.intersection(names).cloned().collect()
        });

        let outliers = per_source
            .iter()
            .filter_map(|(source, names)| {
                let extra: Vec<String> = names.difference(&common).cloned().collect();
                (!extra.is_empty()).then(|| (source.clone(), extra))
            })
            .collect();

        Self {
            consistent: common.into_iter().collect(),
            outliers,
        }
    }
}

/// Two distinct windows that hashed to the same identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityCollision {
    pub id: SegmentId,
    pub first: SegmentSpan,
    pub second: SegmentSpan,
}

impl IdentityCollision {
    pub fn to_error(&self) -> ConsensusError {
        ConsensusError::IdentityCollision {
            id: self.id.to_string(),
            first: self.first.clone(),
            second: self.second.clone(),
        }
    }
}

/// Segments produced by `extract`
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Windows with no anomalous votes (weight 0.0)
    pub good: Vec<Segment>,
    /// Windows flagged by at least one annotator
    pub anomalous: Vec<Segment>,
    /// Identity collisions detected while combining sources
    pub collisions: Vec<IdentityCollision>,
}

impl Extraction {
    /// Total number of segments
    pub fn len(&self) -> usize {
        self.good.len() + self.anomalous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.good.is_empty() && self.anomalous.is_empty()
    }

    /// All segments, good first
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.good.iter().chain(self.anomalous.iter())
    }

    /// Fail on the first detected identity collision
    pub fn ensure_unique(&self) -> Result<()> {
        match self.collisions.first() {
            Some(collision) => Err(collision.to_error()),
            None => Ok(()),
        }
    }
}

/// Report every segment whose identity was already seen
pub fn find_collisions<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> Vec<IdentityCollision> {
    let mut seen: HashMap<&SegmentId, &Segment> = HashMap::new();
    let mut collisions = Vec::new();

    for segment in segments {
        match seen.get(&segment.id) {
            Some(first) => collisions.push(IdentityCollision {
                id: segment.id.clone(),
                first: first.span(),
                second: segment.span(),
            }),
            None => {
                seen.insert(&segment.id, segment);
            }
        }
    }

    collisions
}

/// Query surface shared by single-source and multi-source extractors
pub trait Extractor {
    /// Signal names, classified across sources
    fn signal_names(&self) -> NameSet;

    /// Annotators of a signal, classified across sources
    fn annotators(&self, signal: &str) -> Result<NameSet>;

    /// Deduplicated good and anomalous segments with consensus weights
    ///
    /// Segment data is not loaded; call [`Extractor::load_data`] for that.
    fn extract(&self, signal: &str) -> Result<Extraction>;

    /// Fill `data` on each segment from its source. Idempotent.
    fn load_data(&self, segments: &mut [Segment]) -> Result<()>;

    /// Pairwise annotator agreement for a signal
    fn consensus_matrix(&self, signal: &str, include_good: bool) -> Result<AgreementMatrix>;

    /// Number of anomalous windows each annotator flagged
    fn annotated_anomalies(&self, signal: &str) -> Result<BTreeMap<String, usize>>;

    /// Human-readable description of the sources and their annotations
    fn describe(&self) -> String;
}
