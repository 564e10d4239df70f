use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::models::{Annotation, Segment, SegmentId};

/// Result of consensus aggregation for one signal
#[derive(Debug, Clone, Default)]
pub struct ConsensusResult {
    /// Windows no annotator flagged (weight 0.0), first-seen order
    pub good: Vec<Segment>,
    /// Windows at least one annotator flagged, first-seen order
    pub anomalous: Vec<Segment>,
}

impl ConsensusResult {
    /// Total number of distinct windows
    pub fn len(&self) -> usize {
        self.good.len() + self.anomalous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.good.is_empty() && self.anomalous.is_empty()
    }
}

/// Per-identity merge state
#[derive(Debug)]
struct Accumulator {
    segment: Segment,
    anomalous_votes: usize,
}

/// Round to two decimal places
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Stage 2: merge every annotator's labeling into one segment per window
///
/// Segments are grouped by identity. The representative keeps the first-seen
/// copy and appends every later annotator. Weight is the rounded share of
/// labeling annotators that placed the window in their anomalous list; a
/// window with no anomalous votes always carries weight 0.0.
pub fn execute_consensus(annotations: &[Annotation]) -> ConsensusResult {
    let mut order: Vec<SegmentId> = Vec::new();
    let mut merged: HashMap<SegmentId, Accumulator> = HashMap::new();

    for annotation in annotations {
        for segment in annotation.segments() {
            match merged.get_mut(&segment.id) {
                Some(acc) => acc
                    .segment
                    .annotators
                    .extend(segment.annotators.iter().cloned()),
                None => {
                    let mut representative = segment.clone();
                    representative.anomaly_annotators.clear();
                    order.push(segment.id.clone());
                    merged.insert(
                        segment.id.clone(),
                        Accumulator {
                            segment: representative,
                            anomalous_votes: 0,
                        },
                    );
                }
            }
        }
    }

    for annotation in annotations {
        let flagged: HashSet<&SegmentId> = annotation.anomalies.iter().map(|s| &s.id).collect();
        for id in flagged {
            if let Some(acc) = merged.get_mut(id) {
                acc.anomalous_votes += 1;
                acc.segment
                    .anomaly_annotators
                    .push(annotation.annotator.clone());
            }
        }
    }

    let mut result = ConsensusResult::default();
    for id in order {
        let Some(acc) = merged.remove(&id) else {
            continue;
        };
        let mut segment = acc.segment;
        let total = segment.annotators.len();

        segment.anomalous = acc.anomalous_votes > 0;
        segment.weight = if segment.anomalous && total > 0 {
            round2(acc.anomalous_votes as f64 / total as f64)
        } else {
            0.0
        };

        if segment.anomalous {
            result.anomalous.push(segment);
        } else {
            result.good.push(segment);
        }
    }

    debug!(
        "Consensus over {} annotations: {} good, {} anomalous",
        annotations.len(),
        result.good.len(),
        result.anomalous.len()
    );

    result
}
