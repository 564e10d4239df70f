use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::models::{Annotation, SegmentId};

/// Score used for annotator pairs never observed together
pub const UNOBSERVED: f64 = -1.0;

/// Pairwise annotator agreement for one signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgreementMatrix {
    /// Sorted, deduplicated annotator identities
    pub annotators: Vec<String>,
    /// `scores[i][j]` is the agreement between annotators `i` and `j`
    pub scores: Vec<Vec<f64>>,
}

impl AgreementMatrix {
    /// Agreement between two annotators, if both are present
    pub fn score(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.position(a)?;
        let j = self.position(b)?;
        Some(self.scores[i][j])
    }

    pub fn position(&self, annotator: &str) -> Option<usize> {
        self.annotators.iter().position(|name| name == annotator)
    }

    pub fn len(&self) -> usize {
        self.annotators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotators.is_empty()
    }

    /// Render as an aligned text table
    pub fn to_table(&self) -> String {
        let width = self
            .annotators
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(6);

        let mut out = format!("{:width$}", "", width = width);
        for name in &self.annotators {
            out.push_str(&format!(" {:>width$}", name, width = width));
        }
        out.push('\n');

        for (name, row) in self.annotators.iter().zip(&self.scores) {
            out.push_str(&format!("{:width$}", name, width = width));
            for score in row {
                if *score == UNOBSERVED {
                    out.push_str(&format!(" {:>width$}", "-", width = width));
                } else {
                    out.push_str(&format!(" {:>width$.3}", score, width = width));
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Identity sets one annotator contributes to the comparison
struct LabelSets<'a> {
    anomalies: HashSet<&'a SegmentId>,
    good: HashSet<&'a SegmentId>,
}

impl<'a> LabelSets<'a> {
    fn new(annotation: &'a Annotation) -> Self {
        Self {
            anomalies: annotation.anomalies.iter().map(|s| &s.id).collect(),
            good: annotation.good.iter().map(|s| &s.id).collect(),
        }
    }

    fn total(&self, include_good: bool) -> usize {
        if include_good {
            self.anomalies.len() + self.good.len()
        } else {
            self.anomalies.len()
        }
    }
}

/// Jaccard similarity of two annotators' labeled identity sets
fn jaccard(a: &LabelSets<'_>, b: &LabelSets<'_>, include_good: bool) -> f64 {
    let mut intersection = a.anomalies.intersection(&b.anomalies).count();
    if include_good {
        intersection += a.good.intersection(&b.good).count();
    }
    let union = a.total(include_good) + b.total(include_good) - intersection;
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Stage 3: pairwise agreement between the annotators of one signal
///
/// Score is `|A ∩ B| / (|A| + |B| - |A ∩ B|)` over anomalous identities, plus
/// good identities when `include_good` is set. Two empty label sets agree
/// trivially. The diagonal is always 1.0. When an annotator name appears on
/// more than one annotation, the first one is used.
pub fn agreement_matrix(annotations: &[Annotation], include_good: bool) -> AgreementMatrix {
    let annotators: Vec<String> = annotations
        .iter()
        .map(|a| a.annotator.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let sets: Vec<LabelSets<'_>> = annotators
        .iter()
        .filter_map(|name| annotations.iter().find(|a| &a.annotator == name))
        .map(LabelSets::new)
        .collect();

    let n = annotators.len();
    let mut scores = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            scores[i][j] = if i == j {
                1.0
            } else {
                jaccard(&sets[i], &sets[j], include_good)
            };
        }
    }

    AgreementMatrix { annotators, scores }
}

/// Cell-wise mean of several matrices over the union of their annotators
///
/// Cells no matrix observed hold [`UNOBSERVED`].
pub fn mean_matrix(matrices: &[AgreementMatrix]) -> AgreementMatrix {
    let mut observations: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    let mut names: BTreeSet<&str> = BTreeSet::new();

    for matrix in matrices {
        for (i, a) in matrix.annotators.iter().enumerate() {
            names.insert(a.as_str());
            for (j, b) in matrix.annotators.iter().enumerate() {
                observations
                    .entry((a.as_str(), b.as_str()))
                    .or_default()
                    .push(matrix.scores[i][j]);
            }
        }
    }

    let annotators: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    let n = annotators.len();
    let mut scores = vec![vec![UNOBSERVED; n]; n];
    for (i, a) in annotators.iter().enumerate() {
        for (j, b) in annotators.iter().enumerate() {
            if let Some(values) = observations.get(&(a.as_str(), b.as_str())) {
                scores[i][j] = values.iter().sum::<f64>() / values.len() as f64;
            }
        }
    }

    AgreementMatrix { annotators, scores }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TimeRange, WaveformRecord, WindowConfig};
    use crate::stages::{build_window_grid, match_ranges};

    const START: i64 = 1_600_000_000_000_000;
    const WINDOW: i64 = 10_000_000;

    fn annotate(source: &str, ranges_by_annotator: &[(&str, Vec<usize>)]) -> Vec<Annotation> {
        let record = WaveformRecord::new(source, "icp", START, 100.0, vec![0.0; 10_000]);
        let grid = build_window_grid(&record, &WindowConfig::default()).unwrap();
        ranges_by_annotator
            .iter()
            .map(|(name, windows)| {
                let ranges: Vec<TimeRange> = windows
                    .iter()
                    .map(|&i| {
                        TimeRange::new(START + i as i64 * WINDOW, START + (i as i64 + 1) * WINDOW)
                    })
                    .collect();
                match_ranges(&record, &grid, &ranges, name)
            })
            .collect()
    }

    #[test]
    fn test_identical_labelings_agree_fully() {
        let annotations = annotate("a", &[("alice", vec![4]), ("bob", vec![4])]);
        let matrix = agreement_matrix(&annotations, true);

        assert_eq!(matrix.annotators, vec!["alice", "bob"]);
        // (1 + 9) / (10 + 10 - 10)
        assert_eq!(matrix.score("alice", "bob"), Some(1.0));
        assert_eq!(matrix.score("bob", "alice"), Some(1.0));
    }

    #[test]
    fn test_partial_overlap() {
        let annotations = annotate("a", &[("alice", vec![1, 2]), ("bob", vec![2])]);

        let with_good = agreement_matrix(&annotations, true);
        // anomalies: {2}; good: 8 shared -> 9 / (10 + 10 - 9)
        assert!((with_good.score("alice", "bob").unwrap() - 9.0 / 11.0).abs() < 1e-12);

        let anomalies_only = agreement_matrix(&annotations, false);
        // 1 / (2 + 1 - 1)
        assert_eq!(anomalies_only.score("alice", "bob"), Some(0.5));
    }

    #[test]
    fn test_empty_anomaly_sets_agree() {
        let annotations = annotate("a", &[("alice", vec![]), ("bob", vec![])]);
        let matrix = agreement_matrix(&annotations, false);
        assert_eq!(matrix.score("alice", "bob"), Some(1.0));
    }

    #[test]
    fn test_diagonal_is_one() {
        let annotations = annotate(
            "a",
            &[("carol", vec![0]), ("alice", vec![]), ("bob", vec![3, 4, 5])],
        );
        let matrix = agreement_matrix(&annotations, false);

        assert_eq!(matrix.annotators, vec!["alice", "bob", "carol"]);
        for i in 0..matrix.len() {
            assert_eq!(matrix.scores[i][i], 1.0);
        }
        // alice has no anomalies, bob has three: 0 / 3
        assert_eq!(matrix.score("alice", "bob"), Some(0.0));
    }

    #[test]
    fn test_mean_matrix_marks_unobserved_cells() {
        let first = agreement_matrix(&annotate("a", &[("alice", vec![1]), ("bob", vec![2])]), false);
        let second = agreement_matrix(&annotate("b", &[("alice", vec![1]), ("bob", vec![1])]), false);
        let third = agreement_matrix(&annotate("c", &[("carol", vec![1])]), false);

        let mean = mean_matrix(&[first, second, third]);

        assert_eq!(mean.annotators, vec!["alice", "bob", "carol"]);
        assert_eq!(mean.score("alice", "bob"), Some(0.5));
        assert_eq!(mean.score("carol", "carol"), Some(1.0));
        assert_eq!(mean.score("alice", "carol"), Some(UNOBSERVED));
    }

    #[test]
    fn test_table_rendering() {
        let matrix = agreement_matrix(&annotate("a", &[("alice", vec![1]), ("bob", vec![1])]), true);
        let table = matrix.to_table();
        assert!(table.contains("alice"));
        assert!(table.contains("1.000"));
        assert_eq!(table.lines().count(), 3);
    }
}
