//! Adaptive result-window selection.
//!
//! Results are kept down to a score "cliff" relative to the best result,
//! between a floor and a ceiling count. With diversity on, every document
//! above the threshold contributes its best chunk before any document gets
//! a second one.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::result::{RankedResult, sort_by_score};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutoffConfig {
    /// Results always kept, regardless of score.
    pub floor: usize,
    /// Results never exceeded.
    pub ceiling: usize,
    /// Share of the top score a result needs past the floor.
    pub relative_threshold: f64,
    pub absolute_min_score: f64,
    pub ensure_diversity: bool,
}

impl Default for CutoffConfig {
    fn default() -> Self {
        Self {
            floor: 5,
            ceiling: 30,
            relative_threshold: 0.5,
            absolute_min_score: 0.05,
            ensure_diversity: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CutoffOutcome {
    pub results: Vec<RankedResult>,
    /// The score threshold applied past the floor.
    pub cutoff_score: f64,
    /// Distinct documents among the kept results.
    pub unique_docs: usize,
    pub total_before: usize,
}

/// Select the final result window.
pub fn select(
    mut results: Vec<RankedResult>,
    config: &CutoffConfig,
) -> CutoffOutcome {
    let total_before = results.len();
    if results.is_empty() {
        return CutoffOutcome::default();
    }
    sort_by_score(&mut results);

    let ceiling = config.ceiling.max(1);
    let floor = config.floor.min(ceiling);
    let top = results[0].score;
    let threshold =
        (top * config.relative_threshold).max(config.absolute_min_score);

    let mut keep = if config.ensure_diversity {
        select_diverse(&results, floor, ceiling, threshold)
    } else {
        results
            .iter()
            .enumerate()
            .take(ceiling)
            .take_while(|(i, r)| *i < floor || r.score >= threshold)
            .map(|(i, _)| i)
            .collect()
    };
    // Indices in ascending order are already in descending score order.
    keep.sort_unstable();

    let mut kept = Vec::with_capacity(keep.len());
    let mut next = keep.into_iter().peekable();
    for (i, result) in results.into_iter().enumerate() {
        if next.peek() == Some(&i) {
            next.next();
            kept.push(result);
        }
    }

    let unique_docs = kept
        .iter()
        .map(RankedResult::document_id)
        .collect::<HashSet<_>>()
        .len();

    CutoffOutcome {
        results: kept,
        cutoff_score: threshold,
        unique_docs,
        total_before,
    }
}

/// Two passes over results sorted descending: first the best chunk of each
/// document, then further chunks above the threshold.
fn select_diverse(
    results: &[RankedResult],
    floor: usize,
    ceiling: usize,
    threshold: f64,
) -> Vec<usize> {
    let mut keep = Vec::new();
    let mut taken = vec![false; results.len()];
    let mut documents: HashSet<&str> = HashSet::new();

    for (i, result) in results.iter().enumerate() {
        if keep.len() >= ceiling {
            break;
        }
        if documents.contains(result.document_id()) {
            continue;
        }
        if keep.len() < floor || result.score >= threshold {
            documents.insert(result.document_id());
            taken[i] = true;
            keep.push(i);
        }
    }

    for (i, result) in results.iter().enumerate() {
        if keep.len() >= ceiling || result.score < threshold {
            break;
        }
        if !taken[i] {
            taken[i] = true;
            keep.push(i);
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::result::SourceEngine;

    fn result(id: &str, score: f64) -> RankedResult {
        RankedResult::new(id, score, SourceEngine::Fused)
    }

    fn ids(outcome: &CutoffOutcome) -> Vec<&str> {
        outcome.results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn empty_input() {
        let outcome = select(Vec::new(), &CutoffConfig::default());
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.total_before, 0);
    }

    #[test]
    fn close_scores_are_all_kept() {
        let results: Vec<RankedResult> = (0..8)
            .map(|i| result(&format!("doc{i}.md#0"), 0.9 - 0.03 * i as f64))
            .collect();
        let outcome = select(results, &CutoffConfig::default());
        assert_eq!(outcome.results.len(), 8);
        assert_eq!(outcome.unique_docs, 8);
        assert_eq!(outcome.total_before, 8);
        assert!((outcome.cutoff_score - 0.45).abs() < 1e-12);
    }

    #[test]
    fn floor_admits_weak_results() {
        let results = vec![
            result("a#0", 0.9),
            result("b#0", 0.1),
            result("c#0", 0.05),
            result("d#0", 0.01),
        ];
        let config = CutoffConfig {
            floor: 3,
            ensure_diversity: false,
            ..CutoffConfig::default()
        };
        assert_eq!(ids(&select(results, &config)), vec!["a#0", "b#0", "c#0"]);
    }

    #[test]
    fn cliff_stops_selection_past_floor() {
        let results = vec![
            result("a#0", 1.0),
            result("b#0", 0.8),
            result("c#0", 0.2),
        ];
        let config = CutoffConfig {
            floor: 1,
            ..CutoffConfig::default()
        };
        assert_eq!(ids(&select(results, &config)), vec!["a#0", "b#0"]);
    }

    #[test]
    fn ceiling_is_never_exceeded() {
        let results: Vec<RankedResult> = (0..50)
            .map(|i| result(&format!("d{i}#0"), 1.0 - 0.001 * i as f64))
            .collect();
        let config = CutoffConfig {
            ceiling: 10,
            ..CutoffConfig::default()
        };
        assert_eq!(select(results, &config).results.len(), 10);
    }

    #[test]
    fn diversity_prefers_new_documents() {
        let mut results: Vec<RankedResult> = (0..6)
            .map(|i| result(&format!("big.md#{i}"), 0.95 - 0.01 * i as f64))
            .collect();
        results.push(result("small.md#0", 0.6));
        results.push(result("other.md#0", 0.55));

        let config = CutoffConfig {
            floor: 0,
            ceiling: 4,
            ..CutoffConfig::default()
        };
        let outcome = select(results, &config);
        assert_eq!(
            ids(&outcome),
            vec!["big.md#0", "big.md#1", "small.md#0", "other.md#0"]
        );
        assert_eq!(outcome.unique_docs, 3);
    }

    #[test]
    fn without_diversity_one_document_can_dominate() {
        let mut results: Vec<RankedResult> = (0..6)
            .map(|i| result(&format!("big.md#{i}"), 0.95 - 0.01 * i as f64))
            .collect();
        results.push(result("small.md#0", 0.6));
        let config = CutoffConfig {
            floor: 0,
            ceiling: 4,
            ensure_diversity: false,
            ..CutoffConfig::default()
        };
        let outcome = select(results, &config);
        assert_eq!(outcome.unique_docs, 1);
    }

    #[test]
    fn absolute_minimum_applies_to_weak_tops() {
        let results = vec![result("a#0", 0.06), result("b#0", 0.04)];
        let config = CutoffConfig {
            floor: 1,
            ..CutoffConfig::default()
        };
        let outcome = select(results, &config);
        assert_eq!(ids(&outcome), vec!["a#0"]);
        assert_eq!(outcome.cutoff_score, 0.05);
    }

    proptest! {
        #[test]
        fn every_document_above_threshold_is_represented(
            chunks in proptest::collection::vec((0usize..12, 0.5f64..1.0), 1..80),
        ) {
            let results: Vec<RankedResult> = chunks
                .iter()
                .enumerate()
                .map(|(i, (doc, score))| result(&format!("doc{doc}.md#{i}"), *score))
                .collect();
            let documents: HashSet<String> = results
                .iter()
                .map(|r| r.document_id().to_string())
                .collect();
            let config = CutoffConfig {
                ceiling: documents.len().max(1),
                ..CutoffConfig::default()
            };
            let outcome = select(results, &config);
            prop_assert_eq!(outcome.unique_docs, documents.len());
            prop_assert!(outcome.results.len() <= config.ceiling);
        }
    }
}
