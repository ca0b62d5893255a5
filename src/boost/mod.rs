//! Post-fusion relevance boosts.
//!
//! Both boosts multiply scores per document: every chunk of a boosted
//! document gets the same factor, recorded in its explanation.

pub mod folder;
pub mod graph;

use std::collections::HashMap;

pub use folder::{FolderBoost, FolderBoostConfig};
pub use graph::{GraphBoost, GraphBoostConfig, GraphNode};

use crate::result::{Explanation, RankedResult, sort_by_score};

/// Multiply each result by its document's factor and re-sort.
///
/// `record` stores the factor in the explanation of every touched result.
fn apply_multipliers(
    results: Vec<RankedResult>,
    multipliers: &HashMap<String, f64>,
    record: fn(&mut Explanation, f64),
) -> Vec<RankedResult> {
    if multipliers.is_empty() {
        return results;
    }
    let mut boosted: Vec<RankedResult> = results
        .into_iter()
        .map(|mut result| {
            let Some(&factor) = multipliers.get(result.document_id()) else {
                return result;
            };
            if let Some(explanation) = &mut result.explanation {
                record(explanation, factor);
            }
            let score = result.score * factor;
            result.rescore(score)
        })
        .collect();
    sort_by_score(&mut boosted);
    boosted
}
