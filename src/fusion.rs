//! Weighted reciprocal rank fusion of the lexical and semantic rankings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::result::{Explanation, RankedResult, SourceEngine};

pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub k: f64,
    pub lexical_weight: f64,
    pub semantic_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            lexical_weight: 0.4,
            semantic_weight: 0.6,
        }
    }
}

impl FusionConfig {
    /// Weights rescaled to sum to one. A source with no results hands its
    /// share to the other.
    pub fn effective_weights(
        &self,
        has_lexical: bool,
        has_semantic: bool,
    ) -> (f64, f64) {
        match (has_lexical, has_semantic) {
            (true, false) => (1.0, 0.0),
            (false, true) => (0.0, 1.0),
            (false, false) => (0.0, 0.0),
            (true, true) => {
                let lexical = self.lexical_weight.max(0.0);
                let semantic = self.semantic_weight.max(0.0);
                let total = lexical + semantic;
                if total > 0.0 {
                    (lexical / total, semantic / total)
                } else {
                    (0.5, 0.5)
                }
            }
        }
    }
}

/// Two rankings, each ordered best first.
#[derive(Debug, Clone, Copy)]
pub struct FusionInput<'a> {
    pub lexical: &'a [RankedResult],
    pub semantic: &'a [RankedResult],
    pub config: FusionConfig,
}

struct Fused {
    raw: f64,
    best_rank: usize,
    similarity: Option<f64>,
    explanation: Option<Explanation>,
}

/// Fuse by summing `weight / (k + rank + 1)` per id, then scaling by `k/2`
/// and capping at 1.0.
///
/// Equal fused scores are ordered by best rank in either source, then by id,
/// so the output order is fully determined by the inputs.
pub fn fuse(input: FusionInput<'_>) -> Vec<RankedResult> {
    let FusionInput {
        lexical,
        semantic,
        config,
    } = input;
    let (lexical_weight, semantic_weight) =
        config.effective_weights(!lexical.is_empty(), !semantic.is_empty());
    let k = config.k.max(f64::MIN_POSITIVE);

    let mut fused: HashMap<&str, Fused> = HashMap::new();
    let sources = [(lexical, lexical_weight), (semantic, semantic_weight)];
    for (source_index, (ranking, weight)) in sources.into_iter().enumerate() {
        for (rank, result) in ranking.iter().enumerate() {
            let entry = fused.entry(result.id.as_str()).or_insert(Fused {
                raw: 0.0,
                best_rank: rank,
                similarity: None,
                explanation: None,
            });
            entry.raw += weight / (k + rank as f64 + 1.0);
            entry.best_rank = entry.best_rank.min(rank);
            if source_index == 1 {
                entry.similarity = Some(
                    result.similarity.unwrap_or(result.score).clamp(0.0, 1.0),
                );
            }
            if entry.explanation.is_none() {
                entry.explanation = result.explanation.clone();
            }
        }
    }

    let mut ranked: Vec<(RankedResult, usize)> = fused
        .into_iter()
        .map(|(id, entry)| {
            let score = (entry.raw * k / 2.0).min(1.0);
            let result = RankedResult {
                id: id.to_string(),
                score,
                source: SourceEngine::Fused,
                similarity: entry.similarity,
                explanation: entry.explanation.map(|mut explanation| {
                    explanation.base_score = score;
                    explanation.final_score = score;
                    explanation
                }),
            };
            (result, entry.best_rank)
        })
        .collect();

    ranked.sort_by(|(a, a_rank), (b, b_rank)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a_rank.cmp(b_rank))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.into_iter().map(|(result, _)| result).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ranking(ids: &[&str]) -> Vec<RankedResult> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                RankedResult::new(*id, 1.0 / (i as f64 + 1.0), SourceEngine::Lexical)
            })
            .collect()
    }

    fn ids(results: &[RankedResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn shared_item_outranks_single_source_leader() {
        let lexical = ranking(&["a", "b"]);
        let semantic = ranking(&["b"]);
        let fused = fuse(FusionInput {
            lexical: &lexical,
            semantic: &semantic,
            config: FusionConfig::default(),
        });
        assert_eq!(ids(&fused), vec!["b", "a"]);
        assert!(fused.iter().all(|r| r.source == SourceEngine::Fused));
    }

    #[test]
    fn single_source_gets_full_weight() {
        let lexical = ranking(&["a", "b"]);
        let fused = fuse(FusionInput {
            lexical: &lexical,
            semantic: &[],
            config: FusionConfig::default(),
        });
        let expected = 1.0 / 61.0 * 30.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs_fuse_to_nothing() {
        let fused = fuse(FusionInput {
            lexical: &[],
            semantic: &[],
            config: FusionConfig::default(),
        });
        assert!(fused.is_empty());
    }

    #[test]
    fn weights_are_normalized() {
        let config = FusionConfig {
            lexical_weight: 2.0,
            semantic_weight: 6.0,
            ..FusionConfig::default()
        };
        assert_eq!(config.effective_weights(true, true), (0.25, 0.75));
        assert_eq!(config.effective_weights(false, true), (0.0, 1.0));
        let zero = FusionConfig {
            lexical_weight: 0.0,
            semantic_weight: 0.0,
            ..FusionConfig::default()
        };
        assert_eq!(zero.effective_weights(true, true), (0.5, 0.5));
    }

    #[test]
    fn scores_are_capped_at_one() {
        let lexical = ranking(&["a"]);
        let fused = fuse(FusionInput {
            lexical: &lexical,
            semantic: &[],
            config: FusionConfig {
                k: 0.001,
                ..FusionConfig::default()
            },
        });
        assert!(fused[0].score <= 1.0);
    }

    #[test]
    fn ties_break_deterministically() {
        let lexical = ranking(&["x", "y"]);
        let semantic = ranking(&["y", "x"]);
        let config = FusionConfig {
            lexical_weight: 0.5,
            semantic_weight: 0.5,
            ..FusionConfig::default()
        };
        let first = fuse(FusionInput {
            lexical: &lexical,
            semantic: &semantic,
            config,
        });
        let second = fuse(FusionInput {
            lexical: &semantic,
            semantic: &lexical,
            config,
        });
        assert_eq!(first[0].score, first[1].score);
        assert_eq!(ids(&first), vec!["x", "y"]);
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn similarity_comes_from_semantic_source() {
        let lexical = ranking(&["a"]);
        let semantic =
            vec![RankedResult::new("a", 0.9, SourceEngine::Semantic)];
        let fused = fuse(FusionInput {
            lexical: &lexical,
            semantic: &semantic,
            config: FusionConfig::default(),
        });
        assert_eq!(fused[0].similarity, Some(0.9));
    }

    proptest! {
        #[test]
        fn improving_lexical_rank_never_hurts(
            n in 2usize..20,
            from in 0usize..20,
            to in 0usize..20,
            semantic_order in proptest::collection::vec(0usize..20, 0..20),
        ) {
            let from = from % n;
            let to = to % n;
            prop_assume!(to < from);

            let names: Vec<String> = (0..n).map(|i| format!("d{i}")).collect();
            let mut semantic_ids: Vec<&str> = Vec::new();
            for i in semantic_order {
                let name = names[i % n].as_str();
                if !semantic_ids.contains(&name) {
                    semantic_ids.push(name);
                }
            }
            let semantic = ranking(&semantic_ids);

            let before: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut after = before.clone();
            let moved = after.remove(from);
            after.insert(to, moved);

            let score_of = |order: &[&str]| {
                let lexical = ranking(order);
                fuse(FusionInput {
                    lexical: &lexical,
                    semantic: &semantic,
                    config: FusionConfig::default(),
                })
                .into_iter()
                .find(|r| r.id == moved)
                .map(|r| r.score)
                .unwrap()
            };
            prop_assert!(score_of(&after) >= score_of(&before));
        }
    }
}
