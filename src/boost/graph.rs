//! Link-graph proximity boost.
//!
//! Among the strongest results, documents that link to each other, are cited
//! by the same sources or share tags are likely about the same thing.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::apply_multipliers;
use crate::result::RankedResult;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphBoostConfig {
    /// Only the top results are analysed.
    pub max_candidates: usize,
    /// Results carrying a similarity below this are not analysed.
    pub similarity_threshold: f64,
    pub min_qualifying: usize,
    pub backlink_weight: f64,
    pub cocitation_weight: f64,
    pub shared_tag_weight: f64,
    pub boost_strength: f64,
    pub max_multiplier: f64,
}

impl Default for GraphBoostConfig {
    fn default() -> Self {
        Self {
            max_candidates: 50,
            similarity_threshold: 0.75,
            min_qualifying: 2,
            backlink_weight: 1.0,
            cocitation_weight: 0.5,
            shared_tag_weight: 0.3,
            boost_strength: 0.1,
            max_multiplier: 1.15,
        }
    }
}

/// Link neighbourhood of one document. Links are document ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphNode {
    pub out_links: BTreeSet<String>,
    pub in_links: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

impl GraphNode {
    pub fn new(
        out_links: impl IntoIterator<Item = String>,
        in_links: impl IntoIterator<Item = String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            out_links: out_links.into_iter().collect(),
            in_links: in_links.into_iter().collect(),
            tags: tags
                .into_iter()
                .map(|t| t.trim_start_matches('#').to_lowercase())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBoost {
    config: GraphBoostConfig,
}

impl GraphBoost {
    pub fn new(config: GraphBoostConfig) -> Self {
        Self { config }
    }

    /// Documents eligible for analysis, best first.
    ///
    /// When any result carries a semantic similarity, only results at or
    /// above the threshold qualify. Lexical-only runs skip the gate. The
    /// pipeline loads graph nodes for these documents only.
    pub fn qualifying_documents(&self, results: &[RankedResult]) -> Vec<String> {
        let gated = results.iter().any(|r| r.similarity.is_some());
        let mut seen = HashSet::new();
        results
            .iter()
            .take(self.config.max_candidates)
            .filter(|r| {
                !gated
                    || r.similarity
                        .is_some_and(|s| s >= self.config.similarity_threshold)
            })
            .map(|r| r.document_id())
            .filter(|document| seen.insert(*document))
            .map(str::to_string)
            .collect()
    }

    /// Weighted connection score of `document` to the other qualifying
    /// documents.
    fn connection_score(
        &self,
        document: &str,
        node: &GraphNode,
        qualifying: &[String],
        nodes: &HashMap<String, GraphNode>,
    ) -> f64 {
        let mut score = 0.0;
        for other in qualifying.iter().filter(|o| o.as_str() != document) {
            let other_node = nodes.get(other);

            let links_here = node.in_links.contains(other)
                || other_node.is_some_and(|n| n.out_links.contains(document));
            if links_here {
                score += self.config.backlink_weight;
            }

            let Some(other_node) = other_node else { continue };
            let cocited = node
                .in_links
                .intersection(&other_node.in_links)
                .filter(|source| {
                    source.as_str() != document && *source != other
                })
                .count();
            score += self.config.cocitation_weight * cocited as f64;

            let shared_tags = node.tags.intersection(&other_node.tags).count();
            score += self.config.shared_tag_weight * shared_tags as f64;
        }
        score
    }

    /// Multiplier for a connection score.
    pub fn multiplier(&self, connection_score: f64) -> f64 {
        let boost =
            1.0 + self.config.boost_strength * connection_score.max(0.0).ln_1p();
        boost.min(self.config.max_multiplier.max(1.0))
    }

    /// Boost results connected to other strong results.
    ///
    /// `nodes` maps document ids to their link neighbourhoods; documents
    /// missing from it contribute only as link targets.
    pub fn apply_boost(
        &self,
        results: Vec<RankedResult>,
        nodes: &HashMap<String, GraphNode>,
    ) -> Vec<RankedResult> {
        let qualifying = self.qualifying_documents(&results);
        if qualifying.len() < self.config.min_qualifying.max(2) {
            return results;
        }

        let mut multipliers: HashMap<String, f64> = HashMap::new();
        for document in &qualifying {
            let Some(node) = nodes.get(document) else { continue };
            let score =
                self.connection_score(document, node, &qualifying, nodes);
            if score > 0.0 {
                let multiplier = self.multiplier(score);
                debug!(document, score, multiplier, "graph boost");
                multipliers.insert(document.clone(), multiplier);
            }
        }

        apply_multipliers(results, &multipliers, |explanation, factor| {
            explanation.graph_boost = Some(factor);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{Explanation, SourceEngine};

    fn result(id: &str, score: f64) -> RankedResult {
        let mut result = RankedResult::new(id, score, SourceEngine::Fused);
        result.explanation = Some(Explanation::new(score));
        result
    }

    fn node(out: &[&str], inbound: &[&str], tags: &[&str]) -> GraphNode {
        let owned = |items: &[&str]| -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        };
        GraphNode::new(owned(out), owned(inbound), owned(tags))
    }

    fn boost_of(results: &[RankedResult], id: &str) -> Option<f64> {
        results
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.explanation.as_ref().unwrap().graph_boost)
    }

    #[test]
    fn link_targets_are_boosted() {
        let mut nodes = HashMap::new();
        nodes.insert("a.md".to_string(), node(&["b.md"], &[], &[]));
        nodes.insert("b.md".to_string(), node(&[], &["a.md"], &[]));
        nodes.insert("c.md".to_string(), node(&[], &[], &[]));

        let results = vec![
            result("a.md#0", 0.5),
            result("b.md#0", 0.4),
            result("c.md#0", 0.45),
        ];
        let boosted = GraphBoost::default().apply_boost(results, &nodes);

        let expected = 1.0 + 0.1 * 2.0f64.ln();
        assert!((boost_of(&boosted, "b.md#0").unwrap() - expected).abs() < 1e-12);
        assert_eq!(boost_of(&boosted, "a.md#0"), None);
        assert_eq!(boost_of(&boosted, "c.md#0"), None);
    }

    #[test]
    fn cocitation_and_tags_contribute() {
        let mut nodes = HashMap::new();
        nodes.insert("a.md".to_string(), node(&[], &["hub.md"], &["rust"]));
        nodes.insert("b.md".to_string(), node(&[], &["hub.md"], &["#Rust"]));

        let results = vec![result("a.md#0", 0.5), result("b.md#0", 0.4)];
        let boosted = GraphBoost::default().apply_boost(results, &nodes);

        let expected = 1.0 + 0.1 * (1.0f64 + 0.5 + 0.3).ln();
        assert!((boost_of(&boosted, "a.md#0").unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn single_qualifying_document_gets_nothing() {
        let mut nodes = HashMap::new();
        nodes.insert("a.md".to_string(), node(&["a.md"], &["a.md"], &["x"]));
        let results = vec![result("a.md#0", 0.5), result("a.md#1", 0.4)];
        let boosted = GraphBoost::default().apply_boost(results.clone(), &nodes);
        assert_eq!(boosted, results);
    }

    #[test]
    fn low_similarity_results_do_not_qualify() {
        let mut nodes = HashMap::new();
        nodes.insert("a.md".to_string(), node(&["b.md"], &[], &[]));
        nodes.insert("b.md".to_string(), node(&[], &["a.md"], &[]));
        let results = vec![
            result("a.md#0", 0.5).with_similarity(0.9),
            result("b.md#0", 0.4).with_similarity(0.5),
        ];
        let boosted = GraphBoost::default().apply_boost(results.clone(), &nodes);
        assert_eq!(boosted, results);
    }

    #[test]
    fn lexical_only_results_do_not_bypass_similarity_gate() {
        let results = vec![
            result("a.md#0", 0.6).with_similarity(0.9),
            result("b.md#0", 0.5),
            result("c.md#0", 0.4).with_similarity(0.7),
            result("d.md#0", 0.3).with_similarity(0.8),
        ];
        assert_eq!(
            GraphBoost::default().qualifying_documents(&results),
            vec!["a.md", "d.md"]
        );

        let lexical = vec![result("a.md#0", 0.6), result("b.md#0", 0.5)];
        assert_eq!(
            GraphBoost::default().qualifying_documents(&lexical),
            vec!["a.md", "b.md"]
        );
    }

    #[test]
    fn multiplier_is_capped() {
        let boost = GraphBoost::default();
        assert_eq!(boost.multiplier(0.0), 1.0);
        assert_eq!(boost.multiplier(1e9), 1.15);
    }

    #[test]
    fn all_chunks_of_a_document_share_the_multiplier() {
        let mut nodes = HashMap::new();
        nodes.insert("a.md".to_string(), node(&[], &[], &["t"]));
        nodes.insert("b.md".to_string(), node(&[], &[], &["t"]));
        let results = vec![
            result("a.md#0", 0.5),
            result("b.md#0", 0.4),
            result("a.md#4", 0.1),
        ];
        let boosted = GraphBoost::default().apply_boost(results, &nodes);
        assert_eq!(
            boost_of(&boosted, "a.md#0"),
            boost_of(&boosted, "a.md#4")
        );
    }
}
