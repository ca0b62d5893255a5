//! Folder clustering boost.
//!
//! When several matching documents sit in the same folder, and they make up
//! a meaningful share of it, the folder is treated as topically coherent and
//! its results are nudged up.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::apply_multipliers;
use crate::{document::folder_of, result::RankedResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderBoostConfig {
    /// Minimum matching documents in a folder.
    pub min_docs: usize,
    /// Minimum share of the folder's documents that must match.
    pub min_relevance_ratio: f64,
    pub max_boost_factor: f64,
    /// Base term of the factor formula.
    pub base: f64,
}

impl Default for FolderBoostConfig {
    fn default() -> Self {
        Self {
            min_docs: 2,
            min_relevance_ratio: 0.4,
            max_boost_factor: 1.15,
            base: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FolderBoost {
    config: FolderBoostConfig,
}

impl FolderBoost {
    pub fn new(config: FolderBoostConfig) -> Self {
        Self { config }
    }

    /// Factor for a folder with `matching` of `total` documents matching, or
    /// `None` when either gate fails.
    pub fn factor(&self, matching: usize, total: usize) -> Option<f64> {
        let total = total.max(matching);
        if matching < self.config.min_docs || total == 0 {
            return None;
        }
        let ratio = matching as f64 / total as f64;
        if ratio < self.config.min_relevance_ratio {
            return None;
        }
        let n = matching as f64;
        let factor =
            1.0 + (self.config.base + (n + 1.0).log2() - 1.0) * ratio.sqrt();
        Some(factor.clamp(1.0, self.config.max_boost_factor.max(1.0)))
    }

    /// Boost results whose folders pass both gates.
    ///
    /// `folder_size` reports how many documents a folder holds; when it
    /// returns `None` the matching documents are taken as the whole folder.
    pub fn apply_boosts(
        &self,
        results: Vec<RankedResult>,
        folder_size: impl Fn(&str) -> Option<usize>,
    ) -> Vec<RankedResult> {
        let mut folders: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for result in &results {
            let document = result.document_id();
            folders
                .entry(folder_of(document))
                .or_default()
                .insert(document);
        }

        let mut multipliers: HashMap<String, f64> = HashMap::new();
        for (folder, documents) in &folders {
            let matching = documents.len();
            let total = folder_size(folder).unwrap_or(matching);
            let Some(factor) = self.factor(matching, total) else {
                continue;
            };
            debug!(folder, matching, total, factor, "folder boost");
            for document in documents {
                multipliers.insert(document.to_string(), factor);
            }
        }

        apply_multipliers(results, &multipliers, |explanation, factor| {
            explanation.folder_boost = Some(factor);
        })
    }
}
