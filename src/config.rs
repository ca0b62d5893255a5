//! Retrieval configuration and per-call options.
//!
//! [`RetrievalConfig`] holds every tunable of the pipeline and is read from
//! TOML; every section and field is optional and falls back to its default.
//! [`RetrieveOptions`] are the per-call knobs, clamped into range rather
//! than rejected.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    boost::{FolderBoostConfig, GraphBoostConfig},
    budget::{DEFAULT_CANDIDATE_LIMIT, DEFAULT_MAX_BYTES},
    chunking::{ChunkingConfig, DEFAULT_CACHE_BYTES},
    cutoff::CutoffConfig,
    error::{Error, Result},
    fusion::FusionConfig,
    lexical_index::LexicalConfig,
    normalize::NormalizationConfig,
};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "CHUNKRANK_CONFIG";

pub const MAX_RESULTS_RANGE: (usize, usize) = (1, 100);
pub const CANDIDATE_LIMIT_RANGE: (usize, usize) = (10, 1000);
pub const DEFAULT_MAX_RESULTS: usize = 30;
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Ceiling on chunk bytes held by one index build.
    pub max_bytes: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub expansion_ms: u64,
    pub semantic_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            expansion_ms: 5000,
            semantic_ms: 5000,
        }
    }
}

impl TimeoutConfig {
    pub fn expansion(&self) -> Duration {
        Duration::from_millis(self.expansion_ms)
    }

    pub fn semantic(&self) -> Duration {
        Duration::from_millis(self.semantic_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub chunk_cache_bytes: u64,
    /// Cached query results; 0 disables the query cache.
    pub query_cache_entries: u64,
    pub query_cache_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_cache_bytes: DEFAULT_CACHE_BYTES,
            query_cache_entries: 128,
            query_cache_ttl_secs: 300,
        }
    }
}

/// Every tunable of the retrieval pipeline.
///
/// # Examples
///
/// ```
/// use chunkrank::config::RetrievalConfig;
///
/// let config = RetrievalConfig::from_toml_str(
///     "[chunking]\nmax_chars = 800\n\n[cutoff]\nfloor = 3\n",
/// )
/// .unwrap();
/// assert_eq!(config.chunking.max_chars, 800);
/// assert_eq!(config.cutoff.floor, 3);
/// assert_eq!(config.cutoff.ceiling, 30);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub chunking: ChunkingConfig,
    pub budget: BudgetConfig,
    pub lexical: LexicalConfig,
    pub fusion: FusionConfig,
    pub folder_boost: FolderBoostConfig,
    pub graph_boost: GraphBoostConfig,
    pub normalization: NormalizationConfig,
    pub cutoff: CutoffConfig,
    pub timeouts: TimeoutConfig,
    pub cache: CacheConfig,
}

impl RetrievalConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve the configuration from, in order of priority:
    /// 1. An explicit path (from --config)
    /// 2. The CHUNKRANK_CONFIG environment variable
    /// 3. Built-in defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = if let Some(path) = explicit {
            Some(path.to_path_buf())
        } else {
            std::env::var_os(CONFIG_ENV).map(PathBuf::from)
        };
        match path {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Reject values no pipeline stage can work with.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| Err(Error::Config(message.to_string()));

        if self.chunking.max_chars == 0 {
            return fail("chunking.max_chars must be positive");
        }
        if self.budget.max_bytes == 0 {
            return fail("budget.max_bytes must be positive");
        }
        if !(self.fusion.k > 0.0) {
            return fail("fusion.k must be positive");
        }
        if self.fusion.lexical_weight < 0.0 || self.fusion.semantic_weight < 0.0
        {
            return fail("fusion weights must not be negative");
        }
        let n = &self.normalization;
        if !(0.0 < n.clip_min && n.clip_min < n.clip_max && n.clip_max < 1.0) {
            return fail(
                "normalization clip range must satisfy 0 < clip_min < clip_max < 1",
            );
        }
        if !(n.tanh_scale > 0.0) {
            return fail("normalization.tanh_scale must be positive");
        }
        if self.cutoff.ceiling == 0 {
            return fail("cutoff.ceiling must be positive");
        }
        if !(0.0..=1.0).contains(&self.cutoff.relative_threshold) {
            return fail("cutoff.relative_threshold must be within [0, 1]");
        }
        if self.folder_boost.max_boost_factor < 1.0
            || self.graph_boost.max_multiplier < 1.0
        {
            return fail("boost caps must be at least 1.0");
        }
        Ok(())
    }
}

/// Restricts candidate documents by glob over their ids.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl CandidateFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::Config(format!("invalid glob {pattern:?}: {e}"))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::Config(format!("invalid glob set: {e}")))?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    pub fn matches(&self, id: &str) -> bool {
        self.set.is_match(id)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Per-call retrieval options.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub max_results: usize,
    pub candidate_limit: usize,
    pub enable_boosts: bool,
    /// Semantic share of the fusion weights; lexical gets the rest.
    pub semantic_weight: f64,
    /// Caller-supplied scoring terms, taking precedence over the expander.
    pub salient_terms: Option<Vec<String>>,
    /// Attach score explanations to results.
    pub explain: bool,
    pub filter: Option<CandidateFilter>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            enable_boosts: true,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            salient_terms: None,
            explain: false,
            filter: None,
        }
    }
}

impl RetrieveOptions {
    /// Clamp numeric options into their accepted ranges.
    pub fn clamped(mut self) -> Self {
        self.max_results = self
            .max_results
            .clamp(MAX_RESULTS_RANGE.0, MAX_RESULTS_RANGE.1);
        self.candidate_limit = self
            .candidate_limit
            .clamp(CANDIDATE_LIMIT_RANGE.0, CANDIDATE_LIMIT_RANGE.1);
        self.semantic_weight = if self.semantic_weight.is_nan() {
            DEFAULT_SEMANTIC_WEIGHT
        } else {
            self.semantic_weight.clamp(0.0, 1.0)
        };
        self
    }

    /// Cache key component identifying these options.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{:.6}|{:?}|{}|{:?}",
            self.max_results,
            self.candidate_limit,
            self.enable_boosts,
            self.semantic_weight,
            self.salient_terms,
            self.explain,
            self.filter.as_ref().map(CandidateFilter::patterns),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NormalizationMethod;

    #[test]
    fn empty_toml_is_default() {
        let config = RetrievalConfig::from_toml_str("").unwrap();
        assert_eq!(config, RetrievalConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RetrievalConfig::from_toml_str(
            "[normalization]\nmethod = \"percentile\"\n\n[fusion]\nk = 30.0\n",
        )
        .unwrap();
        assert_eq!(config.normalization.method, NormalizationMethod::Percentile);
        assert_eq!(config.normalization.clip_min, 0.02);
        assert_eq!(config.fusion.k, 30.0);
        assert_eq!(config.fusion.semantic_weight, 0.6);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for text in [
            "[chunking]\nmax_chars = 0\n",
            "[normalization]\nclip_min = 0.9\nclip_max = 0.1\n",
            "[normalization]\nclip_max = 1.0\n",
            "[fusion]\nk = 0.0\n",
            "[cutoff]\nrelative_threshold = 1.5\n",
            "[folder_boost]\nmax_boost_factor = 0.5\n",
        ] {
            let err = RetrievalConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{text}: {err}");
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = RetrievalConfig::from_toml_str("[chunking\n").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chunkrank.toml");
        std::fs::write(&path, "[cutoff]\nceiling = 12\n").unwrap();
        let config = RetrievalConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.cutoff.ceiling, 12);
    }

    #[test]
    fn options_are_clamped() {
        let options = RetrieveOptions {
            max_results: 0,
            candidate_limit: 5000,
            semantic_weight: 1.7,
            ..RetrieveOptions::default()
        }
        .clamped();
        assert_eq!(options.max_results, 1);
        assert_eq!(options.candidate_limit, 1000);
        assert_eq!(options.semantic_weight, 1.0);

        let options = RetrieveOptions {
            max_results: 500,
            candidate_limit: 1,
            semantic_weight: f64::NAN,
            ..RetrieveOptions::default()
        }
        .clamped();
        assert_eq!(options.max_results, 100);
        assert_eq!(options.candidate_limit, 10);
        assert_eq!(options.semantic_weight, 0.6);
    }

    #[test]
    fn candidate_filter_matches_globs() {
        let filter =
            CandidateFilter::new(&["notes/**/*.md".to_string()]).unwrap();
        assert!(filter.matches("notes/rust/a.md"));
        assert!(!filter.matches("journal/a.md"));
        assert!(CandidateFilter::new(&["[".to_string()]).is_err());
    }

    #[test]
    fn fingerprint_distinguishes_options() {
        let a = RetrieveOptions::default();
        let b = RetrieveOptions {
            enable_boosts: false,
            ..RetrieveOptions::default()
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), RetrieveOptions::default().fingerprint());
    }
}
