//! Ranked results and their optional score explanations.

use serde::{Deserialize, Serialize};

use crate::chunk_id::document_of;

/// Which stage produced a result's current score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceEngine {
    Lexical,
    Semantic,
    Fused,
}

/// Indexed fields, each with a fixed weight.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Title,
    Tag,
    Heading,
    Path,
    Property,
    PropertyLiteral,
    Link,
    Body,
}

impl FieldKind {
    pub const ALL: [FieldKind; 8] = [
        FieldKind::Title,
        FieldKind::Tag,
        FieldKind::Heading,
        FieldKind::Path,
        FieldKind::Property,
        FieldKind::PropertyLiteral,
        FieldKind::Link,
        FieldKind::Body,
    ];

    /// Static scoring weight of the field.
    ///
    /// Boolean and numeric front-matter values carry a tenth of the
    /// property weight.
    pub const fn weight(self) -> f64 {
        match self {
            FieldKind::Title => 3.0,
            FieldKind::Tag => 4.0,
            FieldKind::Heading => 2.5,
            FieldKind::Path => 2.0,
            FieldKind::Property => 1.5,
            FieldKind::PropertyLiteral => 0.15,
            FieldKind::Link => 1.5,
            FieldKind::Body => 1.0,
        }
    }

    /// Schema field name.
    pub const fn name(self) -> &'static str {
        match self {
            FieldKind::Title => "title",
            FieldKind::Tag => "tag",
            FieldKind::Heading => "heading",
            FieldKind::Path => "path",
            FieldKind::Property => "property",
            FieldKind::PropertyLiteral => "property_literal",
            FieldKind::Link => "link",
            FieldKind::Body => "body",
        }
    }
}

/// One scoring contribution: `query` matched in `field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalMatch {
    pub field: FieldKind,
    pub query: String,
    pub weight: f64,
}

/// Additive record of how a result's score came about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lexical_matches: Vec<LexicalMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_boost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_boost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_boost: Option<f64>,
    pub base_score: f64,
    pub final_score: f64,
}

impl Explanation {
    pub fn new(base_score: f64) -> Self {
        Self {
            base_score,
            final_score: base_score,
            ..Self::default()
        }
    }
}

/// A ranked chunk or document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// A chunk id (`"{document}#{index}"`) or a bare document id.
    pub id: String,
    pub score: f64,
    pub source: SourceEngine,
    /// Semantic similarity in `[0, 1]`, when a semantic index scored this
    /// result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

impl RankedResult {
    pub fn new(id: impl Into<String>, score: f64, source: SourceEngine) -> Self {
        Self {
            id: id.into(),
            score,
            source,
            similarity: None,
            explanation: None,
        }
    }

    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// The document this result belongs to.
    pub fn document_id(&self) -> &str {
        document_of(&self.id)
    }

    /// Set a new score, keeping the explanation's final score in step.
    pub fn rescore(mut self, score: f64) -> Self {
        self.score = score;
        if let Some(explanation) = &mut self.explanation {
            explanation.final_score = score;
        }
        self
    }
}

/// Stable sort, descending by score. Equal scores keep their order.
pub fn sort_by_score(results: &mut [RankedResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}
