/// Matching strategies behind one capability.
///
/// Every stage of the cascade except re-ranking is a `Matcher` variant with the
/// same contract: `(query, catalog, top_k) -> ordered candidates`. Scores on
/// returned candidates are already normalized to [0, 1]; `raw_score` keeps the
/// backend-native value for audit.

pub mod bm25;
pub mod calibrate;
pub mod deterministic;
pub mod edit;
pub mod semantic;
pub mod tfidf;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Catalog;
use crate::config::MethodName;
use crate::embedding::EmbeddingError;
use crate::normalize::NormalizedText;

pub use bm25::Bm25Index;
pub use edit::EditDistanceIndex;
pub use semantic::SemanticMatcher;
pub use tfidf::TfidfIndex;

/// Stage tag carried by candidates and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Override,
    ExactCode,
    LabelMatch,
    Synonym,
    EditDistance,
    Bm25,
    Tfidf,
    Embedding,
    /// Internal failure while mapping the row
    Error,
    /// Row rejected by validation, never matched
    Invalid,
    /// No stage produced any candidate
    None,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Override => "override",
            Method::ExactCode => "exact_code",
            Method::LabelMatch => "label_match",
            Method::Synonym => "synonym",
            Method::EditDistance => "edit_distance",
            Method::Bm25 => "bm25",
            Method::Tfidf => "tfidf",
            Method::Embedding => "embedding",
            Method::Error => "error",
            Method::Invalid => "invalid",
            Method::None => "none",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend's contribution to a merged candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreComponent {
    pub method: Method,
    pub score: f64,
}

/// Intermediate result from one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub target_id: String,
    /// Backend-native score (BM25 relevance, cosine, ratio, ...)
    pub raw_score: f64,
    /// Normalized confidence in [0, 1]
    pub score: f64,
    pub method: Method,
    /// 1-based position within the producing stage's pool
    pub rank: usize,
    /// Per-backend scores when several backends saw this target (hybrid)
    pub components: Vec<ScoreComponent>,
    pub note: Option<String>,
}

impl Candidate {
    pub fn new(target_id: impl Into<String>, raw_score: f64, score: f64, method: Method) -> Self {
        Candidate {
            target_id: target_id.into(),
            raw_score,
            score: calibrate::clamp_unit(score),
            method,
            rank: 0,
            components: Vec::new(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// What a matcher sees of one record.
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub code: Option<&'a str>,
    pub label: &'a NormalizedText,
    /// Trimmed original label, used for path splitting
    pub raw_label: &'a str,
    /// Skip sensitive-content nodes
    pub drop_scd: bool,
}

impl MatchQuery<'_> {
    pub fn eligible(&self, catalog: &Catalog, idx: usize) -> bool {
        !(self.drop_scd && catalog.node(idx).scd_flag)
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    /// Embedding oracle failed; the semantic stage degrades
    #[error("Embedding oracle error: {0}")]
    Oracle(#[from] EmbeddingError),

    #[error("Matcher internal error: {0}")]
    Internal(String),
}

/// The common matching capability.
pub enum Matcher {
    /// Code lookup (ids + crosswalk), then normalized path/label equality
    ExactLookup,
    SynonymLookup,
    EditDistance(EditDistanceIndex),
    Bm25(Bm25Index),
    Tfidf(TfidfIndex),
    Embedding(SemanticMatcher),
}

impl Matcher {
    /// The `enabled_methods` name gating this matcher, if any.
    pub fn name(&self) -> Option<MethodName> {
        match self {
            Matcher::ExactLookup => Some(MethodName::Exact),
            Matcher::SynonymLookup => Some(MethodName::Synonym),
            Matcher::EditDistance(_) => Some(MethodName::EditDistance),
            Matcher::Bm25(_) => Some(MethodName::Bm25),
            Matcher::Tfidf(_) => Some(MethodName::Tfidf),
            Matcher::Embedding(_) => None,
        }
    }

    pub async fn candidates(
        &self,
        query: &MatchQuery<'_>,
        catalog: &Catalog,
        top_k: usize,
    ) -> Result<Vec<Candidate>, MatchError> {
        let pool = match self {
            Matcher::ExactLookup => deterministic::exact_lookup(query, catalog)?.into_iter().collect(),
            Matcher::SynonymLookup => deterministic::synonym_lookup(query, catalog)?.into_iter().collect(),
            Matcher::EditDistance(index) => index.search(query, catalog, top_k),
            Matcher::Bm25(index) => index.search(query, catalog, top_k),
            Matcher::Tfidf(index) => index.search(query, catalog, top_k),
            Matcher::Embedding(semantic) => semantic.search(query, catalog, top_k).await?,
        };
        Ok(pool)
    }
}

/// Order candidates by score (desc), then catalog position (asc), assign ranks, truncate.
pub fn rank_candidates(mut pool: Vec<Candidate>, catalog: &Catalog, top_k: usize) -> Vec<Candidate> {
    pool.sort_by(|a, b| {
        b.score.total_cmp(&a.score).then_with(|| {
            let ai = catalog.index_of(&a.target_id).unwrap_or(usize::MAX);
            let bi = catalog.index_of(&b.target_id).unwrap_or(usize::MAX);
            ai.cmp(&bi)
        })
    });
    pool.truncate(top_k);
    for (i, c) in pool.iter_mut().enumerate() {
        c.rank = i + 1;
    }
    pool
}

/// Merge pools by target id keeping the maximum normalized score.
///
/// On equal scores the earlier pool wins, so the pool order decides which
/// backend is credited.
pub fn merge_max(pools: Vec<Vec<Candidate>>, catalog: &Catalog, top_k: usize) -> Vec<Candidate> {
    let mut merged: HashMap<String, Candidate> = HashMap::new();
    for pool in pools {
        for mut cand in pool {
            // A candidate that is itself a merge result brings its own components.
            let contributed = if cand.components.is_empty() {
                vec![ScoreComponent { method: cand.method, score: cand.score }]
            } else {
                std::mem::take(&mut cand.components)
            };
            match merged.get_mut(&cand.target_id) {
                Some(existing) => {
                    existing.components.extend(contributed);
                    if cand.score.total_cmp(&existing.score) == Ordering::Greater {
                        let components = std::mem::take(&mut existing.components);
                        *existing = Candidate { components, ..cand };
                    }
                }
                None => {
                    cand.components = contributed;
                    merged.insert(cand.target_id.clone(), cand);
                }
            }
        }
    }
    rank_candidates(merged.into_values().collect(), catalog, top_k)
}
