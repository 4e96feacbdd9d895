/// BM25 retrieval over catalog label tokens.
///
/// Raw relevance is unbounded, so scores are calibrated against the query's
/// self-match: the score the query would earn against a catalog document made
/// of exactly its own tokens. See `calibrate::anchored`.

use std::collections::HashMap;

use super::{calibrate, rank_candidates, Candidate, MatchQuery, Method};
use crate::catalog::Catalog;

const K1: f64 = 1.5;
const B: f64 = 0.75;

pub struct Bm25Index {
    /// token -> (node index, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    doc_len: Vec<f64>,
    avgdl: f64,
    n: f64,
}

/// Unique tokens in first-seen order with their counts.
fn term_counts<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<(&'a str, u32)> {
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for t in tokens {
        match counts.iter_mut().find(|(tok, _)| *tok == t) {
            Some((_, c)) => *c += 1,
            None => counts.push((t, 1)),
        }
    }
    counts
}

impl Bm25Index {
    pub fn build(catalog: &Catalog) -> Self {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut doc_len = Vec::with_capacity(catalog.len());
        for idx in 0..catalog.len() {
            let label = catalog.normalized_label(idx);
            let counts = term_counts(label.tokens());
            doc_len.push(counts.iter().map(|(_, c)| *c as f64).sum());
            for (token, tf) in counts {
                postings.entry(token.to_string()).or_default().push((idx, tf));
            }
        }
        let n = catalog.len() as f64;
        let avgdl = if doc_len.is_empty() {
            1.0
        } else {
            (doc_len.iter().sum::<f64>() / n).max(1.0)
        };
        Bm25Index { postings, doc_len, avgdl, n }
    }

    fn idf(&self, df: usize) -> f64 {
        let df = df as f64;
        ((self.n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn term_weight(&self, idf: f64, tf: f64, dl: f64) -> f64 {
        idf * tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * dl / self.avgdl))
    }

    pub fn search(&self, query: &MatchQuery<'_>, catalog: &Catalog, top_k: usize) -> Vec<Candidate> {
        let q_terms = term_counts(query.label.tokens());
        if q_terms.is_empty() {
            return Vec::new();
        }
        let q_len: f64 = q_terms.iter().map(|(_, c)| *c as f64).sum();

        let mut ceiling = 0.0;
        let mut scores: HashMap<usize, f64> = HashMap::new();
        for (token, qtf) in &q_terms {
            let qtf = *qtf as f64;
            let docs = self.postings.get(*token).map(Vec::as_slice).unwrap_or(&[]);
            let idf = self.idf(docs.len());
            ceiling += qtf * self.term_weight(idf, qtf, q_len);
            for &(idx, tf) in docs {
                *scores.entry(idx).or_insert(0.0) += qtf * self.term_weight(idf, tf as f64, self.doc_len[idx]);
            }
        }

        let mut hits: Vec<(usize, f64)> = scores
            .into_iter()
            .filter(|(idx, raw)| *raw > 0.0 && query.eligible(catalog, *idx))
            .collect();
        hits.sort_by_key(|(idx, _)| *idx);

        let raw: Vec<f64> = hits.iter().map(|(_, r)| *r).collect();
        let calibrated = calibrate::anchored(&raw, ceiling);
        let pool = hits
            .iter()
            .zip(calibrated)
            .map(|(&(idx, raw), score)| Candidate::new(catalog.node(idx).id.clone(), raw, score, Method::Bm25))
            .collect();

        rank_candidates(pool, catalog, top_k)
    }
}
