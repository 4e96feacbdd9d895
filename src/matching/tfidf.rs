/// TF-IDF cosine retrieval over catalog label tokens.
///
/// Smooth idf (`ln((1 + N) / (1 + df)) + 1`), L2-normalized vectors. Query
/// tokens absent from the catalog keep their weight in the query norm, so a
/// query padded with unknown words does not look like a perfect match.

use std::collections::HashMap;

use super::{calibrate, rank_candidates, Candidate, MatchQuery, Method};
use crate::catalog::Catalog;

pub struct TfidfIndex {
    vocab: HashMap<String, usize>,
    idf: Vec<f64>,
    /// term id -> (node index, normalized weight)
    postings: Vec<Vec<(usize, f64)>>,
    oov_idf: f64,
}

fn counts<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<(&'a str, f64)> {
    let mut out: Vec<(&str, f64)> = Vec::new();
    for t in tokens {
        match out.iter_mut().find(|(tok, _)| *tok == t) {
            Some((_, c)) => *c += 1.0,
            None => out.push((t, 1.0)),
        }
    }
    out
}

impl TfidfIndex {
    pub fn build(catalog: &Catalog) -> Self {
        let n = catalog.len() as f64;
        let mut vocab: HashMap<String, usize> = HashMap::new();
        let mut df: Vec<usize> = Vec::new();
        let docs: Vec<Vec<(usize, f64)>> = (0..catalog.len())
            .map(|idx| {
                counts(catalog.normalized_label(idx).tokens())
                    .into_iter()
                    .map(|(tok, tf)| {
                        let next = vocab.len();
                        let id = *vocab.entry(tok.to_string()).or_insert(next);
                        if id == df.len() {
                            df.push(0);
                        }
                        df[id] += 1;
                        (id, tf)
                    })
                    .collect()
            })
            .collect();

        let idf: Vec<f64> = df.iter().map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0).collect();
        let mut postings: Vec<Vec<(usize, f64)>> = vec![Vec::new(); vocab.len()];
        for (idx, doc) in docs.iter().enumerate() {
            let weights: Vec<(usize, f64)> = doc.iter().map(|&(t, tf)| (t, tf * idf[t])).collect();
            let norm = weights.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            if norm <= 0.0 {
                continue;
            }
            for (t, w) in weights {
                postings[t].push((idx, w / norm));
            }
        }

        TfidfIndex { vocab, idf, postings, oov_idf: (1.0 + n).ln() + 1.0 }
    }

    pub fn search(&self, query: &MatchQuery<'_>, catalog: &Catalog, top_k: usize) -> Vec<Candidate> {
        let terms = counts(query.label.tokens());
        if terms.is_empty() {
            return Vec::new();
        }

        let mut q_weights: Vec<(Option<usize>, f64)> = Vec::with_capacity(terms.len());
        for (tok, tf) in terms {
            match self.vocab.get(tok) {
                Some(&t) => q_weights.push((Some(t), tf * self.idf[t])),
                None => q_weights.push((None, tf * self.oov_idf)),
            }
        }
        let q_norm = q_weights.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if q_norm <= 0.0 {
            return Vec::new();
        }

        let mut dots: HashMap<usize, f64> = HashMap::new();
        for (term, w) in &q_weights {
            let Some(t) = term else { continue };
            for &(idx, dw) in &self.postings[*t] {
                *dots.entry(idx).or_insert(0.0) += (w / q_norm) * dw;
            }
        }

        let pool = dots
            .into_iter()
            .filter(|(idx, cos)| *cos > 0.0 && query.eligible(catalog, *idx))
            .map(|(idx, cos)| {
                Candidate::new(catalog.node(idx).id.clone(), cos, calibrate::clamp_unit(cos), Method::Tfidf)
            })
            .collect();

        rank_candidates(pool, catalog, top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::spec;
    use crate::normalize::normalize;

    fn catalog() -> Catalog {
        Catalog::build(
            "3.0",
            vec![
                spec("AR", &["Auto Racing"]),
                spec("AP", &["Auto Parts"]),
                spec("HR", &["Horse Racing"]),
                spec("CK", &["Cooking"]),
            ],
            std::collections::HashMap::new(),
        )
        .unwrap()
    }

    fn search(label: &str) -> Vec<Candidate> {
        let cat = catalog();
        let index = TfidfIndex::build(&cat);
        let norm = normalize(label);
        let q = MatchQuery { code: None, label: &norm, raw_label: label, drop_scd: false };
        index.search(&q, &cat, 5)
    }

    #[test]
    fn test_identical_label_cosine_one() {
        let pool = search("racing AUTO");
        assert_eq!(pool[0].target_id, "AR");
        assert!((pool[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rare_term_outweighs_common_term() {
        // "cooking" appears once, "auto" twice in the catalog.
        let pool = search("auto cooking");
        assert_eq!(pool[0].target_id, "CK");
    }

    #[test]
    fn test_unknown_words_penalize() {
        let plain = search("cooking");
        let noisy = search("cooking videos tutorial");
        assert!((plain[0].score - 1.0).abs() < 1e-9);
        assert!(noisy[0].score < 0.7);
    }

    #[test]
    fn test_empty_query() {
        assert!(search("--").is_empty());
    }
}
