/// Edit-distance backend.
///
/// Similarity is the best normalized Levenshtein ratio among three views of a
/// node: its label, its label with tokens sorted (word order insensitive), and
/// its full path flattened to words. Ratios are already in [0, 1].

use strsim::normalized_levenshtein;

use super::{rank_candidates, Candidate, MatchQuery, Method};
use crate::catalog::Catalog;

struct EditEntry {
    sorted_label: String,
    /// Path segments joined by spaces; None for root nodes (same as the label)
    flat_path: Option<String>,
}

pub struct EditDistanceIndex {
    entries: Vec<EditEntry>,
}

impl EditDistanceIndex {
    pub fn build(catalog: &Catalog) -> Self {
        let entries = (0..catalog.len())
            .map(|idx| EditEntry {
                sorted_label: catalog.normalized_label(idx).token_sorted(),
                flat_path: (catalog.node(idx).path.len() > 1)
                    .then(|| catalog.normalized_path(idx).replace(" > ", " ")),
            })
            .collect();
        EditDistanceIndex { entries }
    }

    pub fn search(&self, query: &MatchQuery<'_>, catalog: &Catalog, top_k: usize) -> Vec<Candidate> {
        let q = query.label.as_str();
        let q_sorted = query.label.token_sorted();

        let pool: Vec<Candidate> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(idx, _)| query.eligible(catalog, *idx))
            .filter_map(|(idx, entry)| {
                let label = normalized_levenshtein(q, catalog.normalized_label(idx).as_str());
                let sorted = normalized_levenshtein(&q_sorted, &entry.sorted_label);
                let path = entry
                    .flat_path
                    .as_deref()
                    .map(|p| normalized_levenshtein(q, p))
                    .unwrap_or(0.0);
                let score = label.max(sorted).max(path);
                (score > 0.0).then(|| Candidate::new(catalog.node(idx).id.clone(), score, score, Method::EditDistance))
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
    use std::collections::HashMap;

    fn catalog() -> Catalog {
        Catalog::build(
            "3.0",
            vec![
                spec("SP", &["Sports"]),
                spec("AR", &["Sports", "Auto Racing"]),
                spec("BX", &["Sports", "Boxing"]),
                spec("CK", &["Cooking"]),
            ],
            HashMap::new(),
        )
        .unwrap()
    }

    fn search(label: &str) -> Vec<Candidate> {
        let cat = catalog();
        let index = EditDistanceIndex::build(&cat);
        let norm = normalize(label);
        let q = MatchQuery { code: None, label: &norm, raw_label: label, drop_scd: false };
        index.search(&q, &cat, 3)
    }

    #[test]
    fn test_typo_scores_high() {
        let pool = search("Auto Racng");
        assert_eq!(pool[0].target_id, "AR");
        assert!(pool[0].score > 0.85, "score {}", pool[0].score);
        assert_eq!(pool[0].method, Method::EditDistance);
    }

    #[test]
    fn test_word_order_insensitive() {
        let pool = search("Racing Auto");
        assert_eq!(pool[0].target_id, "AR");
        assert!((pool[0].score - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_full_path_view() {
        let pool = search("Sports Boxing");
        assert_eq!(pool[0].target_id, "BX");
        assert!((pool[0].score - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_top_k_and_ranks() {
        let pool = search("Cooking");
        assert!(pool.len() <= 3);
        assert_eq!(pool[0].target_id, "CK");
        assert_eq!(pool[0].rank, 1);
        assert!(pool.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
