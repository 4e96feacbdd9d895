/// Output assembly: turns a cascade decision into the final `MappingResult`.

use std::collections::HashSet;

use crate::cascade::Decision;
use crate::catalog::Catalog;
use crate::config::MapConfig;
use crate::matching::{Candidate, Method};
use crate::record::{InputRecord, MappingResult, Outcome, Topic};

fn topics(pool: &[Candidate], catalog: &Catalog, limit: usize) -> Vec<Topic> {
    let mut seen = HashSet::new();
    pool.iter()
        .filter(|c| seen.insert(c.target_id.as_str()))
        .filter_map(|c| {
            catalog.get(&c.target_id).map(|node| Topic {
                target_id: node.id.clone(),
                target_label: node.label.clone(),
                confidence: c.score,
                method: c.method,
            })
        })
        .take(limit)
        .collect()
}

/// Category codes for a matched node, ancestors first when requested.
pub fn categories(catalog: &Catalog, idx: usize, include_ancestors: bool) -> Vec<String> {
    let mut out: Vec<String> = if include_ancestors {
        catalog.ancestors(idx).into_iter().map(|a| catalog.node(a).id.clone()).collect()
    } else {
        Vec::new()
    };
    out.push(catalog.node(idx).id.clone());
    out
}

pub fn assemble(record: &InputRecord, decision: Decision, catalog: &Catalog, config: &MapConfig) -> MappingResult {
    let mut result = MappingResult {
        source_code: record.code.clone(),
        source_label: record.label.clone(),
        target_id: None,
        target_label: None,
        confidence: 0.0,
        method: Method::None,
        notes: String::new(),
        llm_reranked: decision.llm_reranked,
        scd_flag: false,
        status: decision.outcome,
        topics: topics(&decision.topics, catalog, config.max_topics),
        categories: Vec::new(),
        category_path: None,
        cattax: config.category_taxonomy_flag.tag(),
        vector: record.vector.clone(),
    };

    match decision.outcome {
        Outcome::Invalid => result.method = Method::Invalid,
        Outcome::Error => result.method = Method::Error,
        Outcome::Mapped | Outcome::Unmapped => {
            if let Some(winner) = &decision.winner {
                result.confidence = winner.score;
                result.method = winner.method;
            }
        }
    }

    if decision.outcome == Outcome::Mapped {
        let matched = decision
            .winner
            .as_ref()
            .and_then(|w| catalog.index_of(&w.target_id));
        if let Some(idx) = matched {
            let node = catalog.node(idx);
            result.target_id = Some(node.id.clone());
            result.target_label = Some(node.label.clone());
            result.scd_flag = node.scd_flag;
            result.categories = categories(catalog, idx, config.include_ancestors);
            result.category_path = Some(node.path.join(" > "));
        }
    }

    result.notes = decision.notes.join("; ");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::spec;
    use crate::catalog::NodeSpec;
    use crate::config::CategoryTaxonomy;
    use crate::record::VectorAttributes;
    use std::collections::HashMap;

    fn catalog() -> Catalog {
        Catalog::build(
            "3.0",
            vec![
                spec("SP", &["Sports"]),
                spec("AR", &["Sports", "Auto Racing"]),
                NodeSpec { scd: true, ..spec("GM", &["Gambling"]) },
            ],
            HashMap::new(),
        )
        .unwrap()
    }

    fn cand(id: &str, score: f64, method: Method) -> Candidate {
        Candidate::new(id, score, score, method)
    }

    fn decision(outcome: Outcome, pool: Vec<Candidate>) -> Decision {
        Decision {
            outcome,
            winner: pool.first().cloned(),
            topics: pool,
            llm_reranked: false,
            notes: vec!["first".to_string(), "second".to_string()],
        }
    }

    #[test]
    fn test_mapped_carries_node_fields_and_vector() {
        let cat = catalog();
        let mut record = InputRecord::new(Some("1-4"), "Auto Racing");
        record.vector = VectorAttributes { channel: Some("ctv".to_string()), ..Default::default() };
        let cfg = MapConfig { include_ancestors: true, ..MapConfig::default() };

        let r = assemble(&record, decision(Outcome::Mapped, vec![cand("AR", 0.95, Method::Bm25)]), &cat, &cfg);
        assert_eq!(r.target_id.as_deref(), Some("AR"));
        assert_eq!(r.target_label.as_deref(), Some("Auto Racing"));
        assert_eq!(r.categories, vec!["SP", "AR"]);
        assert_eq!(r.category_path.as_deref(), Some("Sports > Auto Racing"));
        assert_eq!(r.cattax, 7);
        assert_eq!(r.notes, "first; second");
        assert_eq!(r.vector.channel.as_deref(), Some("ctv"));
        assert_eq!(r.method, Method::Bm25);
    }

    #[test]
    fn test_unmapped_keeps_best_effort_without_target() {
        let cat = catalog();
        let cfg = MapConfig { category_taxonomy_flag: CategoryTaxonomy::Content2_2, ..MapConfig::default() };
        let pool = vec![cand("AR", 0.4, Method::Tfidf), cand("SP", 0.3, Method::Tfidf)];
        let r = assemble(&InputRecord::new(None, "rally"), decision(Outcome::Unmapped, pool), &cat, &cfg);
        assert_eq!(r.target_id, None);
        assert!(r.categories.is_empty());
        assert_eq!(r.confidence, 0.4);
        assert_eq!(r.method, Method::Tfidf);
        assert_eq!(r.topics.len(), 2);
        assert_eq!(r.cattax, 6);
    }

    #[test]
    fn test_topics_deduped_and_truncated() {
        let cat = catalog();
        let cfg = MapConfig { max_topics: 2, ..MapConfig::default() };
        let pool = vec![
            cand("GM", 1.0, Method::Override),
            cand("GM", 0.9, Method::Bm25),
            cand("AR", 0.5, Method::Bm25),
            cand("SP", 0.4, Method::Bm25),
        ];
        let r = assemble(&InputRecord::new(None, "bets"), decision(Outcome::Mapped, pool), &cat, &cfg);
        assert!(r.scd_flag);
        let ids: Vec<&str> = r.topics.iter().map(|t| t.target_id.as_str()).collect();
        assert_eq!(ids, vec!["GM", "AR"]);
    }

    #[test]
    fn test_invalid_row_shape() {
        let cat = catalog();
        let d = Decision::rejected(Outcome::Invalid, "label is empty after normalization");
        let r = assemble(&InputRecord::new(Some("1"), ""), d, &cat, &MapConfig::default());
        assert_eq!(r.method, Method::Invalid);
        assert_eq!(r.confidence, 0.0);
        assert!(r.topics.is_empty());
        assert_eq!(r.notes, "label is empty after normalization");
    }
}
