/// Deterministic lookups: exact code, normalized path/label equality, synonyms.
///
/// Each returns at most one candidate with confidence 1.0. When several nodes
/// share a normalized label or synonym, the first in catalog order wins and
/// the candidate carries an ambiguity note.

use super::{Candidate, MatchError, MatchQuery, Method};
use crate::catalog::Catalog;
use crate::normalize::{normalize_path, path_key};

fn first_eligible(query: &MatchQuery<'_>, catalog: &Catalog, hits: &[usize]) -> Option<(usize, usize)> {
    let eligible: Vec<usize> = hits.iter().copied().filter(|&i| query.eligible(catalog, i)).collect();
    eligible.first().map(|&i| (i, eligible.len()))
}

fn certain(catalog: &Catalog, idx: usize, method: Method) -> Candidate {
    let mut c = Candidate::new(catalog.node(idx).id.clone(), 1.0, 1.0, method);
    c.rank = 1;
    c
}

fn ambiguity_note(kind: &str, catalog: &Catalog, idx: usize, count: usize) -> String {
    format!(
        "ambiguous {}: {} nodes share it, chose {} (first in catalog order)",
        kind,
        count,
        catalog.node(idx).id
    )
}

/// Code lookup (node ids and crosswalked predecessor codes), then full-path
/// equality, then label equality.
pub fn exact_lookup(query: &MatchQuery<'_>, catalog: &Catalog) -> Result<Option<Candidate>, MatchError> {
    if let Some(code) = query.code.map(str::trim).filter(|c| !c.is_empty()) {
        if let Some(idx) = catalog.lookup_code(code) {
            if query.eligible(catalog, idx) {
                let mut c = certain(catalog, idx, Method::ExactCode);
                if catalog.node(idx).id != code {
                    c.note = Some(format!("crosswalk {} -> {}", code, catalog.node(idx).id));
                }
                return Ok(Some(c));
            }
        }
    }

    let segments = normalize_path(query.raw_label);
    if segments.len() > 1 {
        if let Some(idx) = catalog.lookup_path(&path_key(&segments)) {
            if query.eligible(catalog, idx) {
                return Ok(Some(certain(catalog, idx, Method::LabelMatch)));
            }
        }
    }

    Ok(first_eligible(query, catalog, catalog.lookup_label(query.label)).map(|(idx, count)| {
        let c = certain(catalog, idx, Method::LabelMatch);
        if count > 1 {
            c.with_note(ambiguity_note("label", catalog, idx, count))
        } else {
            c
        }
    }))
}

pub fn synonym_lookup(query: &MatchQuery<'_>, catalog: &Catalog) -> Result<Option<Candidate>, MatchError> {
    Ok(first_eligible(query, catalog, catalog.lookup_synonym(query.label)).map(|(idx, count)| {
        let c = certain(catalog, idx, Method::Synonym);
        if count > 1 {
            c.with_note(ambiguity_note("synonym", catalog, idx, count))
        } else {
            c
        }
    }))
}
