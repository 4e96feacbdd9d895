/// Catalog store: both taxonomy versions as indexed, immutable arenas.
///
/// Nodes live in a Vec and refer to each other by id; parent/child links are
/// plain fields, never owning references. Every index is built once in
/// `Catalog::build` and never mutated afterwards, so a `Catalog` can be shared
/// across concurrent mapping calls behind an `Arc`.

pub mod loader;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::errors::MapperError;
use crate::normalize::{normalize, path_key, NormalizedText};

pub use loader::{data_path, load_catalogs, load_source_catalog, load_target_catalog, LoadedCatalogs};

/// One category entry in one taxonomy version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: String,
    pub label: String,
    /// Ancestor-to-self labels
    pub path: Vec<String>,
    pub parent_id: Option<String>,
    pub children_ids: BTreeSet<String>,
    pub scd_flag: bool,
    pub synonyms: BTreeSet<String>,
    /// Predecessor codes that map to this node exactly (crosswalk)
    pub source_codes: Vec<String>,
}

/// Raw node definition, as read from a catalog file.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub id: String,
    pub label: String,
    pub path: Vec<String>,
    pub parent_id: Option<String>,
    pub scd: bool,
    pub source_codes: Vec<String>,
}

/// Normalized forms computed once per node.
#[derive(Debug, Clone)]
struct NodeText {
    label: NormalizedText,
    path: String,
}

/// The successor taxonomy, indexed for every matcher.
#[derive(Debug)]
pub struct Catalog {
    version: String,
    nodes: Vec<TaxonomyNode>,
    text: Vec<NodeText>,
    ids: HashMap<String, usize>,
    codes: HashMap<String, usize>,
    labels: HashMap<NormalizedText, Vec<usize>>,
    paths: HashMap<String, usize>,
    synonyms: HashMap<NormalizedText, Vec<usize>>,
}

impl Catalog {
    /// Build and validate a catalog. Any inconsistency is fatal: a partially
    /// valid catalog is never returned.
    pub fn build(
        version: &str,
        specs: Vec<NodeSpec>,
        synonyms: HashMap<String, Vec<String>>,
    ) -> Result<Catalog, MapperError> {
        if specs.is_empty() {
            return Err(MapperError::Catalog(format!("Catalog {} has no nodes", version)));
        }

        let mut nodes: Vec<TaxonomyNode> = Vec::with_capacity(specs.len());
        let mut ids: HashMap<String, usize> = HashMap::with_capacity(specs.len());
        let mut by_path: HashMap<Vec<String>, usize> = HashMap::with_capacity(specs.len());

        for (row, spec) in specs.into_iter().enumerate() {
            let id = spec.id.trim().to_string();
            let label = spec.label.trim().to_string();
            if id.is_empty() {
                return Err(MapperError::Catalog(format!("Row {}: node id is empty", row)));
            }
            if label.is_empty() {
                return Err(MapperError::Catalog(format!("Node {}: label is empty", id)));
            }
            if ids.contains_key(&id) {
                return Err(MapperError::Catalog(format!("Duplicate node id: {}", id)));
            }

            let mut path: Vec<String> = spec
                .path
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if path.is_empty() {
                path.push(label.clone());
            }
            if path.last() != Some(&label) {
                return Err(MapperError::Catalog(format!(
                    "Node {}: path {:?} does not end with its label '{}'",
                    id, path, label
                )));
            }

            let idx = nodes.len();
            ids.insert(id.clone(), idx);
            by_path.entry(path.clone()).or_insert(idx);
            nodes.push(TaxonomyNode {
                id,
                label,
                path,
                parent_id: spec.parent_id.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
                children_ids: BTreeSet::new(),
                scd_flag: spec.scd,
                synonyms: BTreeSet::new(),
                source_codes: spec
                    .source_codes
                    .iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
            });
        }

        // Resolve parents: explicit parent_id first, otherwise infer from the path prefix.
        for idx in 0..nodes.len() {
            let parent_idx = match nodes[idx].parent_id.clone() {
                Some(pid) => Some(*ids.get(&pid).ok_or_else(|| {
                    MapperError::Catalog(format!(
                        "Node {}: parent {} does not exist",
                        nodes[idx].id, pid
                    ))
                })?),
                None if nodes[idx].path.len() > 1 => {
                    let prefix = &nodes[idx].path[..nodes[idx].path.len() - 1];
                    Some(*by_path.get(prefix).ok_or_else(|| {
                        MapperError::Catalog(format!(
                            "Node {}: no node with parent path {:?}",
                            nodes[idx].id, prefix
                        ))
                    })?)
                }
                None => None,
            };

            if let Some(p) = parent_idx {
                if p == idx {
                    return Err(MapperError::Catalog(format!(
                        "Node {} is its own parent",
                        nodes[idx].id
                    )));
                }
                let mut expected = nodes[p].path.clone();
                expected.push(nodes[idx].label.clone());
                if expected != nodes[idx].path {
                    return Err(MapperError::Catalog(format!(
                        "Node {}: path {:?} is not parent path {:?} plus its label",
                        nodes[idx].id, nodes[idx].path, nodes[p].path
                    )));
                }
                let child_id = nodes[idx].id.clone();
                let parent_id = nodes[p].id.clone();
                nodes[p].children_ids.insert(child_id);
                nodes[idx].parent_id = Some(parent_id);
            }
        }

        let mut codes: HashMap<String, usize> = ids.clone();
        for (idx, node) in nodes.iter().enumerate() {
            for code in &node.source_codes {
                match codes.get(code) {
                    Some(&other) if other != idx => {
                        return Err(MapperError::Catalog(format!(
                            "Source code {} maps to both {} and {}",
                            code, nodes[other].id, node.id
                        )));
                    }
                    _ => {
                        codes.insert(code.clone(), idx);
                    }
                }
            }
        }

        let text: Vec<NodeText> = nodes
            .iter()
            .map(|n| {
                let segments: Vec<NormalizedText> = n.path.iter().map(|p| normalize(p)).collect();
                NodeText {
                    label: normalize(&n.label),
                    path: path_key(&segments),
                }
            })
            .collect();

        let mut labels: HashMap<NormalizedText, Vec<usize>> = HashMap::new();
        let mut paths: HashMap<String, usize> = HashMap::new();
        for (idx, t) in text.iter().enumerate() {
            labels.entry(t.label.clone()).or_default().push(idx);
            paths.entry(t.path.clone()).or_insert(idx);
        }

        // Sorted for a deterministic index regardless of map iteration order.
        let mut synonym_ids: Vec<(String, Vec<String>)> = synonyms.into_iter().collect();
        synonym_ids.sort_by(|a, b| a.0.cmp(&b.0));
        let mut synonym_index: HashMap<NormalizedText, Vec<usize>> = HashMap::new();
        for (id, aliases) in synonym_ids {
            let idx = *ids.get(id.trim()).ok_or_else(|| {
                MapperError::Catalog(format!("Synonyms reference unknown node id: {}", id))
            })?;
            for alias in aliases {
                let norm = normalize(&alias);
                if norm.is_empty() {
                    continue;
                }
                nodes[idx].synonyms.insert(alias.trim().to_string());
                let entry = synonym_index.entry(norm).or_default();
                if !entry.contains(&idx) {
                    entry.push(idx);
                }
            }
        }
        for list in synonym_index.values_mut() {
            list.sort_unstable();
        }

        Ok(Catalog {
            version: version.to_string(),
            nodes,
            text,
            ids,
            codes,
            labels,
            paths,
            synonyms: synonym_index,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TaxonomyNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &TaxonomyNode {
        &self.nodes[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&TaxonomyNode> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    /// Exact lookup of a node id or crosswalked predecessor code.
    pub fn lookup_code(&self, code: &str) -> Option<usize> {
        self.codes.get(code).copied()
    }

    /// Nodes whose normalized label equals `label`, in catalog order.
    pub fn lookup_label(&self, label: &NormalizedText) -> &[usize] {
        self.labels.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Node whose normalized full path equals `key` (segments joined with " > ").
    pub fn lookup_path(&self, key: &str) -> Option<usize> {
        self.paths.get(key).copied()
    }

    /// Nodes declaring `alias` as a synonym, in catalog order.
    pub fn lookup_synonym(&self, alias: &NormalizedText) -> &[usize] {
        self.synonyms.get(alias).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn normalized_label(&self, idx: usize) -> &NormalizedText {
        &self.text[idx].label
    }

    pub fn normalized_path(&self, idx: usize) -> &str {
        &self.text[idx].path
    }

    /// Ancestor indices, root first, excluding the node itself.
    pub fn ancestors(&self, idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = self.nodes[idx].parent_id.as_deref();
        while let Some(pid) = current {
            match self.ids.get(pid) {
                Some(&p) => {
                    chain.push(p);
                    current = self.nodes[p].parent_id.as_deref();
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Rebuild a node's path from its ancestor chain.
    pub fn reconstruct_path(&self, idx: usize) -> Vec<String> {
        self.ancestors(idx)
            .into_iter()
            .chain(std::iter::once(idx))
            .map(|i| self.nodes[i].label.clone())
            .collect()
    }
}

/// The predecessor taxonomy: code -> label, kept for provenance notes.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    version: String,
    labels: HashMap<String, String>,
}

impl SourceCatalog {
    pub fn build(version: &str, entries: Vec<(String, String)>) -> Result<SourceCatalog, MapperError> {
        let mut labels = HashMap::with_capacity(entries.len());
        for (code, label) in entries {
            let code = code.trim().to_string();
            let label = label.trim().to_string();
            // Free-text sample rows carry no code; they are not catalog entries.
            if code.is_empty() || label.is_empty() {
                continue;
            }
            if labels.insert(code.clone(), label).is_some() {
                return Err(MapperError::Catalog(format!("Duplicate source code: {}", code)));
            }
        }
        Ok(SourceCatalog {
            version: version.to_string(),
            labels,
        })
    }

    pub fn empty(version: &str) -> SourceCatalog {
        SourceCatalog {
            version: version.to_string(),
            labels: HashMap::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, code: &str) -> Option<&str> {
        self.labels.get(code).map(String::as_str)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn spec(id: &str, path: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            label: path.last().map(|s| s.to_string()).unwrap_or_default(),
            path: path.iter().map(|s| s.to_string()).collect(),
            ..NodeSpec::default()
        }
    }

    fn sample() -> Catalog {
        let mut racing = spec("3x:AB1", &["Sports", "Auto Racing"]);
        racing.source_codes = vec!["1-4".to_string()];
        let mut gambling = spec("3x:GM1", &["Gambling"]);
        gambling.scd = true;
        let mut syn = HashMap::new();
        syn.insert("3x:AB1".to_string(), vec!["Motorsports".to_string(), "NASCAR".to_string()]);
        Catalog::build(
            "3.0",
            vec![
                racing,
                spec("3x:SP", &["Sports"]),
                spec("3x:AB2", &["Sports", "Auto Racing", "Formula One"]),
                gambling,
            ],
            syn,
        )
        .unwrap()
    }

    #[test]
    fn test_parent_inferred_from_path_regardless_of_order() {
        let cat = sample();
        let racing = cat.get("3x:AB1").unwrap();
        assert_eq!(racing.parent_id.as_deref(), Some("3x:SP"));
        assert!(cat.get("3x:SP").unwrap().children_ids.contains("3x:AB1"));
        assert_eq!(cat.get("3x:AB2").unwrap().parent_id.as_deref(), Some("3x:AB1"));
    }

    #[test]
    fn test_path_round_trip() {
        let cat = sample();
        for idx in 0..cat.len() {
            assert_eq!(cat.reconstruct_path(idx), cat.node(idx).path);
        }
    }

    #[test]
    fn test_code_index_includes_crosswalk() {
        let cat = sample();
        let ab1 = cat.index_of("3x:AB1");
        assert_eq!(cat.lookup_code("3x:AB1"), ab1);
        assert_eq!(cat.lookup_code("1-4"), ab1);
        assert_eq!(cat.lookup_code("1-5"), None);
    }

    #[test]
    fn test_label_path_and_synonym_indexes() {
        let cat = sample();
        let ab1 = cat.index_of("3x:AB1").unwrap();
        assert_eq!(cat.lookup_label(&normalize("AUTO racing")), &[ab1]);
        assert_eq!(cat.lookup_path("sports > auto racing"), Some(ab1));
        assert_eq!(cat.lookup_synonym(&normalize("nascar")), &[ab1]);
        assert!(cat.node(ab1).synonyms.contains("Motorsports"));
        assert!(cat.get("3x:GM1").unwrap().scd_flag);
    }

    #[test]
    fn test_ancestors_root_first() {
        let cat = sample();
        let f1 = cat.index_of("3x:AB2").unwrap();
        let chain: Vec<&str> = cat.ancestors(f1).into_iter().map(|i| cat.node(i).id.as_str()).collect();
        assert_eq!(chain, vec!["3x:SP", "3x:AB1"]);
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let err = Catalog::build(
            "3.0",
            vec![spec("A", &["Sports"]), spec("A", &["News"])],
            HashMap::new(),
        );
        assert!(matches!(err, Err(MapperError::Catalog(_))));
    }

    #[test]
    fn test_missing_parent_is_fatal() {
        let err = Catalog::build("3.0", vec![spec("B", &["Sports", "Golf"])], HashMap::new());
        assert!(matches!(err, Err(MapperError::Catalog(_))));
    }

    #[test]
    fn test_inconsistent_explicit_parent_is_fatal() {
        let mut golf = spec("B", &["Sports", "Golf"]);
        golf.parent_id = Some("N".to_string());
        let err = Catalog::build(
            "3.0",
            vec![spec("S", &["Sports"]), spec("N", &["News"]), golf],
            HashMap::new(),
        );
        assert!(matches!(err, Err(MapperError::Catalog(_))));
    }

    #[test]
    fn test_path_must_end_with_label() {
        let mut bad = spec("A", &["Sports"]);
        bad.label = "News".to_string();
        assert!(Catalog::build("3.0", vec![bad], HashMap::new()).is_err());
    }

    #[test]
    fn test_unknown_synonym_target_is_fatal() {
        let mut syn = HashMap::new();
        syn.insert("nope".to_string(), vec!["x".to_string()]);
        assert!(Catalog::build("3.0", vec![spec("A", &["Sports"])], syn).is_err());
    }

    #[test]
    fn test_conflicting_crosswalk_is_fatal() {
        let mut a = spec("A", &["Sports"]);
        a.source_codes = vec!["1-1".to_string()];
        let mut b = spec("B", &["News"]);
        b.source_codes = vec!["1-1".to_string()];
        assert!(Catalog::build("3.0", vec![a, b], HashMap::new()).is_err());
    }

    #[test]
    fn test_empty_catalog_is_fatal() {
        assert!(Catalog::build("3.0", Vec::new(), HashMap::new()).is_err());
    }

    #[test]
    fn test_source_catalog_skips_free_text_rows() {
        let src = SourceCatalog::build(
            "2.x",
            vec![
                ("1-1".to_string(), "Arts & Entertainment".to_string()),
                ("".to_string(), "Cooking how-to videos".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(src.len(), 1);
        assert_eq!(src.label("1-1"), Some("Arts & Entertainment"));
    }
}
