/// User-declared forced mappings.
///
/// Rules are evaluated before every matcher and win unconditionally.
/// Precedence among rules: exact code, then the longest matching code
/// prefix, then normalized label. Within a class the first rule in file
/// order wins.

use std::path::Path;

use serde::Deserialize;

use crate::catalog::Catalog;
use crate::errors::MapperError;
use crate::matching::{Candidate, Method};
use crate::normalize::{normalize, NormalizedText};

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePattern {
    Code(String),
    /// Hierarchical code prefix, written `1-4*` in the overrides file
    CodePrefix(String),
    Label(NormalizedText),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRule {
    pub pattern: SourcePattern,
    pub target_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    code: Option<String>,
    label: Option<String>,
    target_id: String,
}

/// Immutable rule set, validated against the target catalog.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    rules: Vec<OverrideRule>,
}

/// `1-4` matches prefix `1-4` and `1-4-2`, never `1-40`.
fn prefix_matches(prefix: &str, code: &str) -> bool {
    if !code.starts_with(prefix) {
        return false;
    }
    if code.len() == prefix.len() || prefix.ends_with(['-', '.', '/']) {
        return true;
    }
    matches!(code[prefix.len()..].chars().next(), Some('-' | '.' | '/'))
}

impl OverrideSet {
    pub fn empty() -> Self {
        OverrideSet::default()
    }

    /// Validate rules: every target must exist in `catalog`.
    pub fn new(rules: Vec<OverrideRule>, catalog: &Catalog) -> Result<Self, MapperError> {
        for rule in &rules {
            if catalog.get(&rule.target_id).is_none() {
                return Err(MapperError::Catalog(format!(
                    "Override {:?} targets unknown node id: {}",
                    rule.pattern, rule.target_id
                )));
            }
        }
        Ok(OverrideSet { rules })
    }

    pub fn load(path: &Path, catalog: &Catalog) -> Result<Self, MapperError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MapperError::Catalog(format!("Failed to read {}: {}", path.display(), e)))?;
        let entries: Vec<RuleEntry> = serde_json::from_str(&raw)
            .map_err(|e| MapperError::Catalog(format!("Failed to parse {}: {}", path.display(), e)))?;

        let mut rules = Vec::with_capacity(entries.len());
        for (row, entry) in entries.into_iter().enumerate() {
            let code = entry.code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
            let label = entry.label.map(|l| normalize(&l)).filter(|l| !l.is_empty());
            let pattern = match (code, label) {
                (Some(code), None) => match code.strip_suffix('*') {
                    Some(prefix) if !prefix.is_empty() => SourcePattern::CodePrefix(prefix.to_string()),
                    Some(_) => {
                        return Err(MapperError::Catalog(format!("Override row {}: bare '*' pattern", row)));
                    }
                    None => SourcePattern::Code(code),
                },
                (None, Some(label)) => SourcePattern::Label(label),
                _ => {
                    return Err(MapperError::Catalog(format!(
                        "Override row {}: exactly one of 'code' or 'label' is required",
                        row
                    )));
                }
            };
            rules.push(OverrideRule {
                pattern,
                target_id: entry.target_id.trim().to_string(),
            });
        }

        let set = OverrideSet::new(rules, catalog)?;
        tracing::info!(path = %path.display(), rules = set.len(), "Overrides loaded");
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the winning rule for a record.
    pub fn resolve(&self, code: Option<&str>, label: &NormalizedText) -> Option<Candidate> {
        let code = code.map(str::trim).filter(|c| !c.is_empty());

        let mut exact: Option<&OverrideRule> = None;
        let mut prefix: Option<(&OverrideRule, usize)> = None;
        let mut by_label: Option<&OverrideRule> = None;

        for rule in &self.rules {
            match (&rule.pattern, code) {
                (SourcePattern::Code(c), Some(code)) if c == code && exact.is_none() => exact = Some(rule),
                (SourcePattern::CodePrefix(p), Some(code)) if prefix_matches(p, code) => {
                    if prefix.map_or(true, |(_, len)| p.len() > len) {
                        prefix = Some((rule, p.len()));
                    }
                }
                (SourcePattern::Label(l), _) if l == label && by_label.is_none() => by_label = Some(rule),
                _ => {}
            }
        }

        let (rule, how) = exact
            .map(|r| (r, "code"))
            .or_else(|| prefix.map(|(r, _)| (r, "code prefix")))
            .or_else(|| by_label.map(|r| (r, "label")))?;

        let mut c = Candidate::new(rule.target_id.clone(), 1.0, 1.0, Method::Override)
            .with_note(format!("override by {}", how));
        c.rank = 1;
        Some(c)
    }
}
