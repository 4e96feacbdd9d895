/// Text canonicalization shared by every matcher.
///
/// Lower-cases, trims, collapses whitespace and strips punctuation.
/// Hyphens between alphanumerics survive (codes like "1-4", words like "off-road"),
/// "&" is spelled out so "Food & Drink" and "food and drink" compare equal.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Hierarchy separators accepted in free-text paths ("Sports > Auto Racing", "Sports/Auto Racing").
static PATH_SEPARATOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s*(?:>|/|\\|\|)\s*").ok());

/// Output of `normalize`. Only constructible through normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Word tokens; hyphenated words split into their parts.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0
            .split(|c: char| c == ' ' || c == '-')
            .filter(|t| !t.is_empty())
    }

    /// Tokens sorted and re-joined. Used for order-insensitive edit distance.
    pub fn token_sorted(&self) -> String {
        let mut tokens: Vec<&str> = self.tokens().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a label for comparison. Pure and deterministic.
pub fn normalize(text: &str) -> NormalizedText {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if c == '-' {
            let prev_ok = i > 0 && chars[i - 1].is_alphanumeric();
            let next_ok = chars.get(i + 1).is_some_and(|n| n.is_alphanumeric());
            out.push(if prev_ok && next_ok { '-' } else { ' ' });
        } else if c == '&' {
            out.push_str(" and ");
        } else if c == '\'' || c == '\u{2019}' {
            // "children's" -> "childrens"
        } else {
            out.push(' ');
        }
    }

    NormalizedText(out.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Split a free-text hierarchical path and normalize each segment.
///
/// Returns a single segment when the text carries no separator.
pub fn normalize_path(text: &str) -> Vec<NormalizedText> {
    let segments: Vec<&str> = match PATH_SEPARATOR.as_ref() {
        Some(re) => re.split(text).collect(),
        None => vec![text],
    };
    segments
        .into_iter()
        .map(normalize)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Join normalized path segments into the canonical key used by the label index.
pub fn path_key<'a, I>(segments: I) -> String
where
    I: IntoIterator<Item = &'a NormalizedText>,
{
    segments
        .into_iter()
        .map(NormalizedText::as_str)
        .collect::<Vec<_>>()
        .join(" > ")
}
