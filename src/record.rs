/// Input rows and mapping results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::matching::Method;

/// Descriptive fields carried through mapping untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VectorAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// One row to map.
///
/// A missing `label` deserializes as empty and is reported as an invalid row
/// rather than failing the whole request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputRecord {
    /// Source-version category code (e.g. "1-4")
    #[serde(default)]
    pub code: Option<String>,
    /// Source-version label or path ("Sports > Auto Racing")
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub vector: VectorAttributes,
}

impl InputRecord {
    pub fn new(code: Option<&str>, label: &str) -> Self {
        InputRecord {
            code: code.map(str::to_string),
            label: label.to_string(),
            vector: VectorAttributes::default(),
        }
    }
}

/// Terminal state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Mapped,
    Unmapped,
    /// Rejected before matching (empty label)
    Invalid,
    /// Internal failure isolated to this row
    Error,
}

/// An alternative considered at the deciding stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub target_id: String,
    pub target_label: String,
    pub confidence: f64,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    pub source_code: Option<String>,
    pub source_label: String,
    /// Null unless `status` is `mapped`
    pub target_id: Option<String>,
    pub target_label: Option<String>,
    pub confidence: f64,
    pub method: Method,
    pub notes: String,
    pub llm_reranked: bool,
    pub scd_flag: bool,
    pub status: Outcome,
    pub topics: Vec<Topic>,
    /// Category codes for the output record (self, optionally ancestors first)
    pub categories: Vec<String>,
    /// " > " delimited path of the matched node
    pub category_path: Option<String>,
    /// AdCOM cattax numbering of `categories`
    pub cattax: u8,
    #[serde(flatten)]
    pub vector: VectorAttributes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_record_flattens_vector_attributes() {
        let r: InputRecord = serde_json::from_str(
            r#"{"code": "1-4", "label": "Sports", "channel": "ctv", "type": "video", "language": "en"}"#,
        )
        .unwrap();
        assert_eq!(r.code.as_deref(), Some("1-4"));
        assert_eq!(r.vector.channel.as_deref(), Some("ctv"));
        assert_eq!(r.vector.kind.as_deref(), Some("video"));
        assert_eq!(r.vector.format, None);
    }

    #[test]
    fn test_missing_label_is_empty_not_error() {
        let r: InputRecord = serde_json::from_str(r#"{"code": "1-4"}"#).unwrap();
        assert!(r.label.is_empty());
    }

    #[test]
    fn test_absent_attributes_not_serialized() {
        let json = serde_json::to_value(InputRecord::new(None, "News")).unwrap();
        assert!(json.get("channel").is_none());
        assert_eq!(json["label"], "News");
    }
}
