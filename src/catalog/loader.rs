/// JSON catalog loading.
///
/// File formats:
/// - source: `[{"code": "1-4", "label": "Sports"}]`
/// - target: `[{"id": "483", "label": "Auto Racing", "path": ["Sports", "Auto Racing"],
///   "scd": false, "parent_id": "483", "source_codes": ["1-4"]}]`
/// - synonyms: `{"483": ["Motorsports", "NASCAR"]}`
///
/// Every failure here is fatal to mapper construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Catalog, NodeSpec, SourceCatalog};
use crate::config::CatalogConfig;
use crate::errors::MapperError;

#[derive(Deserialize)]
struct SourceEntry {
    #[serde(alias = "id")]
    code: Option<String>,
    #[serde(alias = "name")]
    label: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathField {
    Segments(Vec<String>),
    Text(String),
}

#[derive(Deserialize)]
struct TargetEntry {
    #[serde(alias = "code")]
    id: String,
    #[serde(alias = "name")]
    label: String,
    path: Option<PathField>,
    #[serde(alias = "is_scd", alias = "sensitive")]
    scd: Option<serde_json::Value>,
    parent_id: Option<String>,
    #[serde(default)]
    source_codes: Vec<String>,
}

/// Both taxonomy versions, fully validated.
#[derive(Debug)]
pub struct LoadedCatalogs {
    pub source: SourceCatalog,
    pub target: Catalog,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, MapperError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| MapperError::Catalog(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| MapperError::Catalog(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Loose boolean parsing: catalog exports use true/false, 1/0, "yes"/"no".
fn to_bool(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(serde_json::Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "y")
        }
        _ => false,
    }
}

/// Split a string path. " > " is the canonical separator, "|" the fallback;
/// "/" is left alone because labels such as "Celebrity Fan/Gossip" contain it.
fn split_path_text(text: &str) -> Vec<String> {
    let sep = if text.contains('>') {
        '>'
    } else if text.contains('|') {
        '|'
    } else {
        return vec![text.trim().to_string()];
    };
    text.split(sep).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

pub fn load_source_catalog(path: &Path, version: &str) -> Result<SourceCatalog, MapperError> {
    let entries: Vec<SourceEntry> = read_json(path)?;
    SourceCatalog::build(
        version,
        entries
            .into_iter()
            .map(|e| (e.code.unwrap_or_default(), e.label.unwrap_or_default()))
            .collect(),
    )
}

pub fn load_synonyms(path: &Path) -> Result<HashMap<String, Vec<String>>, MapperError> {
    read_json(path)
}

pub fn load_target_catalog(
    path: &Path,
    synonyms_path: Option<&Path>,
    version: &str,
) -> Result<Catalog, MapperError> {
    let entries: Vec<TargetEntry> = read_json(path)?;
    let specs: Vec<NodeSpec> = entries
        .into_iter()
        .map(|e| NodeSpec {
            path: match e.path {
                Some(PathField::Segments(segments)) => segments,
                Some(PathField::Text(text)) => split_path_text(&text),
                None => Vec::new(),
            },
            scd: to_bool(e.scd.as_ref()),
            id: e.id,
            label: e.label,
            parent_id: e.parent_id,
            source_codes: e.source_codes,
        })
        .collect();
    let synonyms = match synonyms_path {
        Some(p) => load_synonyms(p)?,
        None => HashMap::new(),
    };
    Catalog::build(version, specs, synonyms)
}

/// Resolve a catalog file name against `data_dir` (absolute names pass through).
pub fn data_path(data_dir: &Path, file: &str) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        data_dir.join(p)
    }
}

/// Load both catalogs named by the configuration.
pub fn load_catalogs(config: &CatalogConfig) -> Result<LoadedCatalogs, MapperError> {
    let data_dir = Path::new(&config.data_dir);
    let source_path = data_path(data_dir, &config.source_file);
    let source = if source_path.exists() {
        load_source_catalog(&source_path, &config.source_version)?
    } else {
        tracing::warn!(
            path = %source_path.display(),
            "Source catalog not found; unknown-code notes disabled"
        );
        SourceCatalog::empty(&config.source_version)
    };

    let synonyms_path = config.synonyms_file.as_deref().map(|f| data_path(data_dir, f));
    let target = load_target_catalog(
        &data_path(data_dir, &config.target_file),
        synonyms_path.as_deref(),
        &config.target_version,
    )?;

    tracing::info!(
        source_version = %source.version(),
        source_codes = source.len(),
        target_version = %target.version(),
        target_nodes = target.len(),
        "Catalogs loaded"
    );

    Ok(LoadedCatalogs { source, target })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_target_with_mixed_path_forms() {
        let dir = tempfile::tempdir().unwrap();
        let target = write(
            dir.path(),
            "t.json",
            r#"[
                {"id": "1", "label": "Sports", "path": ["Sports"], "scd": false},
                {"id": "2", "label": "Auto Racing", "path": "Sports > Auto Racing", "scd": "no"},
                {"id": "3", "label": "Celebrity Fan/Gossip", "scd": 1}
            ]"#,
        );
        let syn = write(dir.path(), "s.json", r#"{"2": ["Motorsports"]}"#);
        let cat = load_target_catalog(&target, Some(&syn), "3.0").unwrap();
        assert_eq!(cat.len(), 3);
        assert_eq!(cat.get("2").unwrap().parent_id.as_deref(), Some("1"));
        assert_eq!(cat.get("3").unwrap().path, vec!["Celebrity Fan/Gossip".to_string()]);
        assert!(cat.get("3").unwrap().scd_flag);
        assert!(!cat.get("2").unwrap().scd_flag);
    }

    #[test]
    fn test_corrupt_json_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let target = write(dir.path(), "t.json", r#"[{"id": "1", "label": "#);
        assert!(matches!(
            load_target_catalog(&target, None, "3.0"),
            Err(MapperError::Catalog(_))
        ));
    }

    #[test]
    fn test_missing_target_is_fatal() {
        let config = CatalogConfig {
            data_dir: "/nonexistent/taxomap".to_string(),
            ..CatalogConfig::default()
        };
        assert!(load_catalogs(&config).is_err());
    }

    #[test]
    fn test_load_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = write(
            dir.path(),
            "src.json",
            r#"[{"code": "1-17", "label": "Sports"}, {"code": "", "label": "Sports highlights"}]"#,
        );
        let source = load_source_catalog(&src, "2.x").unwrap();
        assert_eq!(source.label("1-17"), Some("Sports"));
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_split_path_text() {
        assert_eq!(split_path_text("A > B"), vec!["A", "B"]);
        assert_eq!(split_path_text("A|B"), vec!["A", "B"]);
        assert_eq!(split_path_text("Fan/Gossip"), vec!["Fan/Gossip"]);
    }
}
