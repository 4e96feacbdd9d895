/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: taxomap.toml (in working directory)
/// 3. Environment variables: prefixed TAXOMAP_, "__" separates sections
///    (e.g., TAXOMAP_LOG_LEVEL=debug, TAXOMAP_MAPPING__FUZZY_CUT=0.85)

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::errors::MapperError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub mapping: MapConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub rerank: RerankConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            catalog: CatalogConfig::default(),
            mapping: MapConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: TAXOMAP_MAPPING__FUZZY_METHOD=bm25 overrides mapping.fuzzy_method in taxomap.toml
    pub fn load() -> Result<Config, MapperError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("taxomap.toml"))
            .merge(Env::prefixed("TAXOMAP_").split("__"))
            .extract()
            .map_err(|e| MapperError::Config(format!("Failed to load config: {}", e)))?;
        config.mapping.validate()?;
        Ok(config)
    }
}

/// Where the taxonomy catalogs live and which versions they represent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub data_dir: String,
    /// Predecessor taxonomy: [{"code", "label"}]
    pub source_file: String,
    /// Successor taxonomy: [{"id", "label", "path", "scd", ...}]
    pub target_file: String,
    pub synonyms_file: Option<String>,
    pub overrides_file: Option<String>,
    pub source_version: String,
    pub target_version: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            data_dir: "data".to_string(),
            source_file: "iab_2x.json".to_string(),
            target_file: "iab_3x.json".to_string(),
            synonyms_file: Some("synonyms_3x.json".to_string()),
            overrides_file: None,
            source_version: "2.x".to_string(),
            target_version: "3.0".to_string(),
        }
    }
}

/// Embedding oracle settings. The model itself is named by `mapping.embedding_model_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "local" (fastembed, no API key) or "openai"
    pub provider: String,
    /// fastembed model weight cache
    pub cache_dir: String,
    pub openai_api_key: Option<String>,
    /// Labels per embedding call when precomputing the catalog index
    pub batch_size: usize,
    /// Maximum embedding batches in flight at once
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join("taxomap").join("fastembed"))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".fastembed_cache".to_string());
        EmbeddingConfig {
            provider: "local".to_string(),
            cache_dir,
            openai_api_key: None,
            batch_size: 64,
            concurrency: 2,
        }
    }
}

/// Re-rank oracle settings. Model and endpoint are `mapping.rerank_model` / `mapping.rerank_endpoint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// "ollama" (default, no API key) or "openai" (any OpenAI-compatible endpoint)
    pub provider: String,
    /// Upper bound on a single re-rank call; on expiry the cascade keeps its original order
    pub timeout_ms: u64,
    pub openai_api_key: Option<String>,
    /// Maximum candidates sent to the oracle
    pub candidate_limit: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        RerankConfig {
            provider: "ollama".to_string(),
            timeout_ms: 8000,
            openai_api_key: None,
            candidate_limit: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping options
// ---------------------------------------------------------------------------

/// String-similarity backend used by the fuzzy stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FuzzyMethod {
    #[serde(alias = "rapidfuzz", alias = "edit_distance")]
    EditDistance,
    Bm25,
    Tfidf,
    Hybrid,
}

/// Names accepted in `enabled_methods`.
///
/// `exact` covers both code lookup and label/path equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MethodName {
    Exact,
    Synonym,
    #[serde(alias = "rapidfuzz", alias = "edit_distance")]
    EditDistance,
    Bm25,
    Tfidf,
}

impl MethodName {
    pub fn is_fuzzy(self) -> bool {
        matches!(self, MethodName::EditDistance | MethodName::Bm25 | MethodName::Tfidf)
    }
}

/// AdCOM `cattax` values: which taxonomy numbering the output category codes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "u8", into = "u8")]
#[schemars(with = "u8")]
pub enum CategoryTaxonomy {
    Content1_0,
    Content2_0,
    AdProduct1_0,
    Audience1_1,
    Content2_1,
    Content2_2,
    Content3_0,
    AdProduct2_0,
}

impl CategoryTaxonomy {
    pub fn tag(self) -> u8 {
        match self {
            CategoryTaxonomy::Content1_0 => 1,
            CategoryTaxonomy::Content2_0 => 2,
            CategoryTaxonomy::AdProduct1_0 => 3,
            CategoryTaxonomy::Audience1_1 => 4,
            CategoryTaxonomy::Content2_1 => 5,
            CategoryTaxonomy::Content2_2 => 6,
            CategoryTaxonomy::Content3_0 => 7,
            CategoryTaxonomy::AdProduct2_0 => 8,
        }
    }
}

impl TryFrom<u8> for CategoryTaxonomy {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(CategoryTaxonomy::Content1_0),
            2 => Ok(CategoryTaxonomy::Content2_0),
            3 => Ok(CategoryTaxonomy::AdProduct1_0),
            4 => Ok(CategoryTaxonomy::Audience1_1),
            5 => Ok(CategoryTaxonomy::Content2_1),
            6 => Ok(CategoryTaxonomy::Content2_2),
            7 => Ok(CategoryTaxonomy::Content3_0),
            8 => Ok(CategoryTaxonomy::AdProduct2_0),
            other => Err(format!("Unknown category taxonomy flag: {} (expected 1-8)", other)),
        }
    }
}

impl From<CategoryTaxonomy> for u8 {
    fn from(c: CategoryTaxonomy) -> u8 {
        c.tag()
    }
}

impl fmt::Display for CategoryTaxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Validated mapping options. Construct via defaults/figment, then call `validate()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    pub fuzzy_method: FuzzyMethod,
    /// Minimum normalized fuzzy score to accept outright
    pub fuzzy_cut: f64,
    pub use_embeddings: bool,
    pub embedding_model_id: String,
    /// Minimum cosine similarity to accept a semantic candidate outright
    pub embedding_cut: f64,
    pub use_rerank: bool,
    pub rerank_model: String,
    pub rerank_endpoint: String,
    /// Alternatives carried on each result
    pub max_topics: usize,
    pub enabled_methods: Vec<MethodName>,
    pub category_taxonomy_flag: CategoryTaxonomy,
    /// Global cutoff: applied after re-ranking and for summary threshold counts
    pub confidence_min: f64,
    /// Exclude sensitive-content nodes from automatic matching
    pub drop_scd: bool,
    /// Expand category codes with the matched node's ancestors
    pub include_ancestors: bool,
    /// Records mapped concurrently within one batch
    pub batch_concurrency: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            fuzzy_method: FuzzyMethod::EditDistance,
            fuzzy_cut: 0.92,
            use_embeddings: false,
            embedding_model_id: "all-MiniLM-L6-v2".to_string(),
            embedding_cut: 0.80,
            use_rerank: false,
            rerank_model: "llama3.1:8b".to_string(),
            rerank_endpoint: "http://localhost:11434".to_string(),
            max_topics: 3,
            enabled_methods: vec![
                MethodName::Exact,
                MethodName::Synonym,
                MethodName::EditDistance,
                MethodName::Bm25,
                MethodName::Tfidf,
            ],
            category_taxonomy_flag: CategoryTaxonomy::Content3_0,
            confidence_min: 0.7,
            drop_scd: false,
            include_ancestors: false,
            batch_concurrency: 8,
        }
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), MapperError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(MapperError::validation(
            field,
            &format!("{} must be within [0, 1], got {}", field, value),
        ));
    }
    Ok(())
}

impl MapConfig {
    /// Reject out-of-range or contradictory options before any mapping happens.
    pub fn validate(&self) -> Result<(), MapperError> {
        check_unit("fuzzy_cut", self.fuzzy_cut)?;
        check_unit("embedding_cut", self.embedding_cut)?;
        check_unit("confidence_min", self.confidence_min)?;

        if self.max_topics < 1 {
            return Err(MapperError::validation("max_topics", "max_topics must be at least 1"));
        }
        if self.batch_concurrency < 1 {
            return Err(MapperError::validation(
                "batch_concurrency",
                "batch_concurrency must be at least 1",
            ));
        }
        if self.enabled_methods.is_empty() {
            return Err(MapperError::validation(
                "enabled_methods",
                "enabled_methods cannot be empty",
            ));
        }
        for (i, m) in self.enabled_methods.iter().enumerate() {
            if self.enabled_methods[..i].contains(m) {
                return Err(MapperError::validation(
                    "enabled_methods",
                    &format!("enabled_methods lists {:?} more than once", m),
                ));
            }
        }
        if self.fuzzy_method == FuzzyMethod::Hybrid && self.fuzzy_backends().is_empty() {
            return Err(MapperError::validation(
                "enabled_methods",
                "hybrid fuzzy_method requires at least one of edit-distance, bm25, tfidf in enabled_methods",
            ));
        }
        if self.use_embeddings && self.embedding_model_id.trim().is_empty() {
            return Err(MapperError::validation(
                "embedding_model_id",
                "embedding_model_id is required when use_embeddings is true",
            ));
        }
        if self.use_rerank {
            if self.rerank_model.trim().is_empty() {
                return Err(MapperError::validation(
                    "rerank_model",
                    "rerank_model is required when use_rerank is true",
                ));
            }
            if self.rerank_endpoint.trim().is_empty() {
                return Err(MapperError::validation(
                    "rerank_endpoint",
                    "rerank_endpoint is required when use_rerank is true",
                ));
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self, method: MethodName) -> bool {
        self.enabled_methods.contains(&method)
    }

    /// Backends the fuzzy stage runs, in configured order.
    ///
    /// Hybrid runs every enabled fuzzy backend; a single method runs only if enabled.
    pub fn fuzzy_backends(&self) -> Vec<MethodName> {
        match self.fuzzy_method {
            FuzzyMethod::Hybrid => self
                .enabled_methods
                .iter()
                .copied()
                .filter(|m| m.is_fuzzy())
                .collect(),
            single => {
                let name = match single {
                    FuzzyMethod::EditDistance => MethodName::EditDistance,
                    FuzzyMethod::Bm25 => MethodName::Bm25,
                    _ => MethodName::Tfidf,
                };
                if self.is_enabled(name) {
                    vec![name]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Apply per-request options on top of this configuration and validate the result.
    pub fn with_options(&self, options: &MapOptions) -> Result<MapConfig, MapperError> {
        let mut cfg = self.clone();
        if let Some(v) = options.fuzzy_method {
            cfg.fuzzy_method = v;
        }
        if let Some(v) = options.fuzzy_cut {
            cfg.fuzzy_cut = v;
        }
        if let Some(v) = options.use_embeddings {
            cfg.use_embeddings = v;
        }
        if let Some(ref v) = options.embedding_model_id {
            cfg.embedding_model_id = v.clone();
        }
        if let Some(v) = options.embedding_cut {
            cfg.embedding_cut = v;
        }
        if let Some(v) = options.use_rerank {
            cfg.use_rerank = v;
        }
        if let Some(ref v) = options.rerank_model {
            cfg.rerank_model = v.clone();
        }
        if let Some(ref v) = options.rerank_endpoint {
            cfg.rerank_endpoint = v.clone();
        }
        if let Some(v) = options.max_topics {
            cfg.max_topics = v;
        }
        if let Some(ref v) = options.enabled_methods {
            cfg.enabled_methods = v.clone();
        }
        if let Some(v) = options.category_taxonomy_flag {
            cfg.category_taxonomy_flag = v;
        }
        if let Some(v) = options.confidence_min {
            cfg.confidence_min = v;
        }
        if let Some(v) = options.drop_scd {
            cfg.drop_scd = v;
        }
        if let Some(v) = options.include_ancestors {
            cfg.include_ancestors = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Per-request overrides of `MapConfig`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MapOptions {
    /// edit-distance | bm25 | tfidf | hybrid
    pub fuzzy_method: Option<FuzzyMethod>,
    /// Fuzzy acceptance cutoff in [0, 1]
    pub fuzzy_cut: Option<f64>,
    pub use_embeddings: Option<bool>,
    pub embedding_model_id: Option<String>,
    /// Semantic acceptance cutoff in [0, 1]
    pub embedding_cut: Option<f64>,
    pub use_rerank: Option<bool>,
    pub rerank_model: Option<String>,
    pub rerank_endpoint: Option<String>,
    /// Alternatives returned per row (>= 1)
    pub max_topics: Option<usize>,
    /// Ordered subset of: exact, synonym, edit-distance, bm25, tfidf
    pub enabled_methods: Option<Vec<MethodName>>,
    /// AdCOM cattax value (1-8)
    pub category_taxonomy_flag: Option<CategoryTaxonomy>,
    /// Global cutoff in [0, 1]
    pub confidence_min: Option<f64>,
    pub drop_scd: Option<bool>,
    pub include_ancestors: Option<bool>,
}
