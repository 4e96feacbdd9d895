use rmcp::{
    ServerHandler,
    tool,
    model::{
        ServerCapabilities, Implementation, ProtocolVersion, CallToolResult,
        RawResource, ListResourcesResult, ReadResourceResult, ResourceContents,
        ReadResourceRequestParams, AnnotateAble,
    },
    handler::server::wrapper::Parameters,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::cascade::{Mapper, MapperResources};
use crate::catalog::Catalog;
use crate::config::{MapConfig, MapOptions};
use crate::errors::MapperError;
use crate::record::InputRecord;

/// Largest batch accepted by a single `map_rows` call.
const MAX_ROWS: usize = 10_000;

pub struct MappingService {
    resources: Arc<MapperResources>,
    base_config: MapConfig,
    start_time: Instant,
}

impl MappingService {
    pub fn new(resources: Arc<MapperResources>, base_config: MapConfig) -> Self {
        Self {
            resources,
            base_config,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct MapRowsParams {
    /// Source taxonomy version the rows are labeled with, e.g. "2.x" (optional, checked when given)
    pub source_version: Option<String>,
    /// Target taxonomy version to map into, e.g. "3.0" (optional, checked when given)
    pub target_version: Option<String>,
    /// Rows to map: each has "label" and optionally "code" plus vector attributes
    /// (channel, type, format, language, source, environment)
    pub rows: Vec<InputRecord>,
    /// Per-request overrides of the server's mapping configuration (optional)
    pub options: Option<MapOptions>,
}

// Helper: convert MapperError to CallToolResult with isError: true
fn mapper_error_to_result(err: MapperError) -> CallToolResult {
    match err {
        MapperError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        MapperError::Catalog(msg) => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("Catalog error: {}", msg),
                "hint": "Use catalog_info to see the loaded taxonomy versions"
            }))
        }
        other => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": other.to_string()
            }))
        }
    }
}

fn check_version(field: &str, requested: Option<&str>, loaded: &str) -> Result<(), MapperError> {
    match requested.map(str::trim) {
        Some(v) if !v.is_empty() && v != loaded => Err(MapperError::validation(
            field,
            &format!("{} '{}' is not loaded (server has '{}')", field, v, loaded),
        )),
        _ => Ok(()),
    }
}

// Tool implementations
#[rmcp::tool_router]
impl MappingService {
    #[tool(description = "Map rows labeled with the source taxonomy to the target taxonomy. Returns one result per row in input order, a summary (mapped/unmapped counts, unmapped audit) and a category projection.")]
    async fn map_rows(
        &self,
        Parameters(params): Parameters<MapRowsParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "map_rows",
            rows = params.rows.len(),
            has_options = params.options.is_some(),
            "Tool called"
        );

        if params.rows.is_empty() {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'rows' is required and cannot be empty",
                "field": "rows"
            })));
        }
        if params.rows.len() > MAX_ROWS {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("At most {} rows per call, got {}", MAX_ROWS, params.rows.len()),
                "field": "rows"
            })));
        }

        if let Err(e) = check_version(
            "source_version",
            params.source_version.as_deref(),
            self.resources.source().version(),
        )
        .and_then(|_| {
            check_version(
                "target_version",
                params.target_version.as_deref(),
                self.resources.catalog().version(),
            )
        }) {
            return Ok(mapper_error_to_result(e));
        }

        let config = match params.options.as_ref() {
            Some(options) => match self.base_config.with_options(options) {
                Ok(c) => c,
                Err(e) => return Ok(mapper_error_to_result(e)),
            },
            None => self.base_config.clone(),
        };
        let mapper = match Mapper::new(Arc::clone(&self.resources), config) {
            Ok(m) => m,
            Err(e) => return Ok(mapper_error_to_result(e)),
        };

        let response = mapper.map_batch(params.rows).await;
        match serde_json::to_value(&response) {
            Ok(value) => Ok(CallToolResult::structured(value)),
            Err(e) => Ok(mapper_error_to_result(MapperError::Internal(format!(
                "Failed to serialize batch response: {}",
                e
            )))),
        }
    }

    #[tool(description = "Describe the loaded source and target taxonomies, override rules and optional stages")]
    async fn catalog_info(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "catalog_info", "Tool called");

        let res = &self.resources;
        let catalog = res.catalog();
        let scd_nodes = catalog.nodes().iter().filter(|n| n.scd_flag).count();
        let roots = catalog.nodes().iter().filter(|n| n.parent_id.is_none()).count();

        Ok(CallToolResult::structured(json!({
            "source_version": res.source().version(),
            "source_codes": res.source().len(),
            "target_version": catalog.version(),
            "target_nodes": catalog.len(),
            "target_roots": roots,
            "scd_nodes": scd_nodes,
            "override_rules": res.overrides().len(),
            "embedding_model": res.semantic_model(),
            "rerank_model": res.reranker().map(|r| r.model_name()),
            "hint": "Read the taxomap://target-catalog resource for the full node list"
        })))
    }

    #[tool(description = "Check server health and status")]
    async fn health_check(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let res = &self.resources;
        let response = json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
            "semantic": match res.semantic_model() {
                Some(model) => json!({ "available": true, "model": model }),
                None => json!({ "available": false, "reason": res.semantic_error() }),
            },
            "rerank": match res.reranker() {
                Some(r) => json!({ "available": true, "model": r.model_name(), "endpoint": r.endpoint() }),
                None => json!({ "available": false }),
            },
        });

        Ok(CallToolResult::structured(response))
    }
}

// Helper: one line per node, "id | path | scd"
fn format_catalog_text(catalog: &Catalog) -> String {
    catalog
        .nodes()
        .iter()
        .map(|n| {
            format!(
                "{} | {}{}",
                n.id,
                n.path.join(" > "),
                if n.scd_flag { " | scd" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for MappingService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "taxomap".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Content taxonomy migration mapper with auditable, confidence-scored results".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Taxonomy mapping server. Tools: map_rows (map source-taxonomy rows to the target taxonomy), catalog_info, health_check. Resources: taxomap://target-catalog (target node list).".to_string()
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            meta: None,
            resources: vec![
                RawResource {
                    uri: "taxomap://target-catalog".to_string(),
                    name: "target-catalog".to_string(),
                    title: Some("Target Taxonomy".to_string()),
                    description: Some(format!(
                        "Nodes of target taxonomy {}",
                        self.resources.catalog().version()
                    )),
                    mime_type: Some("text/plain".to_string()),
                    size: None,
                    icons: None,
                    meta: None,
                }
                .no_annotation(),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        match request.uri.as_str() {
            "taxomap://target-catalog" => {
                let text = format_catalog_text(self.resources.catalog());
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(text, request.uri)],
                })
            }
            uri => Err(McpError::resource_not_found(
                format!("Resource not found: {}", uri),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_check() {
        assert!(check_version("target_version", None, "3.0").is_ok());
        assert!(check_version("target_version", Some(" 3.0 "), "3.0").is_ok());
        assert!(check_version("target_version", Some(""), "3.0").is_ok());
        let err = check_version("target_version", Some("3.1"), "3.0").unwrap_err();
        assert!(matches!(err, MapperError::Validation { field: Some(ref f), .. } if f == "target_version"));
    }
}
