use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taxomap::catalog::load_catalogs;
use taxomap::config::Config;
use taxomap::logging;
use taxomap::record::InputRecord;
use taxomap::server::MappingService;
use taxomap::{Mapper, MapperResources};
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "taxomap", version, about = "Content taxonomy migration mapper (MCP server)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Map a JSON array of rows and print the batch response
    Map {
        /// Input file: JSON array of {"code"?, "label", ...vector attributes}
        #[arg(long, short)]
        input: PathBuf,
        /// Write the response here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Load and validate the configured catalogs, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load and validate configuration; a bad value aborts startup
    let config = Config::load().context("Invalid taxomap configuration")?;

    // 3. Initialize logging FIRST (before any other output)
    // CRITICAL: logging goes to stderr only, stdout is reserved for JSON-RPC
    logging::init_logging(&config);

    match cli.command {
        Some(Commands::Check) => {
            let catalogs = load_catalogs(&config.catalog)?;
            println!(
                "Source {}: {} codes. Target {}: {} nodes.",
                catalogs.source.version(),
                catalogs.source.len(),
                catalogs.target.version(),
                catalogs.target.len()
            );
            return Ok(());
        }

        Some(Commands::Map { input, output }) => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let rows: Vec<InputRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of rows", input.display()))?;

            let resources = Arc::new(MapperResources::from_config(&config).await?);
            let mapper = Mapper::new(resources, config.mapping.clone())?;
            let response = mapper.map_batch(rows).await;
            let json = serde_json::to_string_pretty(&response)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Batch response written");
                }
                None => println!("{}", json),
            }
            return Ok(());
        }

        None => {
            // Default: start the MCP server
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "taxomap server starting"
            );

            // 4. Build the shared mapping context: catalogs, overrides, optional oracles.
            // Catalog failures are fatal; no request is served against a partial catalog.
            let resources = Arc::new(MapperResources::from_config(&config).await?);

            let service = MappingService::new(resources, config.mapping.clone());

            // 5. Serve via stdio transport
            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("taxomap server running, awaiting tool calls via stdio");

            // 6. Wait for shutdown (client disconnects or signal)
            server.waiting().await?;

            tracing::info!("taxomap server stopped");
        }
    }

    Ok(())
}
