pub mod assemble;
pub mod batch;
pub mod cascade;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod logging;
pub mod matching;
pub mod normalize;
pub mod overrides;
pub mod record;
pub mod rerank;
pub mod server;

pub use batch::{BatchResponse, BatchSummary, Projection};
pub use cascade::{Mapper, MapperResources};
pub use config::{Config, MapConfig, MapOptions};
pub use errors::MapperError;
pub use record::{InputRecord, MappingResult, Outcome};
