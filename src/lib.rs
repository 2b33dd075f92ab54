pub mod api;
pub mod config;
pub mod context;
pub mod database;
pub mod document;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod providers;
pub mod telemetry;

// Re-export commonly used items
pub use config::{AppConfig, Args};
pub use context::RagContext;
pub use error::RagError;
pub use llm::Pipeline;
