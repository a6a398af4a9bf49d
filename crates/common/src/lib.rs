//! docfill Common Library
//!
//! Shared code for the docfill crates including:
//! - Error types and handling
//! - Configuration management
//! - Task model, task store and progress event bus
//! - Structured document model and codecs
//! - Embedding and generation client abstractions
//! - Source catalog
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod document;
pub mod embeddings;
pub mod errors;
pub mod events;
pub mod generation;
pub mod metrics;
pub mod models;
pub mod sources;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use events::{EventBus, TaskEvent};
pub use generation::{Generator, ImageInput};
pub use models::{FileResult, FileStatus, Task, TaskStatus};
pub use store::TaskStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
