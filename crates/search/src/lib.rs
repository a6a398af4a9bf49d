//! docfill Search Library
//!
//! Per-source chunk collections with two retrieval modes and a fusion
//! engine that ranks results across many collections at once.

pub mod retrieval;

pub use retrieval::{
    create_backend, Chunk, ChunkKind, ChunkRecord, Collection, CollectionBackend, FusionEngine,
    MemoryBackend, PgBackend, RelativeScoreFusion, RetrievalMode, SearchQuery,
};
