//! Chunk/embed/index stage of the document pipeline.

pub mod chunking;
mod service;
pub mod types;

pub use chunking::TextSplitter;
pub use service::ChunkEmbedService;
pub use types::{ChunkEmbedOutcome, PipelineError};
