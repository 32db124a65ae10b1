//! Qdrant vector store integration.

pub mod client;
pub mod point;
pub mod types;

pub use client::QdrantService;
pub use point::{build_point_payload, derive_point_id};
pub use types::{QdrantError, ScoredPoint, VectorPoint};
