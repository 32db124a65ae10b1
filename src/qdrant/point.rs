//! Point identifier derivation and payload construction.

use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store::ChunkRecord;

/// Derive a Qdrant-compatible point identifier from a chunk id.
///
/// Chunk ids that already parse as UUIDs are used verbatim. Anything else is mapped to a
/// UUID built from the first 16 bytes of the chunk id's SHA-256 digest, so the same chunk
/// always resolves to the same point and retries overwrite instead of duplicating.
pub fn derive_point_id(chunk_id: &str) -> String {
    if let Ok(uuid) = Uuid::parse_str(chunk_id) {
        return uuid.to_string();
    }

    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Build the payload stored alongside a chunk's vector.
///
/// Carries the chunk text so retrieval can answer without a relational round-trip.
pub fn build_point_payload(chunk: &ChunkRecord) -> Value {
    json!({
        "chunk_id": chunk.id,
        "document_id": chunk.document_id,
        "chatbot_id": chunk.metadata.chatbot_id,
        "chunk_index": chunk.chunk_index,
        "file_name": chunk.metadata.file_name,
        "file_type": chunk.metadata.file_type,
        "total_chunks": chunk.metadata.total_chunks,
        "content": chunk.content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMetadata;

    #[test]
    fn uuid_chunk_ids_pass_through() {
        let id = "0b8a9c5e-3f68-4d2a-9c1f-57d2a3b0e4aa";
        assert_eq!(derive_point_id(id), id);
    }

    #[test]
    fn non_uuid_ids_map_deterministically() {
        let first = derive_point_id("chunk-42");
        let second = derive_point_id("chunk-42");
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, derive_point_id("chunk-43"));
    }

    #[test]
    fn payload_copies_chunk_fields() {
        let chunk = ChunkRecord {
            id: "chunk-1".into(),
            document_id: "doc-1".into(),
            chunk_index: 3,
            content: "chunk text".into(),
            token_count: 3,
            metadata: ChunkMetadata {
                file_name: "notes.md".into(),
                file_type: "md".into(),
                chatbot_id: "bot-1".into(),
                chunk_index: 3,
                total_chunks: 5,
            },
        };

        let payload = build_point_payload(&chunk);
        assert_eq!(payload["chunk_id"], "chunk-1");
        assert_eq!(payload["document_id"], "doc-1");
        assert_eq!(payload["chatbot_id"], "bot-1");
        assert_eq!(payload["chunk_index"], 3);
        assert_eq!(payload["file_name"], "notes.md");
        assert_eq!(payload["file_type"], "md");
        assert_eq!(payload["total_chunks"], 5);
        assert_eq!(payload["content"], "chunk text");
    }
}
