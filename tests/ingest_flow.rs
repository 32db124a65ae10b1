//! End-to-end ingest flow: enqueue → worker → extract → chunk → embed → index,
//! exercised against mocked object storage and Qdrant backends.

use std::sync::{Arc, Once};
use std::time::Duration;

use httpmock::{Method::GET, Method::POST, Method::PUT, MockServer};
use serde_json::json;
use time::OffsetDateTime;

use ragpipe::config::{CONFIG, Config, EmbeddingProvider};
use ragpipe::embedding::DeterministicEmbeddingClient;
use ragpipe::extraction::ExtractionService;
use ragpipe::metrics::PipelineMetrics;
use ragpipe::pipeline::ChunkEmbedService;
use ragpipe::qdrant::QdrantService;
use ragpipe::queue::{
    DocumentProcessor, JobPayload, JobQueue, JobStatus, MemoryQueue, QueueConfig, QueueProducer,
    QueueWorker, WorkerConfig,
};
use ragpipe::retrieval::RetrievalService;
use ragpipe::storage::HttpObjectStorage;
use ragpipe::store::{Document, DocumentStatus, DocumentStore, InMemoryDocumentStore};

fn ensure_test_config() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = CONFIG.set(Config {
            qdrant_url: "http://127.0.0.1:6333".into(),
            qdrant_api_key: None,
            embedding_provider: EmbeddingProvider::Deterministic,
            embedding_model: "test-model".into(),
            embedding_dimension: 16,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: None,
            storage_base_url: "http://127.0.0.1:9000".into(),
            storage_auth_token: None,
            chunk_size: 800,
            chunk_overlap: 100,
            worker_concurrency: 2,
            job_attempts: 3,
            job_backoff_initial: Duration::from_secs(60),
            job_lock_duration: Duration::from_secs(600),
            job_max_stalls: 2,
            idle_delay: Duration::from_secs(300),
            idle_check_interval: Duration::from_secs(120),
            prompt_model: "gpt-3.5-turbo".into(),
            prompt_max_tokens: 4096,
            response_language: "en".into(),
            server_port: None,
        });
    });
}

/// 2000 characters of plain prose: 8-character words separated by single spaces.
fn two_thousand_char_text() -> String {
    let words: String = (0..250)
        .map(|idx| format!("word{idx:04}"))
        .collect::<Vec<_>>()
        .join(" ");
    words.chars().take(2000).collect()
}

fn document(id: &str, file_name: &str, file_type: &str, chatbot_id: &str) -> Document {
    Document {
        id: id.to_string(),
        source_file_ref: format!("{id}-ref"),
        file_name: file_name.to_string(),
        file_type: file_type.to_string(),
        chatbot_id: chatbot_id.to_string(),
        status: DocumentStatus::Queued,
        raw_content: None,
        updated_at: OffsetDateTime::now_utc(),
    }
}

struct TestHarness {
    store: Arc<InMemoryDocumentStore>,
    queue: Arc<MemoryQueue>,
    producer: QueueProducer,
    metrics: Arc<PipelineMetrics>,
}

fn build_harness(qdrant: &MockServer, storage: &MockServer) -> (TestHarness, ragpipe::queue::WorkerHandle) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let queue = Arc::new(MemoryQueue::new(QueueConfig::default()));
    let metrics = Arc::new(PipelineMetrics::new());

    let qdrant_service =
        Arc::new(QdrantService::with_endpoint(&qdrant.base_url(), None).expect("qdrant client"));
    let object_storage = Arc::new(HttpObjectStorage::new(storage.base_url(), None));
    let embedding = Arc::new(DeterministicEmbeddingClient::new());

    let processor = Arc::new(DocumentProcessor::new(
        ExtractionService::new(object_storage, store.clone()),
        ChunkEmbedService::new(store.clone(), embedding, qdrant_service),
        store.clone(),
        queue.clone(),
        metrics.clone(),
    ));
    let queue_handle: Arc<dyn JobQueue> = queue.clone();
    let worker = QueueWorker::new(
        queue_handle.clone(),
        processor,
        metrics.clone(),
        WorkerConfig {
            concurrency: 2,
            idle_delay: Duration::from_secs(300),
            idle_check_interval: Duration::from_secs(120),
            drain_delay: Duration::from_millis(50),
            lock_renew_interval: Duration::from_secs(200),
        },
    );
    let handle = worker.spawn();

    (
        TestHarness {
            store,
            producer: QueueProducer::new(queue_handle),
            queue,
            metrics,
        },
        handle,
    )
}

async fn wait_for_document_status(
    store: &InMemoryDocumentStore,
    document_id: &str,
    status: DocumentStatus,
) -> Document {
    for _ in 0..200 {
        let document = store.get_document(document_id).await.expect("document");
        if document.status == status {
            return document;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("document {document_id} never reached {status:?}");
}

#[tokio::test]
async fn ingesting_a_text_document_indexes_three_contiguous_chunks() {
    ensure_test_config();
    let qdrant = MockServer::start_async().await;
    let storage = MockServer::start_async().await;

    let text = two_thousand_char_text();
    storage
        .mock_async(|when, then| {
            when.method(GET).path("/doc-1-ref");
            then.status(200).body(&text);
        })
        .await;
    qdrant
        .mock_async(|when, then| {
            when.method(GET).path("/collections/bot-1");
            then.status(404);
        })
        .await;
    let created = qdrant
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/bot-1");
            then.status(200).json_body(json!({ "result": true }));
        })
        .await;
    let upserts = qdrant
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/collections/bot-1/points")
                .query_param("wait", "true");
            then.status(200).json_body(json!({ "result": {} }));
        })
        .await;

    let (harness, worker) = build_harness(&qdrant, &storage);
    harness
        .store
        .insert_document(document("doc-1", "guide.txt", "txt", "bot-1"))
        .await;

    let job_id = harness
        .producer
        .enqueue(JobPayload {
            document_id: "doc-1".into(),
            source_file_ref: "doc-1-ref".into(),
            file_name: "guide.txt".into(),
            file_type: "txt".into(),
            chatbot_id: "bot-1".into(),
        })
        .await
        .expect("enqueue");

    let document = wait_for_document_status(&harness.store, "doc-1", DocumentStatus::Embedded).await;
    assert_eq!(document.raw_content.as_deref(), Some(text.trim()));

    // One atomic chunk batch with contiguous indices, one upsert per chunk.
    let chunks = harness.store.chunks_for("doc-1").await;
    assert_eq!(chunks.len(), 3);
    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, index);
        assert!(!chunk.content.trim().is_empty());
        assert!(chunk.content.chars().count() <= 800);
        assert_eq!(chunk.metadata.total_chunks, 3);
        assert_eq!(chunk.metadata.chatbot_id, "bot-1");
    }
    created.assert_async().await;
    assert_eq!(upserts.hits_async().await, 3);

    let record = harness.queue.job(&job_id).await.unwrap().expect("job record");
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress, 100);

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.documents_processed, 1);
    assert_eq!(snapshot.chunks_embedded, 3);

    worker.shutdown().await;
}

#[tokio::test]
async fn unsupported_extension_fails_terminally_without_content() {
    ensure_test_config();
    let qdrant = MockServer::start_async().await;
    let storage = MockServer::start_async().await;

    storage
        .mock_async(|when, then| {
            when.method(GET).path("/doc-2-ref");
            then.status(200).body("binary junk");
        })
        .await;

    let (harness, worker) = build_harness(&qdrant, &storage);
    harness
        .store
        .insert_document(document("doc-2", "data.xyz", "xyz", "bot-1"))
        .await;

    let job_id = harness
        .producer
        .enqueue(JobPayload {
            document_id: "doc-2".into(),
            source_file_ref: "doc-2-ref".into(),
            file_name: "data.xyz".into(),
            file_type: "xyz".into(),
            chatbot_id: "bot-1".into(),
        })
        .await
        .expect("enqueue");

    let document = wait_for_document_status(&harness.store, "doc-2", DocumentStatus::Failed).await;
    assert!(document.raw_content.is_none());

    // Non-retriable: exactly one attempt, no backoff.
    let record = harness.queue.job(&job_id).await.unwrap().expect("job record");
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts_made, 1);
    assert_eq!(harness.metrics.snapshot().jobs_failed, 1);

    worker.shutdown().await;
}

#[tokio::test]
async fn retrieval_round_trip_returns_ranked_chunks() {
    ensure_test_config();
    let qdrant = MockServer::start_async().await;

    qdrant
        .mock_async(|when, then| {
            when.method(GET).path("/collections/bot-1");
            then.status(200).json_body(json!({ "result": {} }));
        })
        .await;
    qdrant
        .mock_async(|when, then| {
            when.method(POST).path("/collections/bot-1/points/query");
            then.status(200).json_body(json!({
                "result": [
                    {
                        "id": "p-1",
                        "score": 0.97,
                        "payload": {
                            "chunk_id": "chunk-1",
                            "document_id": "doc-1",
                            "chunk_index": 1,
                            "content": "word0088 word0089 word0090",
                            "file_name": "guide.txt",
                            "total_chunks": 3
                        }
                    }
                ]
            }));
        })
        .await;

    let retrieval = RetrievalService::new(
        Arc::new(DeterministicEmbeddingClient::new()),
        Arc::new(QdrantService::with_endpoint(&qdrant.base_url(), None).expect("qdrant client")),
    );

    let results = retrieval
        .retrieve("word0088 word0089 word0090", "bot-1", 5)
        .await
        .expect("retrieval");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_index, Some(1));
    assert_eq!(
        results[0].content.as_deref(),
        Some("word0088 word0089 word0090")
    );
    assert!(results[0].similarity > 0.9);
}

#[tokio::test]
async fn retrieval_against_a_bot_with_no_documents_is_empty() {
    ensure_test_config();
    let qdrant = MockServer::start_async().await;
    qdrant
        .mock_async(|when, then| {
            when.method(GET).path("/collections/fresh-bot");
            then.status(404);
        })
        .await;

    let retrieval = RetrievalService::new(
        Arc::new(DeterministicEmbeddingClient::new()),
        Arc::new(QdrantService::with_endpoint(&qdrant.base_url(), None).expect("qdrant client")),
    );

    let results = retrieval
        .retrieve("anything at all", "fresh-bot", 5)
        .await
        .expect("retrieval");
    assert!(results.is_empty());
}
