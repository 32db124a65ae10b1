//! HTTP surface for the ingest pipeline.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /ingest` – Enqueue a document-processing job; returns `202 Accepted` with the
//!   job id. The document record itself is created by the surrounding application before
//!   this call.
//! - `POST /retrieve` – Embed a query and return the most similar chunks for a chatbot.
//! - `GET /documents/:id/status` – Report a document's pipeline status and last update.
//! - `GET /metrics` – Observe pipeline counters for dashboards.
//!
//! Handlers are generic over [`RagApi`] so the router can be exercised with stubs.

use crate::metrics::MetricsSnapshot;
use crate::queue::{JobPayload, QueueError, QueueProducer};
use crate::retrieval::{
    DEFAULT_RETRIEVE_LIMIT, RetrievalError, RetrievalService, RetrievedChunk,
};
use crate::store::{Document, DocumentStatus, DocumentStore, StoreError};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Abstraction over the pipeline operations exposed to HTTP consumers.
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Enqueue an ingest job and return its queue identifier.
    async fn enqueue_ingest(&self, payload: JobPayload) -> Result<String, QueueError>;

    /// Retrieve the most similar chunks for a query.
    async fn retrieve(
        &self,
        query: &str,
        chatbot_id: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError>;

    /// Fetch a document's current record.
    async fn document_status(&self, document_id: &str) -> Result<Document, StoreError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Production [`RagApi`] implementation wiring the producer, retrieval, and store.
pub struct RagService {
    producer: QueueProducer,
    retrieval: RetrievalService,
    store: Arc<dyn DocumentStore>,
    metrics: Arc<crate::metrics::PipelineMetrics>,
}

impl RagService {
    /// Build the service facade from its collaborators.
    pub fn new(
        producer: QueueProducer,
        retrieval: RetrievalService,
        store: Arc<dyn DocumentStore>,
        metrics: Arc<crate::metrics::PipelineMetrics>,
    ) -> Self {
        Self {
            producer,
            retrieval,
            store,
            metrics,
        }
    }
}

#[async_trait]
impl RagApi for RagService {
    async fn enqueue_ingest(&self, payload: JobPayload) -> Result<String, QueueError> {
        self.producer.enqueue(payload).await
    }

    async fn retrieve(
        &self,
        query: &str,
        chatbot_id: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.retrieval.retrieve(query, chatbot_id, limit).await
    }

    async fn document_status(&self, document_id: &str) -> Result<Document, StoreError> {
        self.store.get_document(document_id).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Build the HTTP router exposing the ingest and retrieval API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RagApi + 'static,
{
    Router::new()
        .route("/ingest", post(ingest_document::<S>))
        .route("/retrieve", post(retrieve_chunks::<S>))
        .route("/documents/:id/status", get(document_status::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for the `POST /ingest` endpoint.
#[derive(Deserialize)]
struct IngestRequest {
    /// Document to process; must already exist in the relational store.
    document_id: String,
    /// Object-storage handle of the uploaded file.
    source_file_ref: String,
    /// Original file name, including extension.
    file_name: String,
    /// Declared file type of the upload.
    file_type: String,
    /// Target chatbot (collection) key.
    chatbot_id: String,
}

/// Success response for the `POST /ingest` endpoint.
#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    document_id: String,
    job_id: String,
}

/// Enqueue a document for asynchronous processing.
async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError>
where
    S: RagApi,
{
    let IngestRequest {
        document_id,
        source_file_ref,
        file_name,
        file_type,
        chatbot_id,
    } = request;

    let payload = JobPayload {
        document_id: document_id.clone(),
        source_file_ref,
        file_name,
        file_type,
        chatbot_id,
    };
    let job_id = service.enqueue_ingest(payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "queued",
            document_id,
            job_id,
        }),
    ))
}

/// Request body for the `POST /retrieve` endpoint.
#[derive(Deserialize)]
struct RetrieveRequest {
    /// Natural-language query to embed and search with.
    query: String,
    /// Chatbot (collection) to search.
    chatbot_id: String,
    /// Optional result cap (defaults to 5).
    #[serde(default)]
    limit: Option<usize>,
}

/// Response body for the `POST /retrieve` endpoint.
#[derive(Serialize)]
struct RetrieveResponse {
    results: Vec<RetrievedChunk>,
}

/// Retrieve the most relevant chunks for a query.
async fn retrieve_chunks<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError>
where
    S: RagApi,
{
    let limit = request.limit.unwrap_or(DEFAULT_RETRIEVE_LIMIT).max(1);
    let results = service
        .retrieve(&request.query, &request.chatbot_id, limit)
        .await?;
    Ok(Json(RetrieveResponse { results }))
}

/// Response body for `GET /documents/:id/status`.
#[derive(Serialize)]
struct DocumentStatusResponse {
    status: DocumentStatus,
    updated_at: String,
}

/// Report a document's pipeline status.
async fn document_status<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentStatusResponse>, AppError>
where
    S: RagApi,
{
    let document = service.document_status(&document_id).await?;
    let updated_at = document
        .updated_at
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    Ok(Json(DocumentStatusResponse {
        status: document.status,
        updated_at,
    }))
}

/// Return the current pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: RagApi,
{
    Json(service.metrics_snapshot())
}

/// Error wrapper translating pipeline failures into HTTP responses.
enum AppError {
    Queue(QueueError),
    Retrieval(RetrievalError),
    Store(StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Store(StoreError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("Document not found: {id}")).into_response()
            }
            Self::Queue(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
            }
            Self::Retrieval(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
            }
            Self::Store(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
            }
        }
    }
}

impl From<QueueError> for AppError {
    fn from(inner: QueueError) -> Self {
        Self::Queue(inner)
    }
}

impl From<RetrievalError> for AppError {
    fn from(inner: RetrievalError) -> Self {
        Self::Retrieval(inner)
    }
}

impl From<StoreError> for AppError {
    fn from(inner: StoreError) -> Self {
        Self::Store(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use time::OffsetDateTime;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubRagApi {
        ingests: Mutex<Vec<JobPayload>>,
        results: Vec<RetrievedChunk>,
        document: Option<Document>,
    }

    #[async_trait]
    impl RagApi for StubRagApi {
        async fn enqueue_ingest(&self, payload: JobPayload) -> Result<String, QueueError> {
            self.ingests.lock().await.push(payload);
            Ok("job-1".into())
        }

        async fn retrieve(
            &self,
            _query: &str,
            _chatbot_id: &str,
            _limit: usize,
        ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
            Ok(self.results.clone())
        }

        async fn document_status(&self, document_id: &str) -> Result<Document, StoreError> {
            self.document
                .clone()
                .ok_or_else(|| StoreError::NotFound(document_id.to_string()))
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_processed: 4,
                chunks_embedded: 12,
                jobs_retried: 1,
                jobs_failed: 0,
            }
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn ingest_route_accepts_and_echoes_job_id() {
        let service = Arc::new(StubRagApi::default());
        let app = create_router(service.clone());

        let payload = json!({
            "document_id": "doc-1",
            "source_file_ref": "ref-1",
            "file_name": "notes.txt",
            "file_type": "txt",
            "chatbot_id": "bot-1"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "queued");
        assert_eq!(json["document_id"], "doc-1");
        assert_eq!(json["job_id"], "job-1");

        let ingests = service.ingests.lock().await;
        assert_eq!(ingests.len(), 1);
        assert_eq!(ingests[0].chatbot_id, "bot-1");
        assert_eq!(ingests[0].file_name, "notes.txt");
    }

    #[tokio::test]
    async fn retrieve_route_returns_ranked_results() {
        let service = Arc::new(StubRagApi {
            results: vec![RetrievedChunk {
                chunk_id: Some("chunk-1".into()),
                document_id: Some("doc-1".into()),
                chunk_index: Some(0),
                content: Some("matching text".into()),
                similarity: 0.88,
                metadata: serde_json::Map::new(),
            }],
            ..Default::default()
        });
        let app = create_router(service);

        let payload = json!({ "query": "what matches?", "chatbot_id": "bot-1" });
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/retrieve")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["results"][0]["chunk_id"], "chunk-1");
        assert_eq!(json["results"][0]["content"], "matching text");
    }

    #[tokio::test]
    async fn status_route_reports_document_state() {
        let service = Arc::new(StubRagApi {
            document: Some(Document {
                id: "doc-1".into(),
                source_file_ref: "ref".into(),
                file_name: "notes.txt".into(),
                file_type: "txt".into(),
                chatbot_id: "bot-1".into(),
                status: DocumentStatus::Embedded,
                raw_content: Some("text".into()),
                updated_at: OffsetDateTime::UNIX_EPOCH,
            }),
            ..Default::default()
        });
        let app = create_router(service);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/documents/doc-1/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "EMBEDDED");
        assert_eq!(json["updated_at"], "1970-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn unknown_document_maps_to_not_found() {
        let service = Arc::new(StubRagApi::default());
        let app = create_router(service);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/documents/ghost/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_route_exposes_counters() {
        let service = Arc::new(StubRagApi::default());
        let app = create_router(service);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["documents_processed"], 4);
        assert_eq!(json["chunks_embedded"], 12);
    }
}
