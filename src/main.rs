use ragpipe::{
    api::{RagService, create_router},
    config,
    embedding::get_embedding_client,
    extraction::ExtractionService,
    logging,
    metrics::PipelineMetrics,
    pipeline::ChunkEmbedService,
    qdrant::QdrantService,
    queue::{
        DocumentProcessor, JobQueue, MemoryQueue, QueueConfig, QueueProducer, QueueWorker,
        WorkerConfig,
    },
    retrieval::RetrievalService,
    storage::HttpObjectStorage,
    store::{DocumentStore, InMemoryDocumentStore},
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();
    let settings = config::get_config();

    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let storage = Arc::new(HttpObjectStorage::from_config());
    let embedding_client = get_embedding_client();
    let qdrant_service =
        Arc::new(QdrantService::new().expect("Failed to connect to Qdrant"));
    let metrics = Arc::new(PipelineMetrics::new());

    let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new(QueueConfig::from_config(settings)));
    let processor = Arc::new(DocumentProcessor::new(
        ExtractionService::new(storage, store.clone()),
        ChunkEmbedService::new(
            store.clone(),
            embedding_client.clone(),
            qdrant_service.clone(),
        ),
        store.clone(),
        queue.clone(),
        metrics.clone(),
    ));
    let worker = QueueWorker::new(
        queue.clone(),
        processor,
        metrics.clone(),
        WorkerConfig::from_config(settings),
    );
    let worker_handle = worker.spawn();

    let service = RagService::new(
        QueueProducer::new(queue),
        RetrievalService::new(embedding_client, qdrant_service),
        store,
        metrics,
    );
    let app = create_router(Arc::new(service));

    let (listener, port) = bind_listener().await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();

    worker_handle.shutdown().await;
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4300..=4399;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4300-4399",
    ))
}
