//! iocvault server
//!
//! Consumes normalized indicator records from Kafka, persists them in
//! batches, and serves the `ioc.Database` gRPC API over the same store.
//!
//! ## Startup
//!
//! 1. read configuration from the environment (see `iocvault_server::config`)
//! 2. connect to storage; failure after the retry budget exits non-zero
//! 3. start the worker pool
//! 4. connect to the broker; failure after the retry budget exits non-zero
//! 5. start the consume loop and the gRPC server
//!
//! ## gRPC Reflection
//! ```bash
//! grpcurl -plaintext localhost:8080 list
//! grpcurl -plaintext localhost:8080 ioc.Database/Count
//! ```
//!
//! ## Example Usage
//! ```bash
//! STORAGE_BACKEND=memory BROKER_ADDR=localhost:9092 cargo run -p iocvault-server --features kafka
//! ```

use std::sync::Arc;

use iocvault_ingest::{run_ingest, BrokerConnector, IngestError, KafkaBroker};
use iocvault_server::telemetry::init_tracing;
use iocvault_server::{
    AppConfig, DatabaseService, IocService, ShutdownCoordinator, StorageBackend, WorkerPool,
    FILE_DESCRIPTOR_SET,
};
use iocvault_storage::{IocStore, MemoryIocStore, PostgresConfig};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log);

    info!(
        addr = %config.server_addr,
        broker = %config.broker.address,
        topic = %config.broker.topic,
        batch_size = config.broker.batch_size,
        backend = ?config.backend,
        workers = config.pool.workers,
        queue_capacity = config.pool.queue_capacity,
        "iocvault starting"
    );

    let coordinator = ShutdownCoordinator::new(config.shutdown_timeout);
    let shutdown = coordinator.token();
    let signals = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.wait_for_signal().await })
    };

    // Storage
    let store: Arc<dyn IocStore> = match config.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage, records are lost on exit");
            Arc::new(MemoryIocStore::new())
        }
        StorageBackend::Postgres => open_postgres(&config.postgres).await.map_err(|e| {
            error!(error = %e, "Storage unavailable, exiting");
            e
        })?,
    };

    let pool = Arc::new(WorkerPool::new(config.pool.clone()));
    let service = IocService::new(Arc::clone(&pool), store);

    // Broker
    let connector = BrokerConnector::new(KafkaBroker::new(), config.broker.clone());
    let feed = match connector.connect(&shutdown).await {
        Ok(feed) => feed,
        Err(IngestError::Cancelled) => {
            info!("Shutdown requested before the broker connected");
            coordinator.drain(&pool, None).await;
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "Broker unavailable, exiting");
            return Err(e.into());
        }
    };

    let ingest = {
        let sink = service.clone();
        let token = shutdown.clone();
        let batch_size = connector.config().batch_size;
        tokio::spawn(async move { run_ingest(feed, batch_size, &sink, token).await })
    };

    // gRPC
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    info!(addr = %listener.local_addr()?, "gRPC server listening");

    let server_token = shutdown.clone();
    let served = Server::builder()
        .add_service(DatabaseService::new(service, shutdown.clone()).into_server())
        .add_service(reflection)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            server_token.cancelled().await
        })
        .await;

    if let Err(e) = &served {
        error!(error = %e, "gRPC server failed");
    }
    info!("gRPC server stopped, draining worker pool");

    let clean = coordinator.drain(&pool, Some(ingest)).await;
    signals.abort();

    served?;
    if !clean {
        warn!("Exited with tasks still pending");
    }
    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_postgres(
    config: &PostgresConfig,
) -> Result<Arc<dyn IocStore>, Box<dyn std::error::Error>> {
    let store = iocvault_storage::PostgresIocStore::connect(config).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(
    _config: &PostgresConfig,
) -> Result<Arc<dyn IocStore>, Box<dyn std::error::Error>> {
    Err("built without the postgres feature; set STORAGE_BACKEND=memory".into())
}
