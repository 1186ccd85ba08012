//! iocvault dispatch and gRPC server.
//!
//! Wires the ingestion path and the RPC surface onto one worker pool:
//!
//! ```text
//! broker ─▶ run_ingest ─▶ IocService (BatchSink) ─┐
//!                                                 ├─▶ WorkerPool ─▶ IocStore
//! gRPC ───▶ DatabaseService ─▶ IocService ────────┘
//! ```
//!
//! - [`pool`]: bounded queue and fixed workers; `QueueFull` is the only
//!   backpressure signal
//! - [`service`]: store, load, streams and counts as pool tasks
//! - [`bridge`]: network streams to and from worker channels
//! - [`grpc`]: the `ioc.Database` service
//! - [`shutdown`]: signal handling and drain
//!
//! Configuration comes from environment variables, see [`config`].

pub mod bridge;
pub mod config;
pub mod error;
pub mod grpc;
pub mod pool;
pub mod service;
pub mod shutdown;
pub mod telemetry;

pub use config::{AppConfig, LogConfig, LogFormat, StorageBackend};
pub use error::{ConfigError, PoolError, Result, ServiceError};
pub use grpc::DatabaseService;
pub use iocvault_proto::{pb, FILE_DESCRIPTOR_SET};
pub use pool::{PoolConfig, Task, WorkerPool};
pub use service::IocService;
pub use shutdown::{shutdown_signal, ShutdownCoordinator, ShutdownSignal};
