//! iocvault Protocol Buffer Definitions
//!
//! gRPC messages and stubs for the `ioc.Database` service, generated from
//! `proto/ioc.proto` at build time, plus conversions between the wire types
//! and the `iocvault-core` model.
//!
//! ## Service
//!
//! - Writes: `Store`, `StreamStore` (client streaming)
//! - Reads: `Load`, `StreamLoad` (server streaming)
//! - Aggregates: `Count`, `CountByType`, `CountSpecificType`, `CountBySource`,
//!   `CountSpecificSource`, `CountTypesBySource`, `CountBySourceAndType`,
//!   `CountByTypeAndSource`
//!
//! ## Usage
//!
//! ```ignore
//! use iocvault_proto::pb::{database_client::DatabaseClient, LoadRequest};
//!
//! let mut client = DatabaseClient::connect("http://localhost:8080").await?;
//! let page = client
//!     .load(LoadRequest { limit: 50, offset: 0, filter: "phish".into() })
//!     .await?
//!     .into_inner();
//! ```

pub mod convert;

pub mod pb {
    tonic::include_proto!("ioc");
}

/// Encoded descriptor set for the gRPC reflection service.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("ioc_descriptor");
