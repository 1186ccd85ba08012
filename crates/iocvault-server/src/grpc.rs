//! gRPC surface: `ioc.Database`.
//!
//! Every handler derives a child of the process shutdown token, so a
//! shutdown unblocks in-flight waits while one client's cancellation never
//! touches another's. Handlers only convert between wire messages and core
//! types; the work itself runs on the worker pool through [`IocService`].

use std::pin::Pin;

use futures::{Stream, StreamExt};
use iocvault_proto::convert::{dtos_from_records, records_from_dtos};
use iocvault_proto::pb::{self, database_server::Database};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::bridge::{outbound_stream, spawn_inbound};
use crate::error::ServiceError;
use crate::service::IocService;

pub struct DatabaseService {
    service: IocService,
    shutdown: CancellationToken,
}

impl DatabaseService {
    pub fn new(service: IocService, shutdown: CancellationToken) -> Self {
        Self { service, shutdown }
    }

    pub fn into_server(self) -> pb::database_server::DatabaseServer<Self> {
        pb::database_server::DatabaseServer::new(self)
    }

    fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

#[tonic::async_trait]
impl Database for DatabaseService {
    // ========================================================================
    // Records
    // ========================================================================

    #[tracing::instrument(skip(self, request))]
    async fn store(&self, request: Request<pb::StoreRequest>) -> Result<Response<()>, Status> {
        let req = request.into_inner();
        let records = records_from_dtos(req.iocs).map_err(ServiceError::from)?;
        let count = records.len();

        self.service.store(records, &self.request_token()).await?;

        debug!(records = count, "Stored records");
        Ok(Response::new(()))
    }

    #[tracing::instrument(skip(self, request))]
    async fn load(
        &self,
        request: Request<pb::LoadRequest>,
    ) -> Result<Response<pb::LoadResponse>, Status> {
        let req = request.into_inner();
        let records = self.service.load(req.into(), &self.request_token()).await?;

        Ok(Response::new(pb::LoadResponse {
            iocs: dtos_from_records(records),
        }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn stream_store(
        &self,
        request: Request<Streaming<pb::StreamStoreRequest>>,
    ) -> Result<Response<()>, Status> {
        let cancel = self.request_token();
        // Dropping the handler (client gone) stops the reader and the write task.
        let _guard = cancel.clone().drop_guard();

        let records = spawn_inbound(request.into_inner(), cancel.clone());
        let committed = self.service.stream_store(records, &cancel).await?;

        info!(records = committed, "Stream store committed");
        Ok(Response::new(()))
    }

    type StreamLoadStream = Pin<Box<dyn Stream<Item = Result<pb::StreamLoadResponse, Status>> + Send>>;

    #[tracing::instrument(skip(self, request))]
    async fn stream_load(
        &self,
        request: Request<pb::LoadRequest>,
    ) -> Result<Response<Self::StreamLoadStream>, Status> {
        let req = request.into_inner();
        let cancel = self.request_token();
        let records = self.service.stream_load(req.into(), cancel.clone())?;

        let stream = outbound_stream(records, cancel).map(|item| {
            item.map(pb::StreamLoadResponse::from)
                .map_err(|e| Status::from(ServiceError::from(e)))
        });
        Ok(Response::new(Box::pin(stream)))
    }

    // ========================================================================
    // Counts
    // ========================================================================

    #[tracing::instrument(skip(self, _request))]
    async fn count(&self, _request: Request<()>) -> Result<Response<pb::CountResponse>, Status> {
        let count = self.service.count(&self.request_token()).await?;
        Ok(Response::new(pb::CountResponse { count }))
    }

    #[tracing::instrument(skip(self, _request))]
    async fn count_by_type(
        &self,
        _request: Request<()>,
    ) -> Result<Response<pb::CountByTypeResponse>, Status> {
        let counts = self.service.count_by_type(&self.request_token()).await?;
        Ok(Response::new(pb::CountByTypeResponse { counts }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn count_specific_type(
        &self,
        request: Request<pb::CountSpecificTypeRequest>,
    ) -> Result<Response<pb::CountResponse>, Status> {
        let req = request.into_inner();
        let count = self
            .service
            .count_specific_type(req.r#type, &self.request_token())
            .await?;
        Ok(Response::new(pb::CountResponse { count }))
    }

    #[tracing::instrument(skip(self, _request))]
    async fn count_by_source(
        &self,
        _request: Request<pb::CountBySourceRequest>,
    ) -> Result<Response<pb::CountBySourceResponse>, Status> {
        let counts = self.service.count_by_source(&self.request_token()).await?;
        Ok(Response::new(pb::CountBySourceResponse { counts }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn count_specific_source(
        &self,
        request: Request<pb::CountSpecificSourceRequest>,
    ) -> Result<Response<pb::CountResponse>, Status> {
        let req = request.into_inner();
        let count = self
            .service
            .count_specific_source(req.source, &self.request_token())
            .await?;
        Ok(Response::new(pb::CountResponse { count }))
    }

    #[tracing::instrument(skip(self, _request))]
    async fn count_types_by_source(
        &self,
        _request: Request<()>,
    ) -> Result<Response<pb::CountTypesBySourceResponse>, Status> {
        let nested = self
            .service
            .count_types_by_source(&self.request_token())
            .await?;
        Ok(Response::new(nested.into()))
    }

    #[tracing::instrument(skip(self, request))]
    async fn count_by_source_and_type(
        &self,
        request: Request<pb::CountBySourceAndTypeRequest>,
    ) -> Result<Response<pb::CountByTypeResponse>, Status> {
        let req = request.into_inner();
        let counts = self
            .service
            .count_by_source_and_type(req.source, &self.request_token())
            .await?;
        Ok(Response::new(pb::CountByTypeResponse { counts }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn count_by_type_and_source(
        &self,
        request: Request<pb::CountByTypeAndSourceRequest>,
    ) -> Result<Response<pb::CountBySourceResponse>, Status> {
        let req = request.into_inner();
        let counts = self
            .service
            .count_by_type_and_source(req.r#type, &self.request_token())
            .await?;
        Ok(Response::new(pb::CountBySourceResponse { counts }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, WorkerPool};
    use iocvault_core::IndicatorRecord;
    use iocvault_storage::MemoryIocStore;
    use std::sync::Arc;
    use tonic::Code;

    fn handler(shutdown: CancellationToken) -> DatabaseService {
        let pool = Arc::new(WorkerPool::new(PoolConfig {
            workers: 2,
            queue_capacity: 8,
        }));
        let service = IocService::new(pool, Arc::new(MemoryIocStore::new()));
        DatabaseService::new(service, shutdown)
    }

    fn dto(id: &str, source: &str, ioc_type: &str) -> pb::IoCDto {
        IndicatorRecord::new(id, source, ioc_type, format!("value-{}", id)).into()
    }

    #[tokio::test]
    async fn test_store_and_count_handlers() {
        let db = handler(CancellationToken::new());
        db.store(Request::new(pb::StoreRequest {
            iocs: vec![dto("1", "OTX", "IP"), dto("2", "misp", "ip"), dto("3", "otx", "url")],
        }))
        .await
        .unwrap();

        let total = db.count(Request::new(())).await.unwrap().into_inner().count;
        assert_eq!(total, 3);

        let by_type = db.count_by_type(Request::new(())).await.unwrap().into_inner();
        assert_eq!(by_type.counts["ip"], 2);

        let otx = db
            .count_by_source_and_type(Request::new(pb::CountBySourceAndTypeRequest {
                source: "OTX".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(otx.counts["url"], 1);

        let nested = db
            .count_types_by_source(Request::new(()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(nested.sources["misp"].counts["ip"], 1);
    }

    #[tokio::test]
    async fn test_bad_timestamp_is_invalid_argument() {
        let db = handler(CancellationToken::new());
        let mut bad = dto("1", "otx", "ip");
        bad.first_seen = Some(prost_types::Timestamp {
            seconds: 1,
            nanos: -3,
        });

        let status = db
            .store(Request::new(pb::StoreRequest { iocs: vec![bad] }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_calls() {
        let shutdown = CancellationToken::new();
        let db = handler(shutdown.clone());
        shutdown.cancel();

        let status = db.count(Request::new(())).await.unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn test_stream_load_handler() {
        let db = handler(CancellationToken::new());
        db.store(Request::new(pb::StoreRequest {
            iocs: (0..4).map(|i| dto(&i.to_string(), "otx", "ip")).collect(),
        }))
        .await
        .unwrap();

        let stream = db
            .stream_load(Request::new(pb::LoadRequest {
                limit: 3,
                offset: 1,
                filter: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        let ids: Vec<_> = stream
            .map(|item| item.unwrap().ioc.unwrap().id)
            .collect()
            .await;
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
