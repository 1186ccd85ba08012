//! gRPC end-to-end tests.
//!
//! Each test starts the `ioc.Database` service on an ephemeral local port
//! over an in-memory store and talks to it through the generated client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use iocvault_core::IndicatorRecord;
use iocvault_server::pb::database_client::DatabaseClient;
use iocvault_server::{pb, DatabaseService, IocService, PoolConfig, WorkerPool};
use iocvault_storage::MemoryIocStore;
use tokio::sync::Notify;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};
use tonic::Code;

struct TestServer {
    addr: SocketAddr,
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start(workers: usize, queue_capacity: usize) -> Self {
        let pool = Arc::new(WorkerPool::new(PoolConfig {
            workers,
            queue_capacity,
        }));
        let service = IocService::new(Arc::clone(&pool), Arc::new(MemoryIocStore::new()));
        let shutdown = CancellationToken::new();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = shutdown.clone();
        let server = DatabaseService::new(service, shutdown.clone()).into_server();

        tokio::spawn(async move {
            Server::builder()
                .add_service(server)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    token.cancelled().await
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            pool,
            shutdown,
        }
    }

    async fn client(&self) -> DatabaseClient<Channel> {
        let endpoint = format!("http://{}", self.addr);
        for _ in 0..50 {
            if let Ok(client) = DatabaseClient::connect(endpoint.clone()).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server at {} never came up", self.addr);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn dto(id: usize, source: &str, ioc_type: &str) -> pb::IoCDto {
    IndicatorRecord::new(id.to_string(), source, ioc_type, format!("host-{}.example", id))
        .with_attribute("feed", "test")
        .into()
}

fn sample() -> Vec<pb::IoCDto> {
    vec![
        dto(1, "OTX", "Domain"),
        dto(2, "otx", "IP"),
        dto(3, "AbuseCH", "url"),
        dto(4, "abusech", "ip"),
        dto(5, "MISP", "domain"),
        dto(6, "misp", "ip"),
    ]
}

#[tokio::test]
async fn test_store_load_and_counts() {
    let server = TestServer::start(4, 32).await;
    let mut client = server.client().await;

    client
        .store(pb::StoreRequest { iocs: sample() })
        .await
        .unwrap();

    let page = client
        .load(pb::LoadRequest {
            limit: 2,
            offset: 1,
            filter: String::new(),
        })
        .await
        .unwrap()
        .into_inner();
    let ids: Vec<_> = page.iocs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "3"]);
    assert_eq!(page.iocs[0].source, "otx");
    assert_eq!(page.iocs[0].additional_data["feed"], "test");

    let total = client.count(()).await.unwrap().into_inner().count;
    assert_eq!(total, 6);

    let by_type = client.count_by_type(()).await.unwrap().into_inner().counts;
    assert_eq!(by_type.values().sum::<i64>(), total);
    assert_eq!(by_type["ip"], 3);
    assert!(by_type.keys().all(|k| *k == k.to_lowercase()));

    let ip = client
        .count_specific_type(pb::CountSpecificTypeRequest { r#type: "IP".into() })
        .await
        .unwrap()
        .into_inner()
        .count;
    assert_eq!(ip, 3);

    let misp = client
        .count_specific_source(pb::CountSpecificSourceRequest {
            source: "misp".into(),
        })
        .await
        .unwrap()
        .into_inner()
        .count;
    assert_eq!(misp, 2);

    let by_source = client
        .count_by_source(pb::CountBySourceRequest {})
        .await
        .unwrap()
        .into_inner()
        .counts;
    assert_eq!(by_source.len(), 3);

    let nested = client
        .count_types_by_source(())
        .await
        .unwrap()
        .into_inner()
        .sources;
    assert_eq!(nested["abusech"].counts["url"], 1);

    let otx_types = client
        .count_by_source_and_type(pb::CountBySourceAndTypeRequest {
            source: "OTX".into(),
        })
        .await
        .unwrap()
        .into_inner()
        .counts;
    assert_eq!(otx_types["domain"], 1);
    assert_eq!(otx_types["ip"], 1);

    let ip_sources = client
        .count_by_type_and_source(pb::CountByTypeAndSourceRequest { r#type: "ip".into() })
        .await
        .unwrap()
        .into_inner()
        .counts;
    assert_eq!(ip_sources["otx"], 1);
    assert_eq!(ip_sources["misp"], 1);
}

#[tokio::test]
async fn test_stream_store_then_stream_load() {
    let server = TestServer::start(4, 32).await;
    let mut client = server.client().await;

    let requests: Vec<_> = (0..250)
        .map(|i| pb::StreamStoreRequest {
            ioc: Some(dto(i, "otx", "ip")),
        })
        .collect();
    client
        .stream_store(tokio_stream::iter(requests))
        .await
        .unwrap();

    assert_eq!(client.count(()).await.unwrap().into_inner().count, 250);

    let mut stream = client
        .stream_load(pb::LoadRequest {
            limit: 10,
            offset: 100,
            filter: String::new(),
        })
        .await
        .unwrap()
        .into_inner();
    let mut ids = Vec::new();
    while let Some(message) = stream.message().await.unwrap() {
        ids.push(message.ioc.unwrap().id);
    }
    let expected: Vec<_> = (100..110).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_stream_store_with_missing_record_rolls_back() {
    let server = TestServer::start(2, 8).await;
    let mut client = server.client().await;

    let requests = vec![
        pb::StreamStoreRequest {
            ioc: Some(dto(1, "otx", "ip")),
        },
        pb::StreamStoreRequest { ioc: None },
    ];
    let status = client
        .stream_store(tokio_stream::iter(requests))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(client.count(()).await.unwrap().into_inner().count, 0);
}

#[tokio::test]
async fn test_full_queue_is_resource_exhausted() {
    let server = TestServer::start(1, 1).await;
    let mut client = server.client().await;

    let gate = Arc::new(Notify::new());
    let blocker = Arc::clone(&gate);
    server
        .pool
        .submit(async move { blocker.notified().await })
        .unwrap();
    while server.pool.active_tasks() == 0 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    server.pool.submit(async {}).unwrap();

    let status = client.count(()).await.unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);

    gate.notify_one();
    // Capacity frees up once the worker is released.
    for _ in 0..100 {
        if client.count(()).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pool never recovered");
}

#[tokio::test]
async fn test_invalid_timestamp_is_invalid_argument() {
    let server = TestServer::start(1, 4).await;
    let mut client = server.client().await;

    let mut bad = dto(1, "otx", "ip");
    bad.last_seen = Some(prost_types::Timestamp {
        seconds: 0,
        nanos: -1,
    });
    let status = client
        .store(pb::StoreRequest { iocs: vec![bad] })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_shutdown_rejects_new_calls() {
    let server = TestServer::start(1, 4).await;
    let mut client = server.client().await;
    server.pool.shutdown().await;

    let status = client.count(()).await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}
