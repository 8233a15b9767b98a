use access_framework::mock::{create_mock_backend, expect_request, reply_failure, reply_success, MockShardLeaderResolver};
use access_framework::{
    BackendInfoResolver, ClientConfig, FrontendIdentifier, InMemorySnapshotStore, ProtocolVersion,
    RequestError,
};
use access_sample::clients::{FrontendClient, FrontendError};
use access_sample::frontend_actor::{self, KvFrontend};
use access_sample::model::{KvProtocol, KvRequest, KvResponse, ShardId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn start(mock: &MockShardLeaderResolver<KvProtocol>) -> (FrontendClient, JoinHandle<()>) {
    start_with(mock, ClientConfig::default())
}

fn start_with(
    mock: &MockShardLeaderResolver<KvProtocol>,
    config: ClientConfig,
) -> (FrontendClient, JoinHandle<()>) {
    let resolver = Arc::new(BackendInfoResolver::new(mock.strategy()));
    let (actor, handle) = frontend_actor::new(
        FrontendIdentifier::new("member-1", "datastore"),
        Arc::new(InMemorySnapshotStore::new()),
        resolver,
        config,
    );
    let task = tokio::spawn(actor.run(KvFrontend::new));
    (FrontendClient::new(handle), task)
}

#[tokio::test]
async fn test_write_is_sent_on_the_shard_session() {
    let mock = MockShardLeaderResolver::new();
    let (backend, mut requests) = create_mock_backend(8);
    mock.expect_lookup(3).return_ok(backend);
    let (client, task) = start(&mock);

    let writer = client.clone();
    let write = tokio::spawn(async move { writer.write(ShardId(3), "k", "v").await });

    let request = expect_request(&mut requests).await;
    assert_eq!(request.target().shard, ShardId(3));
    assert_eq!(request.target().client.generation, 0);
    assert_eq!(request.sequence(), 0);
    assert_eq!(request.retry(), 0);
    assert_eq!(
        request.payload(),
        &KvRequest::Write {
            key: "k".to_string(),
            value: "v".to_string()
        }
    );
    reply_success(&request, KvResponse::Ack);
    write.await.unwrap().unwrap();

    // The second request on the same shard continues the sequence.
    let reader = client.clone();
    let read = tokio::spawn(async move { reader.read(ShardId(3), "k").await });
    let request = expect_request(&mut requests).await;
    assert_eq!(request.sequence(), 1);
    reply_success(&request, KvResponse::Value(Some("v".to_string())));
    assert_eq!(read.await.unwrap().unwrap(), Some("v".to_string()));

    client.shutdown().await.unwrap();
    task.await.unwrap();
    mock.verify();
    assert_eq!(mock.lookups(), vec![3]);
}

#[tokio::test]
async fn test_request_uses_resolved_protocol_version() {
    let mock = MockShardLeaderResolver::new();
    let (backend, mut requests) = create_mock_backend(8);
    mock.expect_lookup(1).return_ok_with_version(backend, ProtocolVersion(4));
    let (client, task) = start(&mock);

    let deleter = client.clone();
    let delete = tokio::spawn(async move { deleter.delete(ShardId(1), "gone").await });

    let request = expect_request(&mut requests).await;
    assert_eq!(request.version(), ProtocolVersion(4));
    reply_success(&request, KvResponse::Removed(false));
    assert!(!delete.await.unwrap().unwrap());

    client.shutdown().await.unwrap();
    task.await.unwrap();
    mock.verify();
}

#[tokio::test(start_paused = true)]
async fn test_failed_lookups_exhaust_retries() {
    let mock = MockShardLeaderResolver::new();
    for _ in 0..2 {
        mock.expect_lookup(2)
            .return_err(RequestError::BackendUnavailable("no leader".to_string()));
    }
    let config = ClientConfig::default()
        .with_request_timeout(Duration::from_secs(2))
        .with_max_retries(1);
    let (client, task) = start_with(&mock, config);

    // The request waits for a leader; each timeout triggers another lookup.
    let err = client.read(ShardId(2), "k").await.unwrap_err();
    assert!(matches!(
        err,
        FrontendError::RequestFailed(RequestError::RetriesExhausted { attempts: 1 })
    ));

    let stats = client.stats().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.in_flight, 0);

    client.shutdown().await.unwrap();
    task.await.unwrap();
    mock.verify();
    assert_eq!(mock.lookups(), vec![2, 2]);
}

#[tokio::test]
async fn test_unexpected_response_shape_is_reported() {
    let mock = MockShardLeaderResolver::new();
    let (backend, mut requests) = create_mock_backend(8);
    mock.expect_lookup(0).return_ok(backend);
    let (client, task) = start(&mock);

    let reader = client.clone();
    let read = tokio::spawn(async move { reader.read(ShardId(0), "k").await });
    let request = expect_request(&mut requests).await;
    reply_success(&request, KvResponse::Ack);

    let err = read.await.unwrap().unwrap_err();
    assert!(matches!(err, FrontendError::RequestFailed(RequestError::Runtime(_))));

    client.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_retired_generation_stops_frontend() {
    let mock = MockShardLeaderResolver::new();
    let (backend, mut requests) = create_mock_backend(8);
    mock.expect_lookup(0).return_ok(backend);
    let (client, task) = start(&mock);

    let first = client.clone();
    let first = tokio::spawn(async move { first.write(ShardId(0), "a", "1").await });
    let second = client.clone();
    let second = tokio::spawn(async move { second.write(ShardId(0), "b", "2").await });

    let head = expect_request(&mut requests).await;
    let _tail = expect_request(&mut requests).await;
    reply_failure(&head, RequestError::RetiredGeneration { generation: 0 });

    assert!(matches!(
        first.await.unwrap().unwrap_err(),
        FrontendError::RequestFailed(RequestError::RetiredGeneration { generation: 0 })
    ));
    // Everything still outstanding fails with the same cause.
    assert!(matches!(
        second.await.unwrap().unwrap_err(),
        FrontendError::RequestFailed(RequestError::RetiredGeneration { generation: 0 })
    ));

    task.await.unwrap();
    assert!(client.stats().await.is_err());
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_requests() {
    let mock = MockShardLeaderResolver::new();
    let (backend, mut requests) = create_mock_backend(8);
    mock.expect_lookup(5).return_ok(backend);
    let (client, task) = start(&mock);

    let writer = client.clone();
    let write = tokio::spawn(async move { writer.write(ShardId(5), "k", "v").await });
    let _request = expect_request(&mut requests).await;

    client.shutdown().await.unwrap();
    assert!(matches!(
        write.await.unwrap().unwrap_err(),
        FrontendError::RequestFailed(RequestError::Closed)
    ));
    task.await.unwrap();
}
