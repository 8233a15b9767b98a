use access_framework::mock::{
    create_mock_backend, expect_request, reply_failure, reply_success, MockShardLeaderResolver,
};
use access_framework::{
    AccessProtocol, BackendInfoResolver, ClientActor, ClientActorBehavior, ClientActorContext,
    ClientActorRef, ClientConfig, FrontendIdentifier, InMemorySnapshotStore, RequestError,
    Response, Transition,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

// --- Test Protocol ---

struct Echo;

impl AccessProtocol for Echo {
    type Target = String;
    type Request = String;
    type Success = String;

    fn cookie(_target: &String) -> u64 {
        0
    }
}

type Reply = oneshot::Sender<Result<String, RequestError>>;

#[derive(Debug)]
enum EchoCommand {
    Send {
        target: String,
        payload: String,
        reply: Reply,
    },
    Generation(oneshot::Sender<u64>),
}

// --- Test Behavior ---

struct EchoClient {
    halted: Option<oneshot::Sender<RequestError>>,
}

impl ClientActorBehavior for EchoClient {
    type Protocol = Echo;
    type Command = EchoCommand;

    fn on_command(&mut self, ctx: &mut ClientActorContext<Self>, command: EchoCommand) -> Transition {
        match command {
            EchoCommand::Send {
                target,
                payload,
                reply,
            } => {
                let request = ctx.new_request(target, payload);
                ctx.send_request(
                    request,
                    Box::new(move |_: &mut EchoClient, response: Response<Echo>| {
                        let _ = reply.send(response.into_result());
                        Transition::Stay
                    }),
                )
                .expect("request should be accepted");
            }
            EchoCommand::Generation(reply) => {
                let _ = reply.send(ctx.identifier().generation);
            }
        }
        Transition::Stay
    }

    fn halt_client(&mut self, _ctx: &mut ClientActorContext<Self>, cause: &RequestError) {
        if let Some(halted) = self.halted.take() {
            let _ = halted.send(cause.clone());
        }
    }
}

// --- Helpers ---

fn frontend() -> FrontendIdentifier {
    FrontendIdentifier::new("member-1", "echo")
}

fn spawn_client(
    store: &InMemorySnapshotStore,
    leaders: &MockShardLeaderResolver<Echo>,
    config: ClientConfig,
) -> (ClientActorRef<EchoClient>, oneshot::Receiver<RequestError>) {
    let (halted, on_halt) = oneshot::channel();
    let (actor, client) = ClientActor::<EchoClient>::new(
        frontend(),
        Arc::new(store.clone()),
        Arc::new(BackendInfoResolver::new(leaders.strategy())),
        config,
    );
    tokio::spawn(actor.run(move |_ctx| EchoClient {
        halted: Some(halted),
    }));
    (client, on_halt)
}

async fn send(
    client: &ClientActorRef<EchoClient>,
    target: &str,
    payload: &str,
) -> oneshot::Receiver<Result<String, RequestError>> {
    let (reply, answer) = oneshot::channel();
    client
        .send(EchoCommand::Send {
            target: target.to_string(),
            payload: payload.to_string(),
            reply,
        })
        .await
        .unwrap();
    answer
}

// --- Tests ---

#[tokio::test]
async fn test_requests_are_sequenced_per_target() {
    let (backend, mut requests) = create_mock_backend::<Echo>(16);
    let leaders = MockShardLeaderResolver::<Echo>::new();
    leaders.expect_lookup(0).return_ok(backend);
    let (client, _halt) = spawn_client(&InMemorySnapshotStore::new(), &leaders, ClientConfig::default());

    let a0 = send(&client, "a", "first").await;
    let a1 = send(&client, "a", "second").await;
    let b0 = send(&client, "b", "other").await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        let request = expect_request(&mut requests).await;
        seen.push((request.target().clone(), request.sequence()));
        reply_success(&request, request.payload().to_uppercase());
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![("a".to_string(), 0), ("a".to_string(), 1), ("b".to_string(), 0)]
    );

    assert_eq!(a0.await.unwrap().unwrap(), "FIRST");
    assert_eq!(a1.await.unwrap().unwrap(), "SECOND");
    assert_eq!(b0.await.unwrap().unwrap(), "OTHER");
    leaders.verify();
}

#[tokio::test]
async fn test_out_of_order_response_waits_for_head() {
    let (backend, mut requests) = create_mock_backend::<Echo>(16);
    let leaders = MockShardLeaderResolver::<Echo>::new();
    leaders.expect_lookup(0).return_ok(backend);
    let (client, _halt) = spawn_client(&InMemorySnapshotStore::new(), &leaders, ClientConfig::default());

    let mut first = send(&client, "a", "one").await;
    let mut second = send(&client, "a", "two").await;
    let r0 = expect_request(&mut requests).await;
    let r1 = expect_request(&mut requests).await;

    // The answer to the second request overtakes the first and is dropped.
    reply_success(&r1, "early".to_string());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(first.try_recv().is_err());
    assert!(second.try_recv().is_err());

    reply_success(&r0, "ONE".to_string());
    assert_eq!(first.await.unwrap().unwrap(), "ONE");
    reply_success(&r1, "TWO".to_string());
    assert_eq!(second.await.unwrap().unwrap(), "TWO");
}

#[tokio::test]
async fn test_restart_bumps_generation() {
    let store = InMemorySnapshotStore::new();
    let leaders = MockShardLeaderResolver::<Echo>::new();

    let (client, _halt) = spawn_client(&store, &leaders, ClientConfig::default());
    assert_eq!(client.ask(EchoCommand::Generation).await.unwrap(), 0);
    client.stop().await.unwrap();

    let (client, _halt) = spawn_client(&store, &leaders, ClientConfig::default());
    assert_eq!(client.ask(EchoCommand::Generation).await.unwrap(), 1);
    assert_eq!(store.get(&frontend().to_string()).unwrap().generation, 1);
}

#[tokio::test]
async fn test_failed_identity_save_stops_client() {
    let store = InMemorySnapshotStore::new();
    store.fail_saves(Some("read-only volume"));
    let leaders = MockShardLeaderResolver::<Echo>::new();

    let (client, _halt) = spawn_client(&store, &leaders, ClientConfig::default());

    assert!(client.ask(EchoCommand::Generation).await.is_err());
}

#[tokio::test]
async fn test_retired_generation_halts_client() {
    let (backend, mut requests) = create_mock_backend::<Echo>(16);
    let leaders = MockShardLeaderResolver::<Echo>::new();
    leaders.expect_lookup(0).return_ok(backend);
    let (client, on_halt) = spawn_client(&InMemorySnapshotStore::new(), &leaders, ClientConfig::default());

    let _answer = send(&client, "a", "write").await;
    let request = expect_request(&mut requests).await;
    reply_failure(&request, RequestError::RetiredGeneration { generation: 0 });

    let cause = on_halt.await.unwrap();
    assert!(cause.is_retired_generation());
    assert!(client.ask(EchoCommand::Generation).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_moves_request_to_new_leader() {
    let (old_leader, mut old_requests) = create_mock_backend::<Echo>(16);
    let (new_leader, mut new_requests) = create_mock_backend::<Echo>(16);
    let leaders = MockShardLeaderResolver::<Echo>::new();
    leaders.expect_lookup(0).return_ok(old_leader);
    leaders.expect_lookup(0).return_ok(new_leader);
    let config = ClientConfig::default().with_request_timeout(Duration::from_secs(1));
    let (client, _halt) = spawn_client(&InMemorySnapshotStore::new(), &leaders, config);

    let answer = send(&client, "a", "write").await;
    let original = expect_request(&mut old_requests).await;
    assert_eq!(original.retry(), 0);

    // The old leader never answers; the paused clock runs to the timeout.
    let retried = expect_request(&mut new_requests).await;
    assert_eq!(retried.sequence(), original.sequence());
    assert_eq!(retried.retry(), 1);
    reply_success(&retried, "done".to_string());

    assert_eq!(answer.await.unwrap().unwrap(), "done");
    assert_eq!(leaders.invalidated(), vec![0]);
    leaders.verify();
}

#[tokio::test(start_paused = true)]
async fn test_request_fails_after_max_retries() {
    let (first, _first_requests) = create_mock_backend::<Echo>(16);
    let (second, _second_requests) = create_mock_backend::<Echo>(16);
    let leaders = MockShardLeaderResolver::<Echo>::new();
    leaders.expect_lookup(0).return_ok(first);
    leaders.expect_lookup(0).return_ok(second);
    let config = ClientConfig::default()
        .with_request_timeout(Duration::from_secs(1))
        .with_max_retries(1);
    let (client, _halt) = spawn_client(&InMemorySnapshotStore::new(), &leaders, config);

    let answer = send(&client, "a", "write").await;

    let err = answer.await.unwrap().unwrap_err();
    assert_eq!(err, RequestError::RetriesExhausted { attempts: 1 });
    leaders.verify();
}

#[tokio::test(start_paused = true)]
async fn test_new_head_times_out_at_its_own_deadline() {
    let (old_leader, mut old_requests) = create_mock_backend::<Echo>(16);
    let (new_leader, mut new_requests) = create_mock_backend::<Echo>(16);
    let leaders = MockShardLeaderResolver::<Echo>::new();
    leaders.expect_lookup(0).return_ok(old_leader);
    leaders.expect_lookup(0).return_ok(new_leader);
    let config = ClientConfig::default().with_request_timeout(Duration::from_secs(30));
    let (client, _halt) = spawn_client(&InMemorySnapshotStore::new(), &leaders, config);
    let start = tokio::time::Instant::now();

    let first = send(&client, "a", "first").await;
    let head = expect_request(&mut old_requests).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let second = send(&client, "a", "second").await;
    let behind = expect_request(&mut old_requests).await;
    assert_eq!(behind.sequence(), 1);

    // The second request becomes head halfway through the first one's period.
    tokio::time::sleep(Duration::from_secs(5)).await;
    reply_success(&head, "FIRST".to_string());
    assert_eq!(first.await.unwrap().unwrap(), "FIRST");

    // Sent at 10s with a 30s timeout, so it moves to the new leader at 40s.
    let retried = expect_request(&mut new_requests).await;
    let elapsed = start.elapsed();
    assert_eq!(retried.sequence(), 1);
    assert_eq!(retried.retry(), 1);
    assert!(elapsed >= Duration::from_secs(40), "retried after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(41), "retried after {elapsed:?}");

    reply_success(&retried, "SECOND".to_string());
    assert_eq!(second.await.unwrap().unwrap(), "SECOND");
    leaders.verify();
}
