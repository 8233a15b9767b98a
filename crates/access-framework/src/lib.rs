//! # Access Framework
//!
//! This crate provides the client side of a sharded data store's frontend: the actor
//! that sequences requests per target, finds out which backend leads each shard, resends
//! requests when a backend stops answering and survives restarts by persisting its
//! generation.
//!
//! ## Why a client actor?
//!
//! A frontend talks to many shards at once, each of which may move between members,
//! change protocol version or lose its leader at any time. Putting all of that behind a
//! single **Actor** keeps the hard parts sequential:
//!
//! - Isolated state (no shared memory, no locks), apart from the backend cache
//! - Message-passing concurrency: backend lookups, timers and persistence report back
//!   as commands
//! - Requests for one target complete strictly in sequence order
//!
//! **Further Reading**:
//! - [Actor Model (Wikipedia)](https://en.wikipedia.org/wiki/Actor_model) - Foundational concurrency pattern by Carl Hewitt
//! - [Actors in Rust](https://ryhl.io/blog/actors-with-tokio/) - Practical guide to implementing actors with Tokio
//!
//! ## Architecture Overview
//!
//! The framework separates concerns into three layers:
//!
//! 1. **Behavior Layer** ([`ClientActorBehavior`]) - Your application logic
//! 2. **Runtime Layer** ([`ClientActor`], [`ClientState`], [`ClientActorContext`]) -
//!    recovery, request queues, retries and backend routing
//! 3. **Interface Layer** ([`ClientActorRef`]) - Type-safe communication
//!
//! Underneath sit the building blocks, usable on their own:
//!
//! | Type | Role |
//! |------|------|
//! | [`SequencedQueue`] | Outstanding requests of one target, completed in order |
//! | [`TargetRequestQueue`] | Gapless sequence validation, used on both sides of the wire |
//! | [`BackendInfoResolver`] | Single-flight cache of shard leader lookups |
//! | [`SnapshotStore`] | Persists the client's identifier across restarts |
//!
//! ## Lifecycle
//!
//! ```text
//! Recovering ──► Saving ──► Active ──► ShutDown
//! ```
//!
//! On start the actor loads its last [`ClientIdentifier`], bumps the generation, saves
//! it and only then builds the behavior. Backends use the generation to reject requests
//! from older incarnations of the same frontend.
//!
//! ## Example
//!
//! ```rust
//! use access_framework::mock::{create_mock_backend, expect_request, reply_success, MockShardLeaderResolver};
//! use access_framework::{
//!     AccessProtocol, BackendInfoResolver, ClientActor, ClientActorBehavior, ClientActorContext,
//!     ClientConfig, FrontendIdentifier, InMemorySnapshotStore, RequestError, Response, Transition,
//! };
//! use std::sync::Arc;
//! use tokio::sync::oneshot;
//!
//! // 1. Define the protocol
//! struct Echo;
//! impl AccessProtocol for Echo {
//!     type Target = String;
//!     type Request = String;
//!     type Success = String;
//!     fn cookie(_: &String) -> u64 { 0 }
//! }
//!
//! // 2. Define the behavior
//! #[derive(Debug)]
//! enum EchoCommand {
//!     Say(String, oneshot::Sender<Result<String, RequestError>>),
//! }
//!
//! struct EchoClient;
//!
//! impl ClientActorBehavior for EchoClient {
//!     type Protocol = Echo;
//!     type Command = EchoCommand;
//!
//!     fn on_command(&mut self, ctx: &mut ClientActorContext<Self>, command: EchoCommand) -> Transition {
//!         let EchoCommand::Say(text, reply) = command;
//!         let request = ctx.new_request("greetings".to_string(), text);
//!         let _ = ctx.send_request(
//!             request,
//!             Box::new(move |_: &mut EchoClient, response: Response<Echo>| {
//!                 let _ = reply.send(response.into_result());
//!                 Transition::Stay
//!             }),
//!         );
//!         Transition::Stay
//!     }
//!
//!     fn halt_client(&mut self, _: &mut ClientActorContext<Self>, _: &RequestError) {}
//! }
//!
//! // 3. Run it against a scripted backend
//! #[tokio::main]
//! async fn main() {
//!     let (backend, mut requests) = create_mock_backend::<Echo>(8);
//!     let leaders = MockShardLeaderResolver::<Echo>::new();
//!     leaders.expect_lookup(0).return_ok(backend);
//!
//!     let (actor, client) = ClientActor::<EchoClient>::new(
//!         FrontendIdentifier::new("member-1", "echo"),
//!         Arc::new(InMemorySnapshotStore::new()),
//!         Arc::new(BackendInfoResolver::new(leaders.strategy())),
//!         ClientConfig::default(),
//!     );
//!     tokio::spawn(actor.run(|_ctx| EchoClient));
//!
//!     let (reply, answer) = oneshot::channel();
//!     client.send(EchoCommand::Say("hello".into(), reply)).await.unwrap();
//!
//!     let request = expect_request(&mut requests).await;
//!     reply_success(&request, request.payload().to_uppercase());
//!     assert_eq!(answer.await.unwrap().unwrap(), "HELLO");
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - Each client actor runs in its own Tokio task and handles one message at a time
//! - Anything that waits (lookups, timers, snapshot saves) runs in a spawned task and
//!   posts its result back to the actor
//! - The [`BackendInfoResolver`] is the only shared structure; it is a `DashMap` and
//!   mutates entries atomically
//!
//! ## Testing
//!
//! The [`mock`] module provides a scripted backend and a scripted shard leader resolver.
//! Time-dependent behavior (timeouts, retries) is tested with Tokio's paused clock.

pub mod actor;
pub mod behavior;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod identifier;
pub mod message;
pub mod mock;
pub mod persistence;
pub mod queue;
pub mod resolver;
pub mod target_queue;
pub mod tracing;

// Re-export core types for convenience
pub use actor::{ClientActor, ClientMessage};
pub use behavior::{
    BehaviorFactory, ClientActorBehavior, ClientCommand, ClientState, InternalCommand,
    RecoveryEvent, Transition,
};
pub use client::ClientActorRef;
pub use config::ClientConfig;
pub use context::{ClientActorContext, InitialClientActorContext};
pub use error::{AccessError, PersistenceError, RequestError};
pub use identifier::{ClientIdentifier, FrontendIdentifier};
pub use message::{
    AccessProtocol, ProtocolVersion, ReplyTo, Request, RequestFailure, RequestSuccess, Response,
};
pub use persistence::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};
pub use queue::{RequestCallback, ResponseMatch, SequencedQueue, SequencedQueueEntry, TimeoutCheck};
pub use resolver::{BackendFuture, BackendInfo, BackendInfoResolver, BackendRef, ShardLeaderResolver};
pub use target_queue::TargetRequestQueue;
