//! # Mocks & Testing Guide
//!
//! Client behaviors talk to two things they do not own: the **backend actors** their
//! requests are sent to and the **shard leader resolver** that tells them where those
//! backends live. This module provides in-memory stand-ins for both.
//!
//! ## When to use Mocks vs Real Backends
//!
//! | Feature | Mocks | Real Backend |
//! |---------|-------|--------------|
//! | **Speed** | Instant (in-memory) | Fast (but involves tokio spawn) |
//! | **Determinism** | You decide when and how each request is answered | Subject to scheduler |
//! | **Use Case** | Retries, timeouts, leader moves, out-of-order replies | End-to-end flows |
//! | **Error Injection** | Easy (`return_err`, `reply_failure`) | Hard (requires specific state) |
//!
//! ## Testing Strategies
//!
//! <details>
//! <summary><b>Pattern 1: Scripted Backend</b></summary>
//!
//! [`create_mock_backend`] returns a [`BackendRef`] and the receiver behind it. The test
//! plays the backend: [`expect_request`] waits for the next request, and
//! [`reply_success`] / [`reply_failure`] answer it through its reply address.
//!
//! ```rust
//! use access_framework::mock::{create_mock_backend, expect_request, reply_success};
//! use access_framework::{AccessProtocol, Request};
//! use tokio::sync::mpsc;
//!
//! struct Echo;
//! impl AccessProtocol for Echo {
//!     type Target = String; type Request = String; type Success = String;
//!     fn cookie(_: &String) -> u64 { 0 }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let (backend, mut requests) = create_mock_backend::<Echo>(4);
//!     let (reply_to, mut replies) = mpsc::unbounded_channel();
//!
//!     backend.send(Request::new("tx".to_string(), 0, reply_to, "ping".to_string())).unwrap();
//!
//!     let request = expect_request(&mut requests).await;
//!     reply_success(&request, "pong".to_string());
//!     assert_eq!(replies.recv().await.unwrap().into_result().unwrap(), "pong");
//! }
//! ```
//! </details>
//!
//! <details>
//! <summary><b>Pattern 2: Scripted Leader Lookups</b></summary>
//!
//! [`MockShardLeaderResolver`] answers lookups from a list of expectations, in order.
//! Call [`MockShardLeaderResolver::verify`] at the end of the test to make sure every
//! expected lookup happened and nothing unexpected was asked.
//!
//! ```rust
//! use access_framework::mock::{create_mock_backend, MockShardLeaderResolver};
//! use access_framework::{AccessProtocol, BackendInfoResolver, RequestError};
//! use std::sync::Arc;
//!
//! struct Echo;
//! impl AccessProtocol for Echo {
//!     type Target = String; type Request = String; type Success = String;
//!     fn cookie(_: &String) -> u64 { 0 }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockShardLeaderResolver::<Echo>::new();
//!     let (backend, _requests) = create_mock_backend::<Echo>(4);
//!     mock.expect_lookup(0).return_err(RequestError::BackendUnavailable("electing".into()));
//!     mock.expect_lookup(0).return_ok(backend);
//!
//!     let resolver = BackendInfoResolver::new(mock.strategy());
//!     assert!(resolver.get_backend_info(0).await.is_err());
//!     assert!(resolver.get_backend_info(0).await.is_ok());
//!     mock.verify();
//! }
//! ```
//! </details>
//!
//! <details>
//! <summary><b>Pattern 3: Full System Integration Test</b></summary>
//!
//! Spawn real backend actors and a real client. See `tests/integration_test.rs` in the
//! `access-sample` crate.
//! </details>

use crate::error::RequestError;
use crate::message::{AccessProtocol, ProtocolVersion, Request};
use crate::resolver::{BackendInfo, BackendRef, ShardLeaderResolver};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// =============================================================================
// SCRIPTED BACKEND
// =============================================================================

/// Creates a backend address and the receiver the test reads requests from.
pub fn create_mock_backend<P: AccessProtocol>(
    buffer_size: usize,
) -> (BackendRef<P>, mpsc::Receiver<Request<P>>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (BackendRef::new(sender), receiver)
}

/// Waits for the next request sent to a mock backend.
pub async fn expect_request<P: AccessProtocol>(receiver: &mut mpsc::Receiver<Request<P>>) -> Request<P> {
    receiver
        .recv()
        .await
        .expect("mock backend closed before a request arrived")
}

pub fn reply_success<P: AccessProtocol>(request: &Request<P>, payload: P::Success) {
    let _ = request.reply_to().send(request.to_success(payload));
}

pub fn reply_failure<P: AccessProtocol>(request: &Request<P>, cause: RequestError) {
    let _ = request.reply_to().send(request.to_failure(cause));
}

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

type Lookup<P> = Result<(BackendRef<P>, ProtocolVersion), RequestError>;

struct LookupExpectation<P: AccessProtocol> {
    cookie: u64,
    result: Lookup<P>,
}

struct MockState<P: AccessProtocol> {
    expectations: VecDeque<LookupExpectation<P>>,
    mismatches: Vec<String>,
    lookups: Vec<u64>,
    invalidated: Vec<u64>,
}

/// A shard leader resolver that answers from scripted expectations.
///
/// # Example
/// ```ignore
/// let mock = MockShardLeaderResolver::<KvProtocol>::new();
/// mock.expect_lookup(1).return_ok(backend);
///
/// let resolver = Arc::new(BackendInfoResolver::new(mock.strategy()));
/// // Use resolver in tests...
/// mock.verify(); // Ensures all expectations were met
/// ```
pub struct MockShardLeaderResolver<P: AccessProtocol> {
    state: Arc<Mutex<MockState<P>>>,
}

impl<P: AccessProtocol> Clone for MockShardLeaderResolver<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<P: AccessProtocol> Default for MockShardLeaderResolver<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: AccessProtocol> MockShardLeaderResolver<P> {
    /// Creates a new mock resolver with no expectations.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                mismatches: Vec::new(),
                lookups: Vec::new(),
                invalidated: Vec::new(),
            })),
        }
    }

    /// The mock as a resolver strategy, sharing its expectations.
    pub fn strategy(&self) -> Arc<dyn ShardLeaderResolver<P>> {
        Arc::new(self.clone())
    }

    /// Expects a lookup for `cookie`, after the previously expected ones.
    pub fn expect_lookup(&self, cookie: u64) -> LookupExpectationBuilder<P> {
        LookupExpectationBuilder {
            cookie,
            state: Arc::clone(&self.state),
        }
    }

    /// Cookies looked up so far, in order.
    pub fn lookups(&self) -> Vec<u64> {
        self.with_state(|state| state.lookups.clone())
    }

    /// Cookies whose cached backend was invalidated, in order.
    pub fn invalidated(&self) -> Vec<u64> {
        self.with_state(|state| state.invalidated.clone())
    }

    /// Verifies that all expectations were met and no unexpected lookup happened.
    pub fn verify(&self) {
        self.with_state(|state| {
            if !state.mismatches.is_empty() {
                panic!("Unexpected lookups: {:?}", state.mismatches);
            }
            if !state.expectations.is_empty() {
                panic!(
                    "Not all expectations were met. {} remaining",
                    state.expectations.len()
                );
            }
        });
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState<P>) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }
}

impl<P: AccessProtocol> ShardLeaderResolver<P> for MockShardLeaderResolver<P> {
    fn get_shard_leader(&self, cookie: u64) -> BoxFuture<'static, Lookup<P>> {
        let result = self.with_state(|state| {
            state.lookups.push(cookie);
            match state.expectations.front() {
                Some(expected) if expected.cookie == cookie => {
                    state.expectations.pop_front().map(|expected| expected.result)
                }
                Some(expected) => {
                    state.mismatches.push(format!(
                        "lookup for cookie {cookie}, expected cookie {}",
                        expected.cookie
                    ));
                    None
                }
                None => {
                    state
                        .mismatches
                        .push(format!("lookup for cookie {cookie}, nothing expected"));
                    None
                }
            }
        });
        let result = result.unwrap_or_else(|| {
            Err(RequestError::BackendUnavailable(format!(
                "unexpected lookup for cookie {cookie}"
            )))
        });
        async move { result }.boxed()
    }

    fn invalidate_backend_info(&self, info: &BackendInfo<P>) {
        self.with_state(|state| state.invalidated.push(info.cookie()));
    }
}

/// Builder for lookup expectations.
pub struct LookupExpectationBuilder<P: AccessProtocol> {
    cookie: u64,
    state: Arc<Mutex<MockState<P>>>,
}

impl<P: AccessProtocol> LookupExpectationBuilder<P> {
    /// Resolves to `backend`, speaking the current protocol version.
    pub fn return_ok(self, backend: BackendRef<P>) {
        self.return_ok_with_version(backend, ProtocolVersion::CURRENT);
    }

    pub fn return_ok_with_version(self, backend: BackendRef<P>, version: ProtocolVersion) {
        self.push(Ok((backend, version)));
    }

    /// Fails the lookup with `error`.
    pub fn return_err(self, error: RequestError) {
        self.push(Err(error));
    }

    fn push(self, result: Lookup<P>) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.expectations.push_back(LookupExpectation {
            cookie: self.cookie,
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::BackendInfoResolver;

    struct Echo;

    impl AccessProtocol for Echo {
        type Target = String;
        type Request = String;
        type Success = String;

        fn cookie(target: &String) -> u64 {
            target.len() as u64
        }
    }

    #[tokio::test]
    async fn test_lookups_are_answered_in_order() {
        let mock = MockShardLeaderResolver::<Echo>::new();
        let (first, _r1) = create_mock_backend::<Echo>(1);
        let (second, _r2) = create_mock_backend::<Echo>(1);
        mock.expect_lookup(3).return_ok(first.clone());
        mock.expect_lookup(3).return_ok_with_version(second.clone(), ProtocolVersion(4));

        let strategy = mock.strategy();
        let (backend, _) = strategy.get_shard_leader(3).await.unwrap();
        assert_eq!(backend, first);
        let (backend, version) = strategy.get_shard_leader(3).await.unwrap();
        assert_eq!(backend, second);
        assert_eq!(version, ProtocolVersion(4));

        mock.verify();
        assert_eq!(mock.lookups(), vec![3, 3]);
    }

    #[tokio::test]
    #[should_panic(expected = "Unexpected lookups")]
    async fn test_verify_reports_unexpected_lookup() {
        let mock = MockShardLeaderResolver::<Echo>::new();
        mock.expect_lookup(1).return_err(RequestError::Closed);

        let result = mock.strategy().get_shard_leader(2).await;
        assert!(result.is_err());
        mock.verify();
    }

    #[tokio::test]
    async fn test_invalidation_is_recorded() {
        let mock = MockShardLeaderResolver::<Echo>::new();
        let (backend, _requests) = create_mock_backend::<Echo>(1);
        mock.expect_lookup(5).return_ok(backend);

        let resolver = BackendInfoResolver::new(mock.strategy());
        let info = resolver.get_backend_info(5).await.unwrap();
        assert!(resolver.invalidate_backend(5, &info));

        assert_eq!(mock.invalidated(), vec![5]);
    }

    #[tokio::test]
    async fn test_scripted_backend_round_trip() {
        let (backend, mut requests) = create_mock_backend::<Echo>(2);
        let (reply_to, mut replies) = mpsc::unbounded_channel();

        backend
            .send(Request::new("tx".to_string(), 0, reply_to, "op".to_string()))
            .unwrap();
        let request = expect_request(&mut requests).await;
        reply_failure(&request, RequestError::Timeout { elapsed_ms: 10 });

        let response = replies.recv().await.unwrap();
        assert_eq!(response.sequence(), 0);
        assert_eq!(response.cause(), Some(&RequestError::Timeout { elapsed_ms: 10 }));
    }
}
