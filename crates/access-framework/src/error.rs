//! # Framework Errors
//!
//! This module defines the error types shared by the queue, the resolver, the behavior
//! state machine and the actor shell.
//!
//! - [`AccessError`] is what framework operations return: protocol violations
//!   (mis-sequenced appends), state violations (command in the wrong lifecycle phase),
//!   generation conflicts and persistence failures.
//! - [`RequestError`] is the *cause* carried inside a failed response. It is `Clone`
//!   because one cause can poison many queued requests at once.
//! - [`PersistenceError`] covers the snapshot store.

/// Errors raised by framework operations.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("Actor closed")]
    ActorClosed,
    #[error("Actor dropped response channel")]
    ActorDropped,
    /// A request did not carry the sequence number the receiver expected.
    #[error("Expected sequence {expected}, got {actual}")]
    SequenceViolation { expected: u64, actual: u64 },
    /// Every sequence number of a target has been used; sequences do not wrap.
    #[error("Sequence numbers exhausted for {target}")]
    SequenceExhausted { target: String },
    /// A request was appended behind (or level with) the queue tail.
    #[error("Sequence {actual} does not follow tail sequence {tail}")]
    NotAfterTail { tail: u64, actual: u64 },
    /// A request was routed to a queue tracking another target.
    #[error("Request for {actual} does not belong to target {expected}")]
    TargetMismatch { expected: String, actual: String },
    #[error("Illegal state: {0}")]
    IllegalState(String),
    /// The persisted identifier belongs to another frontend.
    #[error("Mismatched frontend identifier: persisted {persisted}, local {local}")]
    FrontendMismatch { persisted: String, local: String },
    #[error("No generation left after {generation} for {frontend}")]
    GenerationsExhausted { frontend: String, generation: u64 },
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Request error: {0}")]
    Request(#[from] RequestError),
}

impl AccessError {
    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        AccessError::IllegalState(msg.into())
    }
}

/// The cause carried by a [`RequestFailure`](crate::message::RequestFailure).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// A newer generation of the same frontend has taken over.
    #[error("Generation {generation} has been retired")]
    RetiredGeneration { generation: u64 },
    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Gave up after {attempts} retries")]
    RetriesExhausted { attempts: u32 },
    #[error("Out of sequence: expected {expected}, got {actual}")]
    OutOfSequence { expected: u64, actual: u64 },
    #[error("Client is shutting down")]
    Closed,
    #[error("{0}")]
    Runtime(String),
}

impl RequestError {
    /// Whether this cause tells the client that its generation is no longer valid.
    pub fn is_retired_generation(&self) -> bool {
        matches!(self, RequestError::RetiredGeneration { .. })
    }
}

/// Errors produced by a [`SnapshotStore`](crate::persistence::SnapshotStore).
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot codec failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),
}
