//! # Request & Response Envelopes
//!
//! This module defines the messages exchanged between a client actor and its backends.
//!
//! The payloads are supplied by the concrete client through [`AccessProtocol`], the same
//! way an entity supplies its DTOs through associated types. The envelope around them
//! is fixed: every [`Request`] carries the target it addresses, a per-target sequence
//! number, a retry counter and the protocol version it was encoded for. Every
//! [`Response`] carries the target and sequence of the request it answers.

use crate::error::RequestError;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use tokio::sync::mpsc;

/// Protocol version spoken by a backend.
///
/// Retransmissions are always converted to the version advertised by the backend they
/// are sent to, which lets a client talk to a mix of old and new backends during a
/// rolling upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion(5);
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Ties together the types a concrete client exchanges with its backends.
pub trait AccessProtocol: Send + Sync + 'static {
    /// What a request addresses (a transaction, a history, a session...).
    type Target: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static;

    /// The request payload.
    type Request: Clone + Debug + Send + Sync + 'static;

    /// The payload of a successful response.
    type Success: Clone + Debug + Send + Sync + 'static;

    /// The routing cookie of the backend that owns `target`.
    fn cookie(target: &Self::Target) -> u64;

    /// Converts a payload for a backend speaking `version`.
    fn adapt_payload(payload: &Self::Request, _version: ProtocolVersion) -> Self::Request {
        payload.clone()
    }
}

/// Where a backend sends its answer.
pub type ReplyTo<P> = mpsc::UnboundedSender<Response<P>>;

/// A sequenced request addressed to one target.
pub struct Request<P: AccessProtocol> {
    target: P::Target,
    sequence: u64,
    retry: u32,
    version: ProtocolVersion,
    reply_to: ReplyTo<P>,
    payload: P::Request,
}

impl<P: AccessProtocol> Request<P> {
    pub fn new(
        target: P::Target,
        sequence: u64,
        reply_to: ReplyTo<P>,
        payload: P::Request,
    ) -> Self {
        Self {
            target,
            sequence,
            retry: 0,
            version: ProtocolVersion::CURRENT,
            reply_to,
            payload,
        }
    }

    pub fn target(&self) -> &P::Target {
        &self.target
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn reply_to(&self) -> &ReplyTo<P> {
        &self.reply_to
    }

    pub fn payload(&self) -> &P::Request {
        &self.payload
    }

    /// The same request with its retry counter bumped.
    pub fn next_retry(&self) -> Self {
        let mut next = self.clone();
        next.retry = self.retry.saturating_add(1);
        next
    }

    /// The same request encoded for a backend speaking `version`.
    pub fn to_version(&self, version: ProtocolVersion) -> Self {
        if version == self.version {
            return self.clone();
        }
        Self {
            target: self.target.clone(),
            sequence: self.sequence,
            retry: self.retry,
            version,
            reply_to: self.reply_to.clone(),
            payload: P::adapt_payload(&self.payload, version),
        }
    }

    /// A successful response to this request.
    pub fn to_success(&self, payload: P::Success) -> Response<P> {
        Response::Success(RequestSuccess {
            target: self.target.clone(),
            sequence: self.sequence,
            payload,
        })
    }

    /// A failed response to this request.
    pub fn to_failure(&self, cause: RequestError) -> Response<P> {
        Response::Failure(RequestFailure {
            target: self.target.clone(),
            sequence: self.sequence,
            cause,
        })
    }
}

impl<P: AccessProtocol> Clone for Request<P> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            sequence: self.sequence,
            retry: self.retry,
            version: self.version,
            reply_to: self.reply_to.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl<P: AccessProtocol> Debug for Request<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("target", &self.target)
            .field("sequence", &self.sequence)
            .field("retry", &self.retry)
            .field("version", &self.version)
            .field("payload", &self.payload)
            .finish()
    }
}

/// A successful answer.
pub struct RequestSuccess<P: AccessProtocol> {
    pub target: P::Target,
    pub sequence: u64,
    pub payload: P::Success,
}

/// A failed answer, either sent by a backend or synthesized locally.
pub struct RequestFailure<P: AccessProtocol> {
    pub target: P::Target,
    pub sequence: u64,
    pub cause: RequestError,
}

/// Answer to a [`Request`].
pub enum Response<P: AccessProtocol> {
    Success(RequestSuccess<P>),
    Failure(RequestFailure<P>),
}

impl<P: AccessProtocol> Response<P> {
    pub fn target(&self) -> &P::Target {
        match self {
            Response::Success(s) => &s.target,
            Response::Failure(f) => &f.target,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Response::Success(s) => s.sequence,
            Response::Failure(f) => f.sequence,
        }
    }

    pub fn cause(&self) -> Option<&RequestError> {
        match self {
            Response::Success(_) => None,
            Response::Failure(f) => Some(&f.cause),
        }
    }

    /// Splits the response into the usual `Result` shape.
    pub fn into_result(self) -> Result<P::Success, RequestError> {
        match self {
            Response::Success(s) => Ok(s.payload),
            Response::Failure(f) => Err(f.cause),
        }
    }
}

impl<P: AccessProtocol> Clone for Response<P> {
    fn clone(&self) -> Self {
        match self {
            Response::Success(s) => Response::Success(RequestSuccess {
                target: s.target.clone(),
                sequence: s.sequence,
                payload: s.payload.clone(),
            }),
            Response::Failure(f) => Response::Failure(RequestFailure {
                target: f.target.clone(),
                sequence: f.sequence,
                cause: f.cause.clone(),
            }),
        }
    }
}

impl<P: AccessProtocol> Debug for Response<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Response::Success(s) => f
                .debug_struct("RequestSuccess")
                .field("target", &s.target)
                .field("sequence", &s.sequence)
                .field("payload", &s.payload)
                .finish(),
            Response::Failure(fail) => f
                .debug_struct("RequestFailure")
                .field("target", &fail.target)
                .field("sequence", &fail.sequence)
                .field("cause", &fail.cause)
                .finish(),
        }
    }
}
