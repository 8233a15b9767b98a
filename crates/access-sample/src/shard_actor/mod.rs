//! # Shard Actor
//!
//! This module implements the backend side: one actor per shard, owning that shard's
//! keys and answering [`KvRequest`]s.
//!
//! ## Request Handling
//!
//! Each [`SessionId`] gets its own [`TargetRequestQueue`], so requests of one session are
//! applied exactly once and in order:
//!
//! - a request carrying the expected sequence is applied and its response cached;
//! - a retransmission of a request already applied gets the cached response again;
//! - anything else is a gap and fails with [`RequestError::OutOfSequence`].
//!
//! A session only opens at sequence 0. A leader taking over a shard continues its
//! sessions mid-stream by sharing the previous leader's [`ShardStorage`]; a leader with
//! fresh storage rejects anything past sequence 0, so a lost first request can never be
//! overtaken by the ones after it.
//!
//! ## Generation Fencing
//!
//! The shard remembers the newest generation it has seen per frontend. Requests from an
//! older generation fail with [`RequestError::RetiredGeneration`]; the first request
//! from a newer one drops the sessions of the generations before it.
//!
//! ## Structure
//!
//! - [`directory`] - [`ShardDirectory`], the leader lookup used by the frontend
//! - [`ShardActor::new`] - creates the actor and the [`BackendRef`] it listens on
//! - [`ShardActor::with_storage`] - a successor leader over existing [`ShardStorage`]

pub mod directory;

pub use directory::*;

use crate::model::{KvProtocol, KvRequest, KvResponse, SessionId, ShardId};
use access_framework::{BackendRef, FrontendIdentifier, Request, RequestError, Response, TargetRequestQueue};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Responses kept per session for answering retransmissions.
const REPLAY_WINDOW: usize = 64;

struct Session {
    queue: TargetRequestQueue<SessionId>,
    replies: VecDeque<(u64, Response<KvProtocol>)>,
}

impl Session {
    fn open(id: SessionId) -> Self {
        Self {
            queue: TargetRequestQueue::new(id),
            replies: VecDeque::new(),
        }
    }

    fn replay(&self, sequence: u64) -> Option<Response<KvProtocol>> {
        self.replies
            .iter()
            .find(|(cached, _)| *cached == sequence)
            .map(|(_, response)| response.clone())
    }

    fn remember(&mut self, sequence: u64, response: Response<KvProtocol>) {
        if self.replies.len() == REPLAY_WINDOW {
            self.replies.pop_front();
        }
        self.replies.push_back((sequence, response));
    }
}

#[derive(Default)]
struct ShardState {
    data: HashMap<String, String>,
    sessions: HashMap<SessionId, Session>,
    generations: HashMap<FrontendIdentifier, u64>,
}

/// Replicated state of one shard: its keys, open sessions and generation fences.
///
/// Clones share the same state, so a successor leader built with
/// [`ShardActor::with_storage`] continues where the previous one stopped.
#[derive(Clone, Default)]
pub struct ShardStorage {
    state: Arc<Mutex<ShardState>>,
}

impl ShardStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, bypassing any session.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().data.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, ShardState> {
        // A panic mid-request leaves at most that one request half done.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Backend actor owning the data of one shard.
pub struct ShardActor {
    shard: ShardId,
    receiver: mpsc::Receiver<Request<KvProtocol>>,
    storage: ShardStorage,
    drop_next: u32,
}

impl ShardActor {
    /// Creates a shard actor with empty storage and the address the frontend sends
    /// requests to.
    pub fn new(shard: ShardId, buffer_size: usize) -> (Self, BackendRef<KvProtocol>) {
        Self::with_storage(shard, ShardStorage::new(), buffer_size)
    }

    /// Creates a leader for `shard` that takes over `storage` from a previous leader.
    pub fn with_storage(
        shard: ShardId,
        storage: ShardStorage,
        buffer_size: usize,
    ) -> (Self, BackendRef<KvProtocol>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            shard,
            receiver,
            storage,
            drop_next: 0,
        };
        (actor, BackendRef::new(sender))
    }

    /// Silently discards the first `count` requests, as if they were lost in transit.
    pub fn dropping_first(mut self, count: u32) -> Self {
        self.drop_next = count;
        self
    }

    pub fn storage(&self) -> &ShardStorage {
        &self.storage
    }

    /// Processes requests until every [`BackendRef`] to this shard has been dropped.
    pub async fn run(mut self) {
        info!(shard = %self.shard, "Shard started");
        while let Some(request) = self.receiver.recv().await {
            if self.drop_next > 0 {
                self.drop_next -= 1;
                debug!(shard = %self.shard, session = %request.target(), sequence = request.sequence(), "Dropping request");
                continue;
            }
            let response = self.process(&request);
            let _ = request.reply_to().send(response);
        }
        let state = self.storage.lock();
        info!(shard = %self.shard, keys = state.data.len(), sessions = state.sessions.len(), "Shutdown");
    }

    fn process(&self, request: &Request<KvProtocol>) -> Response<KvProtocol> {
        let session_id = request.target();
        let client = &session_id.client;
        let mut guard = self.storage.lock();
        let state = &mut *guard;

        let newest = state
            .generations
            .entry(client.frontend.clone())
            .or_insert(client.generation);
        if client.generation < *newest {
            warn!(shard = %self.shard, session = %session_id, newest = *newest, "Request from retired generation");
            return request.to_failure(RequestError::RetiredGeneration {
                generation: client.generation,
            });
        }
        if client.generation > *newest {
            info!(shard = %self.shard, frontend = %client.frontend, generation = client.generation, "Newer generation, retiring old sessions");
            *newest = client.generation;
            state.sessions.retain(|id, _| {
                id.client.frontend != client.frontend || id.client.generation >= client.generation
            });
        }

        let Some(session) = state.sessions.get_mut(session_id) else {
            if request.sequence() != 0 {
                warn!(shard = %self.shard, session = %session_id, sequence = request.sequence(), "Unknown session, rejecting request");
                return request.to_failure(RequestError::OutOfSequence {
                    expected: 0,
                    actual: request.sequence(),
                });
            }
            debug!(shard = %self.shard, session = %session_id, "Opening session");
            let mut session = Session::open(session_id.clone());
            let response = apply_in_session(&mut session, &mut state.data, request);
            state.sessions.insert(session_id.clone(), session);
            return response;
        };

        if let Some(cached) = session.replay(request.sequence()) {
            debug!(shard = %self.shard, session = %session_id, sequence = request.sequence(), retry = request.retry(), "Replaying cached response");
            return cached;
        }
        if session.queue.expected_sequence() != request.sequence() {
            warn!(shard = %self.shard, session = %session_id, expected = session.queue.expected_sequence(), actual = request.sequence(), "Rejecting request");
            return request.to_failure(RequestError::OutOfSequence {
                expected: session.queue.expected_sequence(),
                actual: request.sequence(),
            });
        }
        debug!(shard = %self.shard, session = %session_id, sequence = request.sequence(), payload = ?request.payload(), "Applying");
        apply_in_session(session, &mut state.data, request)
    }
}

/// Appends `request` to the session, applies it and caches the response.
fn apply_in_session(
    session: &mut Session,
    data: &mut HashMap<String, String>,
    request: &Request<KvProtocol>,
) -> Response<KvProtocol> {
    if let Err(e) = session.queue.append(request) {
        return request.to_failure(RequestError::Runtime(e.to_string()));
    }
    let response = request.to_success(apply(data, request.payload()));
    session.remember(request.sequence(), response.clone());
    response
}

fn apply(data: &mut HashMap<String, String>, request: &KvRequest) -> KvResponse {
    match request {
        KvRequest::Read { key } => KvResponse::Value(data.get(key).cloned()),
        KvRequest::Write { key, value } => {
            data.insert(key.clone(), value.clone());
            KvResponse::Ack
        }
        KvRequest::Delete { key } => KvResponse::Removed(data.remove(key).is_some()),
    }
}
