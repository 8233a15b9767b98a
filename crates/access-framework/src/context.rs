//! # Client Actor Context
//!
//! Everything a client behavior can touch besides its own state lives here.
//!
//! - [`InitialClientActorContext`] exists while the actor is recovering its identity. It
//!   knows the frontend and the snapshot store, but not the generation yet.
//! - [`ClientActorContext`] is created once the new identity has been persisted. It owns
//!   one [`SequencedQueue`] per target, the per-target sequence counters and the
//!   self-addressed mailbox used for timers and backend resolution.
//!
//! ## Asynchronous work
//!
//! The actor loop never awaits inside a command. Work that has to wait (resolving a
//! shard leader, saving a snapshot, a timer) runs in a spawned task that posts its
//! result back to the actor as a command, so all state changes still happen one command
//! at a time.

use crate::actor::ClientMessage;
use crate::behavior::{ClientActorBehavior, ClientCommand, InternalCommand, Transition};
use crate::config::ClientConfig;
use crate::error::{AccessError, PersistenceError, RequestError};
use crate::identifier::{ClientIdentifier, FrontendIdentifier};
use crate::message::{AccessProtocol, ReplyTo, Request, Response};
use crate::persistence::SnapshotStore;
use crate::queue::{RequestCallback, SequencedQueue, TimeoutCheck};
use crate::resolver::{BackendInfo, BackendInfoResolver};
use crate::target_queue::TargetRequestQueue;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Protocol<A> = <A as ClientActorBehavior>::Protocol;
type Target<A> = <Protocol<A> as AccessProtocol>::Target;

/// Sender for commands the actor addresses to itself.
pub(crate) type SelfRef<A> = mpsc::UnboundedSender<ClientMessage<A>>;

/// Context available before the client's identity is known.
pub struct InitialClientActorContext<A: ClientActorBehavior> {
    persistence_id: String,
    frontend: FrontendIdentifier,
    self_ref: SelfRef<A>,
    reply_to: ReplyTo<Protocol<A>>,
    store: Arc<dyn SnapshotStore>,
    resolver: Arc<BackendInfoResolver<Protocol<A>>>,
    config: ClientConfig,
}

impl<A: ClientActorBehavior> InitialClientActorContext<A> {
    pub(crate) fn new(
        frontend: FrontendIdentifier,
        self_ref: SelfRef<A>,
        reply_to: ReplyTo<Protocol<A>>,
        store: Arc<dyn SnapshotStore>,
        resolver: Arc<BackendInfoResolver<Protocol<A>>>,
        config: ClientConfig,
    ) -> Self {
        Self {
            persistence_id: frontend.to_string(),
            frontend,
            self_ref,
            reply_to,
            store,
            resolver,
            config,
        }
    }

    pub fn persistence_id(&self) -> &str {
        &self.persistence_id
    }

    pub fn frontend(&self) -> &FrontendIdentifier {
        &self.frontend
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Persists `identifier` in the background; the outcome arrives as
    /// [`ClientCommand::SnapshotSaved`].
    pub fn save_snapshot(&self, identifier: ClientIdentifier) {
        let store = Arc::clone(&self.store);
        let persistence_id = self.persistence_id.clone();
        let self_ref = self.self_ref.clone();
        tokio::spawn(async move {
            let result: Result<(), PersistenceError> = store.save(&persistence_id, &identifier).await;
            let _ = self_ref.send(ClientMessage::Command(ClientCommand::SnapshotSaved(result)));
        });
    }

    pub(crate) fn stop_self(&self) {
        let _ = self.self_ref.send(ClientMessage::Stop);
    }

    /// Turns into the full context once `identifier` has been persisted.
    pub(crate) fn into_active(self, identifier: ClientIdentifier) -> ClientActorContext<A> {
        ClientActorContext {
            identifier,
            persistence_id: self.persistence_id,
            self_ref: self.self_ref,
            reply_to: self.reply_to,
            resolver: self.resolver,
            config: self.config,
            queues: HashMap::new(),
            senders: HashMap::new(),
            resolving: HashSet::new(),
            tick_armed: false,
        }
    }
}

enum TimeoutAction {
    Retry,
    Fail(u32),
}

/// Context of an active client: identity, outstanding requests and backend routing.
pub struct ClientActorContext<A: ClientActorBehavior> {
    identifier: ClientIdentifier,
    persistence_id: String,
    self_ref: SelfRef<A>,
    reply_to: ReplyTo<Protocol<A>>,
    resolver: Arc<BackendInfoResolver<Protocol<A>>>,
    config: ClientConfig,
    queues: HashMap<Target<A>, SequencedQueue<A, Protocol<A>>>,
    senders: HashMap<Target<A>, TargetRequestQueue<Target<A>>>,
    resolving: HashSet<u64>,
    tick_armed: bool,
}

impl<A: ClientActorBehavior> ClientActorContext<A> {
    pub fn identifier(&self) -> &ClientIdentifier {
        &self.identifier
    }

    pub fn persistence_id(&self) -> &str {
        &self.persistence_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<BackendInfoResolver<Protocol<A>>> {
        &self.resolver
    }

    /// Builds the next request for `target`, replying to this actor.
    pub fn new_request(
        &self,
        target: Target<A>,
        payload: <Protocol<A> as AccessProtocol>::Request,
    ) -> Request<Protocol<A>> {
        let sequence = self
            .senders
            .get(&target)
            .map(TargetRequestQueue::expected_sequence)
            .unwrap_or(0);
        Request::new(target, sequence, self.reply_to.clone(), payload)
    }

    /// Enqueues `request` and sends it as soon as its backend is known.
    ///
    /// Requests for a target must be sent gaplessly, starting at sequence 0; use
    /// [`new_request`](Self::new_request) to get the next one.
    pub fn send_request(
        &mut self,
        request: Request<Protocol<A>>,
        callback: RequestCallback<A, Protocol<A>>,
    ) -> Result<(), AccessError> {
        let target = request.target().clone();
        let now = Instant::now();

        let mut sender = self
            .senders
            .get(&target)
            .cloned()
            .unwrap_or_else(|| TargetRequestQueue::new(target.clone()));
        sender.append(&request)?;

        let queue = self
            .queues
            .entry(target.clone())
            .or_insert_with(|| SequencedQueue::new(target.clone(), now));
        queue.add(request, callback, now)?;
        let needs_backend = queue.backend().is_none();
        self.senders.insert(target.clone(), sender);

        if needs_backend {
            self.resolve_backend(<Protocol<A>>::cookie(&target));
        }
        self.schedule_tick(self.config.request_timeout());
        Ok(())
    }

    /// Routes `response` to the queue of its target.
    pub fn complete_request(&mut self, behavior: &mut A, response: Response<Protocol<A>>) -> Transition {
        let target = response.target().clone();
        let Some(queue) = self.queues.get_mut(&target) else {
            debug!(target_id = %target, sequence = response.sequence(), "No queue for response, ignoring");
            return Transition::Stay;
        };
        let next = queue.complete(behavior, response, Instant::now());
        if queue.is_empty() && !queue.is_closed() {
            self.queues.remove(&target);
        }
        next
    }

    /// Fails everything outstanding with `cause` and closes all queues.
    pub fn poison_all(&mut self, behavior: &mut A, cause: RequestError) -> Transition {
        let mut transition = Transition::Stay;
        for queue in self.queues.values_mut() {
            if queue.poison(behavior, cause.clone()) == Transition::ShutDown {
                transition = Transition::ShutDown;
            }
        }
        transition
    }

    /// Number of requests awaiting a response, across all targets.
    pub fn in_flight(&self) -> usize {
        self.queues.values().map(SequencedQueue::len).sum()
    }

    pub fn queue(&self, target: &Target<A>) -> Option<&SequencedQueue<A, Protocol<A>>> {
        self.queues.get(target)
    }

    /// Runs `command` inside the actor, after the commands already queued.
    pub fn execute_in_actor(
        &self,
        command: impl FnOnce(&mut A, &mut ClientActorContext<A>) -> Transition + Send + 'static,
    ) {
        self.post(ClientCommand::Internal(InternalCommand::new(command)));
    }

    pub(crate) fn stop_self(&self) {
        let _ = self.self_ref.send(ClientMessage::Stop);
    }

    fn post(&self, command: ClientCommand<A>) {
        if self.self_ref.send(ClientMessage::Command(command)).is_err() {
            debug!(client = %self.identifier, "Actor gone, dropping self command");
        }
    }

    /// Arms a single timer that delivers [`ClientCommand::Tick`] after `delay`.
    fn schedule_tick(&mut self, delay: Duration) {
        if self.tick_armed {
            return;
        }
        self.tick_armed = true;
        let self_ref = self.self_ref.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = self_ref.send(ClientMessage::Command(ClientCommand::Tick));
        });
    }

    /// Looks up the leader for `cookie` unless a lookup is already running.
    fn resolve_backend(&mut self, cookie: u64) {
        if let Some(info) = self.resolver.cached(cookie) {
            self.apply_backend(cookie, info);
            return;
        }
        if !self.resolving.insert(cookie) {
            return;
        }
        debug!(client = %self.identifier, cookie, "Resolving backend");
        let lookup = self.resolver.get_backend_info(cookie);
        let self_ref = self.self_ref.clone();
        tokio::spawn(async move {
            let result = lookup.await;
            let command = InternalCommand::new(move |_: &mut A, ctx: &mut ClientActorContext<A>| {
                ctx.backend_resolved(cookie, result);
                Transition::Stay
            });
            let _ = self_ref.send(ClientMessage::Command(ClientCommand::Internal(command)));
        });
    }

    fn backend_resolved(&mut self, cookie: u64, result: Result<BackendInfo<Protocol<A>>, RequestError>) {
        self.resolving.remove(&cookie);
        match result {
            Ok(info) => self.apply_backend(cookie, info),
            // Entries stay queued; the next timeout triggers another lookup.
            Err(e) => warn!(client = %self.identifier, cookie, error = %e, "Backend resolution failed"),
        }
    }

    fn apply_backend(&mut self, cookie: u64, info: BackendInfo<Protocol<A>>) {
        let now = Instant::now();
        for queue in self.queues.values_mut() {
            if !queue.is_closed() && <Protocol<A>>::cookie(queue.target()) == cookie {
                queue.set_backend(info.clone(), now);
            }
        }
    }

    /// Handles a timer tick: retries or fails timed-out heads and re-arms the timer for
    /// the earliest head deadline.
    pub(crate) fn handle_timeouts(&mut self, behavior: &mut A, now: Instant) -> Transition {
        self.tick_armed = false;
        let timeout = self.config.request_timeout();
        let max_retries = self.config.max_retries;
        let mut shutdown = false;
        let mut stale = BTreeSet::new();

        for queue in self.queues.values_mut() {
            loop {
                let mut action = None;
                let check = queue.process_timeouts(now, timeout, |entry| {
                    if entry.timeouts() >= max_retries {
                        action = Some(TimeoutAction::Fail(entry.timeouts()));
                    } else {
                        entry.mark_timed_out(now);
                        action = Some(TimeoutAction::Retry);
                    }
                });
                match action {
                    Some(TimeoutAction::Fail(attempts)) => {
                        let cause = RequestError::RetriesExhausted { attempts };
                        if queue.fail_head(behavior, cause, now) == Some(Transition::ShutDown) {
                            shutdown = true;
                        }
                    }
                    Some(TimeoutAction::Retry) => {
                        let cookie = <Protocol<A>>::cookie(queue.target());
                        if let Some(backend) = queue.clear_backend() {
                            self.resolver.invalidate_backend(cookie, &backend);
                        }
                        stale.insert(cookie);
                        break;
                    }
                    None => {}
                }
                if check != TimeoutCheck::Immediately {
                    break;
                }
            }
        }

        if shutdown {
            return Transition::ShutDown;
        }
        for cookie in stale {
            info!(client = %self.identifier, cookie, "Request timed out, re-resolving backend");
            self.resolve_backend(cookie);
        }
        self.queues.retain(|_, queue| !queue.is_empty() || queue.is_closed());
        if let Some(deadline) = self.next_deadline(timeout) {
            self.schedule_tick(deadline.saturating_duration_since(now));
        }
        Transition::Stay
    }

    /// When the earliest outstanding head times out.
    fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.queues
            .values()
            .filter_map(|queue| queue.head_deadline(timeout))
            .min()
    }
}
