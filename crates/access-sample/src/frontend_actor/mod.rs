//! # Frontend Actor
//!
//! This module implements [`KvFrontend`], the application behavior running inside the
//! framework's [`ClientActor`](access_framework::ClientActor). Each command turns into
//! one sequenced request on the session between this client incarnation and a shard;
//! the framework takes care of resolving the shard leader, retrying and completing
//! requests in order.
//!
//! ## Commands
//!
//! | Command | Request | Reply |
//! |---------|---------|-------|
//! | `Read` | [`KvRequest::Read`] | `Option<String>` |
//! | `Write` | [`KvRequest::Write`] | `()` |
//! | `Delete` | [`KvRequest::Delete`] | whether the key existed |
//! | `Stats` | none | [`FrontendStats`] |
//! | `Shutdown` | none | fails everything outstanding, then stops |
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (actor, handle) = frontend_actor::new(frontend, store, resolver, config);
//! tokio::spawn(actor.run(KvFrontend::new));
//! let client = FrontendClient::new(handle);
//! ```

use crate::model::{KvProtocol, KvRequest, KvResponse, SessionId, ShardId};
use access_framework::{
    BackendInfoResolver, ClientActor, ClientActorBehavior, ClientActorContext, ClientActorRef,
    ClientConfig, FrontendIdentifier, RequestError, Response, SnapshotStore, Transition,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub type Reply<T> = oneshot::Sender<Result<T, RequestError>>;

#[derive(Debug)]
pub enum FrontendCommand {
    Read {
        shard: ShardId,
        key: String,
        respond_to: Reply<Option<String>>,
    },
    Write {
        shard: ShardId,
        key: String,
        value: String,
        respond_to: Reply<()>,
    },
    Delete {
        shard: ShardId,
        key: String,
        respond_to: Reply<bool>,
    },
    Stats {
        respond_to: oneshot::Sender<FrontendStats>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Counters reported by [`FrontendCommand::Stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontendStats {
    pub generation: u64,
    pub sent: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: usize,
}

pub struct KvFrontend {
    sent: u64,
    succeeded: u64,
    failed: u64,
}

impl KvFrontend {
    /// Builds the behavior; used as the factory passed to `ClientActor::run`.
    pub fn new(ctx: &ClientActorContext<KvFrontend>) -> Self {
        info!(client = %ctx.identifier(), "Frontend ready");
        Self {
            sent: 0,
            succeeded: 0,
            failed: 0,
        }
    }

    fn submit<T, F>(
        &mut self,
        ctx: &mut ClientActorContext<Self>,
        shard: ShardId,
        request: KvRequest,
        respond_to: Reply<T>,
        extract: F,
    ) where
        T: Send + 'static,
        F: FnOnce(KvResponse) -> Option<T> + Send + 'static,
    {
        let target = SessionId::new(ctx.identifier().clone(), shard);
        let request = ctx.new_request(target, request);
        debug!(session = %request.target(), sequence = request.sequence(), payload = ?request.payload(), "Submitting");

        let callback = Box::new(move |frontend: &mut KvFrontend, response: Response<KvProtocol>| {
            let result = response.into_result().and_then(|payload| {
                let shape = format!("{payload:?}");
                extract(payload).ok_or(RequestError::Runtime(format!("unexpected response {shape}")))
            });
            match &result {
                Ok(_) => frontend.succeeded += 1,
                Err(_) => frontend.failed += 1,
            }
            let _ = respond_to.send(result);
            Transition::Stay
        });

        match ctx.send_request(request, callback) {
            Ok(()) => self.sent += 1,
            // The callback (and with it the reply channel) is dropped, so the caller sees
            // the actor drop its response.
            Err(e) => error!(error = %e, "Request rejected"),
        }
    }

    fn stats(&self, ctx: &ClientActorContext<Self>) -> FrontendStats {
        FrontendStats {
            generation: ctx.identifier().generation,
            sent: self.sent,
            succeeded: self.succeeded,
            failed: self.failed,
            in_flight: ctx.in_flight(),
        }
    }
}

impl ClientActorBehavior for KvFrontend {
    type Protocol = KvProtocol;
    type Command = FrontendCommand;

    fn on_command(&mut self, ctx: &mut ClientActorContext<Self>, command: FrontendCommand) -> Transition {
        match command {
            FrontendCommand::Read {
                shard,
                key,
                respond_to,
            } => {
                self.submit(ctx, shard, KvRequest::Read { key }, respond_to, |response| match response {
                    KvResponse::Value(value) => Some(value),
                    _ => None,
                });
            }
            FrontendCommand::Write {
                shard,
                key,
                value,
                respond_to,
            } => {
                self.submit(ctx, shard, KvRequest::Write { key, value }, respond_to, |response| match response {
                    KvResponse::Ack => Some(()),
                    _ => None,
                });
            }
            FrontendCommand::Delete {
                shard,
                key,
                respond_to,
            } => {
                self.submit(ctx, shard, KvRequest::Delete { key }, respond_to, |response| match response {
                    KvResponse::Removed(existed) => Some(existed),
                    _ => None,
                });
            }
            FrontendCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.stats(ctx));
            }
            FrontendCommand::Shutdown { respond_to } => {
                info!(client = %ctx.identifier(), outstanding = ctx.in_flight(), "Frontend shutting down");
                ctx.poison_all(self, RequestError::Closed);
                let _ = respond_to.send(());
                return Transition::ShutDown;
            }
        }
        Transition::Stay
    }

    fn halt_client(&mut self, ctx: &mut ClientActorContext<Self>, cause: &RequestError) {
        warn!(client = %ctx.identifier(), cause = %cause, outstanding = ctx.in_flight(), "Frontend halted");
        ctx.poison_all(self, cause.clone());
    }
}

/// Creates a frontend client actor and its handle.
pub fn new(
    frontend: FrontendIdentifier,
    store: Arc<dyn SnapshotStore>,
    resolver: Arc<BackendInfoResolver<KvProtocol>>,
    config: ClientConfig,
) -> (ClientActor<KvFrontend>, ClientActorRef<KvFrontend>) {
    ClientActor::new(frontend, store, resolver, config)
}
