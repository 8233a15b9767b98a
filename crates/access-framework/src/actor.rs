//! # Client Actor
//!
//! This module defines the `ClientActor`, the task that owns a client's state and feeds
//! it one message at a time. It is the "server" half of a client: the
//! [`ClientActorRef`] handle is the other half.
//!
//! The actor listens on three channels:
//!
//! 1. its **mailbox**, fed by [`ClientActorRef`] handles;
//! 2. a **self channel** used by timers, snapshot saves and backend lookups to post
//!    their results back;
//! 3. the **response channel** every request carries as its reply address.
//!
//! All three end up as a [`ClientCommand`] passed to [`ClientState::on_command`], so the
//! state machine never sees more than one message at once.

use crate::behavior::{BehaviorFactory, ClientActorBehavior, ClientCommand, ClientState, RecoveryEvent};
use crate::client::ClientActorRef;
use crate::config::ClientConfig;
use crate::context::{ClientActorContext, InitialClientActorContext};
use crate::error::{AccessError, RequestError};
use crate::identifier::FrontendIdentifier;
use crate::message::{ReplyTo, Response};
use crate::persistence::SnapshotStore;
use crate::resolver::BackendInfoResolver;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// A message in a client actor's mailbox.
pub enum ClientMessage<A: ClientActorBehavior> {
    Command(ClientCommand<A>),
    /// Ends the actor loop.
    Stop,
}

/// The task half of a client actor.
///
/// # Usage Pattern
///
/// 1.  **Create**: `ClientActor::new()` returns the actor and a [`ClientActorRef`].
/// 2.  **Run**: spawn `actor.run(factory)`; the factory builds the application behavior
///     once the client's identity has been recovered and saved.
/// 3.  **Use**: send commands through the handle. Commands sent before the client is
///     active wait in the mailbox until the new identity has been saved.
pub struct ClientActor<A: ClientActorBehavior> {
    frontend: FrontendIdentifier,
    mailbox: mpsc::Receiver<ClientMessage<A>>,
    self_ref: mpsc::UnboundedSender<ClientMessage<A>>,
    self_inbox: mpsc::UnboundedReceiver<ClientMessage<A>>,
    reply_to: ReplyTo<A::Protocol>,
    responses: mpsc::UnboundedReceiver<Response<A::Protocol>>,
    store: Arc<dyn SnapshotStore>,
    resolver: Arc<BackendInfoResolver<A::Protocol>>,
    config: ClientConfig,
}

impl<A: ClientActorBehavior> ClientActor<A> {
    /// Creates a client actor for `frontend` and its handle.
    ///
    /// The mailbox holds `config.mailbox_capacity` messages; senders wait when it is full.
    pub fn new(
        frontend: FrontendIdentifier,
        store: Arc<dyn SnapshotStore>,
        resolver: Arc<BackendInfoResolver<A::Protocol>>,
        config: ClientConfig,
    ) -> (Self, ClientActorRef<A>) {
        let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (self_ref, self_inbox) = mpsc::unbounded_channel();
        let (reply_to, responses) = mpsc::unbounded_channel();
        let actor = Self {
            frontend,
            mailbox,
            self_ref,
            self_inbox,
            reply_to,
            responses,
            store,
            resolver,
            config,
        };
        (actor, ClientActorRef::new(sender))
    }

    /// Recovers the client's identity, then processes messages until stopped or until
    /// every handle has been dropped.
    pub async fn run<F>(mut self, factory: F)
    where
        F: FnOnce(&ClientActorContext<A>) -> A + Send + 'static,
    {
        let persistence_id = self.frontend.to_string();
        info!(%persistence_id, "Client actor started");

        let initial = InitialClientActorContext::new(
            self.frontend.clone(),
            self.self_ref.clone(),
            self.reply_to.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.resolver),
            self.config.clone(),
        );
        let factory: BehaviorFactory<A> = Box::new(factory);
        let mut state = match self.recover(ClientState::recovering(initial, factory)).await {
            Ok(state) => state,
            Err(e) => {
                error!(%persistence_id, error = %e, "Recovery failed");
                return;
            }
        };

        loop {
            // Handles only get through once the identity is saved.
            let accepting = !matches!(state, ClientState::Saving(_));
            let message = tokio::select! {
                Some(message) = self.self_inbox.recv() => message,
                Some(response) = self.responses.recv() => {
                    ClientMessage::Command(ClientCommand::Response(response))
                }
                message = self.mailbox.recv(), if accepting => match message {
                    Some(message) => message,
                    None => {
                        debug!(%persistence_id, "All handles dropped");
                        break;
                    }
                },
            };

            let command = match message {
                ClientMessage::Stop => break,
                ClientMessage::Command(command) => command,
            };
            if state.is_shut_down() {
                debug!(%persistence_id, ?command, "Client is shut down, dropping command");
                continue;
            }
            state = match state.on_command(command) {
                Ok(next) => next,
                Err(e) => {
                    error!(%persistence_id, error = %e, "Client failed");
                    let _ = self.self_ref.send(ClientMessage::Stop);
                    ClientState::ShutDown
                }
            };
        }

        if let ClientState::Active {
            mut behavior,
            mut context,
        } = state
        {
            context.poison_all(&mut behavior, RequestError::Closed);
        }
        info!(%persistence_id, "Client actor stopped");
    }

    /// Replays the persisted identity and starts saving the next generation.
    async fn recover(&self, state: ClientState<A>) -> Result<ClientState<A>, AccessError> {
        let persistence_id = self.frontend.to_string();
        let mut state = state;
        if let Some(identifier) = self.store.load(&persistence_id).await? {
            state = state.on_recover(RecoveryEvent::Snapshot(identifier))?;
        }
        state.on_recover(RecoveryEvent::Completed)
    }
}
