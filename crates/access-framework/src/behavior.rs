//! # Client Behavior State Machine
//!
//! A client actor moves through four states:
//!
//! ```text
//! Recovering ──(replay done)──► Saving ──(snapshot saved)──► Active
//!      │                          │                            │
//!      └──(frontend mismatch)     └──(save failed)             └──(callback / halt)
//!                 ▼                          ▼                            ▼
//!                                      ShutDown
//! ```
//!
//! - **Recovering** replays the persisted identity. Commands are rejected.
//! - **Saving** waits for the next generation to be persisted. Commands other than the
//!   save outcome are logged and dropped.
//! - **Active** hands commands to the application's [`ClientActorBehavior`]. A behavior
//!   method returning [`Transition::ShutDown`] shuts the client down; requests still
//!   outstanding then fail with [`RequestError::Closed`].
//! - **ShutDown** is terminal.
//!
//! Transitions are plain values: [`ClientState::on_command`] consumes the current state
//! and returns the next one, so a state can never be used after it was replaced.

use crate::context::{ClientActorContext, InitialClientActorContext};
use crate::error::{AccessError, PersistenceError, RequestError};
use crate::identifier::ClientIdentifier;
use crate::message::{AccessProtocol, Response};
use std::fmt::Debug;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Whether a behavior or request callback wants the client to keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    ShutDown,
}

/// Application logic of an active client.
///
/// The behavior is owned by the actor, which lends it to each method. Return
/// [`Transition::Stay`] to keep going or [`Transition::ShutDown`] to stop the client.
pub trait ClientActorBehavior: Sized + Send + 'static {
    type Protocol: AccessProtocol;
    type Command: Debug + Send + 'static;

    /// Handles a command sent through the actor's handle.
    fn on_command(&mut self, ctx: &mut ClientActorContext<Self>, command: Self::Command) -> Transition;

    /// Handles a response from a backend. Completes the matching request by default.
    fn on_response(
        &mut self,
        ctx: &mut ClientActorContext<Self>,
        response: Response<Self::Protocol>,
    ) -> Transition {
        ctx.complete_request(self, response)
    }

    /// Called once when a backend reports this client's generation as retired. The
    /// client shuts down right after.
    fn halt_client(&mut self, ctx: &mut ClientActorContext<Self>, cause: &RequestError);
}

/// Builds the active behavior once the client's identity is known.
pub type BehaviorFactory<A> = Box<dyn FnOnce(&ClientActorContext<A>) -> A + Send>;

/// A closure the actor runs against its own state.
pub struct InternalCommand<A: ClientActorBehavior> {
    run: Box<dyn FnOnce(&mut A, &mut ClientActorContext<A>) -> Transition + Send>,
}

impl<A: ClientActorBehavior> InternalCommand<A> {
    pub fn new(run: impl FnOnce(&mut A, &mut ClientActorContext<A>) -> Transition + Send + 'static) -> Self {
        Self { run: Box::new(run) }
    }

    pub fn execute(self, behavior: &mut A, ctx: &mut ClientActorContext<A>) -> Transition {
        (self.run)(behavior, ctx)
    }
}

/// Everything a client actor processes after recovery.
pub enum ClientCommand<A: ClientActorBehavior> {
    Client(A::Command),
    Response(Response<A::Protocol>),
    Internal(InternalCommand<A>),
    SnapshotSaved(Result<(), PersistenceError>),
    Tick,
}

impl<A: ClientActorBehavior> Debug for ClientCommand<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client(command) => f.debug_tuple("Client").field(command).finish(),
            Self::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Self::Internal(_) => f.write_str("Internal"),
            Self::SnapshotSaved(result) => f.debug_tuple("SnapshotSaved").field(result).finish(),
            Self::Tick => f.write_str("Tick"),
        }
    }
}

/// Replayed from the snapshot store during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
    Snapshot(ClientIdentifier),
    Completed,
}

pub struct RecoveringState<A: ClientActorBehavior> {
    context: InitialClientActorContext<A>,
    last_identifier: Option<ClientIdentifier>,
    factory: BehaviorFactory<A>,
}

pub struct SavingState<A: ClientActorBehavior> {
    context: InitialClientActorContext<A>,
    identifier: ClientIdentifier,
    factory: BehaviorFactory<A>,
}

pub enum ClientState<A: ClientActorBehavior> {
    Recovering(RecoveringState<A>),
    Saving(SavingState<A>),
    Active {
        behavior: A,
        context: ClientActorContext<A>,
    },
    ShutDown,
}

impl<A: ClientActorBehavior> ClientState<A> {
    pub fn recovering(context: InitialClientActorContext<A>, factory: BehaviorFactory<A>) -> Self {
        Self::Recovering(RecoveringState {
            context,
            last_identifier: None,
            factory,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Recovering(_) => "recovering",
            Self::Saving(_) => "saving",
            Self::Active { .. } => "active",
            Self::ShutDown => "shut-down",
        }
    }

    pub fn is_shut_down(&self) -> bool {
        matches!(self, Self::ShutDown)
    }

    pub fn behavior(&self) -> Option<&A> {
        match self {
            Self::Active { behavior, .. } => Some(behavior),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&ClientActorContext<A>> {
        match self {
            Self::Active { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The identifier being saved or already in use.
    pub fn identifier(&self) -> Option<&ClientIdentifier> {
        match self {
            Self::Saving(saving) => Some(&saving.identifier),
            Self::Active { context, .. } => Some(context.identifier()),
            _ => None,
        }
    }

    /// Applies a replayed recovery event.
    pub fn on_recover(self, event: RecoveryEvent) -> Result<Self, AccessError> {
        let mut recovering = match self {
            Self::Recovering(recovering) => recovering,
            Self::Active { .. } => {
                return Err(AccessError::illegal_state("frontend has been recovered"))
            }
            other => {
                return Err(AccessError::illegal_state(format!(
                    "recovery event in {} state",
                    other.name()
                )))
            }
        };

        match event {
            RecoveryEvent::Snapshot(identifier) => {
                debug!(persistence_id = recovering.context.persistence_id(), %identifier, "Recovered snapshot");
                recovering.last_identifier = Some(identifier);
                Ok(Self::Recovering(recovering))
            }
            RecoveryEvent::Completed => {
                let frontend = recovering.context.frontend().clone();
                let next = match recovering.last_identifier {
                    Some(previous) if previous.frontend != frontend => {
                        error!(persistence_id = recovering.context.persistence_id(), persisted = %previous.frontend, local = %frontend, "Frontend mismatch");
                        return Err(AccessError::FrontendMismatch {
                            persisted: previous.frontend.to_string(),
                            local: frontend.to_string(),
                        });
                    }
                    Some(previous) => match previous.next() {
                        Some(next) => next,
                        None => {
                            error!(persistence_id = recovering.context.persistence_id(), %previous, "Generations exhausted");
                            return Err(AccessError::GenerationsExhausted {
                                frontend: previous.frontend.to_string(),
                                generation: previous.generation,
                            });
                        }
                    },
                    None => ClientIdentifier::first(frontend),
                };
                info!(persistence_id = recovering.context.persistence_id(), identifier = %next, "Recovery complete, saving next generation");
                recovering.context.save_snapshot(next.clone());
                Ok(Self::Saving(SavingState {
                    context: recovering.context,
                    identifier: next,
                    factory: recovering.factory,
                }))
            }
        }
    }

    /// Processes one command and returns the next state.
    ///
    /// An `Err` is fatal: the caller must treat the client as shut down.
    pub fn on_command(self, command: ClientCommand<A>) -> Result<Self, AccessError> {
        match self {
            Self::Recovering(_) => Err(AccessError::illegal_state("frontend is recovering")),
            Self::Saving(saving) => Ok(saving.on_command(command)),
            Self::Active {
                mut behavior,
                mut context,
            } => {
                let transition = match command {
                    ClientCommand::Internal(internal) => internal.execute(&mut behavior, &mut context),
                    ClientCommand::Client(command) => behavior.on_command(&mut context, command),
                    ClientCommand::Response(response) => {
                        on_response(&mut behavior, &mut context, response)
                    }
                    ClientCommand::Tick => context.handle_timeouts(&mut behavior, Instant::now()),
                    ClientCommand::SnapshotSaved(result) => {
                        warn!(client = %context.identifier(), ?result, "Unexpected snapshot outcome while active");
                        Transition::Stay
                    }
                };
                Ok(match transition {
                    Transition::Stay => Self::Active { behavior, context },
                    Transition::ShutDown => {
                        info!(client = %context.identifier(), outstanding = context.in_flight(), "Client shutting down");
                        // Already stopping; what these callbacks ask for no longer matters.
                        let _ = context.poison_all(&mut behavior, RequestError::Closed);
                        context.stop_self();
                        Self::ShutDown
                    }
                })
            }
            Self::ShutDown => {
                debug!(?command, "Client is shut down, dropping command");
                Ok(Self::ShutDown)
            }
        }
    }
}

fn on_response<A: ClientActorBehavior>(
    behavior: &mut A,
    context: &mut ClientActorContext<A>,
    response: Response<A::Protocol>,
) -> Transition {
    match response.cause() {
        Some(cause) if cause.is_retired_generation() => {
            let cause = cause.clone();
            error!(client = %context.identifier(), cause = %cause, "Generation retired, halting client");
            behavior.halt_client(context, &cause);
            Transition::ShutDown
        }
        _ => behavior.on_response(context, response),
    }
}

impl<A: ClientActorBehavior> SavingState<A> {
    fn on_command(self, command: ClientCommand<A>) -> ClientState<A> {
        match command {
            ClientCommand::SnapshotSaved(Ok(())) => {
                let context = self.context.into_active(self.identifier);
                let behavior = (self.factory)(&context);
                info!(client = %context.identifier(), "Client active");
                ClientState::Active { behavior, context }
            }
            ClientCommand::SnapshotSaved(Err(e)) => {
                error!(identifier = %self.identifier, error = %e, "Failed to persist identity, shutting down");
                self.context.stop_self();
                ClientState::ShutDown
            }
            other => {
                warn!(identifier = %self.identifier, command = ?other, "Ignoring command while saving identity");
                ClientState::Saving(self)
            }
        }
    }
}
