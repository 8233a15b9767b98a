//! # Client Handle
//!
//! This module defines the handle used to talk to a running [`ClientActor`](crate::ClientActor).

use crate::actor::ClientMessage;
use crate::behavior::{ClientActorBehavior, ClientCommand, InternalCommand, Transition};
use crate::context::ClientActorContext;
use crate::error::AccessError;
use tokio::sync::{mpsc, oneshot};

/// ## ClientActorRef
///
/// The `ClientActorRef<A>` forwards commands to a client actor over a Tokio mpsc channel.
/// It is cheap to clone and can be shared across tasks; the actor stops once every
/// handle has been dropped.
///
/// * **`send`** – fire and forget.
/// * **`ask`** – builds the command around a oneshot sender and waits for the reply.
/// * **`execute`** – runs a closure inside the actor, against its behavior and context.
pub struct ClientActorRef<A: ClientActorBehavior> {
    sender: mpsc::Sender<ClientMessage<A>>,
}

impl<A: ClientActorBehavior> Clone for ClientActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A: ClientActorBehavior> ClientActorRef<A> {
    pub fn new(sender: mpsc::Sender<ClientMessage<A>>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, command: A::Command) -> Result<(), AccessError> {
        self.deliver(ClientCommand::Client(command)).await
    }

    pub async fn ask<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> A::Command,
    ) -> Result<R, AccessError> {
        let (respond_to, response) = oneshot::channel();
        self.send(command(respond_to)).await?;
        response.await.map_err(|_| AccessError::ActorDropped)
    }

    pub async fn execute(
        &self,
        run: impl FnOnce(&mut A, &mut ClientActorContext<A>) -> Transition + Send + 'static,
    ) -> Result<(), AccessError> {
        self.deliver(ClientCommand::Internal(InternalCommand::new(run)))
            .await
    }

    /// Asks the actor to stop after the messages already in its mailbox.
    pub async fn stop(&self) -> Result<(), AccessError> {
        self.sender
            .send(ClientMessage::Stop)
            .await
            .map_err(|_| AccessError::ActorClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn deliver(&self, command: ClientCommand<A>) -> Result<(), AccessError> {
        self.sender
            .send(ClientMessage::Command(command))
            .await
            .map_err(|_| AccessError::ActorClosed)
    }
}
