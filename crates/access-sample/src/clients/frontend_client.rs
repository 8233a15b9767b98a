//! # Frontend Client
//!
//! Provides a high‑level API for reading and writing keys through the frontend actor.
//! It wraps a `ClientActorRef<KvFrontend>` and turns each call into a command.
use crate::frontend_actor::{FrontendCommand, FrontendStats, KvFrontend};
use crate::model::ShardId;
use access_framework::{AccessError, ClientActorRef, RequestError};
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    /// The frontend actor is gone or dropped the reply.
    #[error("Actor communication error: {0}")]
    ActorCommunicationError(#[from] AccessError),
    /// The request reached the data store and failed there (or gave up on the way).
    #[error("Request failed: {0}")]
    RequestFailed(#[from] RequestError),
}

/// Client for interacting with the frontend actor.
#[derive(Clone)]
pub struct FrontendClient {
    inner: ClientActorRef<KvFrontend>,
}

impl FrontendClient {
    pub fn new(inner: ClientActorRef<KvFrontend>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &ClientActorRef<KvFrontend> {
        &self.inner
    }

    #[instrument(skip(self))]
    pub async fn read(&self, shard: ShardId, key: &str) -> Result<Option<String>, FrontendError> {
        debug!("Sending request");
        let key = key.to_string();
        let value = self
            .inner
            .ask(|respond_to| FrontendCommand::Read {
                shard,
                key,
                respond_to,
            })
            .await??;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    pub async fn write(&self, shard: ShardId, key: &str, value: impl Into<String>) -> Result<(), FrontendError> {
        debug!("Sending request");
        let key = key.to_string();
        let value = value.into();
        self.inner
            .ask(|respond_to| FrontendCommand::Write {
                shard,
                key,
                value,
                respond_to,
            })
            .await??;
        Ok(())
    }

    /// Deletes `key`, returning whether it existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, shard: ShardId, key: &str) -> Result<bool, FrontendError> {
        debug!("Sending request");
        let key = key.to_string();
        let existed = self
            .inner
            .ask(|respond_to| FrontendCommand::Delete {
                shard,
                key,
                respond_to,
            })
            .await??;
        Ok(existed)
    }

    pub async fn stats(&self) -> Result<FrontendStats, FrontendError> {
        Ok(self
            .inner
            .ask(|respond_to| FrontendCommand::Stats { respond_to })
            .await?)
    }

    /// Fails outstanding requests and stops the frontend actor.
    pub async fn shutdown(&self) -> Result<(), FrontendError> {
        self.inner
            .ask(|respond_to| FrontendCommand::Shutdown { respond_to })
            .await?;
        Ok(())
    }
}
