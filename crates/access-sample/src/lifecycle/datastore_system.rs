use crate::clients::FrontendClient;
use crate::frontend_actor::{self, KvFrontend};
use crate::model::{KvProtocol, ShardId};
use crate::shard_actor::{ShardActor, ShardDirectory, ShardStorage};
use access_framework::{
    BackendInfoResolver, BackendRef, ClientConfig, FrontendIdentifier, InMemorySnapshotStore,
    ProtocolVersion, SnapshotStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Mailbox capacity of each shard actor.
pub const SHARD_MAILBOX: usize = 64;

/// The main runtime orchestrator for the sample data store.
///
/// `DatastoreSystem` is responsible for:
/// - **Lifecycle Management**: Starting and stopping the shard actors and the frontend
/// - **Dependency Wiring**: Handing the frontend a resolver backed by the shard directory
/// - **Leader Changes**: Electing new shard leaders while the frontend keeps running
///
/// # Example
///
/// ```ignore
/// let system = DatastoreSystem::new(2);
///
/// system.frontend.write(ShardId(0), "greeting", "hello").await?;
/// let value = system.frontend.read(ShardId(0), "greeting").await?;
///
/// // Gracefully shut down when done
/// system.shutdown().await?;
/// ```
pub struct DatastoreSystem {
    /// Client for interacting with the frontend actor
    pub frontend: FrontendClient,

    /// Current leader of every shard
    pub directory: Arc<ShardDirectory>,

    frontend_id: FrontendIdentifier,
    store: Arc<dyn SnapshotStore>,
    config: ClientConfig,
    frontend_handle: JoinHandle<()>,
    shard_handles: Vec<JoinHandle<()>>,
    storages: HashMap<ShardId, ShardStorage>,
}

impl DatastoreSystem {
    /// Starts `shards` shard actors and a frontend with an in-memory identity store and
    /// configuration from the environment.
    pub fn new(shards: u64) -> Self {
        Self::with_options(
            shards,
            FrontendIdentifier::new("member-1", "datastore"),
            Arc::new(InMemorySnapshotStore::new()),
            ClientConfig::from_env(),
        )
    }

    pub fn with_options(
        shards: u64,
        frontend_id: FrontendIdentifier,
        store: Arc<dyn SnapshotStore>,
        config: ClientConfig,
    ) -> Self {
        // 1. Start the shards and register them as leaders
        let directory = Arc::new(ShardDirectory::new());
        let mut shard_handles = Vec::new();
        let mut storages = HashMap::new();
        for id in 0..shards {
            let shard = ShardId(id);
            let (actor, backend) = ShardActor::new(shard, SHARD_MAILBOX);
            storages.insert(shard, actor.storage().clone());
            directory.set_leader(shard, backend, ProtocolVersion::CURRENT);
            shard_handles.push(tokio::spawn(actor.run()));
        }

        // 2. Start the frontend with a resolver over the directory
        let (frontend, frontend_handle) = start_frontend(&frontend_id, &store, &directory, &config);
        info!(shards, frontend = %frontend_id, "System started");

        Self {
            frontend,
            directory,
            frontend_id,
            store,
            config,
            frontend_handle,
            shard_handles,
            storages,
        }
    }

    /// Spawns `actor` and makes it the leader of `shard`.
    ///
    /// The frontend keeps using the previous leader until one of its requests times out.
    /// Build `actor` with [`ShardActor::with_storage`] over [`DatastoreSystem::storage`]
    /// to keep the shard's data and sessions; a leader with fresh storage starts empty.
    pub fn elect_leader(&mut self, shard: ShardId, actor: ShardActor, backend: BackendRef<KvProtocol>) {
        self.storages.insert(shard, actor.storage().clone());
        self.shard_handles.push(tokio::spawn(actor.run()));
        self.directory.set_leader(shard, backend, ProtocolVersion::CURRENT);
    }

    /// Storage of the current leader of `shard`.
    pub fn storage(&self, shard: ShardId) -> Option<ShardStorage> {
        self.storages.get(&shard).cloned()
    }

    /// Stops the frontend and starts its next generation against the same shards.
    pub async fn restart_frontend(&mut self) -> Result<(), String> {
        let _ = self.frontend.shutdown().await;
        (&mut self.frontend_handle)
            .await
            .map_err(|e| format!("Frontend task failed: {:?}", e))?;

        let (frontend, handle) = start_frontend(&self.frontend_id, &self.store, &self.directory, &self.config);
        self.frontend = frontend;
        self.frontend_handle = handle;
        info!(frontend = %self.frontend_id, "Frontend restarted");
        Ok(())
    }

    /// Gracefully shuts down the entire system.
    ///
    /// 1. Asks the frontend to stop and waits for it
    /// 2. Clears the directory, which drops the last handles to the shards
    /// 3. Waits for all shard tasks to complete
    ///
    /// # Returns
    ///
    /// - `Ok(())` if all actors shut down cleanly
    /// - `Err(String)` if any actor task failed or panicked
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down system...");

        // An already halted frontend has nothing left to stop.
        let _ = self.frontend.shutdown().await;
        drop(self.frontend);
        if let Err(e) = self.frontend_handle.await {
            error!("Frontend task failed: {:?}", e);
            return Err(format!("Frontend task failed: {:?}", e));
        }

        self.directory.clear();
        for handle in self.shard_handles {
            if let Err(e) = handle.await {
                error!("Shard task failed: {:?}", e);
                return Err(format!("Shard task failed: {:?}", e));
            }
        }

        info!("System shutdown complete.");
        Ok(())
    }
}

fn start_frontend(
    frontend_id: &FrontendIdentifier,
    store: &Arc<dyn SnapshotStore>,
    directory: &Arc<ShardDirectory>,
    config: &ClientConfig,
) -> (FrontendClient, JoinHandle<()>) {
    let resolver = Arc::new(BackendInfoResolver::new(directory.clone()));
    let (actor, handle) = frontend_actor::new(
        frontend_id.clone(),
        Arc::clone(store),
        resolver,
        config.clone(),
    );
    let task = tokio::spawn(actor.run(KvFrontend::new));
    (FrontendClient::new(handle), task)
}
