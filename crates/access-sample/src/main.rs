//! # Access Sample
//!
//! A sharded key-value store whose frontend is a sequenced client actor.
//!
//! ## 🚀 Core Components
//!
//! - **model**: [`SessionId`](access_sample::model::SessionId) targets and the key-value protocol.
//! - **shard_actor**: Backend actors applying requests in sequence, fencing retired generations.
//! - **frontend_actor**: The [`KvFrontend`](access_sample::frontend_actor::KvFrontend) behavior run by the framework's client actor.
//! - **clients**: [`FrontendClient`](access_sample::clients::FrontendClient), a typed wrapper hiding message passing.
//! - **lifecycle**: Orchestration layer that starts, restarts and stops everything.
//!
//! ## 📚 Quick Start
//!
//! The entry point below:
//! 1.  Starts a [`DatastoreSystem`] with two shards.
//! 2.  Writes, reads and deletes keys on both shards.
//! 3.  Restarts the frontend, which comes back with the next generation.
//!
//! ## 🧪 Testing
//!
//! See [`access_framework::mock`] for utilities to test behaviors without real shards.

use access_sample::lifecycle::{setup_tracing, DatastoreSystem};
use access_sample::model::ShardId;
use tracing::{info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    // Setup tracing once for the entire application
    setup_tracing();

    info!("Starting sample data store");
    let mut system = DatastoreSystem::new(2);

    let span = tracing::info_span!("writes");
    async {
        for (shard, key, value) in [(0, "alpha", "1"), (1, "beta", "2"), (0, "gamma", "3")] {
            system
                .frontend
                .write(ShardId(shard), key, value)
                .await
                .map_err(|e| e.to_string())?;
            info!(shard, key, value, "Written");
        }
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    let value = system
        .frontend
        .read(ShardId(1), "beta")
        .await
        .map_err(|e| e.to_string())?;
    info!(?value, "Read beta");

    let existed = system
        .frontend
        .delete(ShardId(0), "alpha")
        .await
        .map_err(|e| e.to_string())?;
    info!(existed, "Deleted alpha");

    let stats = system.frontend.stats().await.map_err(|e| e.to_string())?;
    info!(?stats, "Frontend stats");

    // A restarted frontend is a new generation; the shards keep the data.
    system.restart_frontend().await?;
    let value = system
        .frontend
        .read(ShardId(0), "gamma")
        .await
        .map_err(|e| e.to_string())?;
    let stats = system.frontend.stats().await.map_err(|e| e.to_string())?;
    info!(?value, generation = stats.generation, "Read gamma after restart");

    // Shutdown system gracefully
    system.shutdown().await?;

    info!("Application completed successfully");
    Ok(())
}
