//! # System Lifecycle & Orchestration
//!
//! This module manages the runtime lifecycle of the sample data store: the shard
//! actors, the directory that knows their leaders and the frontend client actor.
//!
//! ## The Orchestration Pattern
//!
//! Individual actors are simple; **wiring them together** is where complexity lives.
//!
//! **Key Responsibilities:**
//! 1. **Actor Creation** - Start one [`ShardActor`](crate::shard_actor::ShardActor) per shard
//! 2. **Dependency Injection** - Hand the frontend a resolver over the [`ShardDirectory`](crate::shard_actor::ShardDirectory)
//! 3. **Lifecycle Management** - Restart the frontend (next generation) or move shard leaders
//! 4. **Graceful Shutdown** - Stop the frontend first, then release the shards
//!
//! ## Graceful Shutdown
//!
//! [`DatastoreSystem::shutdown`] sends the frontend a `Shutdown` command, which fails
//! whatever is still outstanding, and waits for its task to end. Shards stop once the last [`BackendRef`](access_framework::BackendRef) to them is
//! gone: the frontend's cached copies disappear with the frontend, the directory's
//! copies with `clear()`.
//!
//! ## Observability & Tracing
//!
//! [`setup_tracing`] (re-exported from the framework) initializes structured logging:
//!
//! ```bash
//! RUST_LOG=info cargo run      # Lifecycle, leader changes, retries
//! RUST_LOG=debug cargo run     # Every request and response
//! ```

pub mod datastore_system;

pub use access_framework::tracing::setup_tracing;
pub use datastore_system::*;
