//! # Observability & Tracing
//!
//! Client actors log through the `tracing` crate with structured fields, so a single
//! request can be followed across enqueue, send, retransmission and completion:
//!
//! ```text
//! INFO  Client active client=member-1-frontend-datastore-3
//! DEBUG Enqueued target_id=member-1-frontend-datastore-3/shard-1 sequence=0 size=1
//! INFO  Backend resolved target_id=member-1-frontend-datastore-3/shard-1 cookie=1 version=v5 outstanding=1
//! DEBUG Completed target_id=member-1-frontend-datastore-3/shard-1 sequence=0 size=0
//! ```
//!
//! ## Levels
//!
//! - `info`: lifecycle (recovery, activation, shutdown), backend changes, poisoning
//! - `warn`: ignored responses, failed sends, failed lookups, requests failed after retries
//! - `error`: fatal conditions (frontend mismatch, persistence failure, retired generation)
//! - `debug`: every enqueue, completion, retransmission and self-message
//!
//! ```bash
//! RUST_LOG=info cargo run
//! RUST_LOG=access_framework=debug cargo run
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once (tests do); only the first call installs anything.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // Fields such as target_id and client identify the source
        .compact()
        .try_init();
}
