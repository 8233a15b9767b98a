//! Where each shard's leader currently lives.

use crate::model::{KvProtocol, ShardId};
use access_framework::{BackendInfo, BackendRef, ProtocolVersion, RequestError, ShardLeaderResolver};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Shard leader registry shared by the system and the frontend's resolver.
///
/// Updated by whoever elects leaders (here: [`DatastoreSystem`](crate::lifecycle::DatastoreSystem)
/// and tests), read on every backend lookup.
#[derive(Default)]
pub struct ShardDirectory {
    leaders: DashMap<ShardId, (BackendRef<KvProtocol>, ProtocolVersion)>,
    lookups: AtomicUsize,
}

impl ShardDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` as the leader of `shard`, replacing any previous leader.
    pub fn set_leader(&self, shard: ShardId, backend: BackendRef<KvProtocol>, version: ProtocolVersion) {
        info!(%shard, %version, "Leader registered");
        self.leaders.insert(shard, (backend, version));
    }

    pub fn remove_leader(&self, shard: ShardId) -> bool {
        self.leaders.remove(&shard).is_some()
    }

    /// Forgets every leader, releasing the shard actors' mailboxes.
    pub fn clear(&self) {
        self.leaders.clear();
    }

    /// Number of lookups served so far, failed ones included.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl ShardLeaderResolver<KvProtocol> for ShardDirectory {
    fn get_shard_leader(
        &self,
        cookie: u64,
    ) -> BoxFuture<'static, Result<(BackendRef<KvProtocol>, ProtocolVersion), RequestError>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let shard = ShardId(cookie);
        let leader = self
            .leaders
            .get(&shard)
            .map(|leader| leader.value().clone())
            .ok_or_else(|| RequestError::BackendUnavailable(format!("no leader for {shard}")));
        debug!(%shard, found = leader.is_ok(), "Leader lookup");
        async move { leader }.boxed()
    }

    fn invalidate_backend_info(&self, info: &BackendInfo<KvProtocol>) {
        debug!(shard = %ShardId(info.cookie()), "Cached leader invalidated");
    }
}
