use access_framework::ClientIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Type-safe identifier for shards. Doubles as the routing cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(pub u64);

impl From<u64> for ShardId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// The target of a request: one client incarnation talking to one shard.
///
/// Sequence numbers are scoped to a session, so a restarted frontend (new generation)
/// starts every session again at sequence 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub client: ClientIdentifier,
    pub shard: ShardId,
}

impl SessionId {
    pub fn new(client: ClientIdentifier, shard: ShardId) -> Self {
        Self { client, shard }
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.client, self.shard)
    }
}
