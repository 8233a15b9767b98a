//! The key-value protocol spoken between the frontend and the shards.

use crate::model::SessionId;
use access_framework::AccessProtocol;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvRequest {
    Read { key: String },
    Write { key: String, value: String },
    Delete { key: String },
}

impl KvRequest {
    pub fn key(&self) -> &str {
        match self {
            KvRequest::Read { key } | KvRequest::Write { key, .. } | KvRequest::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvResponse {
    /// The value of a read key, if present.
    Value(Option<String>),
    /// A write was applied.
    Ack,
    /// A delete was applied; `true` if the key existed.
    Removed(bool),
}

/// Marker type binding the key-value payloads to [`SessionId`] targets.
#[derive(Debug)]
pub struct KvProtocol;

impl AccessProtocol for KvProtocol {
    type Target = SessionId;
    type Request = KvRequest;
    type Success = KvResponse;

    fn cookie(target: &SessionId) -> u64 {
        target.shard.0
    }
}
