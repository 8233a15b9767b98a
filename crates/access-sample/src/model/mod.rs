//! Data types shared by the frontend and the shard backends.

pub mod kv;
pub mod session;

pub use kv::*;
pub use session::*;
