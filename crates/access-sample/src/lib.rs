//! # Access Sample Library
//!
//! A small sharded key-value store built on `access-framework`, exposed as a library for
//! integration testing.

pub mod clients;
pub mod frontend_actor;
pub mod lifecycle;
pub mod model;
pub mod shard_actor;
