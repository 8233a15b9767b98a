//! Typed wrappers around actor handles.

pub mod frontend_client;

pub use frontend_client::*;
