//! Recast - bounded, fault-tolerant media transcoding job service
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod error;
pub mod invoker;
pub mod queue;
pub mod registry;
pub mod server;
pub mod staging;
pub mod store;
pub mod worker;
