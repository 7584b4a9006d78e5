// ABOUTME: Library root for drydock - exposes the agent's building blocks.
// ABOUTME: The main binary is in main.rs.

pub mod agent;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod executor;
pub mod lease;
pub mod maintenance;
pub mod notify;
pub mod staging;
pub mod store;
pub mod types;
