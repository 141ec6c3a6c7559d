//! Shared types, errors and configuration for the murmur workspace.

pub mod config;
pub mod error;
pub mod types;
