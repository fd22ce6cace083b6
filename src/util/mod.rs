//! Shared utilities

pub mod config;
pub mod hash;

pub use config::Config;
