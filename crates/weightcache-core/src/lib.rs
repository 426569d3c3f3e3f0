//! weightcache-core: Core types for the weightcache engine
//!
//! This crate provides the fundamental types shared by the store and cache crates:
//! - Artifact, info and stored-record types
//! - The three-table layout
//! - Configuration types
//! - Error handling
//! - Logging bootstrap

pub mod artifact;
pub mod config;
pub mod error;
pub mod logging;

pub use artifact::*;
pub use self::config::*;
pub use error::*;
pub use logging::init_logging;
