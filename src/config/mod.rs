//! Configuration for the archive queue daemon
//!
//! `QueueConfig` is built through a typestate builder that refuses to
//! `build()` until a storage directory is set. Everything else has a default
//! (see `utils::constants`).

pub mod builder;
pub mod env;
pub mod getters;
pub mod types;

pub use builder::{QueueConfigBuilder, WithStorageDir};
pub use types::QueueConfig;
