//! Shared types, error model, and configuration for the contact reconciler.
//!
//! This crate is the foundation depended on by all other reconciler crates.
//! It provides:
//! - [`ReconcilerError`] - the unified error type
//! - Domain types ([`ContactRecord`], [`LinkPrecedence`], [`ContactId`])
//! - Wire types ([`IdentifyRequest`], [`IdentifyResponse`], [`ConsolidatedContact`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ServerConfig, StorageConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{ReconcilerError, Result};
pub use types::{
    ConsolidatedContact, ContactId, ContactRecord, IdentifyRequest, IdentifyResponse,
    LinkPrecedence, NewContact,
};
