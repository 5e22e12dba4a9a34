//! Contact reconciliation: matching incoming fragments against stored
//! contacts, resolving them to their group's primary, merging groups a
//! request bridges, and building the consolidated view.

mod consolidate;
pub mod engine;
mod resolve;

pub use engine::ReconciliationEngine;
