//! Core orchestration crate for orgflow migration execution.
//!
//! Takes a declarative [`MigrationTemplate`](orgflow_types::template::MigrationTemplate),
//! resolves its placeholders into an immutable execution plan, validates
//! referential integrity against the target org, and drives each step's
//! extract/transform/load sequence with per-record failure reporting.

#![warn(clippy::pedantic)]

pub mod cache;
pub mod client;
pub mod context;
pub mod errors;
pub mod executor;
pub mod hooks;
pub mod orchestrator;
pub mod resolve;
pub mod rest;
pub mod schema;
pub mod template;
pub mod validation;

#[cfg(test)]
pub(crate) mod mock;

// Re-export public API for convenience
pub use errors::EngineError;
pub use orchestrator::Orchestrator;
pub use resolve::{prepare_plan, resolve_plan, ResolvedPlan};
pub use template::TemplateStore;
pub use validation::validate;
