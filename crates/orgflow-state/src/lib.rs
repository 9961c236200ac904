//! Run history persistence for the orgflow migration engine.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for run tracking, step results, and the per-record
//! error log.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::{RunRow, StateBackend};
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
