//! Shared data model for the orgflow migration engine.
//!
//! Pure data types used across the engine, state, and CLI crates.
//! Kept dependency-light so every crate can share them without
//! circular dependencies.

#![warn(clippy::pedantic)]

pub mod error;
pub mod issue;
pub mod record;
pub mod result;
pub mod state;
pub mod template;
