//! Migration template loading, validation, and registry.

pub mod parser;
pub mod store;
pub mod validator;

pub use store::TemplateStore;
