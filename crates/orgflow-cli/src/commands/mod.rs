pub mod history;
pub mod run;
pub mod templates;
pub mod validate;
