//! CLI command implementations.

pub mod run;
pub mod select;
pub mod up;
pub mod validate;
