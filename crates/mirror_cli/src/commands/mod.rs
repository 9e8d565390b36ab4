//! CLI command implementations.

pub mod merge;
pub mod replay;
