//! # Mirror Testkit
//!
//! Test utilities for the device state mirror.
//!
//! This crate provides:
//! - Fixtures for state trees, raw events and sample device payloads
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirror_testkit::prelude::*;
//!
//! #[test]
//! fn patch_applies() {
//!     let mut state = tree(sample_status());
//!     merge(&mut state, &tree(json!({"MasterInfo": {"LiveTemp_oC": 23.0}})));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
