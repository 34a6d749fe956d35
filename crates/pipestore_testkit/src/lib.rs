//! # pipestore testkit
//!
//! Test utilities for pipestore engines.
//!
//! This crate provides:
//! - Sample models ([`fixtures`])
//! - Property-based test generators using proptest
//! - An engine conformance suite
//! - Concurrent stress helpers
//! - Test log capture
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pipestore_testkit::prelude::*;
//!
//! #[test]
//! fn engine_conforms() {
//!     init_test_logging();
//!     ConformanceSuite::new(MyEngine::with_config).run_all();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use conformance::{ConformanceSuite, Fixture};
pub use fixtures::{Block, Operation};
pub use logging::init_test_logging;
