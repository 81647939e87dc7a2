//! # seglog Testkit
//!
//! Test utilities for seglog.
//!
//! This crate provides:
//! - Temporary log fixtures
//! - Property-based test generators using proptest
//! - Corruption and crash injection helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seglog_testkit::prelude::*;
//!
//! #[test]
//! fn appends_survive_reopen() {
//!     let log = TempLog::small();
//!     let seq = log.append(b"x").unwrap();
//!     let log = log.reopen();
//!     assert_eq!(log.read(seq.as_u64()).unwrap(), b"x");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
