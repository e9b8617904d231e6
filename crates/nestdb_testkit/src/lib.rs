//! # NestDB Testkit
//!
//! Test utilities for NestDB.
//!
//! This crate provides:
//! - Store fixtures over memory and file journals
//! - A journal backend with injectable failures
//! - Property-based generators for nested work-unit plans
//! - Cross-module scenario tests
//!
//! ## Usage
//!
//! ```rust
//! use nestdb_testkit::prelude::*;
//! use nestdb_core::{AccessType, WorkUnit};
//!
//! let store = TestStore::memory();
//! let ctx = store.context();
//! let mut unit = WorkUnit::new(&ctx, false);
//! unit.add_collection("docs", AccessType::Write).unwrap();
//! unit.begin().unwrap();
//! unit.commit(false).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
