//! Test utilities for spanstore.
//!
//! This module provides reusable helpers for building test configurations
//! and seeding project hierarchies into a store.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{ProjectFixture, TestConfigBuilder};
//!
//! let config = TestConfigBuilder::new()
//!     .in_memory()
//!     .with_chunk_size(2)
//!     .build();
//! ```

mod config_builder;
mod fixtures;

pub use config_builder::TestConfigBuilder;
pub use fixtures::{ProjectFixture, SeededProject, at_second};
