//! Shared test utilities for the folder synchronizer workspace.
//!
//! This crate provides tree fixtures and directory comparison for the crate
//! test suites. It is a dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`tree`]: [`TestTree`] builder for folder contents, symlinks included
//! - [`compare`]: structural comparison of two folder roots

pub mod compare;
pub mod tree;

pub use compare::{assert_trees_equal, compare_directories};
pub use tree::{TestTree, generate_files};
