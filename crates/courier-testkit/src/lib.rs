//! # Courier Testkit
//!
//! Testing utilities for Courier.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: An in-memory blob store, session directory, scripted
//!   transport and recording presenter wired together
//! - **Generators**: Proptest strategies for session file trees
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use courier_testkit::fixtures::TestFixture;
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     fixture.seed_paired_session().await;
//!
//!     let manager = fixture.manager();
//!     manager.initialize().await.unwrap();
//!     assert!(fixture.presenter.codes().is_empty());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use courier_testkit::generators::session_tree;
//!
//! proptest! {
//!     #[test]
//!     fn archive_round_trips(tree in session_tree()) {
//!         // push from one directory, pull into another, compare
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    fast_config, paired_session_files, populate, read_tree, temp_session_dir, FixtureManager,
    RecordingPresenter, TestFixture,
};
pub use generators::{file_contents, relative_path, session_tree};
