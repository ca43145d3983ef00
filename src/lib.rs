//! Client core for Moodle assignment workflows.
//!
//! Raw web-service responses are decoded into typed records
//! ([`decode::Decoder`] against the static schemas in [`responses`]) and
//! merged into an id-keyed cache on disk ([`merge`] on top of [`store`]).
//! The cache lives in a work tree ([`worktree::WorkTree`]).
//!
//! ```no_run
//! use mdt_lib::merge::MergeStore;
//! use mdt_lib::worktree::WorkTree;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let raw = serde_json::json!({"courses": [], "warnings": []});
//! let tree = WorkTree::find(&std::env::current_dir()?)?;
//! let counts = tree.assignments().update(&raw, 0)?;
//! println!("{counts}");
//! # Ok(())
//! # }
//! ```

pub mod decode;
pub mod grading;
pub mod merge;
pub mod responses;
pub mod schema;
pub mod service;
#[cfg(feature = "remote")]
pub mod session;
pub mod store;
pub mod submission;
pub mod worktree;

pub use decode::{DecodeError, Decoder, KeyDiff, ShapeMismatch};
pub use merge::{
    AssignmentStore, GradeStore, MergeCounts, MergeStore, SubmissionStore, SyncError,
};
pub use schema::{Field, Kind, Record, Schema};
pub use service::{ServiceError, ServiceErrorKind};
pub use store::{FolderStore, MetaFolderStore, StoreError, SyncMeta};
pub use worktree::{WorkTree, WorkTreeError};
