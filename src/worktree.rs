//! Layout of a local work tree.
//!
//! A work tree is any directory holding a `.mdt/` metadata directory:
//!
//! ```text
//! .mdt/
//!   config.toml        local configuration
//!   courses            json list of the chosen courses
//!   assignments/<id>   one assignment per file
//!   submissions/<id>   submissions of one assignment
//!   submissions_meta   {"last_sync": ...}
//!   grades/<id>        grades of one assignment
//!   grades_meta
//!   users/<id>         one enrolled user per file
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::decode::{DecodeError, Decoder};
use crate::merge::{AssignmentStore, GradeStore, SubmissionStore};
use crate::responses::{Assignment, Course, User};
use crate::store::{read_json, write_json_atomic, FolderStore, StoreError};

pub const META_DIR: &str = ".mdt";

const STORE_DIRS: &[&str] = &["assignments", "submissions", "grades", "users"];

#[derive(Debug, Error)]
pub enum WorkTreeError {
    #[error("not inside a work tree (no .mdt in {} or any parent), run `mdt init` first", .start.display())]
    NotInWorkTree { start: PathBuf },

    #[error("{} is already a work tree", .root.display())]
    AlreadyInitialized { root: PathBuf },

    #[error("{}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("courses file does not decode: {0}")]
    Courses(#[source] DecodeError),
}

#[derive(Debug, Clone)]
pub struct WorkTree {
    root: PathBuf,
    meta: PathBuf,
}

impl WorkTree {
    /// Finds the work tree containing `start`, looking at `start` itself and
    /// then at each ancestor.
    pub fn find(start: &Path) -> Result<Self, WorkTreeError> {
        start
            .ancestors()
            .find(|dir| dir.join(META_DIR).is_dir())
            .map(Self::at)
            .ok_or_else(|| WorkTreeError::NotInWorkTree {
                start: start.to_path_buf(),
            })
    }

    /// Creates the metadata directory with empty stores under `root`.
    pub fn init(root: &Path) -> Result<Self, WorkTreeError> {
        let tree = Self::at(root);
        if tree.meta.is_dir() {
            return Err(WorkTreeError::AlreadyInitialized {
                root: root.to_path_buf(),
            });
        }
        for name in STORE_DIRS {
            let dir = tree.meta.join(name);
            fs::create_dir_all(&dir).map_err(|source| WorkTreeError::Io { path: dir, source })?;
        }
        tree.set_courses(&[])?;
        debug!(root = %root.display(), "initialized work tree");
        Ok(tree)
    }

    fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            meta: root.join(META_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta
    }

    pub fn config_path(&self) -> PathBuf {
        self.meta.join("config.toml")
    }

    fn courses_path(&self) -> PathBuf {
        self.meta.join("courses")
    }

    pub fn assignments(&self) -> AssignmentStore {
        AssignmentStore::open(self.meta.join("assignments"))
    }

    pub fn submissions(&self) -> Result<SubmissionStore, StoreError> {
        SubmissionStore::open(&self.meta)
    }

    pub fn grades(&self) -> Result<GradeStore, StoreError> {
        GradeStore::open(&self.meta)
    }

    pub fn users(&self) -> FolderStore {
        FolderStore::open(self.meta.join("users"))
    }

    /// The courses chosen at init. A missing file means none.
    pub fn courses(&self) -> Result<Vec<Course>, WorkTreeError> {
        let raw = read_json(&self.courses_path())?;
        Decoder::new()
            .decode_many(raw.as_ref())
            .map_err(WorkTreeError::Courses)
    }

    pub fn set_courses(&self, courses: &[Course]) -> Result<(), WorkTreeError> {
        let value = serde_json::to_value(courses)
            .map_err(|source| StoreError::Serialize { id: 0, source })?;
        write_json_atomic(&self.courses_path(), &value)?;
        Ok(())
    }

    /// Enrolled users of every synced course, in user id order.
    pub fn users_by_id(&self) -> Result<Vec<User>, StoreError> {
        let mut store = self.users();
        let decoder = Decoder::new();
        let mut users = Vec::new();
        for id in store.ids()? {
            if let Some(user) = store.get_record(&decoder, id)? {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Working folder of an assignment, `<safe name>--<id>` under the root.
    pub fn assignment_folder(&self, assignment: &Assignment) -> PathBuf {
        self.root.join(assignment_folder_name(assignment))
    }
}

pub fn assignment_folder_name(assignment: &Assignment) -> String {
    format!("{}--{}", safe_file_name(&assignment.name), assignment.id)
}

/// Replaces every character that is not a word character with `_`.
pub fn safe_file_name(name: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    NON_WORD
        .get_or_init(|| Regex::new(r"\W").expect("valid regex"))
        .replace_all(name, "_")
        .into_owned()
}
