//! Reconciles fetched responses into the local stores.
//!
//! Assignments come as a full snapshot and are compared by `timemodified`.
//! Submissions and grades come as a window of recent changes per assignment
//! and are merged into the stored list by id; nothing is ever removed.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decode::{DecodeError, Decoder};
use crate::responses::{
    Assignment, AssignmentsResponse, Grade, GradesResponse, ServerWarning, Submission,
    SubmissionsResponse,
};
use crate::schema::Record;
use crate::store::{FolderStore, MetaFolderStore, StoreError};

/// Outcome of one merge, counted per touched record or bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeCounts {
    pub fn total(&self) -> usize {
        self.new + self.updated + self.unchanged
    }
}

impl AddAssign for MergeCounts {
    fn add_assign(&mut self, other: Self) {
        self.new += other.new;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

impl fmt::Display for MergeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "new: {} updated: {} unchanged: {}",
            self.new, self.updated, self.unchanged
        )
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not decode response: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A store that can absorb one raw server response.
pub trait MergeStore {
    /// Decodes `raw` and merges it. `sync_time` is the server time the fetch
    /// was issued at; stores that keep a watermark advance it to this value.
    fn update(&mut self, raw: &Value, sync_time: i64) -> Result<MergeCounts, SyncError>;
}

/// Logs server warnings. Codes meaning "nothing to report" only show up in
/// debug output.
pub fn report_warnings(function: &str, warnings: &[ServerWarning]) {
    for warning in warnings {
        let item = warning.item.as_deref().unwrap_or("-");
        let item_id = warning.itemid.unwrap_or_default();
        if warning.is_informational() {
            debug!(function, code = %warning.warningcode, item, item_id, "{}", warning.message);
        } else {
            warn!(function, code = %warning.warningcode, item, item_id, "{}", warning.message);
        }
    }
}

/// Reads a stored value, treating one that no longer parses or decodes as
/// absent.
fn lenient<T>(
    folder: &Path,
    id: i64,
    stored: Result<Option<T>, StoreError>,
) -> Result<Option<T>, StoreError> {
    match stored {
        Err(e) if e.is_stale() => {
            warn!(store = %folder.display(), id, "discarding stale entry: {e}");
            Ok(None)
        }
        other => other,
    }
}

/// Assignments by assignment id, one record per file.
#[derive(Debug)]
pub struct AssignmentStore {
    folder: FolderStore,
    decoder: Decoder,
}

impl AssignmentStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            folder: FolderStore::open(dir),
            decoder: Decoder::new(),
        }
    }

    pub fn folder(&self) -> &FolderStore {
        &self.folder
    }

    pub fn get(&mut self, id: i64) -> Result<Option<Assignment>, StoreError> {
        self.folder.get_record(&self.decoder, id)
    }

    /// Every stored assignment in id order.
    pub fn all(&mut self) -> Result<Vec<Assignment>, StoreError> {
        let mut assignments = Vec::new();
        for id in self.folder.ids()? {
            if let Some(assignment) = self.get(id)? {
                assignments.push(assignment);
            }
        }
        Ok(assignments)
    }

    /// Merges a decoded snapshot. An assignment is rewritten only when its
    /// `timemodified` is strictly newer than the stored one.
    pub fn merge(&mut self, response: &AssignmentsResponse) -> Result<MergeCounts, StoreError> {
        let mut counts = MergeCounts::default();
        for assignment in response.courses.iter().flat_map(|c| &c.assignments) {
            let stored = self.folder.get_record::<Assignment>(&self.decoder, assignment.id);
            match lenient(self.folder.dir(), assignment.id, stored)? {
                None => {
                    self.folder.set_record(assignment.id, assignment)?;
                    counts.new += 1;
                }
                Some(stored) if assignment.timemodified > stored.timemodified => {
                    self.folder.set_record(assignment.id, assignment)?;
                    counts.updated += 1;
                }
                Some(_) => counts.unchanged += 1,
            }
        }
        info!(store = "assignments", %counts, "merged");
        Ok(counts)
    }
}

impl MergeStore for AssignmentStore {
    /// A snapshot carries no watermark, so `sync_time` is not recorded.
    fn update(&mut self, raw: &Value, _sync_time: i64) -> Result<MergeCounts, SyncError> {
        let response: AssignmentsResponse = self.decoder.decode_one(raw)?;
        report_warnings(AssignmentsResponse::schema().name(), &response.warnings);
        Ok(self.merge(&response)?)
    }
}

/// A response holding per-assignment buckets of recently changed items.
pub trait WindowedResponse: Record {
    type Item: Record;

    /// Store folder and sidecar prefix.
    const FOLDER: &'static str;

    fn warnings(&self) -> &[ServerWarning];

    /// `(assignment id, items)` pairs in server order.
    fn into_buckets(self) -> Vec<(i64, Vec<Self::Item>)>;

    fn item_id(item: &Self::Item) -> i64;
}

impl WindowedResponse for SubmissionsResponse {
    type Item = Submission;
    const FOLDER: &'static str = "submissions";

    fn warnings(&self) -> &[ServerWarning] {
        &self.warnings
    }

    fn into_buckets(self) -> Vec<(i64, Vec<Submission>)> {
        self.assignments
            .into_iter()
            .map(|a| (a.assignmentid, a.submissions))
            .collect()
    }

    fn item_id(item: &Submission) -> i64 {
        item.id
    }
}

impl WindowedResponse for GradesResponse {
    type Item = Grade;
    const FOLDER: &'static str = "grades";

    fn warnings(&self) -> &[ServerWarning] {
        &self.warnings
    }

    fn into_buckets(self) -> Vec<(i64, Vec<Grade>)> {
        self.assignments
            .into_iter()
            .map(|a| (a.assignmentid, a.grades))
            .collect()
    }

    fn item_id(item: &Grade) -> i64 {
        item.id
    }
}

/// Lists of items per assignment id, plus a sync watermark.
#[derive(Debug)]
pub struct WindowStore<R> {
    store: MetaFolderStore,
    decoder: Decoder,
    response: PhantomData<R>,
}

pub type SubmissionStore = WindowStore<SubmissionsResponse>;
pub type GradeStore = WindowStore<GradesResponse>;

impl<R: WindowedResponse> WindowStore<R> {
    /// Opens `root/<folder>` and its sidecar `root/<folder>_meta`.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            store: MetaFolderStore::open(root, R::FOLDER)?,
            decoder: Decoder::new(),
            response: PhantomData,
        })
    }

    /// The `since` value for the next fetch.
    pub fn last_sync(&self) -> i64 {
        self.store.last_sync()
    }

    pub fn assignment_ids(&self) -> Result<Vec<i64>, StoreError> {
        self.store.folder().ids()
    }

    pub fn get(&mut self, assignment_id: i64) -> Result<Option<Vec<R::Item>>, StoreError> {
        self.store
            .folder_mut()
            .get_records(&self.decoder, assignment_id)
    }

    /// Merges a decoded window and then advances the watermark to
    /// `sync_time`, even when nothing changed.
    pub fn merge(&mut self, response: R, sync_time: i64) -> Result<MergeCounts, StoreError> {
        let mut counts = MergeCounts::default();
        for (assignment_id, incoming) in response.into_buckets() {
            if incoming.is_empty() {
                counts.unchanged += 1;
                continue;
            }
            let folder = self.store.folder_mut();
            let stored = folder.get_records::<R::Item>(&self.decoder, assignment_id);
            let stored = lenient(folder.dir(), assignment_id, stored)?;
            if stored.is_some() {
                counts.updated += 1;
            } else {
                counts.new += 1;
            }
            let merged = merge_by_id(stored.unwrap_or_default(), incoming, R::item_id);
            folder.set_record(assignment_id, &merged)?;
        }
        self.store.set_last_sync(sync_time)?;
        info!(store = R::FOLDER, %counts, sync_time, "merged");
        Ok(counts)
    }
}

impl<R: WindowedResponse> MergeStore for WindowStore<R> {
    fn update(&mut self, raw: &Value, sync_time: i64) -> Result<MergeCounts, SyncError> {
        let response: R = self.decoder.decode_one(raw)?;
        report_warnings(R::schema().name(), response.warnings());
        Ok(self.merge(response, sync_time)?)
    }
}

/// Overlays `incoming` on `stored` by id. Known ids are replaced in place,
/// unknown ones are appended in arrival order.
fn merge_by_id<T>(stored: Vec<T>, incoming: Vec<T>, id_of: fn(&T) -> i64) -> Vec<T> {
    let mut merged = stored;
    let mut index: HashMap<i64, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, item)| (id_of(item), i))
        .collect();
    for item in incoming {
        let id = id_of(&item);
        match index.get(&id) {
            Some(&i) => merged[i] = item,
            None => {
                index.insert(id, merged.len());
                merged.push(item);
            }
        }
    }
    merged
}
