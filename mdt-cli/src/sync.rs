use anyhow::Context;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use mdt_lib::merge::{MergeCounts, MergeStore};
use mdt_lib::service::{ServiceError, ServiceErrorKind};
use mdt_lib::session::{Session, SessionError};
use mdt_lib::worktree::WorkTree;

use crate::config::Config;

/// Which stores to refresh. No flag at all means every store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub assignments: bool,
    pub submissions: bool,
    pub grades: bool,
    pub users: bool,
}

impl Selection {
    pub fn or_all(self) -> Self {
        if self == Self::default() {
            Self {
                assignments: true,
                submissions: true,
                grades: true,
                users: true,
            }
        } else {
            self
        }
    }
}

fn report(store: &str, counts: MergeCounts) {
    println!("{store:<12} {counts}");
}

pub async fn run_sync(
    tree: &WorkTree,
    config: &Config,
    session: &Session,
    selection: Selection,
) -> anyhow::Result<()> {
    let selection = selection.or_all();
    // Taken before fetching so changes made during the sync are fetched again.
    let now = chrono::Utc::now().timestamp();

    let mut course_ids: Vec<i64> = tree.courses()?.iter().map(|c| c.id).collect();
    if course_ids.is_empty() {
        course_ids = config.course_ids.clone();
    }

    if selection.assignments {
        let raw = session
            .assignments(&course_ids)
            .await
            .context("fetching assignments")?;
        let counts = tree.assignments().update(&raw, now)?;
        report("assignments", counts);
    }

    let assignment_ids = tree.assignments().folder().ids()?;

    if selection.submissions {
        let mut store = tree.submissions()?;
        let counts = if assignment_ids.is_empty() {
            MergeCounts::default()
        } else {
            let raw = session
                .submissions(&assignment_ids, store.last_sync())
                .await
                .context("fetching submissions")?;
            store.update(&raw, now)?
        };
        report("submissions", counts);
    }

    if selection.grades {
        let mut store = tree.grades()?;
        let counts = if assignment_ids.is_empty() {
            MergeCounts::default()
        } else {
            let raw = session
                .grades(&assignment_ids, store.last_sync())
                .await
                .context("fetching grades")?;
            store.update(&raw, now)?
        };
        report("grades", counts);
    }

    if selection.users {
        let counts = sync_users(tree, session, &course_ids, config.workers).await?;
        report("users", counts);
    }
    Ok(())
}

/// Errors that only concern the course being fetched. The user sync reports
/// them and carries on with the other courses.
fn course_refused(err: &SessionError) -> Option<&ServiceError> {
    match err {
        SessionError::Service(e)
            if matches!(
                e.kind,
                ServiceErrorKind::NoPermissions
                    | ServiceErrorKind::AccessException
                    | ServiceErrorKind::InvalidResponse
            ) =>
        {
            Some(e)
        }
        _ => None,
    }
}

/// Fetches the enrolled users of every course, at most `workers` courses at
/// a time, and writes one file per user. Courses the server refuses to list
/// are skipped.
async fn sync_users(
    tree: &WorkTree,
    session: &Session,
    course_ids: &[i64],
    workers: usize,
) -> anyhow::Result<MergeCounts> {
    let mut store = tree.users();
    let mut counts = MergeCounts::default();
    let mut fetches = stream::iter(course_ids.iter().copied())
        .map(|course_id| async move { (course_id, session.enrolled_users(course_id).await) })
        .buffer_unordered(workers);

    while let Some((course_id, users)) = fetches.next().await {
        let users = match users {
            Ok(users) => users,
            Err(e) => match course_refused(&e) {
                Some(refused) => {
                    warn!(course_id, code = %refused.code, "skipping users of course");
                    println!("{course_id:>5}: {refused}");
                    continue;
                }
                None => {
                    return Err(e).with_context(|| format!("fetching users of course {course_id}"))
                }
            },
        };
        debug!(course_id, users = users.len(), "fetched enrolled users");
        for user in users {
            let value = serde_json::to_value(&user)?;
            match store.get(user.id)?.map(|stored| *stored == value) {
                Some(true) => counts.unchanged += 1,
                Some(false) => {
                    store.set(user.id, value)?;
                    counts.updated += 1;
                }
                None => {
                    store.set(user.id, value)?;
                    counts.new += 1;
                }
            }
        }
    }
    Ok(counts)
}
