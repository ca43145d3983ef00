use std::path::{Path, PathBuf};

use anyhow::anyhow;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use mdt_lib::grading::{next_grading_file_path, submission_author, GradingFile};
use mdt_lib::responses::Submission;
use mdt_lib::session::Session;
use mdt_lib::worktree::{safe_file_name, WorkTree};

#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub url: String,
    pub target: PathBuf,
}

/// Folder of one submission inside the assignment folder.
fn submission_folder(folder: &Path, submission: &Submission, author: &str) -> PathBuf {
    folder.join(format!("{}--{}", safe_file_name(author), submission.id))
}

/// Every downloadable file of `submissions`, laid out as
/// `<author>--<submission id>/<file path>/<file name>` below `folder`.
pub fn plan_downloads(
    folder: &Path,
    submissions: &[Submission],
    author: impl Fn(&Submission) -> String,
) -> Vec<Download> {
    let mut downloads = Vec::new();
    for submission in submissions {
        let base = submission_folder(folder, submission, &author(submission));
        for file in submission.files() {
            let (Some(url), Some(name)) = (&file.fileurl, &file.filename) else {
                continue;
            };
            let mut target = base.clone();
            for segment in file
                .filepath
                .as_deref()
                .unwrap_or("/")
                .split('/')
                .filter(|s| !s.is_empty())
            {
                target.push(safe_file_name(segment));
            }
            target.push(safe_file_name_keep_ext(name));
            downloads.push(Download {
                url: url.clone(),
                target,
            });
        }
    }
    downloads
}

/// Like [`safe_file_name`], but keeps the extension separator.
fn safe_file_name_keep_ext(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}.{}", safe_file_name(stem), safe_file_name(ext))
        }
        _ => safe_file_name(name),
    }
}

async fn fetch(session: &Session, download: &Download) -> anyhow::Result<()> {
    let bytes = session.download(&download.url).await?;
    if let Some(parent) = download.target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&download.target, bytes).await?;
    Ok(())
}

/// Downloads the files of the given assignments and writes a grading file
/// for each.
pub async fn run_pull(
    tree: &WorkTree,
    session: &Session,
    workers: usize,
    assignment_ids: &[i64],
) -> anyhow::Result<()> {
    let users = tree.users_by_id()?;
    let mut assignments = tree.assignments();
    let mut submissions = tree.submissions()?;
    let mut grades = tree.grades()?;

    for &id in assignment_ids {
        let assignment = assignments
            .get(id)?
            .ok_or_else(|| anyhow!("assignment {id} is not synced, run `mdt sync -a`"))?;
        let team = assignment.is_team_submission();
        let assignment_submissions = submissions.get(id)?.unwrap_or_default();
        let folder = tree.assignment_folder(&assignment);
        let author = |s: &Submission| submission_author(s, team, &users);

        let downloads = plan_downloads(&folder, &assignment_submissions, author);
        let mut results = stream::iter(&downloads)
            .map(|download| async move { (download, fetch(session, download).await) })
            .buffer_unordered(workers);
        let mut failed = 0;
        while let Some((download, result)) = results.next().await {
            match result {
                Ok(()) => debug!(path = %download.target.display(), "downloaded"),
                Err(e) => {
                    warn!(url = %download.url, "download failed: {e:#}");
                    failed += 1;
                }
            }
        }

        for submission in &assignment_submissions {
            if let Some(text) = submission.editor_text() {
                let base = submission_folder(&folder, submission, &author(submission));
                tokio::fs::create_dir_all(&base).await?;
                tokio::fs::write(base.join("onlinetext.html"), text).await?;
            }
        }

        let grading = GradingFile::from_submissions(
            &assignment,
            &assignment_submissions,
            &grades.get(id)?.unwrap_or_default(),
            &users,
        );
        tokio::fs::create_dir_all(&folder).await?;
        let grading_path = next_grading_file_path(&folder);
        grading.save(&grading_path)?;

        println!(
            "{}: {} of {} files to {}, grading file {}",
            assignment.name,
            downloads.len() - failed,
            downloads.len(),
            folder.display(),
            grading_path.display()
        );
    }
    Ok(())
}
