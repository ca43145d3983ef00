use std::path::PathBuf;

use anyhow::Context;

use mdt_lib::grading::GradingFile;
use mdt_lib::session::Session;
use mdt_lib::worktree::WorkTree;

/// Uploads the grades of each grading file, one call per file.
pub async fn run_grade(
    tree: &WorkTree,
    session: &Session,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    let users = tree.users_by_id()?;
    let mut submissions = tree.submissions()?;

    for path in files {
        let file = GradingFile::load(path)?;
        let synced = submissions.get(file.assignment_id)?.unwrap_or_default();
        let batch = file.to_batch(&synced, &users)?;
        if batch.grades.is_empty() {
            println!("{}: no grades", path.display());
            continue;
        }
        session
            .save_grades(&batch)
            .await
            .with_context(|| format!("uploading {}", path.display()))?;
        println!(
            "✓ {}: uploaded {} grades for assignment {}",
            path.display(),
            batch.grades.len(),
            batch.assignment_id
        );
    }
    Ok(())
}
