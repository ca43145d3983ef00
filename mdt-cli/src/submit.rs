use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};

use mdt_lib::responses::unexpected_warnings;
use mdt_lib::session::Session;
use mdt_lib::submission::{OnlineText, SubmissionDraft, TextFormat, UploadResult};

async fn read_files(paths: &[PathBuf]) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} is not a file", path.display()))?;
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        files.push((name, content));
    }
    Ok(files)
}

/// Uploads `paths` into one draft area and returns its item id. Any rejected
/// file fails the whole upload.
async fn upload(session: &Session, paths: &[PathBuf]) -> anyhow::Result<i64> {
    let result = session.upload_files(read_files(paths).await?).await?;
    check_upload(&result)
}

fn check_upload(result: &UploadResult) -> anyhow::Result<i64> {
    if !result.errors.is_empty() {
        let errors: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
        bail!("upload rejected:\n  {}", errors.join("\n  "));
    }
    result
        .item_id()
        .ok_or_else(|| anyhow!("the server stored none of the files"))
}

/// Online text read from `path`, formatted according to its extension.
pub async fn online_text(path: &Path, itemid: i64) -> anyhow::Result<OnlineText> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(OnlineText {
        text,
        format: TextFormat::from_path(path),
        itemid,
    })
}

pub async fn run_upload(session: &Session, files: &[PathBuf]) -> anyhow::Result<()> {
    let item_id = upload(session, files).await?;
    println!("✓ uploaded {} files to draft area {item_id}", files.len());
    Ok(())
}

/// Hands in online text and files for one assignment.
pub async fn run_submit(
    session: &Session,
    assignment_id: i64,
    text: Option<&Path>,
    text_files: &[PathBuf],
    files: &[PathBuf],
) -> anyhow::Result<()> {
    let mut draft = SubmissionDraft::new(assignment_id);

    if !files.is_empty() {
        draft = draft.with_files(upload(session, files).await?);
    }
    let text_item_id = if text_files.is_empty() {
        0
    } else {
        upload(session, text_files).await?
    };
    if let Some(path) = text {
        draft = draft.with_text(online_text(path, text_item_id).await?);
    }
    if draft.is_empty() {
        bail!("nothing to submit, pass a text file or files");
    }

    let warnings = session
        .save_submission(&draft)
        .await
        .with_context(|| format!("submitting to assignment {assignment_id}"))?;
    let unexpected = unexpected_warnings(&warnings);
    if !unexpected.is_empty() {
        let messages: Vec<String> = unexpected
            .iter()
            .map(|w| format!("{} ({})", w.message, w.warningcode))
            .collect();
        bail!("submission not saved:\n  {}", messages.join("\n  "));
    }
    println!("✓ submitted to assignment {assignment_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdt_lib::decode::Decoder;
    use serde_json::json;

    #[test]
    fn test_check_upload() {
        let decoder = Decoder::new();
        let stored = UploadResult::from_response(
            &decoder,
            &json!([{"itemid": 11, "filename": "a.pdf"}, {"itemid": 11, "filename": "b.pdf"}]),
        )
        .unwrap();
        assert_eq!(check_upload(&stored).unwrap(), 11);

        let rejected = UploadResult::from_response(
            &decoder,
            &json!([{"itemid": 11, "filename": "a.pdf"}, {"filename": "b.exe", "error": "Forbidden type"}]),
        )
        .unwrap();
        let message = check_upload(&rejected).unwrap_err().to_string();
        assert!(message.contains("b.exe: Forbidden type"));

        assert!(check_upload(&UploadResult::default()).is_err());
    }

    #[tokio::test]
    async fn test_online_text_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("answer.md");
        std::fs::write(&path, "# Answer\n").unwrap();
        let text = online_text(&path, 5).await.unwrap();
        assert_eq!(text.text, "# Answer\n");
        assert_eq!(text.format, TextFormat::Markdown);
        assert_eq!(text.itemid, 5);
    }
}
