//! Handing in work.
//!
//! Files go to the user's draft area first (`webservice/upload.php`), which
//! answers with the draft item id. `mod_assign_save_submission` then attaches
//! that draft area and any online text to the assignment.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::decode::{DecodeError, Decoder};
use crate::schema::{record, Kind};

/// Moodle's text format ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i64")]
pub enum TextFormat {
    Moodle,
    Html,
    Plain,
    Markdown,
}

impl TextFormat {
    pub fn id(self) -> i64 {
        match self {
            TextFormat::Moodle => 0,
            TextFormat::Html => 1,
            TextFormat::Plain => 2,
            TextFormat::Markdown => 4,
        }
    }

    /// Format implied by the extension of `path`. Unknown extensions use the
    /// Moodle auto format.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("md") => TextFormat::Markdown,
            Some("html") => TextFormat::Html,
            Some("txt") => TextFormat::Plain,
            _ => TextFormat::Moodle,
        }
    }
}

impl From<TextFormat> for i64 {
    fn from(format: TextFormat) -> Self {
        format.id()
    }
}

record! {
    /// A file stored in the draft area.
    pub struct DraftFile: DRAFT_FILE = "upload.file" {
        required itemid: i64 => Kind::Int,
        required filename: String => Kind::Str,
        optional filepath: Option<String> => Kind::Str,
        optional filearea: Option<String> => Kind::Str,
        optional component: Option<String> => Kind::Str,
        optional contextid: Option<i64> => Kind::Int,
        /// Sent as a string by some servers.
        optional userid: Option<Value> => Kind::Any,
        optional license: Option<String> => Kind::Str,
        optional author: Option<String> => Kind::Str,
        optional source: Option<String> => Kind::Str,
    }
}

record! {
    /// A file the draft area refused.
    pub struct UploadError: UPLOAD_ERROR = "upload.error" {
        required error: String => Kind::Str,
        optional filename: Option<String> => Kind::Str,
        optional filepath: Option<String> => Kind::Str,
        optional errortype: Option<String> => Kind::Str,
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}: {}",
            self.filepath.as_deref().unwrap_or_default(),
            self.filename.as_deref().unwrap_or("<unnamed>"),
            self.error
        )?;
        if let Some(errortype) = &self.errortype {
            write!(f, " ({errortype})")?;
        }
        Ok(())
    }
}

/// Response of one upload: stored files and rejected ones, in upload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadResult {
    pub files: Vec<DraftFile>,
    pub errors: Vec<UploadError>,
}

impl UploadResult {
    /// Splits the upload response. Entries carrying an `error` key are
    /// rejections, everything else is a stored file.
    pub fn from_response(decoder: &Decoder, raw: &Value) -> Result<Self, DecodeError> {
        let items: &[Value] = match raw {
            Value::Array(items) => items.as_slice(),
            Value::Null => &[],
            other => {
                return Err(DecodeError::NotAList {
                    schema: DRAFT_FILE.name(),
                    path: "$".to_string(),
                    found: crate::decode::json_type(other),
                })
            }
        };
        let mut result = Self::default();
        for (i, item) in items.iter().enumerate() {
            let path = format!("$[{i}]");
            if item.get("error").is_some() {
                result.errors.push(decoder.decode_at(item, &path)?);
            } else {
                result.files.push(decoder.decode_at(item, &path)?);
            }
        }
        Ok(result)
    }

    /// Draft area holding the uploaded files. All files of one upload share it.
    pub fn item_id(&self) -> Option<i64> {
        self.files.first().map(|file| file.itemid)
    }
}

/// Online text part of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnlineText {
    pub text: String,
    pub format: TextFormat,
    /// Draft area with files embedded in the text, `0` for none.
    pub itemid: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmissionPluginData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onlinetext_editor: Option<OnlineText>,
    /// Draft area with the submitted files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_filemanager: Option<i64>,
}

/// Arguments of one `mod_assign_save_submission` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionDraft {
    #[serde(rename = "assignmentid")]
    pub assignment_id: i64,
    pub plugindata: SubmissionPluginData,
}

impl SubmissionDraft {
    pub fn new(assignment_id: i64) -> Self {
        Self {
            assignment_id,
            plugindata: SubmissionPluginData::default(),
        }
    }

    pub fn with_text(mut self, text: OnlineText) -> Self {
        self.plugindata.onlinetext_editor = Some(text);
        self
    }

    pub fn with_files(mut self, item_id: i64) -> Self {
        self.plugindata.files_filemanager = Some(item_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.plugindata == SubmissionPluginData::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_format_from_extension() {
        assert_eq!(TextFormat::from_path(Path::new("notes.md")), TextFormat::Markdown);
        assert_eq!(TextFormat::from_path(Path::new("a/b.html")), TextFormat::Html);
        assert_eq!(TextFormat::from_path(Path::new("answer.txt")), TextFormat::Plain);
        assert_eq!(TextFormat::from_path(Path::new("answer.tex")), TextFormat::Moodle);
        assert_eq!(TextFormat::from_path(Path::new("README")), TextFormat::Moodle);
        assert_eq!(TextFormat::Markdown.id(), 4);
    }

    #[test]
    fn test_upload_response_splits_errors() {
        let raw = json!([
            {
                "component": "user", "contextid": 1591, "userid": "358", "filearea": "draft",
                "filename": "report.pdf", "filepath": "/", "itemid": 528004240,
                "license": "allrightsreserved", "author": "Ada", "source": ""
            },
            {"filename": "huge.zip", "filepath": "/", "errortype": "fileoversized", "error": "File too big"}
        ]);
        let result = UploadResult::from_response(&Decoder::new(), &raw).unwrap();
        assert_eq!(result.item_id(), Some(528004240));
        assert_eq!(result.files[0].filename, "report.pdf");
        assert_eq!(result.files[0].userid, Some(json!("358")));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].to_string(), "/huge.zip: File too big (fileoversized)");
    }

    #[test]
    fn test_upload_response_must_be_a_list() {
        let err = UploadResult::from_response(&Decoder::new(), &json!({"itemid": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::NotAList { found: "object", .. }));
        assert_eq!(
            UploadResult::from_response(&Decoder::new(), &Value::Null).unwrap(),
            UploadResult::default()
        );
    }

    #[test]
    fn test_submission_arguments() {
        let draft = SubmissionDraft::new(42)
            .with_text(OnlineText {
                text: "# Answer".to_string(),
                format: TextFormat::Markdown,
                itemid: 0,
            })
            .with_files(528004240);
        assert_eq!(
            serde_json::to_value(&draft).unwrap(),
            json!({
                "assignmentid": 42,
                "plugindata": {
                    "onlinetext_editor": {"text": "# Answer", "format": 4, "itemid": 0},
                    "files_filemanager": 528004240
                }
            })
        );

        let files_only = serde_json::to_value(SubmissionDraft::new(42).with_files(7)).unwrap();
        assert_eq!(files_only["plugindata"], json!({"files_filemanager": 7}));
        assert!(SubmissionDraft::new(42).is_empty());
    }
}
