//! Web-service session over HTTPS.
//!
//! Every function is a POST to `webservice/rest/server.php` with form-encoded
//! arguments. Responses of the three synced functions are handed out raw so
//! they can go straight into a [`crate::merge::MergeStore`]. File uploads are
//! multipart POSTs to `webservice/upload.php`.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::decode::{DecodeError, Decoder};
use crate::grading::GradeBatch;
use crate::responses::{Course, ServerWarning, SiteInfo, TokenResponse, User};
use crate::schema::Record;
use crate::service::ServiceError;
use crate::submission::{SubmissionDraft, UploadResult};

const TOKEN_PATH: &str = "login/token.php";
const REST_PATH: &str = "webservice/rest/server.php";
const UPLOAD_PATH: &str = "webservice/upload.php";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("{function} returned an unexpected shape: {source}")]
    Decode {
        function: String,
        source: DecodeError,
    },

    #[error("could not encode arguments: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Turns a json argument tree into form pairs: lists become `name[i]`,
/// objects `name[key]`, booleans `1`/`0`. `null` values are left out.
pub fn flatten_args(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((prefix.to_string(), if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_args(&format!("{prefix}[{i}]"), item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}[{key}]")
                };
                flatten_args(&name, item, out);
            }
        }
    }
}

/// `https://<host>` unless `url` already names a scheme.
pub fn base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
    base_url: String,
    token: String,
    decoder: Decoder,
}

impl Session {
    pub fn new(url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url(url),
            token: token.to_string(),
            decoder: Decoder::new(),
        }
    }

    /// Exchanges credentials for a web-service token.
    pub async fn login(
        url: &str,
        username: &str,
        password: &str,
        service: &str,
    ) -> Result<TokenResponse, SessionError> {
        let url = format!("{}/{TOKEN_PATH}", base_url(url));
        let form = [
            ("username", username),
            ("password", password),
            ("service", service),
        ];
        let raw = post_form(&reqwest::Client::new(), &url, &form).await?;
        decode(&Decoder::new(), TOKEN_PATH, &raw)
    }

    /// Calls `function` and returns the raw response. Error payloads become
    /// [`SessionError::Service`].
    pub async fn call(&self, function: &str, args: &Value) -> Result<Value, SessionError> {
        let mut form = vec![
            ("wstoken".to_string(), self.token.clone()),
            ("wsfunction".to_string(), function.to_string()),
            ("moodlewsrestformat".to_string(), "json".to_string()),
        ];
        flatten_args("", args, &mut form);
        debug!(function, args = form.len() - 3, "calling");
        let url = format!("{}/{REST_PATH}", self.base_url);
        post_form(&self.client, &url, &form).await
    }

    async fn call_typed<T: Record>(&self, function: &str, args: &Value) -> Result<T, SessionError> {
        let raw = self.call(function, args).await?;
        decode(&self.decoder, function, &raw)
    }

    async fn call_list<T: Record>(
        &self,
        function: &str,
        args: &Value,
    ) -> Result<Vec<T>, SessionError> {
        let raw = self.call(function, args).await?;
        self.decoder
            .decode_many(Some(&raw))
            .map_err(|source| SessionError::Decode {
                function: function.to_string(),
                source,
            })
    }

    pub async fn site_info(&self) -> Result<SiteInfo, SessionError> {
        self.call_typed("core_webservice_get_site_info", &json!({}))
            .await
    }

    pub async fn users_courses(&self, user_id: i64) -> Result<Vec<Course>, SessionError> {
        self.call_list("core_enrol_get_users_courses", &json!({ "userid": user_id }))
            .await
    }

    pub async fn enrolled_users(&self, course_id: i64) -> Result<Vec<User>, SessionError> {
        self.call_list(
            "core_enrol_get_enrolled_users",
            &json!({ "courseid": course_id }),
        )
        .await
    }

    /// Full snapshot of the assignments of `course_ids`, raw.
    pub async fn assignments(&self, course_ids: &[i64]) -> Result<Value, SessionError> {
        self.call(
            "mod_assign_get_assignments",
            &json!({ "courseids": course_ids, "includenotenrolledcourses": true }),
        )
        .await
    }

    /// Submissions changed after `since`, raw.
    pub async fn submissions(
        &self,
        assignment_ids: &[i64],
        since: i64,
    ) -> Result<Value, SessionError> {
        self.call(
            "mod_assign_get_submissions",
            &json!({ "assignmentids": assignment_ids, "since": since }),
        )
        .await
    }

    /// Grades changed after `since`, raw.
    pub async fn grades(&self, assignment_ids: &[i64], since: i64) -> Result<Value, SessionError> {
        self.call(
            "mod_assign_get_grades",
            &json!({ "assignmentids": assignment_ids, "since": since }),
        )
        .await
    }

    pub async fn save_grades(&self, batch: &GradeBatch) -> Result<(), SessionError> {
        let args = json!({
            "assignmentid": batch.assignment_id,
            "applytoall": batch.apply_to_all,
            "grades": serde_json::to_value(&batch.grades)?,
        });
        let raw = self.call("mod_assign_save_grades", &args).await?;
        if !raw.is_null() {
            debug!(response = %raw, "save_grades returned a body");
        }
        Ok(())
    }

    /// Saves text and a draft area of files as the user's submission. Returns
    /// the warnings of the server, empty when the submission was saved.
    pub async fn save_submission(
        &self,
        draft: &SubmissionDraft,
    ) -> Result<Vec<ServerWarning>, SessionError> {
        let args = serde_json::to_value(draft)?;
        self.call_list("mod_assign_save_submission", &args).await
    }

    /// Uploads `(file name, content)` pairs into a fresh draft area.
    pub async fn upload_files(
        &self,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<UploadResult, SessionError> {
        let count = files.len();
        let mut form = reqwest::multipart::Form::new()
            .text("token", self.token.clone())
            .text("filearea", "draft")
            .text("itemid", "0");
        for (i, (name, content)) in files.into_iter().enumerate() {
            let part = reqwest::multipart::Part::bytes(content).file_name(name);
            form = form.part(format!("file_{}", i + 1), part);
        }
        debug!(files = count, "uploading to draft area");

        let url = format!("{}/{UPLOAD_PATH}", self.base_url);
        let http = |source| SessionError::Http {
            url: url.clone(),
            source,
        };
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http)?;
        let raw: Value = response.json().await.map_err(http)?;
        if let Some(err) = ServiceError::from_payload(&raw) {
            return Err(err.into());
        }
        UploadResult::from_response(&self.decoder, &raw).map_err(|source| SessionError::Decode {
            function: UPLOAD_PATH.to_string(),
            source,
        })
    }

    /// Downloads a file url from a submission, authenticated with the token.
    pub async fn download(&self, file_url: &str) -> Result<Vec<u8>, SessionError> {
        let http = |source| SessionError::Http {
            url: file_url.to_string(),
            source,
        };
        let response = self
            .client
            .get(file_url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http)?;
        let bytes = response.bytes().await.map_err(http)?;
        Ok(bytes.to_vec())
    }
}

async fn post_form<F: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    form: &F,
) -> Result<Value, SessionError> {
    let http = |source| SessionError::Http {
        url: url.to_string(),
        source,
    };
    let response = client
        .post(url)
        .form(form)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http)?;
    let raw: Value = response.json().await.map_err(http)?;
    match ServiceError::from_payload(&raw) {
        Some(err) => Err(err.into()),
        None => Ok(raw),
    }
}

fn decode<T: Record>(decoder: &Decoder, function: &str, raw: &Value) -> Result<T, SessionError> {
    decoder
        .decode_one(raw)
        .map_err(|source| SessionError::Decode {
            function: function.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested_args() {
        let mut form = Vec::new();
        flatten_args(
            "",
            &json!({
                "assignmentid": 42,
                "applytoall": true,
                "grades": [{"userid": 7, "grade": 9.5, "plugindata": {"editor": {"text": "ok"}}}],
                "skip": null
            }),
            &mut form,
        );
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                ("applytoall", "1"),
                ("assignmentid", "42"),
                ("grades[0][grade]", "9.5"),
                ("grades[0][plugindata][editor][text]", "ok"),
                ("grades[0][userid]", "7"),
            ]
        );
    }

    #[test]
    fn test_flatten_id_list() {
        let mut form = Vec::new();
        flatten_args("", &json!({"courseids": [5, 7]}), &mut form);
        assert_eq!(
            form,
            vec![
                ("courseids[0]".to_string(), "5".to_string()),
                ("courseids[1]".to_string(), "7".to_string()),
            ]
        );
    }

    #[test]
    fn test_flatten_submission() {
        use crate::submission::{OnlineText, TextFormat};

        let draft = SubmissionDraft::new(42)
            .with_text(OnlineText {
                text: "<p>done</p>".to_string(),
                format: TextFormat::Html,
                itemid: 0,
            })
            .with_files(9);
        let mut form = Vec::new();
        flatten_args("", &serde_json::to_value(&draft).unwrap(), &mut form);
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                ("assignmentid", "42"),
                ("plugindata[files_filemanager]", "9"),
                ("plugindata[onlinetext_editor][format]", "1"),
                ("plugindata[onlinetext_editor][itemid]", "0"),
                ("plugindata[onlinetext_editor][text]", "<p>done</p>"),
            ]
        );
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("moodle.uni-ulm.de"), "https://moodle.uni-ulm.de");
        assert_eq!(base_url("http://localhost:8080/"), "http://localhost:8080");
    }
}
