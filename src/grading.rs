//! Offline grading files.
//!
//! `pull` writes one grading file per assignment with an entry per
//! submission; the operator fills in grades and feedback, and `grade` turns
//! the file back into a `mod_assign_save_grades` batch.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::decode::{DecodeError, Decoder};
use crate::responses::{Assignment, Grade, Submission, User};
use crate::schema::{record, Kind};
use crate::store::{read_json, write_json_atomic, StoreError};

pub const GRADING_FILE_NAME: &str = "gradingfile.json";

record! {
    pub struct GradingEntry: GRADING_ENTRY = "gradingfile.grade" {
        /// Student or team name, for the operator only.
        required name: String => Kind::Str,
        /// Submission id.
        required id: i64 => Kind::Int,
        required grade: f64 => Kind::Float,
        optional feedback: Option<String> => Kind::Str,
    }
}

record! {
    pub struct GradingFile: GRADING_FILE = "gradingfile" {
        required assignment_id: i64 => Kind::Int,
        optional team_submission: Option<bool> => Kind::Bool,
        required grades: Vec<GradingEntry> => Kind::List(&GRADING_ENTRY),
    }
}

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("{}: {source}", .path.display())]
    Decode { path: PathBuf, source: DecodeError },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("assignment {assignment_id} has no synced submission {id}, run `mdt sync -s`")]
    UnknownSubmission { assignment_id: i64, id: i64 },

    #[error("no synced user is a member of group {group_id}, run `mdt sync -u`")]
    EmptyTeam { group_id: i64 },
}

/// Display name of a submission's author: the team name for team
/// submissions, the user's full name otherwise.
pub fn submission_author(submission: &Submission, team: bool, users: &[User]) -> String {
    if team && submission.groupid != 0 {
        users
            .iter()
            .flat_map(|user| &user.groups)
            .find(|group| group.id == submission.groupid)
            .map(|group| group.name.clone())
            .unwrap_or_else(|| format!("group {}", submission.groupid))
    } else {
        users
            .iter()
            .find(|user| user.id == submission.userid)
            .map(|user| user.fullname.clone())
            .unwrap_or_else(|| format!("user {}", submission.userid))
    }
}

impl GradingFile {
    /// One entry per submission, prefilled with the current grade if any.
    pub fn from_submissions(
        assignment: &Assignment,
        submissions: &[Submission],
        grades: &[Grade],
        users: &[User],
    ) -> Self {
        let team = assignment.is_team_submission();
        let entries = submissions
            .iter()
            .map(|submission| GradingEntry {
                name: submission_author(submission, team, users),
                id: submission.id,
                grade: grades
                    .iter()
                    .find(|grade| grade.userid == submission.userid)
                    .and_then(Grade::value)
                    .unwrap_or(0.0),
                feedback: Some(String::new()),
            })
            .collect();
        Self {
            assignment_id: assignment.id,
            team_submission: Some(team),
            grades: entries,
        }
    }

    pub fn load(path: &Path) -> Result<Self, GradingError> {
        let raw = read_json(path)?.ok_or_else(|| GradingError::NotFound(path.to_path_buf()))?;
        Decoder::new()
            .decode_one(&raw)
            .map_err(|source| GradingError::Decode {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), GradingError> {
        let value = serde_json::to_value(self).map_err(|source| StoreError::Serialize {
            id: self.assignment_id,
            source,
        })?;
        write_json_atomic(path, &value)?;
        Ok(())
    }

    pub fn is_team_submission(&self) -> bool {
        self.team_submission.unwrap_or(false)
    }

    /// Resolves every entry to the user it is saved for.
    ///
    /// Team submissions are owned by a group rather than a user; the grade is
    /// then saved for any member and applied to the whole team.
    pub fn to_batch(
        &self,
        submissions: &[Submission],
        users: &[User],
    ) -> Result<GradeBatch, GradingError> {
        let team = self.is_team_submission();
        let mut grades = Vec::with_capacity(self.grades.len());
        for entry in &self.grades {
            let submission = submissions
                .iter()
                .find(|submission| submission.id == entry.id)
                .ok_or(GradingError::UnknownSubmission {
                    assignment_id: self.assignment_id,
                    id: entry.id,
                })?;
            let userid = if team && submission.userid == 0 {
                users
                    .iter()
                    .find(|user| user.is_member_of(submission.groupid))
                    .map(|user| user.id)
                    .ok_or(GradingError::EmptyTeam {
                        group_id: submission.groupid,
                    })?
            } else {
                submission.userid
            };
            grades.push(GradeUpload::new(
                userid,
                entry.grade,
                entry.feedback.as_deref().unwrap_or_default(),
            ));
        }
        Ok(GradeBatch {
            assignment_id: self.assignment_id,
            apply_to_all: team,
            grades,
        })
    }
}

/// Arguments of one `mod_assign_save_grades` call.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeBatch {
    pub assignment_id: i64,
    pub apply_to_all: bool,
    pub grades: Vec<GradeUpload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeUpload {
    pub userid: i64,
    pub grade: f64,
    /// `-1` targets the latest attempt.
    pub attemptnumber: i64,
    pub addattempt: i64,
    pub workflowstate: String,
    pub plugindata: FeedbackData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackData {
    pub assignfeedbackcomments_editor: FeedbackEditor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackEditor {
    pub text: String,
    /// `1` is html.
    pub format: i64,
}

impl GradeUpload {
    pub fn new(userid: i64, grade: f64, feedback: &str) -> Self {
        Self {
            userid,
            grade,
            attemptnumber: -1,
            addattempt: 0,
            workflowstate: String::new(),
            plugindata: FeedbackData {
                assignfeedbackcomments_editor: FeedbackEditor {
                    text: feedback.to_string(),
                    format: 1,
                },
            },
        }
    }
}

/// `gradingfile.json` in `folder`, or the first free `gradingfile_NN.json`
/// when it already exists.
pub fn next_grading_file_path(folder: &Path) -> PathBuf {
    let first = folder.join(GRADING_FILE_NAME);
    if !first.exists() {
        return first;
    }
    let mut n = 1;
    loop {
        let candidate = folder.join(format!("gradingfile_{n:02}.json"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn submission(id: i64, userid: i64, groupid: i64) -> Submission {
        Decoder::new()
            .decode_one(&json!({
                "id": id, "userid": userid, "attemptnumber": 0, "timecreated": 0,
                "timemodified": 0, "status": "submitted", "groupid": groupid, "plugins": []
            }))
            .unwrap()
    }

    fn user(id: i64, name: &str, group: Option<(i64, &str)>) -> User {
        let groups = match group {
            Some((id, name)) => json!([{"id": id, "name": name, "description": "", "descriptionformat": 1}]),
            None => json!([]),
        };
        Decoder::new()
            .decode_one(&json!({"id": id, "fullname": name, "groups": groups}))
            .unwrap()
    }

    #[test]
    fn test_batch_maps_submission_to_user() {
        let file: GradingFile = Decoder::new()
            .decode_one(&json!({
                "assignment_id": 42,
                "grades": [{"name": "Ada", "id": 100, "grade": 9.5, "feedback": "good"}]
            }))
            .unwrap();
        let batch = file
            .to_batch(&[submission(100, 7, 0)], &[user(7, "Ada", None)])
            .unwrap();
        assert_eq!(batch.assignment_id, 42);
        assert!(!batch.apply_to_all);
        assert_eq!(batch.grades, vec![GradeUpload::new(7, 9.5, "good")]);
    }

    #[test]
    fn test_team_batch_uses_a_group_member() {
        let file = GradingFile {
            assignment_id: 42,
            team_submission: Some(true),
            grades: vec![GradingEntry {
                name: "Team 3".into(),
                id: 100,
                grade: 4.0,
                feedback: None,
            }],
        };
        let users = [user(7, "Ada", Some((2, "Team 2"))), user(8, "Bob", Some((3, "Team 3")))];
        let batch = file.to_batch(&[submission(100, 0, 3)], &users).unwrap();
        assert!(batch.apply_to_all);
        assert_eq!(batch.grades[0].userid, 8);

        let err = file.to_batch(&[submission(100, 0, 9)], &users).unwrap_err();
        assert!(matches!(err, GradingError::EmptyTeam { group_id: 9 }));
    }

    #[test]
    fn test_unknown_submission() {
        let file = GradingFile {
            assignment_id: 42,
            team_submission: None,
            grades: vec![GradingEntry {
                name: "x".into(),
                id: 5,
                grade: 1.0,
                feedback: None,
            }],
        };
        let err = file.to_batch(&[], &[]).unwrap_err();
        assert!(matches!(err, GradingError::UnknownSubmission { assignment_id: 42, id: 5 }));
    }

    #[test]
    fn test_next_grading_file_path_and_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let first = next_grading_file_path(tmp.path());
        assert_eq!(first, tmp.path().join("gradingfile.json"));

        let file = GradingFile {
            assignment_id: 1,
            team_submission: Some(false),
            grades: Vec::new(),
        };
        file.save(&first).unwrap();
        assert_eq!(GradingFile::load(&first).unwrap(), file);
        assert_eq!(
            next_grading_file_path(tmp.path()),
            tmp.path().join("gradingfile_01.json")
        );
        fs::write(tmp.path().join("gradingfile_01.json"), "{}").unwrap();
        assert_eq!(
            next_grading_file_path(tmp.path()),
            tmp.path().join("gradingfile_02.json")
        );
        assert!(matches!(
            GradingFile::load(&tmp.path().join("gradingfile_01.json")),
            Err(GradingError::Decode { .. })
        ));
        assert!(matches!(
            GradingFile::load(&tmp.path().join("missing.json")),
            Err(GradingError::NotFound(_))
        ));
    }
}
