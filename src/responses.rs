//! Response shapes of the web-service functions the client calls.
//!
//! Keys match the remote API verbatim. Each record only declares the subset of
//! a payload the client understands; everything else is dropped on decode.

use serde_json::Value;

use crate::schema::{record, Kind};

record! {
    /// A server warning attached to a response.
    pub struct ServerWarning: SERVER_WARNING = "warning" {
        required warningcode: String => Kind::Str,
        required message: String => Kind::Str,
        optional item: Option<String> => Kind::Str,
        optional itemid: Option<i64> => Kind::Int,
    }
}

/// Warning codes that only say "nothing to report": `1` no access, `2` not
/// enrolled, `3` no submissions or grades found.
const INFORMATIONAL_WARNINGS: &[&str] = &["1", "2", "3"];

impl ServerWarning {
    pub fn is_informational(&self) -> bool {
        INFORMATIONAL_WARNINGS.contains(&self.warningcode.as_str())
    }
}

/// Warnings worth showing to the operator.
pub fn unexpected_warnings(warnings: &[ServerWarning]) -> Vec<&ServerWarning> {
    warnings.iter().filter(|w| !w.is_informational()).collect()
}

// ── core_enrol_get_users_courses ─────────────────────

record! {
    /// One element of `core_enrol_get_users_courses`.
    pub struct Course: COURSE = "core_enrol_get_users_courses" {
        required id: i64 => Kind::Int,
        required shortname: String => Kind::Str,
        required fullname: String => Kind::Str,
        required enrolledusercount: i64 => Kind::Int,
        required idnumber: String => Kind::Str,
        required visible: i64 => Kind::Int,
        optional summary: Option<String> => Kind::Str,
        optional summaryformat: Option<i64> => Kind::Int,
        optional format: Option<String> => Kind::Str,
        /// Older servers send `0`/`1`, newer ones a boolean.
        optional showgrades: Option<Value> => Kind::Any,
        optional lang: Option<String> => Kind::Str,
        optional enablecompletion: Option<Value> => Kind::Any,
        optional category: Option<i64> => Kind::Int,
        optional progress: Option<f64> => Kind::Float,
        optional startdate: Option<i64> => Kind::Int,
        optional enddate: Option<i64> => Kind::Int,
    }
}

// ── core_enrol_get_enrolled_users ────────────────────

record! {
    pub struct UserCustomField: USER_CUSTOM_FIELD = "core_enrol_get_enrolled_users.customfield" {
        required field_type ("type"): String => Kind::Str,
        required value: String => Kind::Str,
        required name: String => Kind::Str,
        required shortname: String => Kind::Str,
    }
}

record! {
    pub struct UserGroup: USER_GROUP = "core_enrol_get_enrolled_users.group" {
        required id: i64 => Kind::Int,
        required name: String => Kind::Str,
        required description: String => Kind::Str,
        required descriptionformat: i64 => Kind::Int,
    }
}

record! {
    pub struct UserRole: USER_ROLE = "core_enrol_get_enrolled_users.role" {
        required roleid: i64 => Kind::Int,
        required name: String => Kind::Str,
        required shortname: String => Kind::Str,
        required sortorder: i64 => Kind::Int,
    }
}

record! {
    pub struct UserPreference: USER_PREFERENCE = "core_enrol_get_enrolled_users.preference" {
        required name: String => Kind::Str,
        /// Preferences carry strings, numbers or booleans depending on the name.
        required value: Value => Kind::Any,
    }
}

record! {
    pub struct UserEnrolledCourse: USER_ENROLLED_COURSE = "core_enrol_get_enrolled_users.enrolledcourse" {
        required id: i64 => Kind::Int,
        required fullname: String => Kind::Str,
        required shortname: String => Kind::Str,
    }
}

record! {
    /// One element of `core_enrol_get_enrolled_users`.
    pub struct User: USER = "core_enrol_get_enrolled_users" {
        required id: i64 => Kind::Int,
        required fullname: String => Kind::Str,
        optional customfields: Vec<UserCustomField> => Kind::List(&USER_CUSTOM_FIELD),
        optional groups: Vec<UserGroup> => Kind::List(&USER_GROUP),
        optional roles: Vec<UserRole> => Kind::List(&USER_ROLE),
        optional preferences: Vec<UserPreference> => Kind::List(&USER_PREFERENCE),
        optional enrolledcourses: Vec<UserEnrolledCourse> => Kind::List(&USER_ENROLLED_COURSE),
        optional username: Option<String> => Kind::Str,
        optional firstname: Option<String> => Kind::Str,
        optional lastname: Option<String> => Kind::Str,
        optional email: Option<String> => Kind::Str,
        optional idnumber: Option<String> => Kind::Str,
        optional department: Option<String> => Kind::Str,
        optional institution: Option<String> => Kind::Str,
        optional city: Option<String> => Kind::Str,
        optional country: Option<String> => Kind::Str,
        optional firstaccess: Option<i64> => Kind::Int,
        optional lastaccess: Option<i64> => Kind::Int,
        optional description: Option<String> => Kind::Str,
        optional descriptionformat: Option<i64> => Kind::Int,
        optional profileimageurl: Option<String> => Kind::Str,
        optional profileimageurlsmall: Option<String> => Kind::Str,
    }
}

impl User {
    pub fn is_member_of(&self, group_id: i64) -> bool {
        self.groups.iter().any(|group| group.id == group_id)
    }
}

// ── mod_assign_get_assignments ───────────────────────

record! {
    pub struct AssignmentConfig: ASSIGNMENT_CONFIG = "mod_assign_get_assignments.course.assignment.config" {
        required plugin: String => Kind::Str,
        required subtype: String => Kind::Str,
        required name: String => Kind::Str,
        required value: String => Kind::Str,
        optional id: Option<i64> => Kind::Int,
        optional assignment: Option<i64> => Kind::Int,
    }
}

record! {
    /// A file attached to an assignment's introduction.
    pub struct IntroFile: INTRO_FILE = "mod_assign_get_assignments.course.assignment.introfile" {
        optional filename: Option<String> => Kind::Str,
        optional filepath: Option<String> => Kind::Str,
        optional filesize: Option<i64> => Kind::Int,
        optional fileurl: Option<String> => Kind::Str,
        optional timemodified: Option<i64> => Kind::Int,
        optional mimetype: Option<String> => Kind::Str,
        optional isexternalfile: Option<i64> => Kind::Int,
        optional repositorytype: Option<String> => Kind::Str,
    }
}

record! {
    pub struct Assignment: ASSIGNMENT = "mod_assign_get_assignments.course.assignment" {
        required id: i64 => Kind::Int,
        required cmid: i64 => Kind::Int,
        required course: i64 => Kind::Int,
        required name: String => Kind::Str,
        required nosubmissions: i64 => Kind::Int,
        required submissiondrafts: i64 => Kind::Int,
        required sendnotifications: i64 => Kind::Int,
        required sendlatenotifications: i64 => Kind::Int,
        required sendstudentnotifications: i64 => Kind::Int,
        required duedate: i64 => Kind::Int,
        required allowsubmissionsfromdate: i64 => Kind::Int,
        required grade: i64 => Kind::Int,
        required timemodified: i64 => Kind::Int,
        required completionsubmit: i64 => Kind::Int,
        required cutoffdate: i64 => Kind::Int,
        required gradingduedate: i64 => Kind::Int,
        required teamsubmission: i64 => Kind::Int,
        required requireallteammemberssubmit: i64 => Kind::Int,
        required teamsubmissiongroupingid: i64 => Kind::Int,
        required blindmarking: i64 => Kind::Int,
        required revealidentities: i64 => Kind::Int,
        required attemptreopenmethod: String => Kind::Str,
        required maxattempts: i64 => Kind::Int,
        required markingworkflow: i64 => Kind::Int,
        required markingallocation: i64 => Kind::Int,
        required requiresubmissionstatement: i64 => Kind::Int,
        required configs: Vec<AssignmentConfig> => Kind::List(&ASSIGNMENT_CONFIG),
        optional introfiles: Vec<IntroFile> => Kind::List(&INTRO_FILE),
        optional introattachments: Vec<IntroFile> => Kind::List(&INTRO_FILE),
        optional preventsubmissionnotingroup: Option<i64> => Kind::Int,
        optional submissionstatement: Option<String> => Kind::Str,
        optional submissionstatementformat: Option<i64> => Kind::Int,
        optional intro: Option<String> => Kind::Str,
        optional introformat: Option<i64> => Kind::Int,
    }
}

impl Assignment {
    pub fn is_team_submission(&self) -> bool {
        self.teamsubmission != 0
    }
}

record! {
    pub struct AssignmentCourse: ASSIGNMENT_COURSE = "mod_assign_get_assignments.course" {
        required id: i64 => Kind::Int,
        required fullname: String => Kind::Str,
        required shortname: String => Kind::Str,
        required timemodified: i64 => Kind::Int,
        required assignments: Vec<Assignment> => Kind::List(&ASSIGNMENT),
    }
}

record! {
    /// Full snapshot of the assignments of the requested courses.
    pub struct AssignmentsResponse: ASSIGNMENTS_RESPONSE = "mod_assign_get_assignments" {
        required courses: Vec<AssignmentCourse> => Kind::List(&ASSIGNMENT_COURSE),
        optional warnings: Vec<ServerWarning> => Kind::List(&SERVER_WARNING),
    }
}

// ── mod_assign_get_submissions ───────────────────────

record! {
    pub struct SubmissionFile: SUBMISSION_FILE = "mod_assign_get_submissions.assignment.submission.plugin.filearea.file" {
        optional filename: Option<String> => Kind::Str,
        optional filepath: Option<String> => Kind::Str,
        optional filesize: Option<i64> => Kind::Int,
        optional fileurl: Option<String> => Kind::Str,
        optional timemodified: Option<i64> => Kind::Int,
        optional mimetype: Option<String> => Kind::Str,
        optional isexternalfile: Option<i64> => Kind::Int,
        optional repositorytype: Option<String> => Kind::Str,
    }
}

record! {
    pub struct FileArea: FILE_AREA = "mod_assign_get_submissions.assignment.submission.plugin.filearea" {
        required area: String => Kind::Str,
        optional files: Vec<SubmissionFile> => Kind::List(&SUBMISSION_FILE),
    }
}

record! {
    pub struct EditorField: EDITOR_FIELD = "mod_assign_get_submissions.assignment.submission.plugin.editorfield" {
        required name: String => Kind::Str,
        required description: String => Kind::Str,
        required text: String => Kind::Str,
        required format: i64 => Kind::Int,
    }
}

record! {
    pub struct SubmissionPlugin: SUBMISSION_PLUGIN = "mod_assign_get_submissions.assignment.submission.plugin" {
        required plugin_type ("type"): String => Kind::Str,
        required name: String => Kind::Str,
        optional editorfields: Vec<EditorField> => Kind::List(&EDITOR_FIELD),
        optional fileareas: Vec<FileArea> => Kind::List(&FILE_AREA),
    }
}

record! {
    pub struct Submission: SUBMISSION = "mod_assign_get_submissions.assignment.submission" {
        required id: i64 => Kind::Int,
        required userid: i64 => Kind::Int,
        required attemptnumber: i64 => Kind::Int,
        required timecreated: i64 => Kind::Int,
        required timemodified: i64 => Kind::Int,
        required status: String => Kind::Str,
        required groupid: i64 => Kind::Int,
        required plugins: Vec<SubmissionPlugin> => Kind::List(&SUBMISSION_PLUGIN),
        optional assignment: Option<i64> => Kind::Int,
        optional latest: Option<i64> => Kind::Int,
        optional gradingstatus: Option<String> => Kind::Str,
    }
}

impl Submission {
    /// Every file of every file area of every plugin, in server order.
    pub fn files(&self) -> impl Iterator<Item = &SubmissionFile> {
        self.plugins
            .iter()
            .flat_map(|plugin| &plugin.fileareas)
            .flat_map(|area| &area.files)
    }

    /// Concatenated text of all non-empty editor fields.
    pub fn editor_text(&self) -> Option<String> {
        let text: Vec<&str> = self
            .plugins
            .iter()
            .flat_map(|plugin| &plugin.editorfields)
            .map(|field| field.text.as_str())
            .filter(|text| !text.trim().is_empty())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == "submitted"
    }
}

record! {
    pub struct AssignmentSubmissions: ASSIGNMENT_SUBMISSIONS = "mod_assign_get_submissions.assignment" {
        required assignmentid: i64 => Kind::Int,
        required submissions: Vec<Submission> => Kind::List(&SUBMISSION),
    }
}

record! {
    /// Submissions changed since the `since` argument of the request.
    pub struct SubmissionsResponse: SUBMISSIONS_RESPONSE = "mod_assign_get_submissions" {
        required assignments: Vec<AssignmentSubmissions> => Kind::List(&ASSIGNMENT_SUBMISSIONS),
        optional warnings: Vec<ServerWarning> => Kind::List(&SERVER_WARNING),
    }
}

// ── mod_assign_get_grades ────────────────────────────

record! {
    pub struct Grade: GRADE = "mod_assign_get_grades.assignment.grade" {
        required id: i64 => Kind::Int,
        required userid: i64 => Kind::Int,
        required attemptnumber: i64 => Kind::Int,
        required timecreated: i64 => Kind::Int,
        required timemodified: i64 => Kind::Int,
        required grader: i64 => Kind::Int,
        /// Decimal number as a string; negative means "not graded".
        required grade: String => Kind::Str,
        optional assignment: Option<i64> => Kind::Int,
        optional gradefordisplay: Option<String> => Kind::Str,
    }
}

impl Grade {
    /// The numeric grade, or `None` when the server marks it as ungraded.
    pub fn value(&self) -> Option<f64> {
        self.grade
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| *value >= 0.0)
    }
}

record! {
    pub struct AssignmentGrades: ASSIGNMENT_GRADES = "mod_assign_get_grades.assignment" {
        required assignmentid: i64 => Kind::Int,
        required grades: Vec<Grade> => Kind::List(&GRADE),
    }
}

record! {
    /// Grades changed since the `since` argument of the request.
    pub struct GradesResponse: GRADES_RESPONSE = "mod_assign_get_grades" {
        required assignments: Vec<AssignmentGrades> => Kind::List(&ASSIGNMENT_GRADES),
        optional warnings: Vec<ServerWarning> => Kind::List(&SERVER_WARNING),
    }
}

// ── session bootstrap ────────────────────────────────

record! {
    pub struct SiteInfo: SITE_INFO = "core_webservice_get_site_info" {
        required sitename: String => Kind::Str,
        required username: String => Kind::Str,
        required fullname: String => Kind::Str,
        required userid: i64 => Kind::Int,
        required siteurl: String => Kind::Str,
        optional firstname: Option<String> => Kind::Str,
        optional lastname: Option<String> => Kind::Str,
        optional lang: Option<String> => Kind::Str,
        optional release: Option<String> => Kind::Str,
        optional version: Option<String> => Kind::Str,
    }
}

record! {
    pub struct TokenResponse: TOKEN_RESPONSE = "login.token" {
        required token: String => Kind::Str,
        optional privatetoken: Option<String> => Kind::Str,
    }
}
