use std::fmt;

use mdt_lib::responses::{Assignment, Grade, Submission};
use mdt_lib::worktree::WorkTree;

/// Submission and grading progress of one assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignmentStatus {
    pub submitted: usize,
    pub submissions: usize,
    pub graded: usize,
}

impl AssignmentStatus {
    pub fn collect(submissions: &[Submission], grades: &[Grade]) -> Self {
        Self {
            submitted: submissions.iter().filter(|s| s.is_submitted()).count(),
            submissions: submissions.len(),
            graded: grades.iter().filter(|g| g.value().is_some()).count(),
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} submitted, {} graded",
            self.submitted, self.submissions, self.graded
        )
    }
}

fn due(assignment: &Assignment) -> String {
    if assignment.duedate <= 0 {
        return "no due date".to_string();
    }
    chrono::DateTime::from_timestamp(assignment.duedate, 0)
        .map(|date| format!("due {}", date.format("%Y-%m-%d %H:%M")))
        .unwrap_or_default()
}

/// Prints every synced assignment per course. `assignment_ids` narrows the
/// listing when not empty.
pub fn run_status(tree: &WorkTree, assignment_ids: &[i64]) -> anyhow::Result<()> {
    let courses = tree.courses()?;
    let assignments = tree.assignments().all()?;
    let mut submissions = tree.submissions()?;
    let mut grades = tree.grades()?;

    if assignments.is_empty() {
        println!("No assignments synced yet, run `mdt sync`");
        return Ok(());
    }

    for course in &courses {
        println!("{} ({})", course.fullname, course.shortname);
        for assignment in assignments.iter().filter(|a| {
            a.course == course.id && (assignment_ids.is_empty() || assignment_ids.contains(&a.id))
        }) {
            let status = AssignmentStatus::collect(
                &submissions.get(assignment.id)?.unwrap_or_default(),
                &grades.get(assignment.id)?.unwrap_or_default(),
            );
            println!(
                "  {:>6}  {:<40} {:<22} {}",
                assignment.id,
                assignment.name,
                due(assignment),
                status
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdt_lib::decode::Decoder;
    use serde_json::json;

    #[test]
    fn test_collect_status() {
        let decoder = Decoder::new();
        let submissions: Vec<Submission> = decoder
            .decode_many(Some(&json!([
                {"id": 1, "userid": 7, "attemptnumber": 0, "timecreated": 0, "timemodified": 0, "status": "submitted", "groupid": 0, "plugins": []},
                {"id": 2, "userid": 8, "attemptnumber": 0, "timecreated": 0, "timemodified": 0, "status": "new", "groupid": 0, "plugins": []}
            ])))
            .unwrap();
        let grades: Vec<Grade> = decoder
            .decode_many(Some(&json!([
                {"id": 1, "userid": 7, "attemptnumber": 0, "timecreated": 0, "timemodified": 0, "grader": 2, "grade": "7.00000"},
                {"id": 2, "userid": 8, "attemptnumber": 0, "timecreated": 0, "timemodified": 0, "grader": 2, "grade": "-1.00000"}
            ])))
            .unwrap();
        let status = AssignmentStatus::collect(&submissions, &grades);
        assert_eq!(status.to_string(), "1/2 submitted, 1 graded");
    }
}
