//! Entity serializers.
//!
//! Each resource has a fixed, statically typed response shape and a pure
//! mapping from the persisted record (or repository aggregate) to that shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::models::{
    EnrolmentSummary, Group, ProjectDetails, ProjectRow, StudentIdentity, SubTaskRow, TaskDetails,
    TaskRow, TaskStatus, TestAttempt, TutorialDetails, TutorialEnrolment,
};

/// "First Last", with " (Nick)" appended when a nickname is set.
pub fn display_name(first_name: &str, last_name: &str, nickname: Option<&str>) -> String {
    match nickname.filter(|n| !n.trim().is_empty()) {
        Some(nick) => format!("{first_name} {last_name} ({nick})"),
        None => format!("{first_name} {last_name}"),
    }
}

fn student_display_name(student: &StudentIdentity) -> String {
    display_name(&student.first_name, &student.last_name, student.nickname.as_deref())
}

// --- Tutorials ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct TutorSummary {
    pub id: i64,
    pub name: String,
}

/// TutorialResponse
///
/// `meeting_time` is rendered as `HH:MM`, or null when no time could be parsed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct TutorialResponse {
    pub id: i64,
    pub unit_id: i64,
    pub meeting_day: String,
    pub meeting_time: Option<String>,
    pub meeting_location: String,
    pub abbreviation: String,
    pub campus_id: Option<i64>,
    pub capacity: i32,
    pub tutor: TutorSummary,
    pub num_students: i64,
}

pub fn tutorial(details: &TutorialDetails) -> TutorialResponse {
    let t = &details.tutorial;
    TutorialResponse {
        id: t.id,
        unit_id: t.unit_id,
        meeting_day: t.meeting_day.clone(),
        meeting_time: t.meeting_time.map(|time| time.format("%H:%M").to_string()),
        meeting_location: t.meeting_location.clone(),
        abbreviation: t.abbreviation.clone(),
        campus_id: t.campus_id,
        capacity: t.capacity,
        tutor: TutorSummary {
            id: t.tutor_id,
            name: display_name(
                &details.tutor_first_name,
                &details.tutor_last_name,
                details.tutor_nickname.as_deref(),
            ),
        },
        num_students: details.num_students,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct TutorialEnrolmentResponse {
    pub id: i64,
    pub project_id: i64,
    pub tutorial_id: i64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

pub fn tutorial_enrolment(enrolment: &TutorialEnrolment) -> TutorialEnrolmentResponse {
    TutorialEnrolmentResponse {
        id: enrolment.id,
        project_id: enrolment.project_id,
        tutorial_id: enrolment.tutorial_id,
        created_at: enrolment.created_at,
    }
}

/// DeletedResponse
///
/// Confirmation body for successful deletes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct DeletedResponse {
    pub id: i64,
    pub deleted: bool,
}

pub fn deleted(id: i64) -> DeletedResponse {
    DeletedResponse { id, deleted: true }
}

// --- Students / Projects ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct StudentResponse {
    pub project_id: i64,
    /// The student's username.
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub student_name: String,
    pub email: String,
    pub campus_id: Option<i64>,
    pub enrolled: bool,
    pub target_grade: i32,
}

pub fn student(row: &ProjectRow) -> StudentResponse {
    StudentResponse {
        project_id: row.project.id,
        student_id: row.student.username.clone(),
        first_name: row.student.first_name.clone(),
        last_name: row.student.last_name.clone(),
        student_name: student_display_name(&row.student),
        email: row.student.email.clone(),
        campus_id: row.project.campus_id,
        enrolled: row.project.enrolled,
        target_grade: row.project.target_grade,
    }
}

/// TaskStats
///
/// Number of the project's tasks in each workflow state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq, Default)]
#[ts(export)]
pub struct TaskStats {
    pub not_started: i64,
    pub working_on_it: i64,
    pub need_help: i64,
    pub ready_for_feedback: i64,
    pub discuss: i64,
    pub complete: i64,
    pub total: i64,
}

pub fn task_stats<'a>(statuses: impl IntoIterator<Item = &'a str>) -> TaskStats {
    let mut stats = TaskStats::default();
    for status in statuses {
        let slot = match TaskStatus::parse(status) {
            TaskStatus::NotStarted => &mut stats.not_started,
            TaskStatus::WorkingOnIt => &mut stats.working_on_it,
            TaskStatus::NeedHelp => &mut stats.need_help,
            TaskStatus::ReadyForFeedback => &mut stats.ready_for_feedback,
            TaskStatus::Discuss => &mut stats.discuss,
            TaskStatus::Complete => &mut stats.complete,
        };
        *slot += 1;
        stats.total += 1;
    }
    stats
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct TaskSummary {
    pub id: i64,
    pub task_definition_id: i64,
    pub abbreviation: String,
    pub status: TaskStatus,
    #[ts(type = "string | null")]
    pub completion_date: Option<DateTime<Utc>>,
}

fn task_summary(row: &TaskRow) -> TaskSummary {
    TaskSummary {
        id: row.task.id,
        task_definition_id: row.task.task_definition_id,
        abbreviation: row.definition_abbreviation.clone(),
        status: TaskStatus::parse(&row.task.status),
        completion_date: row.task.completion_date,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct EnrolmentSummaryResponse {
    pub id: i64,
    pub tutorial_id: i64,
    pub abbreviation: String,
}

fn enrolment_summary(enrolment: &EnrolmentSummary) -> EnrolmentSummaryResponse {
    EnrolmentSummaryResponse {
        id: enrolment.id,
        tutorial_id: enrolment.tutorial_id,
        abbreviation: enrolment.abbreviation.clone(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct GroupSummary {
    pub id: i64,
    pub name: String,
}

fn group_summary(group: &Group) -> GroupSummary {
    GroupSummary {
        id: group.id,
        name: group.name.clone(),
    }
}

/// ProjectResponse
///
/// A student's project within a unit, with derived name and task statistics.
/// Tutorial enrolments keep their enrolment order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct ProjectResponse {
    pub unit_id: i64,
    pub project_id: i64,
    pub student_id: String,
    pub campus_id: Option<i64>,
    pub student_name: String,
    pub enrolled: bool,
    pub target_grade: i32,
    pub submitted_grade: Option<i32>,
    pub compile_portfolio: bool,
    pub portfolio_available: bool,
    pub uses_draft_learning_summary: bool,
    pub stats: TaskStats,
    pub tasks: Vec<TaskSummary>,
    pub tutorial_enrolments: Vec<EnrolmentSummaryResponse>,
    pub groups: Vec<GroupSummary>,
}

pub fn project(details: &ProjectDetails) -> ProjectResponse {
    let row = &details.project;
    let p = &row.project;
    ProjectResponse {
        unit_id: p.unit_id,
        project_id: p.id,
        student_id: row.student.username.clone(),
        campus_id: p.campus_id,
        student_name: student_display_name(&row.student),
        enrolled: p.enrolled,
        target_grade: p.target_grade,
        submitted_grade: p.submitted_grade,
        compile_portfolio: p.compile_portfolio,
        portfolio_available: p.portfolio_production_date.is_some(),
        uses_draft_learning_summary: p.uses_draft_learning_summary,
        stats: task_stats(details.tasks.iter().map(|t| t.task.status.as_str())),
        tasks: details.tasks.iter().map(task_summary).collect(),
        tutorial_enrolments: details.tutorial_enrolments.iter().map(enrolment_summary).collect(),
        groups: details.groups.iter().map(group_summary).collect(),
    }
}

// --- Tasks ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct SubTaskResponse {
    pub id: i64,
    pub sub_task_definition_id: i64,
    pub name: String,
    pub completed: bool,
    #[ts(type = "string | null")]
    pub completion_date: Option<DateTime<Utc>>,
}

fn sub_task(row: &SubTaskRow) -> SubTaskResponse {
    SubTaskResponse {
        id: row.id,
        sub_task_definition_id: row.sub_task_definition_id,
        name: row.name.clone(),
        completed: row.completion_date.is_some(),
        completion_date: row.completion_date,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct TaskResponse {
    pub id: i64,
    pub project_id: i64,
    pub task_definition_id: i64,
    pub name: String,
    pub abbreviation: String,
    pub status: TaskStatus,
    #[ts(type = "string | null")]
    pub completion_date: Option<DateTime<Utc>>,
    pub sub_tasks: Vec<SubTaskResponse>,
}

/// Sub-tasks are listed in definition position order.
pub fn task(details: &TaskDetails) -> TaskResponse {
    let row = &details.task;
    let mut sub_tasks: Vec<&SubTaskRow> = details.sub_tasks.iter().collect();
    sub_tasks.sort_by_key(|s| (s.position, s.id));
    TaskResponse {
        id: row.task.id,
        project_id: row.task.project_id,
        task_definition_id: row.task.task_definition_id,
        name: row.definition_name.clone(),
        abbreviation: row.definition_abbreviation.clone(),
        status: TaskStatus::parse(&row.task.status),
        completion_date: row.task.completion_date,
        sub_tasks: sub_tasks.into_iter().map(sub_task).collect(),
    }
}

// --- Test attempts ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct TestAttemptResponse {
    pub id: i64,
    pub task_id: Option<i64>,
    pub name: String,
    pub attempt_number: i32,
    pub pass_status: bool,
    pub completed: bool,
    pub exam_data: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

pub fn test_attempt(attempt: &TestAttempt) -> TestAttemptResponse {
    TestAttemptResponse {
        id: attempt.id,
        task_id: attempt.task_id,
        name: attempt.name.clone(),
        attempt_number: attempt.attempt_number,
        pass_status: attempt.pass_status,
        completed: attempt.completed,
        exam_data: attempt.exam_data.clone(),
        created_at: attempt.created_at,
        updated_at: attempt.updated_at,
    }
}

/// ApiResponse
///
/// Envelope used by the test-attempt endpoints: `{ success, data, message }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
        }
    }
}

// --- Test packages ---

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, PartialEq)]
#[ts(export)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
}

pub fn uploaded() -> UploadResponse {
    UploadResponse {
        success: true,
        message: "File uploaded successfully".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, Task, Tutorial};
    use chrono::NaiveTime;

    #[test]
    fn display_name_appends_nickname() {
        assert_eq!(display_name("Ada", "Lovelace", None), "Ada Lovelace");
        assert_eq!(display_name("Ada", "Lovelace", Some("Countess")), "Ada Lovelace (Countess)");
        assert_eq!(display_name("Ada", "Lovelace", Some(" ")), "Ada Lovelace");
    }

    #[test]
    fn tutorial_renders_time_and_tutor() {
        let details = TutorialDetails {
            tutorial: Tutorial {
                id: 5,
                unit_id: 1,
                tutor_id: 9,
                campus_id: None,
                capacity: 10,
                abbreviation: "LA011".into(),
                meeting_location: "LAB34".into(),
                meeting_day: "Tuesday".into(),
                meeting_time: NaiveTime::from_hms_opt(18, 0, 0),
            },
            tutor_first_name: "Tim".into(),
            tutor_last_name: "Tutor".into(),
            tutor_nickname: None,
            num_students: 2,
        };
        let json = serde_json::to_value(tutorial(&details)).unwrap();
        assert_eq!(json["meeting_time"], "18:00");
        assert_eq!(json["tutor"]["name"], "Tim Tutor");
        assert_eq!(json["num_students"], 2);
    }

    #[test]
    fn project_derives_name_stats_and_portfolio_flag() {
        let row = ProjectRow {
            project: Project {
                id: 3,
                unit_id: 1,
                student_id: 7,
                enrolled: true,
                target_grade: 2,
                portfolio_production_date: Some(Utc::now()),
                ..Project::default()
            },
            student: StudentIdentity {
                username: "s123".into(),
                first_name: "Sam".into(),
                last_name: "Student".into(),
                nickname: Some("Sammy".into()),
                email: "s123@example.edu".into(),
            },
        };
        let task_with = |status: &str| TaskRow {
            task: Task {
                status: status.to_string(),
                ..Task::default()
            },
            ..TaskRow::default()
        };
        let details = ProjectDetails {
            project: row,
            tasks: vec![task_with("complete"), task_with("not_started"), task_with("complete")],
            ..ProjectDetails::default()
        };

        let response = project(&details);
        assert_eq!(response.student_id, "s123");
        assert_eq!(response.student_name, "Sam Student (Sammy)");
        assert!(response.portfolio_available);
        assert_eq!(response.stats.complete, 2);
        assert_eq!(response.stats.not_started, 1);
        assert_eq!(response.stats.total, 3);

        // Only the availability flag is exposed; compiled portfolio contents are not.
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["portfolio_available"], true);
        assert!(json.get("portfolio_files").is_none());
    }

    #[test]
    fn task_orders_sub_tasks_by_position() {
        let sub = |id: i64, position: i32| SubTaskRow {
            id,
            position,
            name: format!("part {position}"),
            ..SubTaskRow::default()
        };
        let details = TaskDetails {
            task: TaskRow::default(),
            sub_tasks: vec![sub(1, 2), sub(2, 0), sub(3, 1)],
        };
        let ids: Vec<i64> = task(&details).sub_tasks.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
