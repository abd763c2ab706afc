use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};

// --- Persisted Records (Mapped to Database) ---

/// User
///
/// A person known to the system. `role` is the system-wide role
/// ("student", "tutor", "convenor" or "admin"); unit-level staff membership
/// lives in `unit_roles`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub email: String,
    pub role: String,
}

/// Unit
///
/// A teaching unit. The main convenor is the only non-admin allowed to manage
/// its tutorials.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Unit {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub main_convenor_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Campus {
    pub id: i64,
    pub name: String,
    pub abbreviation: String,
}

/// Tutorial
///
/// A scheduled class. `capacity` of -1 means unlimited. `abbreviation` is
/// unique per unit (enforced by the `tutorials_unit_abbreviation_key` constraint).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Tutorial {
    pub id: i64,
    pub unit_id: i64,
    pub tutor_id: i64,
    pub campus_id: Option<i64>,
    pub capacity: i32,
    pub abbreviation: String,
    pub meeting_location: String,
    pub meeting_day: String,
    pub meeting_time: Option<NaiveTime>,
}

/// TutorialDetails
///
/// A tutorial joined with its tutor's name and the current enrolment count.
#[derive(Debug, Clone, FromRow, Default)]
pub struct TutorialDetails {
    #[sqlx(flatten)]
    pub tutorial: Tutorial,
    pub tutor_first_name: String,
    pub tutor_last_name: String,
    pub tutor_nickname: Option<String>,
    pub num_students: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct TutorialEnrolment {
    pub id: i64,
    pub project_id: i64,
    pub tutorial_id: i64,
    pub created_at: DateTime<Utc>,
}

/// EnrolmentSummary
///
/// A project's tutorial enrolment with the tutorial's abbreviation (join).
#[derive(Debug, Clone, FromRow, Default)]
pub struct EnrolmentSummary {
    pub id: i64,
    pub tutorial_id: i64,
    pub abbreviation: String,
    pub created_at: DateTime<Utc>,
}

/// Project
///
/// A student's enrolment in a unit. Owns tasks, tutorial enrolments and group memberships.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Project {
    pub id: i64,
    pub unit_id: i64,
    pub student_id: i64,
    pub campus_id: Option<i64>,
    pub target_grade: i32,
    pub submitted_grade: Option<i32>,
    pub enrolled: bool,
    pub compile_portfolio: bool,
    pub portfolio_production_date: Option<DateTime<Utc>>,
    pub uses_draft_learning_summary: bool,
}

/// StudentIdentity
///
/// The subset of the owning user's columns joined onto project queries.
#[derive(Debug, Clone, FromRow, Default)]
pub struct StudentIdentity {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, FromRow, Default)]
pub struct ProjectRow {
    #[sqlx(flatten)]
    pub project: Project,
    #[sqlx(flatten)]
    pub student: StudentIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Group {
    pub id: i64,
    pub unit_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct TaskDefinition {
    pub id: i64,
    pub unit_id: i64,
    pub name: String,
    pub abbreviation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct SubTaskDefinition {
    pub id: i64,
    pub task_definition_id: i64,
    pub name: String,
    pub position: i32,
}

/// TaskStatus
///
/// Workflow state of a task, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, TS, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum TaskStatus {
    #[default]
    NotStarted,
    WorkingOnIt,
    NeedHelp,
    ReadyForFeedback,
    Discuss,
    Complete,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::NotStarted,
        TaskStatus::WorkingOnIt,
        TaskStatus::NeedHelp,
        TaskStatus::ReadyForFeedback,
        TaskStatus::Discuss,
        TaskStatus::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::WorkingOnIt => "working_on_it",
            TaskStatus::NeedHelp => "need_help",
            TaskStatus::ReadyForFeedback => "ready_for_feedback",
            TaskStatus::Discuss => "discuss",
            TaskStatus::Complete => "complete",
        }
    }

    /// Unknown text falls back to `NotStarted`.
    pub fn parse(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .unwrap_or_default()
    }

    /// Status after a sub-task completion change, given how many of the
    /// task's sub-tasks are now complete.
    pub fn after_sub_task_change(self, completed: usize, total: usize) -> Self {
        if total > 0 && completed == total {
            TaskStatus::Complete
        } else if completed > 0 && matches!(self, TaskStatus::NotStarted | TaskStatus::Complete) {
            TaskStatus::WorkingOnIt
        } else if completed == 0 && self == TaskStatus::Complete {
            TaskStatus::WorkingOnIt
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub task_definition_id: i64,
    pub status: String,
    pub completion_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// TaskRow
///
/// A task joined with its definition and the owning project's unit and student.
#[derive(Debug, Clone, FromRow, Default)]
pub struct TaskRow {
    #[sqlx(flatten)]
    pub task: Task,
    pub definition_name: String,
    pub definition_abbreviation: String,
    pub unit_id: i64,
    pub student_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct SubTask {
    pub id: i64,
    pub task_id: i64,
    pub sub_task_definition_id: i64,
    pub completion_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SubTaskRow
///
/// A sub-task joined with its definition's name and position.
#[derive(Debug, Clone, FromRow, Default)]
pub struct SubTaskRow {
    pub id: i64,
    pub task_id: i64,
    pub sub_task_definition_id: i64,
    pub name: String,
    pub position: i32,
    pub completion_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// TestAttempt
///
/// One attempt at an embedded Numbas test. `exam_data` is the serialized
/// exam state exactly as the client sent it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct TestAttempt {
    pub id: i64,
    pub task_id: Option<i64>,
    pub name: String,
    pub attempt_number: i32,
    pub pass_status: bool,
    pub completed: bool,
    pub exam_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Aggregates assembled by the repository ---

#[derive(Debug, Clone, Default)]
pub struct ProjectDetails {
    pub project: ProjectRow,
    pub tasks: Vec<TaskRow>,
    pub tutorial_enrolments: Vec<EnrolmentSummary>,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskDetails {
    pub task: TaskRow,
    pub sub_tasks: Vec<SubTaskRow>,
}

// --- Normalized write inputs (produced by the validator) ---

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewTutorial {
    pub unit_id: i64,
    pub tutor_id: i64,
    pub campus_id: Option<i64>,
    pub capacity: i32,
    pub abbreviation: String,
    pub meeting_location: String,
    pub meeting_day: String,
    pub meeting_time: Option<NaiveTime>,
}

/// TutorialChanges
///
/// Partial update. `None` leaves a column untouched; the nested options on
/// `campus_id` and `meeting_time` allow clearing those columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TutorialChanges {
    pub tutor_id: Option<i64>,
    pub campus_id: Option<Option<i64>>,
    pub capacity: Option<i32>,
    pub abbreviation: Option<String>,
    pub meeting_location: Option<String>,
    pub meeting_day: Option<String>,
    pub meeting_time: Option<Option<NaiveTime>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectChanges {
    pub target_grade: Option<i32>,
    pub compile_portfolio: Option<bool>,
    pub uses_draft_learning_summary: Option<bool>,
    pub enrolled: Option<bool>,
    pub submitted_grade: Option<i32>,
}

impl ProjectChanges {
    /// True when the change touches staff-only columns.
    pub fn touches_grading(&self) -> bool {
        self.enrolled.is_some() || self.submitted_grade.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewTestAttempt {
    pub task_id: Option<i64>,
    pub name: String,
    pub attempt_number: i32,
    pub pass_status: bool,
    pub completed: bool,
    pub exam_data: Option<String>,
}

impl NewTestAttempt {
    /// The attempt handed out by "latest" when nothing has been recorded yet.
    pub fn default_for(task_id: Option<i64>) -> Self {
        Self {
            task_id,
            name: "New Test".to_string(),
            attempt_number: 1,
            pass_status: false,
            completed: false,
            exam_data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestAttemptChanges {
    pub name: Option<String>,
    pub attempt_number: Option<i32>,
    pub pass_status: Option<bool>,
    pub completed: Option<bool>,
    pub exam_data: Option<String>,
}

// --- Request Payloads (Input Schemas) ---

/// TutorialParams
///
/// Raw tutorial fields as posted. Ids and capacity stay untyped JSON until the
/// validator coerces them, so a non-numeric id reports `tutorial[unit_id] is invalid`
/// instead of a generic body rejection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TutorialParams {
    #[schema(value_type = Option<i64>)]
    pub unit_id: Option<Value>,
    #[schema(value_type = Option<i64>)]
    pub tutor_id: Option<Value>,
    #[schema(value_type = Option<i64>)]
    pub campus_id: Option<Value>,
    #[schema(value_type = Option<i32>)]
    pub capacity: Option<Value>,
    pub abbreviation: Option<String>,
    pub meeting_location: Option<String>,
    pub meeting_day: Option<String>,
    #[schema(example = "18:00")]
    pub meeting_time: Option<String>,
}

/// TutorialPayload
///
/// Body of POST /api/tutorials and PUT /api/tutorials/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TutorialPayload {
    pub tutorial: TutorialParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct UpdateProjectRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_grade: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_portfolio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses_draft_learning_summary: Option<bool>,
    /// Staff only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolled: Option<bool>,
    /// Staff only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_grade: Option<i32>,
}

impl From<UpdateProjectRequest> for ProjectChanges {
    fn from(req: UpdateProjectRequest) -> Self {
        Self {
            target_grade: req.target_grade,
            compile_portfolio: req.compile_portfolio,
            uses_draft_learning_summary: req.uses_draft_learning_summary,
            enrolled: req.enrolled,
            submitted_grade: req.submitted_grade,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CreateTaskRequest {
    #[schema(value_type = Option<i64>)]
    pub task_definition_id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct UpdateSubTaskRequest {
    pub completed: bool,
}

/// TestAttemptPayload
///
/// Body of POST /savetests and PUT /savetests/{id}. `exam_data` may be sent
/// either as a JSON string or as a structured value; it is stored as text.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TestAttemptPayload {
    #[schema(value_type = Option<i64>)]
    pub task_id: Option<Value>,
    pub name: Option<String>,
    pub attempt_number: Option<i32>,
    pub pass_status: Option<bool>,
    pub completed: Option<bool>,
    #[schema(value_type = Option<String>)]
    pub exam_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct ExamDataPayload {
    #[schema(value_type = Option<String>)]
    pub exam_data: Option<Value>,
}

// --- Query Parameters ---

/// UnitScopeQuery
///
/// Collection reads must be scoped to a unit. Kept as text so the validator
/// can tell "missing" from "invalid".
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
pub struct UnitScopeQuery {
    pub unit_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
pub struct StudentsQuery {
    pub unit_id: Option<String>,
    /// Include students whose project is no longer enrolled.
    #[param(value_type = Option<bool>)]
    pub include_withdrawn: Option<String>,
}

/// TestAttemptQuery
///
/// `task_id` stays text so a malformed value is reported as `task_id is invalid`.
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
pub struct TestAttemptQuery {
    #[param(value_type = Option<i64>)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
pub struct NumbasQuery {
    pub unit_code: Option<String>,
    pub task_definition_id: Option<String>,
    /// Extension appended to extension-less file names.
    pub format: Option<String>,
}
