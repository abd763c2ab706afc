use crate::models::{
    Campus, NewTestAttempt, NewTutorial, Project, ProjectChanges, ProjectDetails, ProjectRow,
    TaskDefinition, TaskDetails, TestAttempt, TestAttemptChanges, TutorialChanges,
    TutorialDetails, TutorialEnrolment, Unit, User,
};
use async_trait::async_trait;
use std::sync::Arc;

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// RepoError
///
/// Storage failures surfaced to handlers. Unique-constraint violations are kept
/// apart so they can be reported as validation failures instead of server errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("{0}")]
    UniqueViolation(String),
    #[error("database error: {0}")]
    Database(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Outcome of a guarded tutorial delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TutorialDeletion {
    Deleted,
    NotFound,
    HasEnrolments,
}

/// Repository Trait
///
/// Abstract contract for every persistence operation the handlers need. Handlers
/// only ever see `Arc<dyn Repository>`, so Postgres and the in-memory store are
/// interchangeable.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Identity & Units ---
    async fn get_user(&self, id: i64) -> RepoResult<Option<User>>;
    async fn get_unit(&self, id: i64) -> RepoResult<Option<Unit>>;
    async fn get_unit_by_code(&self, code: &str) -> RepoResult<Option<Unit>>;
    /// Staff role text ("tutor" / "convenor") of `user_id` within the unit.
    async fn get_unit_role(&self, unit_id: i64, user_id: i64) -> RepoResult<Option<String>>;
    /// True when `user_id` owns an enrolled project in the unit.
    async fn is_enrolled(&self, unit_id: i64, user_id: i64) -> RepoResult<bool>;
    async fn get_campus(&self, id: i64) -> RepoResult<Option<Campus>>;

    // --- Tutorials ---
    async fn list_tutorials(&self, unit_id: i64) -> RepoResult<Vec<TutorialDetails>>;
    async fn get_tutorial(&self, id: i64) -> RepoResult<Option<TutorialDetails>>;
    async fn create_tutorial(&self, new: NewTutorial) -> RepoResult<TutorialDetails>;
    async fn update_tutorial(
        &self,
        id: i64,
        changes: TutorialChanges,
    ) -> RepoResult<Option<TutorialDetails>>;
    /// Deletes the tutorial only when nobody is enrolled in it.
    async fn delete_tutorial(&self, id: i64) -> RepoResult<TutorialDeletion>;
    async fn enrol_in_tutorial(
        &self,
        tutorial_id: i64,
        project_id: i64,
    ) -> RepoResult<TutorialEnrolment>;
    async fn withdraw_from_tutorial(&self, tutorial_id: i64, project_id: i64) -> RepoResult<bool>;

    // --- Projects ---
    /// Projects of the unit joined with their students, ordered by last then first name.
    async fn list_students(
        &self,
        unit_id: i64,
        include_withdrawn: bool,
    ) -> RepoResult<Vec<ProjectRow>>;
    async fn find_project(&self, id: i64) -> RepoResult<Option<Project>>;
    async fn get_project(&self, id: i64) -> RepoResult<Option<ProjectDetails>>;
    async fn update_project(
        &self,
        id: i64,
        changes: ProjectChanges,
    ) -> RepoResult<Option<ProjectDetails>>;

    // --- Tasks ---
    async fn get_task_definition(&self, id: i64) -> RepoResult<Option<TaskDefinition>>;
    /// Creates the task along with one sub-task per sub-task definition.
    async fn create_task(&self, project_id: i64, task_definition_id: i64)
    -> RepoResult<TaskDetails>;
    async fn get_task(&self, id: i64) -> RepoResult<Option<TaskDetails>>;
    /// Marks a sub-task complete or incomplete and recomputes the task status.
    /// `None` when the sub-task does not belong to the task.
    async fn set_sub_task_completion(
        &self,
        task_id: i64,
        sub_task_id: i64,
        completed: bool,
    ) -> RepoResult<Option<TaskDetails>>;

    // --- Test attempts ---
    async fn list_test_attempts(&self, task_id: Option<i64>) -> RepoResult<Vec<TestAttempt>>;
    async fn latest_test_attempt(
        &self,
        task_id: Option<i64>,
        completed_only: bool,
    ) -> RepoResult<Option<TestAttempt>>;
    async fn get_test_attempt(&self, id: i64) -> RepoResult<Option<TestAttempt>>;
    async fn next_attempt_number(&self, task_id: Option<i64>) -> RepoResult<i32>;
    async fn create_test_attempt(&self, new: NewTestAttempt) -> RepoResult<TestAttempt>;
    async fn update_test_attempt(
        &self,
        id: i64,
        changes: TestAttemptChanges,
    ) -> RepoResult<Option<TestAttempt>>;
    async fn delete_test_attempt(&self, id: i64) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The type used to share persistence access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Friendly message for a named unique constraint.
pub(crate) fn unique_message(constraint: Option<&str>) -> String {
    match constraint {
        Some("tutorials_unit_abbreviation_key") => {
            "Abbreviation must be unique within the unit".to_string()
        }
        Some("tutorial_enrolments_project_tutorial_key") => {
            "Project is already enrolled in this tutorial".to_string()
        }
        Some("tasks_project_definition_key") => {
            "Task already exists for this project".to_string()
        }
        Some(other) => format!("{other} must be unique"),
        None => "Record must be unique".to_string(),
    }
}
