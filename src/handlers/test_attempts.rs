use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ErrorBody},
    models::{
        ExamDataPayload, NewTestAttempt, TestAttempt, TestAttemptChanges, TestAttemptPayload,
        TestAttemptQuery,
    },
    policy::{Action, Resource, Scope, authorize},
    serializers::{self, ApiResponse, DeletedResponse, TestAttemptResponse},
    validation::{
        exam_data_text, optional_id, parse_id, validate_test_attempt_create,
        validate_test_attempt_update,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};

use super::ensure;

type Envelope<T> = Json<ApiResponse<T>>;

fn allow(user: &AuthUser, action: Action) -> Result<(), ApiError> {
    ensure(authorize(
        &user.actor(),
        action,
        &Scope::global(Resource::TestAttempt),
    ))
}

/// A referenced task must exist before an attempt can point at it.
async fn check_task(state: &AppState, task_id: Option<i64>) -> Result<(), ApiError> {
    if let Some(id) = task_id {
        state
            .repo
            .get_task(id)
            .await?
            .ok_or(ApiError::MissingReference("Task"))?;
    }
    Ok(())
}

async fn find_attempt(state: &AppState, raw_id: &str) -> Result<TestAttempt, ApiError> {
    let id = parse_id("id", raw_id)?;
    state
        .repo
        .get_test_attempt(id)
        .await?
        .ok_or(ApiError::MissingReference("TestAttempt"))
}

#[utoipa::path(
    get,
    path = "/savetests",
    params(TestAttemptQuery),
    responses(
        (status = 200, description = "Attempts, all of them when task_id is absent", body = [TestAttemptResponse]),
        (status = 401, description = "No valid credential", body = ErrorBody)
    )
)]
pub async fn list_test_attempts(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<TestAttemptQuery>,
) -> Result<Envelope<Vec<TestAttemptResponse>>, ApiError> {
    allow(&user, Action::Read)?;
    let task_id = optional_id("task_id", query.task_id.as_deref())?;
    let attempts = state.repo.list_test_attempts(task_id).await?;
    Ok(Json(ApiResponse::success(
        attempts.iter().map(serializers::test_attempt).collect(),
        "Test attempts retrieved",
    )))
}

/// latest_test_attempt
///
/// Returns the newest attempt. When none exists yet a default attempt is
/// created and returned, so the embedded test always has something to resume.
#[utoipa::path(
    get,
    path = "/savetests/latest",
    params(TestAttemptQuery),
    responses(
        (status = 200, description = "Newest attempt (created when absent)", body = TestAttemptResponse),
        (status = 404, description = "Task not found", body = ErrorBody)
    )
)]
pub async fn latest_test_attempt(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<TestAttemptQuery>,
) -> Result<Envelope<TestAttemptResponse>, ApiError> {
    allow(&user, Action::Read)?;
    let task_id = optional_id("task_id", query.task_id.as_deref())?;

    if let Some(attempt) = state.repo.latest_test_attempt(task_id, false).await? {
        return Ok(Json(ApiResponse::success(
            serializers::test_attempt(&attempt),
            "Latest test attempt retrieved",
        )));
    }

    check_task(&state, task_id).await?;
    let created = state
        .repo
        .create_test_attempt(NewTestAttempt::default_for(task_id))
        .await?;
    tracing::info!(attempt_id = created.id, task_id = ?task_id, "created default test attempt");

    Ok(Json(ApiResponse::success(
        serializers::test_attempt(&created),
        "New test attempt created",
    )))
}

/// completed_latest_test_attempt
///
/// Unlike `latest`, never creates anything: 404 when no attempt is completed.
#[utoipa::path(
    get,
    path = "/savetests/completed-latest",
    params(TestAttemptQuery),
    responses(
        (status = 200, description = "Newest completed attempt", body = TestAttemptResponse),
        (status = 404, description = "No completed attempt", body = ErrorBody)
    )
)]
pub async fn completed_latest_test_attempt(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<TestAttemptQuery>,
) -> Result<Envelope<TestAttemptResponse>, ApiError> {
    allow(&user, Action::Read)?;
    let task_id = optional_id("task_id", query.task_id.as_deref())?;

    let attempt = state
        .repo
        .latest_test_attempt(task_id, true)
        .await?
        .ok_or_else(|| ApiError::NotFound("No completed test attempt found".to_string()))?;

    Ok(Json(ApiResponse::success(
        serializers::test_attempt(&attempt),
        "Latest completed test attempt retrieved",
    )))
}

#[utoipa::path(
    get,
    path = "/savetests/{id}",
    params(("id" = i64, Path, description = "Test attempt id")),
    responses(
        (status = 200, description = "Attempt", body = TestAttemptResponse),
        (status = 404, description = "Attempt not found", body = ErrorBody)
    )
)]
pub async fn get_test_attempt(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Envelope<TestAttemptResponse>, ApiError> {
    allow(&user, Action::Read)?;
    let attempt = find_attempt(&state, &raw_id).await?;
    Ok(Json(ApiResponse::success(
        serializers::test_attempt(&attempt),
        "Test attempt retrieved",
    )))
}

/// create_test_attempt
///
/// `attempt_number` defaults to one past the highest recorded for the task.
#[utoipa::path(
    post,
    path = "/savetests",
    request_body = TestAttemptPayload,
    responses(
        (status = 201, description = "Attempt recorded", body = TestAttemptResponse),
        (status = 400, description = "Invalid field", body = ErrorBody),
        (status = 404, description = "Task not found", body = ErrorBody)
    )
)]
pub async fn create_test_attempt(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<TestAttemptPayload>, JsonRejection>,
) -> Result<(StatusCode, Envelope<TestAttemptResponse>), ApiError> {
    allow(&user, Action::Create)?;
    let Json(payload) = payload?;
    let fields = validate_test_attempt_create(&payload)?;
    check_task(&state, fields.task_id).await?;

    let next = state.repo.next_attempt_number(fields.task_id).await?;
    let created = state
        .repo
        .create_test_attempt(fields.into_new_attempt(next))
        .await?;

    tracing::info!(
        attempt_id = created.id,
        attempt_number = created.attempt_number,
        user_id = user.id,
        "test attempt recorded"
    );
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            serializers::test_attempt(&created),
            "Test attempt saved",
        )),
    ))
}

#[utoipa::path(
    put,
    path = "/savetests/{id}",
    params(("id" = i64, Path, description = "Test attempt id")),
    request_body = TestAttemptPayload,
    responses(
        (status = 200, description = "Attempt updated", body = TestAttemptResponse),
        (status = 400, description = "Invalid field", body = ErrorBody),
        (status = 404, description = "Attempt not found", body = ErrorBody)
    )
)]
pub async fn update_test_attempt(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<TestAttemptPayload>, JsonRejection>,
) -> Result<Envelope<TestAttemptResponse>, ApiError> {
    allow(&user, Action::Update)?;
    let id = parse_id("id", &raw_id)?;
    let Json(payload) = payload?;
    let changes = validate_test_attempt_update(&payload)?;

    let updated = state
        .repo
        .update_test_attempt(id, changes)
        .await?
        .ok_or(ApiError::MissingReference("TestAttempt"))?;

    Ok(Json(ApiResponse::success(
        serializers::test_attempt(&updated),
        "Test attempt updated",
    )))
}

/// update_exam_data
///
/// Replaces only the serialized exam state.
#[utoipa::path(
    put,
    path = "/savetests/{id}/exam_data",
    params(("id" = i64, Path, description = "Test attempt id")),
    request_body = ExamDataPayload,
    responses(
        (status = 200, description = "Exam data saved", body = TestAttemptResponse),
        (status = 400, description = "exam_data missing", body = ErrorBody),
        (status = 404, description = "Attempt not found", body = ErrorBody)
    )
)]
pub async fn update_exam_data(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<ExamDataPayload>, JsonRejection>,
) -> Result<Envelope<TestAttemptResponse>, ApiError> {
    allow(&user, Action::Update)?;
    let id = parse_id("id", &raw_id)?;
    let Json(payload) = payload?;
    let exam_data = payload
        .exam_data
        .as_ref()
        .and_then(exam_data_text)
        .ok_or_else(|| ApiError::missing("exam_data"))?;

    let changes = TestAttemptChanges {
        exam_data: Some(exam_data),
        ..Default::default()
    };
    let updated = state
        .repo
        .update_test_attempt(id, changes)
        .await?
        .ok_or(ApiError::MissingReference("TestAttempt"))?;

    tracing::debug!(attempt_id = id, "exam data saved");
    Ok(Json(ApiResponse::success(
        serializers::test_attempt(&updated),
        "Exam data updated",
    )))
}

#[utoipa::path(
    delete,
    path = "/savetests/{id}",
    params(("id" = i64, Path, description = "Test attempt id")),
    responses(
        (status = 200, description = "Attempt deleted", body = DeletedResponse),
        (status = 404, description = "Attempt not found", body = ErrorBody)
    )
)]
pub async fn delete_test_attempt(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Envelope<DeletedResponse>, ApiError> {
    allow(&user, Action::Delete)?;
    let id = parse_id("id", &raw_id)?;

    if !state.repo.delete_test_attempt(id).await? {
        return Err(ApiError::MissingReference("TestAttempt"));
    }

    tracing::info!(attempt_id = id, user_id = user.id, "test attempt deleted");
    Ok(Json(ApiResponse::success(
        serializers::deleted(id),
        "Test attempt deleted",
    )))
}
