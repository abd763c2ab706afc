use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ErrorBody},
    models::{CreateTaskRequest, TaskDetails, UpdateSubTaskRequest},
    policy::{Action, Resource, Scope, authorize},
    serializers::{self, TaskResponse},
    validation::{parse_id, require_id},
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use super::{ensure, find_unit, unit_context};

async fn authorize_task(
    state: &AppState,
    user: &AuthUser,
    unit_id: i64,
    owner_id: i64,
    action: Action,
) -> Result<(), ApiError> {
    let unit = find_unit(&state.repo, unit_id).await?;
    let context = unit_context(&state.repo, &unit, user).await?;
    ensure(authorize(
        &user.actor(),
        action,
        &Scope::owned(Resource::Task, context, owner_id),
    ))
}

async fn find_task(state: &AppState, id: i64) -> Result<TaskDetails, ApiError> {
    state
        .repo
        .get_task(id)
        .await?
        .ok_or(ApiError::MissingReference("Task"))
}

/// create_task
///
/// Instantiates a task definition for a project together with its sub-tasks.
#[utoipa::path(
    post,
    path = "/api/projects/{id}/tasks",
    params(("id" = i64, Path, description = "Project id")),
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created", body = TaskResponse),
        (status = 400, description = "Invalid id, foreign definition or duplicate task", body = ErrorBody),
        (status = 403, description = "Not the owner or unit staff", body = ErrorBody),
        (status = 404, description = "Project or task definition not found", body = ErrorBody)
    )
)]
pub async fn create_task(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let project_id = parse_id("id", &raw_id)?;
    let Json(payload) = payload?;
    let definition_id = require_id("task_definition_id", payload.task_definition_id.as_ref())?
        .id()
        .ok_or(ApiError::MissingReference("TaskDefinition"))?;

    let project = state
        .repo
        .find_project(project_id)
        .await?
        .ok_or(ApiError::MissingReference("Project"))?;
    authorize_task(
        &state,
        &user,
        project.unit_id,
        project.student_id,
        Action::Create,
    )
    .await?;

    let definition = state
        .repo
        .get_task_definition(definition_id)
        .await?
        .ok_or(ApiError::MissingReference("TaskDefinition"))?;
    if definition.unit_id != project.unit_id {
        return Err(ApiError::OperationRefused(
            "Task definition does not belong to the project's unit".to_string(),
        ));
    }

    let task = state.repo.create_task(project.id, definition.id).await?;
    tracing::info!(
        task_id = task.task.task.id,
        project_id = project.id,
        sub_tasks = task.sub_tasks.len(),
        "task created"
    );
    Ok((StatusCode::CREATED, Json(serializers::task(&task))))
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    params(("id" = i64, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task with sub-tasks", body = TaskResponse),
        (status = 403, description = "Not the owner or unit staff", body = ErrorBody),
        (status = 404, description = "Task not found", body = ErrorBody)
    )
)]
pub async fn get_task(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let task = find_task(&state, id).await?;
    authorize_task(
        &state,
        &user,
        task.task.unit_id,
        task.task.student_id,
        Action::Read,
    )
    .await?;

    Ok(Json(serializers::task(&task)))
}

/// update_sub_task
///
/// Sets or clears a sub-task's completion; the task status follows.
#[utoipa::path(
    put,
    path = "/api/tasks/{id}/sub_tasks/{sub_task_id}",
    params(
        ("id" = i64, Path, description = "Task id"),
        ("sub_task_id" = i64, Path, description = "Sub-task id")
    ),
    request_body = UpdateSubTaskRequest,
    responses(
        (status = 200, description = "Task after the change", body = TaskResponse),
        (status = 403, description = "Not the owner or unit staff", body = ErrorBody),
        (status = 404, description = "Task or sub-task not found", body = ErrorBody)
    )
)]
pub async fn update_sub_task(
    user: AuthUser,
    State(state): State<AppState>,
    Path((raw_id, raw_sub_task_id)): Path<(String, String)>,
    payload: Result<Json<UpdateSubTaskRequest>, JsonRejection>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let sub_task_id = parse_id("sub_task_id", &raw_sub_task_id)?;
    let Json(payload) = payload?;

    let task = find_task(&state, id).await?;
    authorize_task(
        &state,
        &user,
        task.task.unit_id,
        task.task.student_id,
        Action::Update,
    )
    .await?;

    let updated = state
        .repo
        .set_sub_task_completion(id, sub_task_id, payload.completed)
        .await?
        .ok_or(ApiError::MissingReference("SubTask"))?;

    tracing::info!(
        task_id = id,
        sub_task_id,
        completed = payload.completed,
        status = %updated.task.task.status,
        "sub-task updated"
    );
    Ok(Json(serializers::task(&updated)))
}
