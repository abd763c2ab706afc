use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ErrorBody},
    models::{ProjectChanges, ProjectDetails, UpdateProjectRequest},
    policy::{Action, Resource, Scope, authorize},
    serializers::{self, ProjectResponse},
    validation::parse_id,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};

use super::{ensure, find_unit, unit_context};

/// Grades run from Pass (0) to High Distinction (3).
const GRADE_RANGE: std::ops::RangeInclusive<i32> = 0..=3;

async fn find_project(state: &AppState, id: i64) -> Result<ProjectDetails, ApiError> {
    state
        .repo
        .get_project(id)
        .await?
        .ok_or(ApiError::MissingReference("Project"))
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    params(("id" = i64, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project with tasks, enrolments and groups", body = ProjectResponse),
        (status = 403, description = "Not the owner or unit staff", body = ErrorBody),
        (status = 404, description = "Project not found", body = ErrorBody)
    )
)]
pub async fn get_project(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let details = find_project(&state, id).await?;
    let project = &details.project.project;

    let unit = find_unit(&state.repo, project.unit_id).await?;
    let context = unit_context(&state.repo, &unit, &user).await?;
    ensure(authorize(
        &user.actor(),
        Action::Read,
        &Scope::owned(Resource::Project, context, project.student_id),
    ))?;

    Ok(Json(serializers::project(&details)))
}

/// update_project
///
/// Owners may change their target grade and portfolio preferences. Changing
/// `enrolled` or `submitted_grade` additionally requires unit staff.
#[utoipa::path(
    put,
    path = "/api/projects/{id}",
    params(("id" = i64, Path, description = "Project id")),
    request_body = UpdateProjectRequest,
    responses(
        (status = 200, description = "Project updated", body = ProjectResponse),
        (status = 400, description = "Invalid grade", body = ErrorBody),
        (status = 403, description = "Not permitted", body = ErrorBody),
        (status = 404, description = "Project not found", body = ErrorBody)
    )
)]
pub async fn update_project(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<UpdateProjectRequest>, JsonRejection>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let Json(payload) = payload?;
    let changes = ProjectChanges::from(payload);

    if changes.target_grade.is_some_and(|g| !GRADE_RANGE.contains(&g)) {
        return Err(ApiError::invalid("target_grade"));
    }
    if changes.submitted_grade.is_some_and(|g| !GRADE_RANGE.contains(&g)) {
        return Err(ApiError::invalid("submitted_grade"));
    }

    let details = find_project(&state, id).await?;
    let project = &details.project.project;

    let unit = find_unit(&state.repo, project.unit_id).await?;
    let context = unit_context(&state.repo, &unit, &user).await?;
    let actor = user.actor();
    ensure(authorize(
        &actor,
        Action::Update,
        &Scope::owned(Resource::Project, context, project.student_id),
    ))?;
    if changes.touches_grading() {
        ensure(authorize(
            &actor,
            Action::Update,
            &Scope::owned(Resource::ProjectGrading, context, project.student_id),
        ))?;
    }

    let updated = state
        .repo
        .update_project(id, changes)
        .await?
        .ok_or(ApiError::MissingReference("Project"))?;

    tracing::info!(project_id = id, user_id = user.id, "project updated");
    Ok(Json(serializers::project(&updated)))
}
