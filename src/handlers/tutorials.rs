use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ErrorBody},
    models::{TutorialDetails, TutorialPayload, UnitScopeQuery},
    policy::{Action, Resource, Scope, authorize},
    repository::TutorialDeletion,
    serializers::{self, DeletedResponse, TutorialEnrolmentResponse, TutorialResponse},
    validation::{parse_id, require_scope, validate_tutorial_create, validate_tutorial_update},
};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};

use super::{ensure, find_unit, unit_context};

async fn find_tutorial(state: &AppState, id: i64) -> Result<TutorialDetails, ApiError> {
    state
        .repo
        .get_tutorial(id)
        .await?
        .ok_or(ApiError::MissingReference("Tutorial"))
}

/// Checks the caller may perform `action` on tutorials of the tutorial's unit.
async fn authorize_tutorial(
    state: &AppState,
    user: &AuthUser,
    unit_id: i64,
    action: Action,
) -> Result<(), ApiError> {
    let unit = find_unit(&state.repo, unit_id).await?;
    let context = unit_context(&state.repo, &unit, user).await?;
    ensure(authorize(
        &user.actor(),
        action,
        &Scope::unit(Resource::Tutorial, context),
    ))
}

/// create_tutorial
///
/// Order of checks: field shape (400), unit (404), permission (403), tutor
/// (404), campus (404), then the insert (400 on a duplicate abbreviation).
#[utoipa::path(
    post,
    path = "/api/tutorials",
    request_body = TutorialPayload,
    responses(
        (status = 201, description = "Tutorial created", body = TutorialResponse),
        (status = 400, description = "Invalid field or duplicate abbreviation", body = ErrorBody),
        (status = 403, description = "Not the unit's main convenor", body = ErrorBody),
        (status = 404, description = "Unit, tutor or campus not found", body = ErrorBody),
        (status = 419, description = "Missing or rejected auth token", body = ErrorBody)
    )
)]
pub async fn create_tutorial(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<TutorialPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<TutorialResponse>), ApiError> {
    let Json(payload) = payload?;
    let fields = validate_tutorial_create(&payload.tutorial)?;

    let unit_id = fields.unit_id.ok_or(ApiError::MissingReference("Unit"))?;
    let unit = find_unit(&state.repo, unit_id).await?;
    let context = unit_context(&state.repo, &unit, &user).await?;
    ensure(authorize(
        &user.actor(),
        Action::Create,
        &Scope::unit(Resource::Tutorial, context),
    ))?;

    let tutor_id = fields.tutor_id.ok_or(ApiError::MissingReference("User"))?;
    state
        .repo
        .get_user(tutor_id)
        .await?
        .ok_or(ApiError::MissingReference("User"))?;

    if let Some(campus_id) = fields.campus_id {
        state
            .repo
            .get_campus(campus_id)
            .await?
            .ok_or(ApiError::MissingReference("Campus"))?;
    }

    let created = state
        .repo
        .create_tutorial(fields.into_new_tutorial(unit.id, tutor_id))
        .await?;

    tracing::info!(
        tutorial_id = created.tutorial.id,
        unit_id = unit.id,
        user_id = user.id,
        "tutorial created"
    );
    Ok((StatusCode::CREATED, Json(serializers::tutorial(&created))))
}

/// list_tutorials
///
/// Collection reads are always scoped to a unit.
#[utoipa::path(
    get,
    path = "/api/tutorials",
    params(UnitScopeQuery),
    responses(
        (status = 200, description = "Tutorials of the unit", body = [TutorialResponse]),
        (status = 400, description = "unit_id missing or invalid", body = ErrorBody),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn list_tutorials(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<UnitScopeQuery>,
) -> Result<Json<Vec<TutorialResponse>>, ApiError> {
    let unit_id = require_scope("unit_id", query.unit_id.as_deref())?;
    authorize_tutorial(&state, &user, unit_id, Action::Read).await?;

    let tutorials = state.repo.list_tutorials(unit_id).await?;
    Ok(Json(tutorials.iter().map(serializers::tutorial).collect()))
}

#[utoipa::path(
    get,
    path = "/api/tutorials/{id}",
    params(("id" = i64, Path, description = "Tutorial id")),
    responses(
        (status = 200, description = "Tutorial", body = TutorialResponse),
        (status = 404, description = "Tutorial not found", body = ErrorBody)
    )
)]
pub async fn get_tutorial(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<TutorialResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let tutorial = find_tutorial(&state, id).await?;
    authorize_tutorial(&state, &user, tutorial.tutorial.unit_id, Action::Read).await?;

    Ok(Json(serializers::tutorial(&tutorial)))
}

/// update_tutorial
///
/// Partial update; empty strings leave the column unchanged.
#[utoipa::path(
    put,
    path = "/api/tutorials/{id}",
    params(("id" = i64, Path, description = "Tutorial id")),
    request_body = TutorialPayload,
    responses(
        (status = 200, description = "Tutorial updated", body = TutorialResponse),
        (status = 400, description = "Invalid field or duplicate abbreviation", body = ErrorBody),
        (status = 403, description = "Not the unit's main convenor", body = ErrorBody),
        (status = 404, description = "Tutorial, tutor or campus not found", body = ErrorBody),
        (status = 419, description = "Missing or rejected auth token", body = ErrorBody)
    )
)]
pub async fn update_tutorial(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<TutorialPayload>, JsonRejection>,
) -> Result<Json<TutorialResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let Json(payload) = payload?;
    let changes = validate_tutorial_update(&payload.tutorial)?;

    let existing = find_tutorial(&state, id).await?;
    authorize_tutorial(&state, &user, existing.tutorial.unit_id, Action::Update).await?;

    if let Some(tutor_id) = changes.tutor_id {
        state
            .repo
            .get_user(tutor_id)
            .await?
            .ok_or(ApiError::MissingReference("User"))?;
    }
    if let Some(Some(campus_id)) = changes.campus_id {
        state
            .repo
            .get_campus(campus_id)
            .await?
            .ok_or(ApiError::MissingReference("Campus"))?;
    }

    let updated = state
        .repo
        .update_tutorial(id, changes)
        .await?
        .ok_or(ApiError::MissingReference("Tutorial"))?;

    tracing::info!(tutorial_id = id, user_id = user.id, "tutorial updated");
    Ok(Json(serializers::tutorial(&updated)))
}

/// delete_tutorial
///
/// Refused while any project is enrolled; enrolments are never cascaded.
#[utoipa::path(
    delete,
    path = "/api/tutorials/{id}",
    params(("id" = i64, Path, description = "Tutorial id")),
    responses(
        (status = 200, description = "Tutorial deleted", body = DeletedResponse),
        (status = 400, description = "Invalid id or tutorial has enrolments", body = ErrorBody),
        (status = 403, description = "Not the unit's main convenor", body = ErrorBody),
        (status = 404, description = "Tutorial not found", body = ErrorBody),
        (status = 419, description = "Missing or rejected auth token", body = ErrorBody)
    )
)]
pub async fn delete_tutorial(
    user: AuthUser,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let existing = find_tutorial(&state, id).await?;
    authorize_tutorial(&state, &user, existing.tutorial.unit_id, Action::Delete).await?;

    match state.repo.delete_tutorial(id).await? {
        TutorialDeletion::Deleted => {
            tracing::info!(tutorial_id = id, user_id = user.id, "tutorial deleted");
            Ok(Json(serializers::deleted(id)))
        }
        TutorialDeletion::HasEnrolments => Err(ApiError::OperationRefused(
            "Cannot delete tutorial with enrolments".to_string(),
        )),
        TutorialDeletion::NotFound => Err(ApiError::MissingReference("Tutorial")),
    }
}

/// enrol_project
///
/// Enrols a project in a tutorial of the same unit, respecting capacity.
#[utoipa::path(
    post,
    path = "/api/tutorials/{id}/enrolments/{project_id}",
    params(
        ("id" = i64, Path, description = "Tutorial id"),
        ("project_id" = i64, Path, description = "Project id")
    ),
    responses(
        (status = 201, description = "Enrolled", body = TutorialEnrolmentResponse),
        (status = 400, description = "Other unit, tutorial full, or already enrolled", body = ErrorBody),
        (status = 403, description = "Not the project owner or unit staff", body = ErrorBody),
        (status = 404, description = "Tutorial or project not found", body = ErrorBody)
    )
)]
pub async fn enrol_project(
    user: AuthUser,
    State(state): State<AppState>,
    Path((raw_id, raw_project_id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<TutorialEnrolmentResponse>), ApiError> {
    let id = parse_id("id", &raw_id)?;
    let project_id = parse_id("project_id", &raw_project_id)?;

    let tutorial = find_tutorial(&state, id).await?;
    let project = state
        .repo
        .find_project(project_id)
        .await?
        .ok_or(ApiError::MissingReference("Project"))?;

    let unit = find_unit(&state.repo, tutorial.tutorial.unit_id).await?;
    let context = unit_context(&state.repo, &unit, &user).await?;
    ensure(authorize(
        &user.actor(),
        Action::Create,
        &Scope::owned(Resource::TutorialEnrolment, context, project.student_id),
    ))?;

    if project.unit_id != tutorial.tutorial.unit_id {
        return Err(ApiError::OperationRefused(
            "Project does not belong to the tutorial's unit".to_string(),
        ));
    }
    let capacity = tutorial.tutorial.capacity;
    if capacity >= 0 && tutorial.num_students >= i64::from(capacity) {
        return Err(ApiError::OperationRefused("Tutorial is full".to_string()));
    }

    let enrolment = state.repo.enrol_in_tutorial(id, project_id).await?;
    tracing::info!(tutorial_id = id, project_id, "project enrolled in tutorial");
    Ok((
        StatusCode::CREATED,
        Json(serializers::tutorial_enrolment(&enrolment)),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/tutorials/{id}/enrolments/{project_id}",
    params(
        ("id" = i64, Path, description = "Tutorial id"),
        ("project_id" = i64, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Withdrawn", body = DeletedResponse),
        (status = 403, description = "Not the project owner or unit staff", body = ErrorBody),
        (status = 404, description = "Tutorial, project or enrolment not found", body = ErrorBody)
    )
)]
pub async fn withdraw_project(
    user: AuthUser,
    State(state): State<AppState>,
    Path((raw_id, raw_project_id)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_id("id", &raw_id)?;
    let project_id = parse_id("project_id", &raw_project_id)?;

    let tutorial = find_tutorial(&state, id).await?;
    let project = state
        .repo
        .find_project(project_id)
        .await?
        .ok_or(ApiError::MissingReference("Project"))?;

    let unit = find_unit(&state.repo, tutorial.tutorial.unit_id).await?;
    let context = unit_context(&state.repo, &unit, &user).await?;
    ensure(authorize(
        &user.actor(),
        Action::Delete,
        &Scope::owned(Resource::TutorialEnrolment, context, project.student_id),
    ))?;

    if !state.repo.withdraw_from_tutorial(id, project_id).await? {
        return Err(ApiError::NotFound(
            "Project is not enrolled in this tutorial".to_string(),
        ));
    }

    tracing::info!(tutorial_id = id, project_id, "project withdrawn from tutorial");
    Ok(Json(serializers::deleted(project_id)))
}
