use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ErrorBody},
    models::StudentsQuery,
    policy::{Action, Resource, Scope, authorize},
    serializers::{self, StudentResponse},
    validation::{parse_flag, require_scope},
};
use axum::{
    Json,
    extract::{Query, State},
};

use super::{ensure, find_unit, unit_context};

/// list_students
///
/// Staff-only roster of a unit. Withdrawn students are hidden unless
/// `include_withdrawn=true`.
#[utoipa::path(
    get,
    path = "/api/students",
    params(StudentsQuery),
    responses(
        (status = 200, description = "Students of the unit", body = [StudentResponse]),
        (status = 400, description = "unit_id missing or invalid", body = ErrorBody),
        (status = 403, description = "Caller is not unit staff", body = ErrorBody),
        (status = 404, description = "Unit not found", body = ErrorBody),
        (status = 419, description = "Missing or rejected auth token", body = ErrorBody)
    )
)]
pub async fn list_students(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<StudentsQuery>,
) -> Result<Json<Vec<StudentResponse>>, ApiError> {
    let unit_id = require_scope("unit_id", query.unit_id.as_deref())?;
    let include_withdrawn = parse_flag("include_withdrawn", query.include_withdrawn.as_deref())?;
    let unit = find_unit(&state.repo, unit_id).await?;
    let context = unit_context(&state.repo, &unit, &user).await?;
    ensure(authorize(
        &user.actor(),
        Action::Read,
        &Scope::unit(Resource::StudentList, context),
    ))?;

    let rows = state
        .repo
        .list_students(unit.id, include_withdrawn.unwrap_or(false))
        .await?;
    tracing::debug!(unit_id = unit.id, count = rows.len(), "listed students");
    Ok(Json(rows.iter().map(serializers::student).collect()))
}
