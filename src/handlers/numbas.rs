use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ErrorBody},
    models::NumbasQuery,
    policy::{Action, Resource, Scope, authorize},
    serializers::{self, UploadResponse},
    storage::{package_key, read_entry, sanitize_unit_code},
    validation::{parse_id, require_scope},
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::{MultipartError, MultipartRejection}},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use super::ensure;

fn file_not_found() -> Response {
    (StatusCode::NOT_FOUND, "File not found").into_response()
}

/// Appends `.<format>` when the requested name carries no extension.
fn resolve_file_name(file: &str, format: Option<&str>) -> String {
    let name = file.trim_start_matches('/');
    let has_extension = std::path::Path::new(name).extension().is_some();
    match format.map(str::trim).filter(|f| !f.is_empty()) {
        Some(format) if !has_extension => format!("{name}.{}", format.trim_start_matches('.')),
        _ => name.to_string(),
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::MalformedInput(err.body_text())
}

/// serve_package_file
///
/// Streams one file out of the stored archive for a unit's task definition.
/// Missing archives and missing entries both answer with a plain-text 404.
#[utoipa::path(
    get,
    path = "/numbas_api/{file}",
    params(
        ("file" = String, Path, description = "Path of the file inside the package"),
        NumbasQuery
    ),
    responses(
        (status = 200, description = "File contents with a guessed content type"),
        (status = 400, description = "unit_code or task_definition_id missing", body = ErrorBody),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 404, description = "File not found")
    )
)]
pub async fn serve_package_file(
    user: AuthUser,
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<NumbasQuery>,
) -> Result<Response, ApiError> {
    ensure(authorize(
        &user.actor(),
        Action::Read,
        &Scope::global(Resource::TestPackage),
    ))?;

    let unit_code = query
        .unit_code
        .as_deref()
        .map(sanitize_unit_code)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ApiError::missing("unit_code"))?;
    let definition_id = require_scope("task_definition_id", query.task_definition_id.as_deref())?;
    let name = resolve_file_name(&file, query.format.as_deref());

    let key = package_key(&unit_code, definition_id);
    let Some(archive) = state
        .packages
        .get_package(&key)
        .await
        .map_err(ApiError::Internal)?
    else {
        tracing::debug!(key = %key, "package archive not found");
        return Ok(file_not_found());
    };

    let contents = match read_entry(&archive, &name) {
        Ok(Some(contents)) => contents,
        Ok(None) => return Ok(file_not_found()),
        Err(e) => {
            tracing::warn!(key = %key, "stored package is unreadable: {}", e);
            return Ok(file_not_found());
        }
    };

    let mime = mime_guess::from_path(&name).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], contents).into_response())
}

/// upload_package
///
/// Multipart upload of a Numbas test archive (fields `unit_code`,
/// `task_definition_id`, `file`). Staff only. Replaces any previous archive.
/// The bytes are stored as sent; an unreadable archive only surfaces as a 404
/// when its files are requested.
#[utoipa::path(
    post,
    path = "/numbas_api/uploadNumbasTest",
    request_body(content_type = "multipart/form-data", description = "unit_code, task_definition_id and the zip file"),
    responses(
        (status = 200, description = "Archive stored", body = UploadResponse),
        (status = 400, description = "Missing field or missing file", body = ErrorBody),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 403, description = "Caller is not staff", body = ErrorBody),
        (status = 404, description = "Unit or task definition not found", body = ErrorBody)
    )
)]
pub async fn upload_package(
    user: AuthUser,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    ensure(authorize(
        &user.actor(),
        Action::Create,
        &Scope::global(Resource::TestPackage),
    ))?;
    let mut multipart = multipart.map_err(|e| ApiError::MalformedInput(e.body_text()))?;

    let mut unit_code: Option<String> = None;
    let mut raw_definition_id: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or("") {
            "unit_code" => unit_code = Some(field.text().await.map_err(multipart_error)?),
            "task_definition_id" => {
                raw_definition_id = Some(field.text().await.map_err(multipart_error)?)
            }
            "file" => file_bytes = Some(field.bytes().await.map_err(multipart_error)?.to_vec()),
            _ => continue,
        }
    }

    let unit_code = match unit_code.map(|c| c.trim().to_string()) {
        None => return Err(ApiError::missing("unit_code")),
        Some(code) if code.is_empty() => return Err(ApiError::empty("unit_code")),
        Some(code) => code,
    };
    let definition_id = match raw_definition_id {
        None => return Err(ApiError::missing("task_definition_id")),
        Some(raw) => parse_id("task_definition_id", &raw)?,
    };
    let file_bytes = file_bytes
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::MalformedInput("File upload is missing".to_string()))?;

    let unit = state
        .repo
        .get_unit_by_code(&unit_code)
        .await?
        .ok_or(ApiError::MissingReference("Unit"))?;
    state
        .repo
        .get_task_definition(definition_id)
        .await?
        .filter(|definition| definition.unit_id == unit.id)
        .ok_or(ApiError::MissingReference("TaskDefinition"))?;

    let key = package_key(&unit.code, definition_id);
    let size = file_bytes.len();
    state
        .packages
        .put_package(&key, file_bytes)
        .await
        .map_err(ApiError::Internal)?;

    tracing::info!(key = %key, bytes = size, user_id = user.id, "numbas package uploaded");
    Ok(Json(serializers::uploaded()))
}

#[cfg(test)]
mod tests {
    use super::resolve_file_name;

    #[test]
    fn format_is_appended_only_without_extension() {
        assert_eq!(resolve_file_name("index", Some("html")), "index.html");
        assert_eq!(resolve_file_name("index.html", Some("json")), "index.html");
        assert_eq!(resolve_file_name("/scripts/app", None), "scripts/app");
    }
}
