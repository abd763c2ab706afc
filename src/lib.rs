use axum::{
    Router,
    extract::{FromRef, FromRequestParts, Request, State},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod repository;
pub mod serializers;
pub mod storage;
pub mod validation;

pub mod routes;
use auth::{AuthFailure, AuthUser};
use error::ApiError;
use routes::{api, assessment, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{MockPackageStore, PackageState, S3PackageStore};

/// ApiDoc
///
/// OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::tutorials::create_tutorial, handlers::tutorials::list_tutorials,
        handlers::tutorials::get_tutorial, handlers::tutorials::update_tutorial,
        handlers::tutorials::delete_tutorial, handlers::tutorials::enrol_project,
        handlers::tutorials::withdraw_project,
        handlers::students::list_students,
        handlers::projects::get_project, handlers::projects::update_project,
        handlers::tasks::create_task, handlers::tasks::get_task, handlers::tasks::update_sub_task,
        handlers::test_attempts::list_test_attempts, handlers::test_attempts::latest_test_attempt,
        handlers::test_attempts::completed_latest_test_attempt,
        handlers::test_attempts::get_test_attempt, handlers::test_attempts::create_test_attempt,
        handlers::test_attempts::update_test_attempt, handlers::test_attempts::update_exam_data,
        handlers::test_attempts::delete_test_attempt,
        handlers::numbas::serve_package_file, handlers::numbas::upload_package
    ),
    components(
        schemas(
            error::ErrorBody,
            models::TutorialPayload, models::TutorialParams, models::UpdateProjectRequest,
            models::CreateTaskRequest, models::UpdateSubTaskRequest, models::TestAttemptPayload,
            models::ExamDataPayload, models::TaskStatus,
            serializers::TutorialResponse, serializers::TutorSummary,
            serializers::TutorialEnrolmentResponse, serializers::DeletedResponse,
            serializers::StudentResponse, serializers::ProjectResponse, serializers::TaskStats,
            serializers::TaskSummary, serializers::EnrolmentSummaryResponse,
            serializers::GroupSummary, serializers::TaskResponse, serializers::SubTaskResponse,
            serializers::TestAttemptResponse, serializers::UploadResponse,
        )
    ),
    tags(
        (name = "course-portal", description = "Course and assessment management API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Single shared container for the services every request needs.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    /// Uploaded Numbas test archives.
    pub packages: PackageState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for PackageState {
    fn from_ref(app_state: &AppState) -> PackageState {
        app_state.packages.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// authenticate
///
/// Resolves the caller (including an `auth_token` carried in a JSON body) and
/// stores the identity in the request extensions for the handlers. `reject`
/// decides the status a credential failure becomes.
async fn authenticate(
    state: &AppState,
    request: Request,
    reject: fn(AuthFailure) -> ApiError,
) -> Result<Request, ApiError> {
    let request = auth::attach_body_token(request).await?;
    let (mut parts, body) = request.into_parts();
    let user = AuthUser::from_request_parts(&mut parts, state)
        .await
        .map_err(|failure| {
            tracing::debug!(uri = %parts.uri, "credential rejected: {}", failure);
            reject(failure)
        })?;
    parts.extensions.insert(user);
    Ok(Request::from_parts(parts, body))
}

/// api_auth_middleware
///
/// Guards `/api`. Any credential failure (missing, empty, malformed or expired
/// token, unknown user) answers 419.
async fn api_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request = authenticate(&state, request, AuthFailure::into_token_rejection).await?;
    Ok(next.run(request).await)
}

/// credential_middleware
///
/// Guards the assessment routes. Any credential failure answers 401.
async fn credential_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request = authenticate(&state, request, AuthFailure::into_unauthenticated).await?;
    Ok(next.run(request).await)
}

/// create_router
///
/// Assembles the route families, their auth layers, and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .nest(
            "/api",
            api::api_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                api_auth_middleware,
            )),
        )
        .merge(
            assessment::assessment_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                credential_middleware,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Request span carrying method, uri and the `x-request-id` set above.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
