use crate::{
    AppState,
    handlers::{numbas, test_attempts},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Upper bound for an uploaded Numbas archive.
const PACKAGE_UPLOAD_LIMIT: usize = 50 * 1024 * 1024;

/// Assessment Router Module
///
/// Routes used by the embedded Numbas tests: attempt persistence under
/// `/savetests` and package files under `/numbas_api`.
pub fn assessment_routes() -> Router<AppState> {
    Router::new()
        // --- Test attempts ---
        // The static segments (latest, completed-latest) take priority over {id}.
        .route(
            "/savetests",
            get(test_attempts::list_test_attempts).post(test_attempts::create_test_attempt),
        )
        .route("/savetests/latest", get(test_attempts::latest_test_attempt))
        .route(
            "/savetests/completed-latest",
            get(test_attempts::completed_latest_test_attempt),
        )
        .route(
            "/savetests/{id}",
            get(test_attempts::get_test_attempt)
                .put(test_attempts::update_test_attempt)
                .delete(test_attempts::delete_test_attempt),
        )
        .route(
            "/savetests/{id}/exam_data",
            put(test_attempts::update_exam_data),
        )
        // --- Numbas packages ---
        .route(
            "/numbas_api/uploadNumbasTest",
            post(numbas::upload_package).layer(DefaultBodyLimit::max(PACKAGE_UPLOAD_LIMIT)),
        )
        .route("/numbas_api/{*file}", get(numbas::serve_package_file))
}
