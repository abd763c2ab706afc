use crate::{
    AppState,
    handlers::{projects, students, tasks, tutorials},
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// API Router Module
///
/// Resource routes nested under `/api`. Every route here sits behind the
/// token middleware, and each handler consults the authorization gate for the
/// unit that owns the resource.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // --- Tutorials ---
        // GET requires ?unit_id=; POST takes { "tutorial": { ... } }.
        .route(
            "/tutorials",
            get(tutorials::list_tutorials).post(tutorials::create_tutorial),
        )
        .route(
            "/tutorials/{id}",
            get(tutorials::get_tutorial)
                .put(tutorials::update_tutorial)
                .delete(tutorials::delete_tutorial),
        )
        .route(
            "/tutorials/{id}/enrolments/{project_id}",
            post(tutorials::enrol_project).delete(tutorials::withdraw_project),
        )
        // --- Students ---
        // Staff-only roster; the trailing-slash form is accepted too.
        .route("/students", get(students::list_students))
        .route("/students/", get(students::list_students))
        // --- Projects & Tasks ---
        .route(
            "/projects/{id}",
            get(projects::get_project).put(projects::update_project),
        )
        .route("/projects/{id}/tasks", post(tasks::create_task))
        .route("/tasks/{id}", get(tasks::get_task))
        .route(
            "/tasks/{id}/sub_tasks/{sub_task_id}",
            put(tasks::update_sub_task),
        )
}
