#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use course_portal::{
    AppConfig, AppState, InMemoryRepository, MockPackageStore, create_router,
    auth::issue_token,
    repository::RepositoryState,
    storage::PackageState,
};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

/// Ids and tokens of the seeded records.
///
/// Unit `COS10001` has a main convenor, a tutor, and two enrolled students
/// (`alice`, `bob`). `carol` is a student with a withdrawn project. A second
/// unit `COS20007` is convened by someone else.
pub struct TestApp {
    pub router: Router,
    pub repo: Arc<InMemoryRepository>,
    pub packages: Arc<MockPackageStore>,
    pub config: AppConfig,

    pub admin_id: i64,
    pub convenor_id: i64,
    pub tutor_id: i64,
    pub alice_id: i64,
    pub bob_id: i64,
    pub carol_id: i64,
    pub other_convenor_id: i64,

    pub unit_id: i64,
    pub other_unit_id: i64,
    pub campus_id: i64,
    pub alice_project: i64,
    pub bob_project: i64,
    pub carol_project: i64,
    pub other_unit_project: i64,
    pub definition_id: i64,
    pub other_definition_id: i64,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_packages(MockPackageStore::new())
    }

    pub fn with_packages(packages: MockPackageStore) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let packages = Arc::new(packages);
        let config = AppConfig::default();

        let admin = repo.insert_user("admin", "Ada", "Admin", "admin");
        let convenor = repo.insert_user("convenor", "Connie", "Convenor", "convenor");
        let tutor = repo.insert_user("tutor", "Tim", "Tutor", "tutor");
        let alice = repo.insert_user("alice", "Alice", "Able", "student");
        let bob = repo.insert_user("bob", "Bob", "Baker", "student");
        let carol = repo.insert_user("carol", "Carol", "Cole", "student");
        let other_convenor = repo.insert_user("oconvenor", "Otto", "Other", "convenor");

        let unit = repo.insert_unit("COS10001", "Intro to Programming", convenor.id);
        repo.add_unit_role(unit.id, tutor.id, "tutor");
        let other_unit = repo.insert_unit("COS20007", "Object Oriented Programming", other_convenor.id);
        let campus = repo.insert_campus("Hawthorn", "HAW");

        let alice_project = repo.insert_project(unit.id, alice.id, true);
        let bob_project = repo.insert_project(unit.id, bob.id, true);
        let carol_project = repo.insert_project(unit.id, carol.id, false);
        let other_unit_project = repo.insert_project(other_unit.id, alice.id, true);

        let definition =
            repo.insert_task_definition(unit.id, "Hello World", "1.1P", &["Write code", "Submit"]);
        let other_definition =
            repo.insert_task_definition(other_unit.id, "Shapes", "2.1P", &["Draw"]);

        let state = AppState {
            repo: repo.clone() as RepositoryState,
            packages: packages.clone() as PackageState,
            config: config.clone(),
        };

        Self {
            router: create_router(state),
            repo,
            packages,
            config,
            admin_id: admin.id,
            convenor_id: convenor.id,
            tutor_id: tutor.id,
            alice_id: alice.id,
            bob_id: bob.id,
            carol_id: carol.id,
            other_convenor_id: other_convenor.id,
            unit_id: unit.id,
            other_unit_id: other_unit.id,
            campus_id: campus.id,
            alice_project: alice_project.id,
            bob_project: bob_project.id,
            carol_project: carol_project.id,
            other_unit_project: other_unit_project.id,
            definition_id: definition.id,
            other_definition_id: other_definition.id,
        }
    }

    pub fn token(&self, user_id: i64) -> String {
        issue_token(&self.config.jwt_secret, user_id, 3600).expect("token should sign")
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }

    /// Sends a request authenticated as `user_id` with a bearer token.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        user_id: i64,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)));
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = self.send(request).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    pub async fn get(&self, uri: &str, user_id: i64) -> (StatusCode, Value) {
        self.call(Method::GET, uri, user_id, None).await
    }

    pub async fn post(&self, uri: &str, user_id: i64, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, user_id, Some(body)).await
    }

    pub async fn put(&self, uri: &str, user_id: i64, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, uri, user_id, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user_id: i64) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, user_id, None).await
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable")
        .to_vec()
}

/// Parses the body as JSON; non-JSON bodies come back as a string value.
pub async fn json_body(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}
