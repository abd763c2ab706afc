use course_portal::{
    AppConfig, AppState, InMemoryRepository, MockPackageStore, create_router,
    serializers::{ProjectResponse, TaskResponse, TutorialResponse},
};
use std::sync::Arc;
use tokio::net::TcpListener;

struct Seed {
    convenor_id: i64,
    tutor_id: i64,
    student_id: i64,
    unit_id: i64,
    project_id: i64,
    definition_id: i64,
}

struct TestApp {
    address: String,
    seed: Seed,
}

/// Serves the full router on an ephemeral port, backed by the in-memory store.
async fn spawn_app() -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let convenor = repo.insert_user("convenor", "Connie", "Convenor", "convenor");
    let tutor = repo.insert_user("tutor", "Tim", "Tutor", "tutor");
    let student = repo.insert_user("s100", "Sam", "Student", "student");
    let unit = repo.insert_unit("COS10001", "Intro to Programming", convenor.id);
    repo.add_unit_role(unit.id, tutor.id, "tutor");
    let project = repo.insert_project(unit.id, student.id, true);
    let definition = repo.insert_task_definition(unit.id, "Hello World", "1.1P", &["Code", "Submit"]);

    let state = AppState {
        repo,
        packages: Arc::new(MockPackageStore::new()),
        config: AppConfig::default(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        seed: Seed {
            convenor_id: convenor.id,
            tutor_id: tutor.id,
            student_id: student.id,
            unit_id: unit.id,
            project_id: project.id,
            definition_id: definition.id,
        },
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = spawn_app().await;
    let response = reqwest::get(format!("{}/api-docs/openapi.json", app.address))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let doc: serde_json::Value = response.json().await.unwrap();
    assert!(doc["paths"]["/api/tutorials"].is_object());
    assert!(doc["paths"]["/savetests/latest"].is_object());
}

#[tokio::test]
async fn test_tutorial_lifecycle() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let seed = &app.seed;

    // Create
    let response = client
        .post(format!("{}/api/tutorials", app.address))
        .header("x-user-id", seed.convenor_id.to_string())
        .json(&serde_json::json!({
            "tutorial": {
                "unit_id": seed.unit_id, "tutor_id": seed.tutor_id, "abbreviation": "LA01",
                "meeting_location": "ATC101", "meeting_day": "Wednesday", "meeting_time": "2pm"
            }
        }))
        .send()
        .await
        .expect("post fail");
    assert_eq!(response.status(), 201);
    let tutorial: TutorialResponse = response.json().await.unwrap();
    assert_eq!(tutorial.meeting_time.as_deref(), Some("14:00"));
    assert_eq!(tutorial.capacity, -1);

    // Enrol
    let response = client
        .post(format!(
            "{}/api/tutorials/{}/enrolments/{}",
            app.address, tutorial.id, seed.project_id
        ))
        .header("x-user-id", seed.student_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // The student sees the enrolment on their project.
    let project: ProjectResponse = client
        .get(format!("{}/api/projects/{}", app.address, seed.project_id))
        .header("x-user-id", seed.student_id.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(project.tutorial_enrolments.len(), 1);
    assert_eq!(project.tutorial_enrolments[0].tutorial_id, tutorial.id);

    // Listed with its enrolment count.
    let list: Vec<TutorialResponse> = client
        .get(format!("{}/api/tutorials?unit_id={}", app.address, seed.unit_id))
        .header("x-user-id", seed.tutor_id.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].num_students, 1);
}

#[tokio::test]
async fn test_task_and_attempt_flow() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let seed = &app.seed;

    let response = client
        .post(format!("{}/api/projects/{}/tasks", app.address, seed.project_id))
        .header("x-user-id", seed.student_id.to_string())
        .json(&serde_json::json!({ "task_definition_id": seed.definition_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let task: TaskResponse = response.json().await.unwrap();
    assert_eq!(task.sub_tasks.len(), 2);

    let latest: serde_json::Value = client
        .get(format!("{}/savetests/latest?task_id={}", app.address, task.id))
        .header("x-user-id", seed.student_id.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["success"], true);
    assert_eq!(latest["data"]["task_id"], task.id);

    let unauthenticated = client
        .get(format!("{}/savetests/latest?task_id={}", app.address, task.id))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthenticated.status(), 401);
}
