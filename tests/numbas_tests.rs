mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{TestApp, body_bytes, json_body};
use course_portal::{MockPackageStore, storage::package_key};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

const BOUNDARY: &str = "course-portal-test-boundary";

fn archive_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn multipart_body(fields: &[(&str, &str)], file: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(bytes) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"numbas_test.zip\"\r\nContent-Type: application/zip\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(
    app: &TestApp,
    user_id: i64,
    fields: &[(&str, &str)],
    file: Option<&[u8]>,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/numbas_api/uploadNumbasTest")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.token(user_id)))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(fields, file)))
        .unwrap();
    let response = app.send(request).await;
    let status = response.status();
    (status, json_body(response).await)
}

async fn upload_sample(app: &TestApp) {
    let archive = archive_with(&[
        ("index.html", "<html>quiz</html>"),
        ("scripts/numbas.js", "var Numbas = {};"),
        ("settings", "{}"),
    ]);
    let definition = app.definition_id.to_string();
    let (status, body) = upload(
        app,
        app.convenor_id,
        &[("unit_code", "COS10001"), ("task_definition_id", definition.as_str())],
        Some(archive.as_slice()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

fn file_uri(app: &TestApp, file: &str, extra: &str) -> String {
    format!(
        "/numbas_api/{file}?unit_code=COS10001&task_definition_id={}{extra}",
        app.definition_id
    )
}

#[tokio::test]
async fn staff_upload_stores_the_archive() {
    let app = TestApp::new();
    let archive = archive_with(&[("index.html", "<html/>")]);
    let definition = app.definition_id.to_string();

    let (status, body) = upload(
        &app,
        app.tutor_id,
        &[("unit_code", "COS10001"), ("task_definition_id", definition.as_str())],
        Some(archive.as_slice()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "File uploaded successfully");
    assert!(app.packages.contains(&package_key("COS10001", app.definition_id)));
}

#[tokio::test]
async fn students_cannot_upload() {
    let app = TestApp::new();
    let archive = archive_with(&[("index.html", "<html/>")]);
    let definition = app.definition_id.to_string();

    let (status, _) = upload(
        &app,
        app.alice_id,
        &[("unit_code", "COS10001"), ("task_definition_id", definition.as_str())],
        Some(archive.as_slice()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!app.packages.contains(&package_key("COS10001", app.definition_id)));
}

#[tokio::test]
async fn upload_validates_its_parts() {
    let app = TestApp::new();
    let archive = archive_with(&[("index.html", "<html/>")]);
    let definition = app.definition_id.to_string();
    let foreign = app.other_definition_id.to_string();

    let (status, body) = upload(
        &app,
        app.convenor_id,
        &[("unit_code", "COS10001"), ("task_definition_id", definition.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "File upload is missing");

    let (status, body) = upload(
        &app,
        app.convenor_id,
        &[("task_definition_id", definition.as_str())],
        Some(archive.as_slice()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unit_code is missing");

    let (status, body) = upload(
        &app,
        app.convenor_id,
        &[("unit_code", "NOPE999"), ("task_definition_id", definition.as_str())],
        Some(archive.as_slice()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unable to find requested Unit");

    let (status, body) = upload(
        &app,
        app.convenor_id,
        &[("unit_code", "COS10001"), ("task_definition_id", foreign.as_str())],
        Some(archive.as_slice()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unable to find requested TaskDefinition");
}

#[tokio::test]
async fn arbitrary_bytes_are_stored_as_sent() {
    let app = TestApp::new();
    let definition = app.definition_id.to_string();

    let (status, body) = upload(
        &app,
        app.admin_id,
        &[("unit_code", "COS10001"), ("task_definition_id", definition.as_str())],
        Some(&b"sample data"[..]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "File uploaded successfully");
    assert!(app.packages.contains(&package_key("COS10001", app.definition_id)));

    // The stored bytes are not an archive, so nothing can be served from them.
    let (status, body) = app.get(&file_uri(&app, "index.html", ""), app.alice_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "File not found");
}

#[tokio::test]
async fn storage_failure_is_an_internal_error() {
    let app = TestApp::with_packages(MockPackageStore::new_failing());
    let archive = archive_with(&[("index.html", "<html/>")]);
    let definition = app.definition_id.to_string();

    let (status, body) = upload(
        &app,
        app.convenor_id,
        &[("unit_code", "COS10001"), ("task_definition_id", definition.as_str())],
        Some(archive.as_slice()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
}

#[tokio::test]
async fn package_files_are_served_with_a_content_type() {
    let app = TestApp::new();
    upload_sample(&app).await;

    let request = Request::builder()
        .uri(file_uri(&app, "index.html", ""))
        .header("Auth-Token", app.token(app.alice_id))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    assert_eq!(body_bytes(response).await, b"<html>quiz</html>");

    let (status, _) = app.get(&file_uri(&app, "scripts/numbas.js", ""), app.alice_id).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn format_completes_extensionless_names() {
    let app = TestApp::new();
    upload_sample(&app).await;

    let request = Request::builder()
        .uri(file_uri(&app, "index", "&format=html"))
        .header(header::AUTHORIZATION, format!("Bearer {}", app.token(app.bob_id)))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"<html>quiz</html>");
}

#[tokio::test]
async fn missing_files_are_plain_not_found() {
    let app = TestApp::new();

    // No archive uploaded yet.
    let (status, body) = app.get(&file_uri(&app, "index.html", ""), app.alice_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "File not found");

    upload_sample(&app).await;
    let (status, body) = app.get(&file_uri(&app, "styles/missing.css", ""), app.alice_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "File not found");
}

#[tokio::test]
async fn serving_needs_scope_and_credential() {
    let app = TestApp::new();

    let (status, body) = app.get("/numbas_api/index.html", app.alice_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unit_code is missing");

    let response = app
        .send(
            Request::builder()
                .uri(file_uri(&app, "index.html", ""))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
