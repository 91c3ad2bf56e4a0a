//! HTTP integration tests for the Physio REST API
//!
//! The router runs against the in-memory store and a wiremock stand-in for the
//! prediction service, and is driven end to end with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use physio_core::config::{DatabaseConfig, PredictionConfig};
use physio_core::{
    HttpPredictionClient, MemorySessionStore, PatientRecord, PhysioConfig, SessionStore,
};
use physio_server::http::build_router;
use physio_server::ServiceContext;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOUNDARY: &str = "physio-test-boundary";

struct TestApp {
    router: axum::Router,
    store: Arc<MemorySessionStore>,
    _uploads: tempfile::TempDir,
}

async fn make_app(mock_server: &MockServer) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();

    let mut prediction = PredictionConfig::new(format!("{}/predict", mock_server.uri()));
    prediction.max_retries = 0;
    prediction.timeout_seconds = 5;

    let mut config = PhysioConfig {
        service: Default::default(),
        database: DatabaseConfig {
            url: "unused".to_string(),
            max_connections: 1,
        },
        storage: Default::default(),
        http: Default::default(),
        prediction: prediction.clone(),
        ingest: Default::default(),
        session: Default::default(),
        report: Default::default(),
    };
    config.ingest.upload_dir = uploads.path().to_string_lossy().into_owned();

    let store = Arc::new(MemorySessionStore::new());
    store.insert_patient(patient()).await;

    let predictor = Arc::new(HttpPredictionClient::new(prediction).unwrap());
    let ctx = ServiceContext::new(config, store.clone() as Arc<dyn SessionStore>, predictor);

    TestApp {
        router: build_router(Arc::new(ctx)),
        store,
        _uploads: uploads,
    }
}

fn patient() -> PatientRecord {
    PatientRecord {
        id: "patient-1".to_string(),
        patient_code: "PAT-1741000000000-42".to_string(),
        user_id: "user-1".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        age: Some(36),
        gender: Some("female".to_string()),
        contact: None,
        email: None,
        condition: Some("Lower back pain".to_string()),
        status: "active".to_string(),
        start_date: None,
        last_visit: None,
        next_appointment: Some("2025-04-01".to_string()),
        no_of_sessions: 0,
    }
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((field, file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(uri: &str, body: Vec<u8>, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn session_fields<'a>(session_id: &'a str, date: &'a str, pain: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("user", "user-1"),
        ("patient", "patient-1"),
        ("sessionID", session_id),
        ("sessionType", "treatment"),
        ("sessionDate", date),
        ("painLevel", pain),
        ("mobilityAssessment", "Improved range of motion"),
        ("treatmentProvided", "Manual therapy and ultrasound"),
        ("prescribedExercise", "Pelvic tilts"),
    ]
}

const SENSOR_CSV: &[u8] = b"Bvp;Eda_E4;Resp;Tmp\n0,12;1,4;0,8;33,1\n";

// ===========================================================================
// TEST 1: GET /version via oneshot
// ===========================================================================
#[tokio::test]
async fn test_version_endpoint() {
    let mock_server = MockServer::start().await;
    let app = make_app(&mock_server).await;

    let resp = app.router.oneshot(get("/version")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = json_body(resp).await;
    assert_eq!(json["protocol"], "physio/1");
}

// ===========================================================================
// TEST 2: POST /api/predict forwards the file and returns the last label
// ===========================================================================
#[tokio::test]
async fn test_predict_endpoint() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"predicted_classes": [1, 3, 2]})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    let app = make_app(&mock_server).await;

    let body = multipart_body(&[], Some(("file", "recording.csv", SENSOR_CSV)));
    let resp = app
        .router
        .oneshot(multipart_request("/api/predict", body, None))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["predicted_classes"], json!([1.0, 3.0, 2.0]));
    assert_eq!(json["pain_level"], 2.0);
}

// ===========================================================================
// TEST 3: prediction service down is a 502 and nothing is persisted
// ===========================================================================
#[tokio::test]
async fn test_session_with_prediction_service_down() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    let app = make_app(&mock_server).await;

    let mut fields = session_fields("session_1", "2025-03-01T10:00:00Z", "7");
    fields.push(("autoPredict", "true"));
    let body = multipart_body(&fields, Some(("excelFile", "gait.csv", SENSOR_CSV)));

    let resp = app
        .router
        .clone()
        .oneshot(multipart_request("/api/sessions", body, Some("user-1")))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(resp).await;
    assert_eq!(json["kind"], "unreachable");
    assert_eq!(app.store.session_count().await, 0);
}

// ===========================================================================
// TEST 4: missing fields are reported together
// ===========================================================================
#[tokio::test]
async fn test_create_session_missing_fields() {
    let mock_server = MockServer::start().await;
    let app = make_app(&mock_server).await;

    let body = multipart_body(&[("user", "user-1"), ("patient", "patient-1")], None);
    let resp = app
        .router
        .oneshot(multipart_request("/api/sessions", body, None))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp).await;
    assert_eq!(json["error"], "Missing required fields");
    assert_eq!(
        json["missing"],
        json!([
            "sessionID",
            "sessionType",
            "sessionDate",
            "painLevel",
            "mobilityAssessment",
            "treatmentProvided",
            "prescribedExercise"
        ])
    );
}

// ===========================================================================
// TEST 5: full flow: sessions, history, insights, reports
// ===========================================================================
#[tokio::test]
async fn test_session_history_insights_and_report() {
    let mock_server = MockServer::start().await;
    let app = make_app(&mock_server).await;

    for (code, date, pain) in [
        ("session_a", "2025-02-01T10:00:00Z", "7"),
        ("session_b", "2025-02-15T10:00:00Z", "5.5"),
        ("session_c", "2025-03-01T10:00:00Z", "4"),
    ] {
        let body = multipart_body(&session_fields(code, date, pain), None);
        let resp = app
            .router
            .clone()
            .oneshot(multipart_request("/api/sessions", body, Some("user-1")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    // History, newest first
    let resp = app
        .router
        .clone()
        .oneshot(get("/api/sessions?patient=patient-1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["count"], 3);
    assert_eq!(json["sessions"][0]["sessionCode"], "session_c");
    let newest_id = json["sessions"][0]["id"].as_str().unwrap().to_string();

    // Single session
    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/api/sessions/{}", newest_id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Insights
    let resp = app
        .router
        .clone()
        .oneshot(get("/api/patients/patient-1/insights"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["painReduction"], 3.0);
    assert_eq!(json["improvementRate"], 42.9);
    assert_eq!(json["totalSessions"], 3);
    assert_eq!(json["mobilityTrend"], "improved");
    assert_eq!(json["nextAppointment"], "2025-04-01");

    // Patient report
    let resp = app
        .router
        .clone()
        .oneshot(get("/api/patients/patient-1/report"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Patient_Report_Ada_Lovelace.pdf\""
    );
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.starts_with(b"%PDF"));

    // Session report
    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/api/generate-report/{}", newest_id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"session_report_{}.pdf\"", newest_id).as_str()
    );

    // Patient counters bumped by the writes
    let record = app.store.get_patient("patient-1").await.unwrap().unwrap();
    assert_eq!(record.no_of_sessions, 3);
}

// ===========================================================================
// TEST 6: report for an unknown patient is JSON, not a PDF
// ===========================================================================
#[tokio::test]
async fn test_report_unknown_patient() {
    let mock_server = MockServer::start().await;
    let app = make_app(&mock_server).await;

    let resp = app
        .router
        .oneshot(get("/api/patients/nobody/report"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let json = json_body(resp).await;
    assert_eq!(json["status"], "error");
}

// ===========================================================================
// TEST 7: duplicate session id is a conflict
// ===========================================================================
#[tokio::test]
async fn test_duplicate_session_id() {
    let mock_server = MockServer::start().await;
    let app = make_app(&mock_server).await;

    let fields = session_fields("session_dup", "2025-03-01T10:00:00Z", "4");
    for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
        let body = multipart_body(&fields, Some(("excelFile", "gait.csv", SENSOR_CSV)));
        let resp = app
            .router
            .clone()
            .oneshot(multipart_request("/api/sessions", body, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), expected);
    }
    assert_eq!(app.store.session_count().await, 1);
}
