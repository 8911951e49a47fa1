use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callwatch::config::Config;
use callwatch::error::AppError;
use callwatch::models::{CallSubmission, CreateCompanyRequest};
use callwatch::services::{PartnerClient, PollOutcome, PollSettings, Poller};

const BASE: &str = "/api/partner/v1";

fn client(server: &MockServer) -> PartnerClient {
    let config = Config {
        api_base_url: format!("{}{}", server.uri(), BASE),
        api_key: "pk_test".to_string(),
        api_secret: "sk_test".to_string(),
        request_timeout_secs: 1,
        ..Config::default()
    };
    PartnerClient::new(&config)
        .unwrap()
        .with_submit_retry_delay(Duration::from_millis(10))
}

fn submission() -> CallSubmission {
    CallSubmission::new(b"RIFF fake wav".to_vec(), "comp_1", "agent_1", "sales")
}

#[tokio::test]
async fn submit_sends_credentials_and_idempotency_key() {
    let server = MockServer::start().await;
    let submission = submission();

    Mock::given(method("POST"))
        .and(path(format!("{}/calls/analyze", BASE)))
        .and(header("authorization", "Bearer pk_test"))
        .and(header("X-API-Secret", "sk_test"))
        .and(header("X-Idempotency-Key", submission.idempotency_key()))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "job_id": "job_123",
            "status": "queued",
            "estimated_time": "2-3 minutes",
            "message": "Call queued for analysis"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job = client(&server).submit_call(&submission).await.unwrap();
    assert_eq!(job.job_id, "job_123");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["company_id"], "comp_1");
    assert_eq!(body["agent_id"], "agent_1");
    assert_eq!(body["call_type"], "sales");
    assert!(body["audio_file"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn submit_rejection_carries_server_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}/calls/analyze", BASE)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "VALIDATION_ERROR",
                "message": "agent_id does not belong to company",
                "timestamp": "2024-01-01T00:00:00Z"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    match client(&server).submit_call(&submission()).await {
        Err(AppError::Submission { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "VALIDATION_ERROR: agent_id does not belong to company");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn submit_resend_after_timeout_reuses_key() {
    let server = MockServer::start().await;
    let submission = submission();

    Mock::given(method("POST"))
        .and(path(format!("{}/calls/analyze", BASE)))
        .respond_with(
            ResponseTemplate::new(202)
                .set_body_json(json!({"job_id": "job_slow"}))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/calls/analyze", BASE)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job_1"})))
        .mount(&server)
        .await;

    let job = client(&server).submit_call(&submission).await.unwrap();
    assert_eq!(job.job_id, "job_1");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(
            request.headers.get("X-Idempotency-Key").unwrap(),
            submission.idempotency_key()
        );
    }
}

#[tokio::test]
async fn status_sequence_polled_to_completion() {
    let server = MockServer::start().await;
    let status_path = format!("{}/jobs/job_1/status", BASE);

    for progress in [10, 55] {
        Mock::given(method("GET"))
            .and(path(status_path.clone()))
            .and(header_exists("X-API-Secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "job_id": "job_1",
                "status": "processing",
                "progress": progress
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(status_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "job_1",
            "status": "completed",
            "progress": 100,
            "call_id": "call_1",
            "results": {"overall_score": 87}
        })))
        .mount(&server)
        .await;

    let poller = Poller::new(client(&server));
    let settings = PollSettings {
        max_attempts: 10,
        interval: Duration::from_millis(20),
    };
    let outcome = poller
        .await_completion("job_1", settings, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        PollOutcome::Completed(result) => {
            assert_eq!(result.score("overall_score"), Some(87.0));
            assert_eq!(result.call_id.as_deref(), Some("call_1"));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_job_surfaces_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/jobs/missing/status", BASE)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "JOB_NOT_FOUND", "message": "Job not found"}
        })))
        .mount(&server)
        .await;

    let poller = Poller::new(client(&server));
    let result = poller
        .await_completion("missing", PollSettings::default(), &CancellationToken::new())
        .await;

    match result {
        Err(AppError::Api { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "JOB_NOT_FOUND: Job not found");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn create_company_posts_to_provisioning_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}/companies/create", BASE)))
        .and(header("authorization", "Bearer pk_test"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "company_id": "comp_9",
            "name": "Acme"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request: CreateCompanyRequest = serde_json::from_value(json!({
        "name": "Acme",
        "contact_email": "ops@acme.test"
    }))
    .unwrap();
    let created = client(&server).create_company(&request).await.unwrap();
    assert_eq!(created.company_id, "comp_9");
}
