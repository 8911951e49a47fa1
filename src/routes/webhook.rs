use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;

use crate::config::headers;
use crate::models::{ErrorResponse, WebhookAck};
use crate::services::completion::{CompletionDispatcher, Delivery};
use crate::services::receiver::{ack_for, WebhookOutcome, WebhookReceiver};

#[derive(Clone)]
pub struct WebhookState {
    pub receiver: Arc<WebhookReceiver>,
    pub dispatcher: Arc<CompletionDispatcher>,
}

pub fn router(path: &str, state: WebhookState) -> Router {
    Router::new()
        .route(path, post(receive_webhook))
        .with_state(state)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Receive a signed job notification
///
/// The body is verified against `X-Partner-Signature` (hex HMAC-SHA256 over
/// the canonical JSON form). Repeated deliveries of an already finalized
/// job are acknowledged with `duplicate`.
#[utoipa::path(
    post,
    path = "/webhooks/call-analysis",
    request_body = crate::models::WebhookEvent,
    params(
        ("X-Partner-Signature" = String, Header, description = "Hex HMAC-SHA256 of the canonical body"),
        ("X-Webhook-ID" = Option<String>, Header, description = "Delivery id set by the issuer"),
        ("X-Webhook-Attempt" = Option<u32>, Header, description = "Delivery attempt number"),
    ),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 400, description = "Body is not valid JSON", body = ErrorResponse),
        (status = 401, description = "Signature missing or wrong", body = ErrorResponse),
        (status = 500, description = "Finalized marker could not be stored", body = ErrorResponse),
    ),
    tag = "Webhooks"
)]
pub async fn receive_webhook(
    State(state): State<WebhookState>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery_id = header_str(&request_headers, headers::WEBHOOK_ID).unwrap_or("-");
    let attempt = header_str(&request_headers, headers::WEBHOOK_ATTEMPT)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(1);
    let signature = header_str(&request_headers, headers::SIGNATURE);

    let outcome = state.receiver.handle_incoming(&body, signature);
    let status = outcome.http_status();

    match outcome {
        WebhookOutcome::Deliver(completion) => {
            let job_id = completion.job_id.clone();
            tracing::debug!(job_id = %job_id, delivery_id, attempt, "Webhook verified");

            match state.dispatcher.dispatch(completion).await {
                Ok(Delivery::Delivered) => {
                    (status, Json(WebhookAck::new("accepted", Some(job_id)))).into_response()
                }
                Ok(Delivery::Duplicate) | Ok(Delivery::Conflict { .. }) => {
                    (status, Json(WebhookAck::new("duplicate", Some(job_id)))).into_response()
                }
                // Marker not written, the issuer's retry gets another chance
                Err(e) => e.into_response(),
            }
        }
        WebhookOutcome::Ignored { reason, .. } => {
            tracing::info!(delivery_id, attempt, reason, "Webhook acknowledged without action");
            (status, Json(ack_for(&outcome))).into_response()
        }
        WebhookOutcome::Rejected(e) => {
            tracing::warn!(delivery_id, attempt, status = %status, error = %e, "Webhook rejected");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::completion::testing::RecordingConsumer;
    use crate::services::completion::MemoryFinalizedStore;
    use crate::services::signature::WebhookSigner;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "whsec_test";
    const PATH: &str = "/webhooks/call-analysis";

    fn app() -> (Router, Arc<RecordingConsumer>) {
        let consumer = Arc::new(RecordingConsumer::default());
        let dispatcher =
            CompletionDispatcher::new(Arc::new(MemoryFinalizedStore::new()), consumer.clone());
        let state = WebhookState {
            receiver: Arc::new(WebhookReceiver::new(SECRET)),
            dispatcher: Arc::new(dispatcher),
        };
        (router(PATH, state), consumer)
    }

    fn request(body: &Value, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(PATH)
            .header("content-type", "application/json")
            .header(headers::WEBHOOK_ID, "wh_1")
            .header(headers::WEBHOOK_ATTEMPT, "1");
        if let Some(sig) = signature {
            builder = builder.header(headers::SIGNATURE, sig);
        }
        builder
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for(consumer: &RecordingConsumer, n: usize) {
        for _ in 0..200 {
            if consumer.seen.lock().await.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_valid_delivery_accepted() {
        let (app, consumer) = app();
        let body = json!({"job_id": "job_1", "status": "completed", "results": {"overall_score": 87}});
        let sig = WebhookSigner::new(SECRET).sign(&body).unwrap();

        let response = app.oneshot(request(&body, Some(&sig))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"status": "accepted", "job_id": "job_1"})
        );
        wait_for(&consumer, 1).await;
        assert_eq!(consumer.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_acknowledged_once_consumed() {
        let (app, consumer) = app();
        let body = json!({"job_id": "job_2", "status": "failed", "error_message": "audio unreadable"});
        let sig = WebhookSigner::new(SECRET).sign(&body).unwrap();

        let first = app
            .clone()
            .oneshot(request(&body, Some(&sig)))
            .await
            .unwrap();
        let second = app.oneshot(request(&body, Some(&sig))).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(json_body(second).await["status"], "duplicate");

        wait_for(&consumer, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(consumer.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_unauthorized() {
        let (app, consumer) = app();
        let body = json!({"job_id": "job_3", "status": "completed"});
        let sig = WebhookSigner::new("other").sign(&body).unwrap();

        let response = app.oneshot(request(&body, Some(&sig))).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Unauthorized");
        assert!(consumer.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_unauthorized() {
        let (app, _) = app();
        let body = json!({"job_id": "job_3", "status": "completed"});

        let response = app.oneshot(request(&body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unparseable_body_bad_request() {
        let (app, _) = app();
        let request = Request::builder()
            .method("POST")
            .uri(PATH)
            .header(headers::SIGNATURE, "00")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_terminal_event_ignored() {
        let (app, consumer) = app();
        let body = json!({"job_id": "job_4", "status": "processing"});
        let sig = WebhookSigner::new(SECRET).sign(&body).unwrap();

        let response = app.oneshot(request(&body, Some(&sig))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ignored");
        assert!(consumer.seen.lock().await.is_empty());
    }
}
