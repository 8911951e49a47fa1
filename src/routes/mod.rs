pub mod health;
pub mod webhook;

use axum::Router;

use crate::config::Config;

pub use webhook::WebhookState;

pub fn create_router(config: &Config, state: WebhookState) -> Router {
    let finalized_store = state.dispatcher.store_backend();
    Router::new()
        .merge(health::router(finalized_store))
        .merge(webhook::router(&config.webhook_path, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::completion::{CompletionDispatcher, LoggingConsumer, MemoryFinalizedStore};
    use crate::services::receiver::WebhookReceiver;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_store_backend() {
        let state = WebhookState {
            receiver: Arc::new(WebhookReceiver::new("secret")),
            dispatcher: Arc::new(CompletionDispatcher::new(
                Arc::new(MemoryFinalizedStore::new()),
                Arc::new(LoggingConsumer),
            )),
        };
        let app = create_router(&Config::default(), state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["finalized_store"], "memory");
    }
}
