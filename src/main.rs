use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use callwatch::config::Config;
use callwatch::db::{self, SqliteFinalizedStore};
use callwatch::error::Result;
use callwatch::middleware::rate_limit;
use callwatch::models::*;
use callwatch::routes::{self, WebhookState};
use callwatch::services::{
    CompletionDispatcher, FinalizedStore, LoggingConsumer, MemoryFinalizedStore, PartnerClient,
    PollOutcome, PollSettings, Poller, WatchingConsumer, WebhookReceiver,
};
use callwatch::utils::{get_extension, read_audio_file};

const MARKER_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Callwatch",
        version = "1.0.0",
        description = "Receiver for call analysis job notifications",
        license(name = "MIT"),
    ),
    paths(
        callwatch::routes::health::health_check,
        callwatch::routes::webhook::receive_webhook,
    ),
    components(schemas(
        HealthResponse,
        ErrorResponse,
        WebhookEvent,
        WebhookAck,
        JobStatus,
        ProgressUpdate,
    )),
    tags(
        (name = "System", description = "Health check"),
        (name = "Webhooks", description = "Signed job notifications from the partner API"),
    ),
    servers(
        (url = "http://localhost:4000", description = "Local server"),
    ),
)]
struct ApiDoc;

/// One call to submit at startup and watch until it finishes
struct WatchRequest {
    audio_path: PathBuf,
    company_id: String,
    agent_id: String,
    call_type: String,
    webhook_url: Option<String>,
}

impl WatchRequest {
    fn from_env() -> Option<Self> {
        let audio_path = std::env::var("CALLWATCH_SUBMIT_AUDIO").ok()?;
        Some(Self {
            audio_path: PathBuf::from(audio_path),
            company_id: std::env::var("CALLWATCH_COMPANY_ID").unwrap_or_default(),
            agent_id: std::env::var("CALLWATCH_AGENT_ID").unwrap_or_default(),
            call_type: std::env::var("CALLWATCH_CALL_TYPE").unwrap_or_else(|_| "sales".to_string()),
            webhook_url: std::env::var("CALLWATCH_PUBLIC_WEBHOOK_URL").ok(),
        })
    }
}

async fn submit_and_watch(
    request: WatchRequest,
    config: &Config,
    dispatcher: Arc<CompletionDispatcher>,
    watching: Arc<WatchingConsumer>,
    shutdown: CancellationToken,
) -> Result<()> {
    let client = PartnerClient::new(config)?;

    match client.health().await {
        Ok(health) => tracing::info!(
            status = %health.status,
            partner = ?health.partner_name,
            "Partner API reachable"
        ),
        Err(e) => tracing::warn!(error = %e, "Partner API health check failed"),
    }

    let audio = read_audio_file(&request.audio_path).await?;
    let file_name = request
        .audio_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut submission = CallSubmission::new(
        audio,
        request.company_id,
        request.agent_id,
        request.call_type,
    )
    .with_metadata(serde_json::json!({
        "file_name": file_name,
        "format": get_extension(&file_name),
    }));
    if let Some(url) = request.webhook_url {
        submission = submission.with_webhook_url(url);
    }

    let job = client.submit_call(&submission).await?;
    let job_id = job.job_id;

    let cancel = shutdown.child_token();
    watching.watch(&job_id, cancel.clone()).await;

    let (progress_tx, mut progress_rx) = broadcast::channel::<ProgressUpdate>(32);
    tokio::spawn(async move {
        while let Ok(update) = progress_rx.recv().await {
            tracing::info!(
                job_id = %update.job_id,
                status = %update.status,
                progress = update.progress,
                attempt = update.attempt,
                "Analysis progress"
            );
        }
    });

    let poller = Poller::new(client).with_progress(progress_tx);
    let outcome = poller
        .await_completion(&job_id, PollSettings::from_config(config), &cancel)
        .await;
    watching.unwatch(&job_id).await;

    match outcome? {
        PollOutcome::TimedOut { attempts } => {
            tracing::warn!(job_id = %job_id, attempts, "Gave up polling, webhook may still deliver");
        }
        PollOutcome::Cancelled => {
            tracing::info!(job_id = %job_id, "Polling stopped");
        }
        terminal => {
            if let Some(completion) = terminal.into_completion(&job_id) {
                dispatcher.deliver(completion).await?;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    if let Err(e) = config.validate_receiver() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    let store: Arc<dyn FinalizedStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database: {}", url);
            let pool = match db::init_db(url).await {
                Ok(pool) => pool,
                Err(e) => {
                    tracing::error!("Database initialization failed: {}", e);
                    std::process::exit(1);
                }
            };
            Arc::new(SqliteFinalizedStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, finalized markers are kept in memory");
            Arc::new(MemoryFinalizedStore::new())
        }
    };

    // Drop markers older than a week, once an hour
    let cleanup_store = store.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            match cleanup_store.cleanup_older_than(MARKER_RETENTION).await {
                Ok(count) => tracing::info!(
                    backend = cleanup_store.backend(),
                    "Cleanup removed {} finalized markers",
                    count
                ),
                Err(e) => tracing::error!("Cleanup failed: {}", e),
            }
        }
    });

    let watching = Arc::new(WatchingConsumer::new(Arc::new(LoggingConsumer)));
    let dispatcher = Arc::new(CompletionDispatcher::new(store, watching.clone()));
    let state = WebhookState {
        receiver: Arc::new(WebhookReceiver::new(&config.webhook_secret)),
        dispatcher: dispatcher.clone(),
    };

    let shutdown = CancellationToken::new();

    if let Some(request) = WatchRequest::from_env() {
        let config = config.clone();
        let dispatcher = dispatcher.clone();
        let watching = watching.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = submit_and_watch(request, &config, dispatcher, watching, shutdown).await
            {
                tracing::error!(error = %e, "Submission run failed");
            }
        });
    }

    let rate_limiter = rate_limit::create_rate_limiter(config.webhook_rate_limit_per_minute);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = routes::create_router(&config, state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes()))
        .layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            async move { rate_limit::rate_limit_middleware(limiter, req, next).await }
        }));

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid listen address {}:{}: {}", config.host, config.port, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Callwatch v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Server: http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", addr);
    tracing::info!("Webhook: POST {}", config.webhook_path);
    tracing::info!("Finalized store: {}", dispatcher.store_backend());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await;

    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
