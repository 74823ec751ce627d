//! HTTP handlers for the Fanout server.
//!
//! Publishers `POST /publish` a JSON body; subscribers hold open
//! `GET /subscribe?topic=...` as a server-sent event stream.

use crate::config::Config;
use crate::metrics::{self, StreamMetricsGuard};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use fanout_core::{spawn_reaper_with, Message, Registry, SubscriberId};
use futures_util::StreamExt;
use serde::Deserialize;
use std::borrow::Cow;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The broadcast registry.
    pub registry: Arc<Registry>,
    /// Server configuration.
    pub config: Config,
    /// Flipped to `true` when the server is shutting down.
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Arc::new(Registry::with_config(config.registry_config())),
            config,
            shutdown,
        }
    }

    /// End every open event stream.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Request errors reported to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not a valid publish request.
    #[error("Invalid request")]
    InvalidRequest,

    /// Subscribe request without a topic.
    #[error("Missing topic")]
    MissingTopic,

    /// Message larger than the configured limit.
    #[error("Message exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest | Self::MissingTopic => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::MissingTopic => "missing_topic",
            Self::PayloadTooLarge(_) => "payload_too_large",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(self.kind());
        (self.status(), self.to_string()).into_response()
    }
}

/// Body of a publish request. Missing fields are empty strings.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub message: String,
}

/// Query of a subscribe request.
#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    pub topic: Option<String>,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/publish", post(publish_handler))
        .route("/subscribe", get(subscribe_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP server until ctrl-c.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let reaper = config.reap_interval().map(|period| {
        info!(interval_ms = period.as_millis() as u64, "Starting subscriber reaper");
        spawn_reaper_with(&state.registry, period, metrics::record_sweep)
    });

    let app = build_router(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Fanout server listening on {}", addr);
    info!("Publish endpoint: POST http://{}/publish", addr);
    info!("Subscribe endpoint: GET http://{}/subscribe?topic=<topic>", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    if let Some(handle) = reaper {
        handle.abort();
    }

    info!("Fanout server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        return;
    }
    info!("Shutdown requested, closing event streams");
    state.begin_shutdown();
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registry statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    metrics::set_registry_stats(stats);
    Json(serde_json::json!({
        "topics": stats.topic_count,
        "subscribers": stats.subscriber_count,
    }))
}

/// Publish handler.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let request: PublishRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Rejected publish request");
        ApiError::InvalidRequest
    })?;

    let limit = state.config.limits.max_message_size;
    if request.message.len() > limit {
        return Err(ApiError::PayloadTooLarge(limit));
    }

    let size = request.message.len();
    let report = state.registry.publish(&request.topic, request.message);
    metrics::record_publish(size, &report, &state.registry);

    debug!(
        topic = %request.topic,
        delivered = report.delivered,
        dropped = report.dropped,
        pruned = report.pruned,
        "Published"
    );

    Ok("Message published successfully")
}

/// Subscribe handler.
async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    params: Option<Query<SubscribeParams>>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let topic = params
        .and_then(|Query(p)| p.topic)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::MissingTopic)?;

    let subscription = state.registry.subscribe(&topic);
    metrics::record_subscription();
    metrics::set_registry_stats(state.registry.stats());

    debug!(topic = %topic, subscriber = subscription.id(), "Subscriber connected");

    let guard = StreamGuard {
        topic,
        subscriber: subscription.id(),
        _metrics: StreamMetricsGuard::new(),
    };

    // The guard lives as long as the stream does.
    let mut shutdown = state.shutdown.subscribe();
    let stream = subscription
        .into_stream()
        .take_until(async move {
            let _guard = guard;
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .map(|message| Ok::<_, Infallible>(sse_event(&message)));

    let keep_alive =
        KeepAlive::new().interval(Duration::from_secs(state.config.sse.keep_alive_secs));
    Ok(Sse::new(stream).keep_alive(keep_alive))
}

/// Logs when a subscriber's event stream is dropped.
struct StreamGuard {
    topic: String,
    subscriber: SubscriberId,
    _metrics: StreamMetricsGuard,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        debug!(topic = %self.topic, subscriber = self.subscriber, "Subscriber disconnected");
    }
}

/// Render a message as one SSE event.
///
/// SSE frames are line based, so CR and CRLF are normalised to LF and each
/// line becomes its own `data:` field.
fn sse_event(message: &Message) -> Event {
    Event::default().data(normalize_line_endings(message.text()))
}

/// SSE fields cannot carry a bare CR, so CRLF and CR become LF.
fn normalize_line_endings(text: Cow<'_, str>) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        text
    }
}
