//! Health reporting for Concierge.
//!
//! A small Axum server exposing:
//! - `GET /health`: liveness: status, version, uptime and pipeline counters
//! - `GET /ready`: 200 once the bot is polling, 503 before that
//!
//! Counters are fed by a subscriber on the domain event bus, so the
//! pipeline never calls into this crate.

use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use concierge_core::event::{DomainEvent, EventBus};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Running totals of pipeline outcomes.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    received: AtomicU64,
    delivered: AtomicU64,
    denied: AtomicU64,
    throttled: AtomicU64,
    failed: AtomicU64,
}

/// A point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub denied: u64,
    pub throttled: u64,
    pub failed: u64,
}

impl PipelineCounters {
    pub fn record(&self, event: &DomainEvent) {
        let counter = match event {
            DomainEvent::MessageReceived { .. } => &self.received,
            DomainEvent::ResponseDelivered { .. } => &self.delivered,
            DomainEvent::AccessDenied { .. } => &self.denied,
            DomainEvent::Throttled { .. } => &self.throttled,
            DomainEvent::PipelineFailed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Shared state behind the health routes.
#[derive(Debug)]
pub struct HealthState {
    started_at: Instant,
    ready: AtomicBool,
    pub counters: PipelineCounters,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            ready: AtomicBool::new(false),
            counters: PipelineCounters::default(),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedHealth = Arc<HealthState>;

/// Build the Axum router with the health routes.
pub fn build_router(state: SharedHealth) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Count every pipeline event published on `bus` until the bus closes.
pub fn spawn_event_counter(state: SharedHealth, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => state.counters.record(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Health counter fell behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Serve the health routes until `shutdown` resolves.
pub async fn serve<F>(
    config: &concierge_config::HealthConfig,
    state: SharedHealth,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Health server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    timestamp: String,
    counters: CounterSnapshot,
}

async fn health_handler(State(state): State<SharedHealth>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        counters: state.counters.snapshot(),
    })
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
}

async fn ready_handler(State(state): State<SharedHealth>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadyResponse { ready }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = get_json(build_router(Arc::new(HealthState::new())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["uptime_secs"].is_u64());
        assert_eq!(body["counters"]["received"], 0);
    }

    #[tokio::test]
    async fn ready_follows_flag() {
        let state = Arc::new(HealthState::new());

        let (status, body) = get_json(build_router(state.clone()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);

        state.set_ready(true);
        let (status, body) = get_json(build_router(state), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let response = build_router(Arc::new(HealthState::new())).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn counters_track_each_event_kind() {
        let counters = PipelineCounters::default();
        counters.record(&DomainEvent::MessageReceived {
            channel: "telegram".into(),
            user_id: "1".into(),
            content_preview: "hi".into(),
            timestamp: Utc::now(),
        });
        counters.record(&DomainEvent::AccessDenied {
            user_id: "1".into(),
            timestamp: Utc::now(),
        });
        counters.record(&DomainEvent::PipelineFailed {
            user_id: "1".into(),
            stage: "completing".into(),
            error_message: "timeout".into(),
            timestamp: Utc::now(),
        });

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                received: 1,
                denied: 1,
                failed: 1,
                ..CounterSnapshot::default()
            }
        );
    }

    #[tokio::test]
    async fn event_counter_consumes_bus() {
        let bus = EventBus::default();
        let state = Arc::new(HealthState::new());
        let handle = spawn_event_counter(state.clone(), &bus);

        bus.publish(DomainEvent::Throttled {
            user_id: "1".into(),
            wait_ms: 500,
            timestamp: Utc::now(),
        });
        bus.publish(DomainEvent::ResponseDelivered {
            user_id: "1".into(),
            model: "gpt-4o-mini".into(),
            attempts: 1,
            tokens_used: 12,
            timestamp: Utc::now(),
        });
        drop(bus);
        handle.await.unwrap();

        let snapshot = state.counters.snapshot();
        assert_eq!(snapshot.throttled, 1);
        assert_eq!(snapshot.delivered, 1);
    }
}
