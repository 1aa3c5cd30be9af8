//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation and request span
//! 2. Request/response logging
//! 3. Whole-request timeout, answered with the structured 500 body
//! 4. Panic recovery
//! 5. Handler execution
//!
//! # Graceful Shutdown
//!
//! The server stops accepting connections on CTRL+C or SIGTERM and lets
//! in-flight requests finish.

use std::{any::Any, future::Future, net::SocketAddr, time::Duration};

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use beacon_core::RequestId;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, info_span, warn, Instrument};

use crate::{handlers, handlers::events::internal_error_response, AppState};

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Marks a response produced by the panic handler so the request-id
/// middleware can fill in the request id and latency.
#[derive(Debug, Clone, Copy)]
struct PanicCaught;

/// Creates the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use beacon_api::{create_router, AppState, Config};
/// use beacon_core::RealClock;
///
/// let config = Config::default();
/// let state = AppState::from_config(&config, Arc::new(RealClock::new())).unwrap();
/// let app = create_router(state, Duration::from_secs(30));
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let routes = Router::new()
        .route("/events", post(handlers::ingest_event))
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check));

    with_middleware(routes, state, request_timeout)
}

/// Wraps `routes` in the gateway middleware stack and attaches state.
pub fn with_middleware(
    routes: Router<AppState>,
    state: AppState,
    request_timeout: Duration,
) -> Router {
    routes
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state.clone(), inject_request_id))
        .with_state(state)
}

/// Assigns every request an id, runs it inside a request span, and echoes
/// the id in the `X-Request-Id` header.
async fn inject_request_id(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let started = state.clock.now();
    let request_id = RequestId::generate(state.clock.now_utc());
    req.extensions_mut().insert(request_id.clone());

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;

    let panicked = response.extensions().get::<PanicCaught>().is_some();
    // Only the timeout layer answers 408 on these routes.
    let timed_out = response.status() == StatusCode::REQUEST_TIMEOUT;
    if panicked || timed_out {
        let latency = state.clock.now().saturating_duration_since(started);
        let latency = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        if timed_out {
            warn!(%request_id, latency_ms = latency, "Request exceeded the request timeout");
        }
        response = internal_error_response(&request_id, latency);
    }

    if let Ok(header_value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    error!(panic = message, "Handler panicked");

    let mut response =
        (StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error").into_response();
    response.extensions_mut().insert(PanicCaught);
    response
}

/// Serves `app` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if:
/// - Port is already in use
/// - Network interface unavailable
pub async fn start_server<F>(app: Router, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight requests to complete");
}
