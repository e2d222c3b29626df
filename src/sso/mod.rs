//! Single sign-on ticket authority.
//!
//! [`config::SsoConfig`] assembles the pieces; [`new`] serves them over HTTP
//! and runs the registry cleaner next to the listener.

pub mod adaptive;
pub mod authentication;
pub mod cas;
pub mod cipher;
pub mod config;
pub mod credential;
pub mod error;
pub mod flow;
pub mod handlers;
pub mod metadata;
pub mod monitor;
pub mod registry;
pub mod resolution;
pub mod services;
pub mod ticket;

pub use self::cas::{CentralAuthenticationService, TicketCheck};
pub use self::config::{Sso, SsoConfig};
pub use self::error::SsoError;
pub use self::flow::{AttemptResult, LoginFlow};
pub use self::resolution::{Event, FailureReason};

use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug, debug_span, error, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::login::login,
        handlers::tickets::grant_ticket,
        handlers::tickets::grant_proxy_ticket,
        handlers::tickets::check_ticket,
        handlers::tickets::destroy_ticket,
        handlers::validate::validate,
        handlers::statistics::statistics,
    ),
    components(schemas(
        handlers::ErrorBody,
        handlers::health::Health,
        handlers::login::LoginRequest,
        handlers::login::LoginResponse,
        handlers::tickets::GrantRequest,
        handlers::tickets::GrantResponse,
        handlers::tickets::ProxyResponse,
        handlers::tickets::CheckResponse,
        handlers::tickets::DestroyResponse,
        handlers::validate::ValidationResponse,
        monitor::RegistryHealth,
    )),
    tags(
        (name = "health", description = "Liveness and ticket registry statistics"),
        (name = "login", description = "Credential validation and event resolution"),
        (name = "tickets", description = "Ticket-granting and service ticket lifecycle"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = Some(env!("CARGO_PKG_DESCRIPTION").to_string());
    doc
}

/// Build the API router with the authority attached as an extension.
pub fn router(sso: Arc<Sso>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/login", post(handlers::login))
        .route(
            "/v1/tickets/:tgt",
            get(handlers::check_ticket)
                .post(handlers::grant_ticket)
                .delete(handlers::destroy_ticket),
        )
        .route("/v1/tickets/:tgt/proxy", post(handlers::grant_proxy_ticket))
        .route("/v1/validate", get(handlers::validate))
        .route("/v1/statistics", get(handlers::statistics))
        .route("/openapi.json", get(|| async { Json(openapi()) }))
        .layer(Extension(sso))
}

/// Serve the authority until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, sso: Sso) -> Result<()> {
    let sso = Arc::new(sso);
    let cleaner = spawn_cleaner(Arc::clone(&sso.cas), sso.cleaner_interval);

    let app = router(sso).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", err);
            }
            info!("Gracefully shutdown");
        })
        .await?;

    cleaner.abort();

    Ok(())
}

/// Run the registry cleaner every `interval`, plus up to a tenth of it as
/// jitter so replicas sharing a registry do not sweep in lockstep.
pub fn spawn_cleaner(cas: Arc<CentralAuthenticationService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(next_pass(interval)).await;
            match cas.clean_expired() {
                Ok(removed) => debug!("Registry cleaner pass removed {} tickets", removed),
                Err(err) => error!("Registry cleaner pass failed: {}", err),
            }
        }
    })
}

fn next_pass(interval: Duration) -> Duration {
    interval.saturating_add(jitter(interval))
}

fn jitter(interval: Duration) -> Duration {
    let max = u64::try_from(interval.as_millis() / 10).unwrap_or(u64::MAX);
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
