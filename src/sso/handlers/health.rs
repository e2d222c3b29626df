use crate::{sso::monitor::HealthStatus, sso::Sso, GIT_COMMIT_HASH};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    registry: HealthStatus,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Ticket registry is reachable", body = Health),
        (status = 503, description = "Ticket registry is unavailable", body = Health)
    ),
    tag = "health",
)]
// axum handler for health
pub async fn health(sso: Extension<Arc<Sso>>) -> impl IntoResponse {
    let registry = sso.monitor.observe().status;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        registry,
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    let status = if registry == HealthStatus::Unavailable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, headers, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::{config::SsoConfig, router};
    use anyhow::Result;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_registry_and_x_app() -> Result<()> {
        let sso = Arc::new(SsoConfig::default().build()?);
        let response = router(sso)
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(x_app.starts_with(&format!("{}:{}:", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let health: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(health["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(health["registry"], "ok");
        Ok(())
    }
}
