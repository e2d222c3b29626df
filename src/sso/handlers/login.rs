use crate::sso::{
    credential::Credential,
    handlers::adaptive_context,
    resolution::{Event, FailureReason, FlowState},
    Sso,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
    /// Service URL to issue a service ticket for.
    service: Option<String>,
    #[serde(default)]
    remember_me: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_granting_ticket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_ticket: Option<String>,
    /// Username to redisplay on the login form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub trace: Vec<FlowState>,
}

const fn status_for_event(event: &Event) -> StatusCode {
    match event {
        Event::Success | Event::StepUp { .. } | Event::RequestSurrogate => StatusCode::OK,
        Event::Failure(FailureReason::InvalidCredential) => StatusCode::UNAUTHORIZED,
        Event::Failure(_) => StatusCode::FORBIDDEN,
        Event::Error => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[utoipa::path(
    post,
    path= "/v1/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Login resolved to success, step-up or surrogate selection", body = LoginResponse),
        (status = 401, description = "Credential rejected", body = LoginResponse),
        (status = 403, description = "Service or request not authorized", body = LoginResponse),
        (status = 503, description = "Tickets could not be issued", body = LoginResponse)
    ),
    tag = "login",
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    sso: Extension<Arc<Sso>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let adaptive = adaptive_context(&headers);

    let credential = match (request.username, request.password) {
        (Some(username), Some(password)) if !username.trim().is_empty() => Some(
            Credential::username_password(username.trim(), SecretString::from(password))
                .with_remember_me(request.remember_me),
        ),
        _ => None,
    };

    let result = sso.flow.attempt(
        credential,
        request.service.as_deref(),
        &sso.separator,
        &adaptive,
    );

    let response = LoginResponse {
        ticket_granting_ticket: result.ticket_granting_ticket_id,
        service_ticket: result.service_ticket_id,
        username: result.credential.as_ref().map(|c| c.id().to_string()),
        trace: result.trace,
        event: result.event,
    };

    (status_for_event(&response.event), Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::{
        config::{ServiceDefinition, SsoConfig},
        router,
    };
    use anyhow::Result;
    use axum::{body::Body, http::Request};
    use serde_json::json;
    use tower::ServiceExt;

    fn sso() -> Result<Arc<Sso>> {
        let config = SsoConfig {
            accept_users: Some(SecretString::from("alice::secret".to_string())),
            services: vec![ServiceDefinition::parse(
                r"app=^https://app\.example\.org/.*",
                true,
            )?],
            ..SsoConfig::default()
        };
        Ok(Arc::new(config.build()?))
    }

    async fn post(sso: Arc<Sso>, body: serde_json::Value) -> Result<(StatusCode, LoginResponse)> {
        let response = router(sso)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/login")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))?,
            )
            .await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    #[tokio::test]
    async fn login_issues_tickets() -> Result<()> {
        let (status, response) = post(
            sso()?,
            json!({"username": "alice", "password": "secret", "service": "https://app.example.org/home"}),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.event, Event::Success);
        assert!(response
            .ticket_granting_ticket
            .is_some_and(|id| id.starts_with("TGT-")));
        assert!(response.service_ticket.is_some_and(|id| id.starts_with("ST-")));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() -> Result<()> {
        let (status, response) = post(
            sso()?,
            json!({"username": "alice", "password": "wrong"}),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.event,
            Event::Failure(FailureReason::InvalidCredential)
        );
        assert!(response.ticket_granting_ticket.is_none());
        assert_eq!(response.username.as_deref(), Some("alice"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_service_is_forbidden() -> Result<()> {
        let (status, response) = post(
            sso()?,
            json!({"username": "alice", "password": "secret", "service": "https://evil.example.org/"}),
        )
        .await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            response.event,
            Event::Failure(FailureReason::UnauthorizedService)
        );
        Ok(())
    }

    #[tokio::test]
    async fn blank_surrogate_requests_selection() -> Result<()> {
        let (status, response) = post(
            sso()?,
            json!({"username": "+alice", "password": "secret"}),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.event, Event::RequestSurrogate);
        assert!(response.ticket_granting_ticket.is_none());
        Ok(())
    }

    #[test]
    fn event_statuses() {
        assert_eq!(status_for_event(&Event::Error), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for_event(&Event::StepUp {
                provider: "mfa-duo".to_string()
            }),
            StatusCode::OK
        );
        assert_eq!(
            status_for_event(&Event::Failure(FailureReason::AdaptivePolicyRejected)),
            StatusCode::FORBIDDEN
        );
    }
}
