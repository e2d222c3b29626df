use crate::sso::{
    authentication::AttributeValue, handlers::error_response, services::Service, Sso,
};
use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};

#[derive(IntoParams, Deserialize, Debug)]
pub struct ValidateParams {
    /// Service ticket id.
    ticket: String,
    /// Service URL the ticket is presented by.
    service: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ValidationResponse {
    pub user: String,
    pub authentication_instant: DateTime<Utc>,
    pub attributes: BTreeMap<String, Vec<AttributeValue>>,
}

#[utoipa::path(
    get,
    path= "/v1/validate",
    params(ValidateParams),
    responses (
        (status = 200, description = "Ticket consumed", body = ValidationResponse),
        (status = 404, description = "Ticket does not exist", body = super::ErrorBody),
        (status = 409, description = "Ticket already consumed or presented by another service", body = super::ErrorBody),
        (status = 410, description = "Ticket expired", body = super::ErrorBody)
    ),
    tag = "tickets",
)]
/// Consume a service ticket and release the authentication it carries.
#[instrument(skip(sso, params), fields(ticket = %params.ticket))]
pub async fn validate(sso: Extension<Arc<Sso>>, Query(params): Query<ValidateParams>) -> Response {
    match sso
        .cas
        .validate_service_ticket(&params.ticket, &Service::new(&params.service))
    {
        Ok(authentication) => Json(ValidationResponse {
            user: authentication.principal_id().to_string(),
            authentication_instant: authentication.authentication_instant(),
            attributes: authentication.attributes().clone(),
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::{
        config::{ServiceDefinition, SsoConfig},
        credential::Credential,
        handlers::ErrorBody,
        resolution::{Event, FailureReason},
        router,
    };
    use anyhow::Result;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use secrecy::SecretString;
    use tower::ServiceExt;

    const APP: &str = "https://app.example.org/";

    fn issue() -> Result<(Router, String)> {
        let config = SsoConfig {
            accept_users: Some(SecretString::from("alice::secret".to_string())),
            services: vec![
                ServiceDefinition::parse(r"app=^https://app\.example\.org/.*", true)?,
                ServiceDefinition::parse(r"other=^https://other\.example\.org/.*", true)?,
            ],
            ..SsoConfig::default()
        };
        let sso = Arc::new(config.build()?);
        let credential =
            Credential::username_password("alice", SecretString::from("secret".to_string()));
        let st = sso
            .flow
            .attempt(Some(credential), Some(APP), "+", &Default::default())
            .service_ticket_id
            .unwrap_or_default();
        Ok((router(sso), st))
    }

    async fn get(app: Router, uri: &str) -> Result<(StatusCode, axum::body::Bytes)> {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty())?)
            .await?;
        let status = response.status();
        Ok((status, axum::body::to_bytes(response.into_body(), usize::MAX).await?))
    }

    #[tokio::test]
    async fn ticket_is_consumed_once() -> Result<()> {
        let (app, st) = issue()?;
        let uri = format!("/v1/validate?ticket={st}&service={APP}");

        let (status, body) = get(app.clone(), &uri).await?;
        assert_eq!(status, StatusCode::OK);
        let validation: ValidationResponse = serde_json::from_slice(&body)?;
        assert_eq!(validation.user, "alice");
        assert!(validation.attributes.contains_key("successfulAuthenticationHandlers"));

        let (status, body) = get(app, &uri).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorBody = serde_json::from_slice(&body)?;
        assert_eq!(
            error.event,
            Event::Failure(FailureReason::TicketAlreadyConsumed)
        );
        Ok(())
    }

    #[tokio::test]
    async fn other_service_cannot_consume() -> Result<()> {
        let (app, st) = issue()?;
        let (status, body) = get(
            app.clone(),
            &format!("/v1/validate?ticket={st}&service=https://other.example.org/"),
        )
        .await?;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorBody = serde_json::from_slice(&body)?;
        assert_eq!(error.event, Event::Failure(FailureReason::ServiceMismatch));

        // the rightful service can still use it
        let (status, _) = get(app, &format!("/v1/validate?ticket={st}&service={APP}")).await?;
        assert_eq!(status, StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_ticket_is_not_found() -> Result<()> {
        let (app, _) = issue()?;
        let (status, _) = get(app, &format!("/v1/validate?ticket=ST-1-nope&service={APP}")).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }
}
