use crate::sso::{cas::TicketCheck, handlers::error_response, services::Service, Sso};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct GrantRequest {
    service: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GrantResponse {
    pub service_ticket: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProxyResponse {
    pub proxy_granting_ticket: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CheckResponse {
    pub status: TicketCheck,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DestroyResponse {
    pub removed: usize,
}

#[utoipa::path(
    post,
    path= "/v1/tickets/{tgt}",
    request_body = GrantRequest,
    params(("tgt" = String, Path, description = "Ticket-granting ticket id")),
    responses (
        (status = 201, description = "Service ticket granted", body = GrantResponse),
        (status = 403, description = "Service not authorized or requires a fresh login", body = super::ErrorBody),
        (status = 410, description = "Ticket-granting ticket expired or gone", body = super::ErrorBody)
    ),
    tag = "tickets",
)]
/// Grant a service ticket from an existing single sign-on session.
#[instrument(skip(sso, request))]
pub async fn grant_ticket(
    Path(tgt): Path<String>,
    sso: Extension<Arc<Sso>>,
    Json(request): Json<GrantRequest>,
) -> Response {
    match sso
        .cas
        .grant_service_ticket(&tgt, &Service::new(&request.service), false)
    {
        Ok(st) => (
            StatusCode::CREATED,
            Json(GrantResponse {
                service_ticket: st.id,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/tickets/{tgt}/proxy",
    params(("tgt" = String, Path, description = "Parent ticket-granting ticket id")),
    responses (
        (status = 201, description = "Proxy-granting ticket granted", body = ProxyResponse),
        (status = 410, description = "Parent expired or gone", body = super::ErrorBody)
    ),
    tag = "tickets",
)]
#[instrument(skip(sso))]
pub async fn grant_proxy_ticket(Path(tgt): Path<String>, sso: Extension<Arc<Sso>>) -> Response {
    match sso.cas.grant_proxy_granting_ticket(&tgt) {
        Ok(pgt) => (
            StatusCode::CREATED,
            Json(ProxyResponse {
                proxy_granting_ticket: pgt.id,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    get,
    path= "/v1/tickets/{tgt}",
    params(("tgt" = String, Path, description = "Ticket-granting ticket id")),
    responses (
        (status = 200, description = "Ticket is valid", body = CheckResponse),
        (status = 404, description = "Ticket does not exist", body = CheckResponse),
        (status = 410, description = "Ticket has expired", body = CheckResponse)
    ),
    tag = "tickets",
)]
#[instrument(skip(sso))]
pub async fn check_ticket(Path(tgt): Path<String>, sso: Extension<Arc<Sso>>) -> Response {
    match sso.cas.check_ticket_granting_ticket(&tgt) {
        Ok(status) => {
            let code = match status {
                TicketCheck::Valid => StatusCode::OK,
                TicketCheck::Invalid => StatusCode::GONE,
                TicketCheck::NotExists => StatusCode::NOT_FOUND,
            };
            (code, Json(CheckResponse { status })).into_response()
        }
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    delete,
    path= "/v1/tickets/{tgt}",
    params(("tgt" = String, Path, description = "Ticket-granting ticket id")),
    responses (
        (status = 200, description = "Session destroyed with its descendants", body = DestroyResponse),
        (status = 503, description = "Ticket registry unavailable", body = super::ErrorBody)
    ),
    tag = "tickets",
)]
/// Log out. Unknown ids are not an error.
#[instrument(skip(sso))]
pub async fn destroy_ticket(Path(tgt): Path<String>, sso: Extension<Arc<Sso>>) -> Response {
    match sso.cas.destroy_ticket_granting_ticket(&tgt) {
        Ok(removed) => Json(DestroyResponse { removed }).into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::{
        config::{ServiceDefinition, SsoConfig},
        handlers::ErrorBody,
        resolution::{Event, FailureReason},
        router,
    };
    use anyhow::Result;
    use axum::{body::Body, http::Request, Router};
    use secrecy::SecretString;
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tower::ServiceExt;

    const APP: &str = "https://app.example.org/";

    fn app() -> Result<(Router, Arc<Sso>)> {
        let config = SsoConfig {
            accept_users: Some(SecretString::from("alice::secret".to_string())),
            services: vec![
                ServiceDefinition::parse(r"app=^https://app\.example\.org/.*", true)?,
                ServiceDefinition::parse(r"bank=^https://bank\.example\.org/.*", false)?,
            ],
            ..SsoConfig::default()
        };
        let sso = Arc::new(config.build()?);
        Ok((router(Arc::clone(&sso)), sso))
    }

    fn login(sso: &Sso) -> String {
        let credential = crate::sso::credential::Credential::username_password(
            "alice",
            SecretString::from("secret".to_string()),
        );
        sso.flow
            .attempt(Some(credential), None, "+", &Default::default())
            .ticket_granting_ticket_id
            .unwrap_or_default()
    }

    async fn send<T: DeserializeOwned>(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, T)> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))?;
        let response = app.oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    #[tokio::test]
    async fn grant_check_and_destroy() -> Result<()> {
        let (app, sso) = app()?;
        let tgt = login(&sso);

        let (status, granted): (_, GrantResponse) = send(
            app.clone(),
            "POST",
            &format!("/v1/tickets/{tgt}"),
            Some(json!({"service": APP})),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
        assert!(granted.service_ticket.starts_with("ST-"));

        let (status, check): (_, CheckResponse) =
            send(app.clone(), "GET", &format!("/v1/tickets/{tgt}"), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(check.status, TicketCheck::Valid);

        let (status, destroyed): (_, DestroyResponse) =
            send(app.clone(), "DELETE", &format!("/v1/tickets/{tgt}"), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(destroyed.removed, 2);

        let (status, check): (_, CheckResponse) =
            send(app, "GET", &format!("/v1/tickets/{tgt}"), None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(check.status, TicketCheck::NotExists);
        Ok(())
    }

    #[tokio::test]
    async fn non_sso_service_requires_fresh_login() -> Result<()> {
        let (app, sso) = app()?;
        let tgt = login(&sso);

        let (status, error): (_, ErrorBody) = send(
            app,
            "POST",
            &format!("/v1/tickets/{tgt}"),
            Some(json!({"service": "https://bank.example.org/"})),
        )
        .await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            error.event,
            Event::Failure(FailureReason::UnauthorizedSsoService)
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_is_gone() -> Result<()> {
        let (app, _) = app()?;
        let (status, error): (_, ErrorBody) = send(
            app,
            "POST",
            "/v1/tickets/TGT-1-missing",
            Some(json!({"service": APP})),
        )
        .await?;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(error.event, Event::Failure(FailureReason::TicketExpired));
        Ok(())
    }

    #[tokio::test]
    async fn proxy_granting_ticket_is_issued() -> Result<()> {
        let (app, sso) = app()?;
        let tgt = login(&sso);
        let (status, proxy): (_, ProxyResponse) =
            send(app, "POST", &format!("/v1/tickets/{tgt}/proxy"), None).await?;
        assert_eq!(status, StatusCode::CREATED);
        assert!(proxy.proxy_granting_ticket.starts_with("PGT-"));
        Ok(())
    }
}
