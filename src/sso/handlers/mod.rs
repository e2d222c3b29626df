pub mod health;
pub use self::health::health;

pub mod login;
pub use self::login::login;

pub mod tickets;
pub use self::tickets::{check_ticket, destroy_ticket, grant_proxy_ticket, grant_ticket};

pub mod validate;
pub use self::validate::validate;

pub mod statistics;
pub use self::statistics::statistics;

// common functions for the handlers
use crate::sso::{adaptive::AdaptiveContext, error::SsoError, resolution::Event};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{env, net::IpAddr};
use tracing::debug;
use utoipa::ToSchema;

const DEFAULT_IP_HEADER: &str = "CF-Connecting-IP";
const DEFAULT_COUNTRY_HEADER: &str = "CF-IPCountry";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub event: Event,
    pub message: String,
}

#[must_use]
pub fn status_for(err: &SsoError) -> StatusCode {
    match err {
        SsoError::InvalidCredential { .. } => StatusCode::UNAUTHORIZED,
        SsoError::UnauthorizedService(_)
        | SsoError::UnauthorizedSsoService(_)
        | SsoError::AdaptivePolicyRejected => StatusCode::FORBIDDEN,
        SsoError::TicketNotFound(_) => StatusCode::NOT_FOUND,
        SsoError::TicketAlreadyConsumed(_) | SsoError::ServiceMismatch { .. } => {
            StatusCode::CONFLICT
        }
        SsoError::TicketExpired(_) => StatusCode::GONE,
        SsoError::RegistryUnavailable(_)
        | SsoError::TicketIdCollision(_)
        | SsoError::EntropyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Render an error as its symbolic event. Internal details stay in the logs.
#[must_use]
pub fn error_response(err: &SsoError) -> Response {
    debug!("Request failed: {err}");
    let event = Event::from_error(err);
    let message = match event {
        Event::Error => "internal error".to_string(),
        _ => err.to_string(),
    };
    (status_for(err), Json(ErrorBody { event, message })).into_response()
}

/// Collect the request facts the adaptive policy looks at. The client IP and
/// country headers default to the Cloudflare ones and can be overridden with
/// `PORTERO_IP_HEADER` and `PORTERO_COUNTRY_HEADER`.
#[must_use]
pub fn adaptive_context(headers: &HeaderMap) -> AdaptiveContext {
    let ip_header = env::var("PORTERO_IP_HEADER").unwrap_or_else(|_| DEFAULT_IP_HEADER.to_string());
    let country_header =
        env::var("PORTERO_COUNTRY_HEADER").unwrap_or_else(|_| DEFAULT_COUNTRY_HEADER.to_string());

    let client_ip = headers
        .get(ip_header)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok())
        .map(|ip| ip.to_string());
    let country = headers
        .get(country_header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let user_agent = headers
        .get("User-Agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    AdaptiveContext {
        client_ip,
        user_agent,
        country,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn adaptive_context_uses_default_headers() {
        temp_env::with_vars(
            [
                ("PORTERO_IP_HEADER", None::<String>),
                ("PORTERO_COUNTRY_HEADER", None::<String>),
            ],
            || {
                let mut headers = HeaderMap::new();
                headers.insert("CF-Connecting-IP", HeaderValue::from_static("203.0.113.10"));
                headers.insert("CF-IPCountry", HeaderValue::from_static("US"));
                headers.insert("User-Agent", HeaderValue::from_static("agent"));

                let context = adaptive_context(&headers);
                assert_eq!(context.client_ip.as_deref(), Some("203.0.113.10"));
                assert_eq!(context.country.as_deref(), Some("US"));
                assert_eq!(context.user_agent.as_deref(), Some("agent"));
            },
        );
    }

    #[test]
    fn adaptive_context_respects_env_override() {
        temp_env::with_vars(
            [
                ("PORTERO_IP_HEADER", Some("X-Client-IP")),
                ("PORTERO_COUNTRY_HEADER", Some("X-Client-Country")),
            ],
            || {
                let mut headers = HeaderMap::new();
                headers.insert("X-Client-IP", HeaderValue::from_static("198.51.100.5"));
                headers.insert("X-Client-Country", HeaderValue::from_static("BR"));
                headers.insert("CF-Connecting-IP", HeaderValue::from_static("203.0.113.10"));

                let context = adaptive_context(&headers);
                assert_eq!(context.client_ip.as_deref(), Some("198.51.100.5"));
                assert_eq!(context.country.as_deref(), Some("BR"));
                assert!(context.user_agent.is_none());
            },
        );
    }

    #[test]
    fn invalid_ip_is_ignored() {
        temp_env::with_vars([("PORTERO_IP_HEADER", None::<String>)], || {
            let mut headers = HeaderMap::new();
            headers.insert("CF-Connecting-IP", HeaderValue::from_static("not-an-ip"));
            assert!(adaptive_context(&headers).client_ip.is_none());
        });
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(
            status_for(&SsoError::TicketNotFound("ST-1".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SsoError::TicketAlreadyConsumed("ST-1".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&SsoError::TicketExpired("TGT-1".to_string())),
            StatusCode::GONE
        );
        assert_eq!(
            status_for(&SsoError::UnauthorizedService("x".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&SsoError::RegistryUnavailable("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
