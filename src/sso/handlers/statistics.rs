use crate::sso::{
    monitor::{HealthStatus, RegistryHealth},
    Sso,
};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;

#[utoipa::path(
    get,
    path= "/v1/statistics",
    responses (
        (status = 200, description = "Ticket registry statistics", body = RegistryHealth),
        (status = 503, description = "Statistics could not be collected", body = RegistryHealth)
    ),
    tag = "health",
)]
pub async fn statistics(sso: Extension<Arc<Sso>>) -> impl IntoResponse {
    let health = sso.monitor.observe();
    let status = match health.status {
        HealthStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(health))
}
