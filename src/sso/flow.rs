//! The login pipeline entry point.

use crate::sso::{
    adaptive::AdaptiveContext,
    authentication::{authenticate, Authentication, AuthenticationHandler},
    cas::CentralAuthenticationService,
    credential::{detransform, transform, Credential},
    error::SsoError,
    metadata::MetadataPipeline,
    resolution::{AttemptContext, Event, EventResolutionChain, FlowState},
    services::Service,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug)]
pub struct AttemptResult {
    pub event: Event,
    pub ticket_granting_ticket_id: Option<String>,
    pub service_ticket_id: Option<String>,
    /// The presented credential in its plain shape, for redisplay.
    pub credential: Option<Credential>,
    pub trace: Vec<FlowState>,
}

pub struct LoginFlow {
    handlers: Vec<Arc<dyn AuthenticationHandler>>,
    metadata: Arc<MetadataPipeline>,
    chain: Arc<EventResolutionChain>,
    cas: Arc<CentralAuthenticationService>,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        handlers: Vec<Arc<dyn AuthenticationHandler>>,
        metadata: Arc<MetadataPipeline>,
        chain: Arc<EventResolutionChain>,
        cas: Arc<CentralAuthenticationService>,
    ) -> Self {
        Self {
            handlers,
            metadata,
            chain,
            cas,
        }
    }

    #[must_use]
    pub fn cas(&self) -> Arc<CentralAuthenticationService> {
        Arc::clone(&self.cas)
    }

    /// Run one login attempt: transform the credential, validate and enrich
    /// it, resolve the next event and issue tickets on success.
    #[instrument(skip_all, fields(service = service_url.unwrap_or("-")))]
    pub fn attempt(
        &self,
        credential: Option<Credential>,
        service_url: Option<&str>,
        separator: &str,
        adaptive: &AdaptiveContext,
    ) -> AttemptResult {
        let (credential, request_surrogate) = transform(credential, separator);
        let service = service_url.map(Service::new);

        let resolution = self.chain.resolve(adaptive, || {
            let outcome = match &credential {
                Some(credential) => authenticate(&self.handlers, credential, Utc::now())
                    .map(|authentication| self.metadata.apply(authentication, credential)),
                None => Err(SsoError::InvalidCredential {
                    handler: "none".to_string(),
                }),
            };
            AttemptContext {
                outcome,
                service: service.clone(),
                request_surrogate,
            }
        });

        let mut result = AttemptResult {
            event: resolution.event,
            ticket_granting_ticket_id: None,
            service_ticket_id: None,
            credential: detransform(credential),
            trace: resolution.trace,
        };

        if result.event != Event::Success {
            info!("Login attempt ended with {:?}", result.event);
            return result;
        }

        let Some(authentication) = resolution
            .attempt
            .and_then(|attempt| attempt.outcome.ok())
        else {
            return result;
        };

        if let Err(err) = self.issue_tickets(authentication, service.as_ref(), &mut result) {
            warn!("Ticket issuance failed after successful authentication: {err}");
            result.event = Event::from_error(&err);
            if let Some(state) = result.trace.last_mut() {
                *state = result.event.state();
            }
        }
        result
    }

    fn issue_tickets(
        &self,
        authentication: Authentication,
        service: Option<&Service>,
        result: &mut AttemptResult,
    ) -> Result<(), SsoError> {
        let tgt = self.cas.create_ticket_granting_ticket(authentication)?;
        if let Some(service) = service {
            match self.cas.grant_service_ticket(&tgt.id, service, true) {
                Ok(st) => result.service_ticket_id = Some(st.id),
                Err(err) => {
                    // No half-issued session survives a failed login.
                    if let Err(cleanup) = self.cas.destroy_ticket_granting_ticket(&tgt.id) {
                        warn!("Failed to destroy [{}] after failed login: {cleanup}", tgt.id);
                    }
                    return Err(err);
                }
            }
        }
        info!("Login succeeded, issued [{}]", tgt.id);
        result.ticket_granting_ticket_id = Some(tgt.id);
        Ok(())
    }
}
