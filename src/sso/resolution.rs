//! Decides what happens next in a login attempt.
//!
//! A resolution walks a fixed state table: the adaptive policy runs first and
//! may veto, then ranked resolvers are consulted until one returns a decisive
//! event. Credential validation is passed in as a closure so it never runs for
//! a vetoed request.

use crate::sso::{
    adaptive::{AdaptiveAuthenticationPolicy, AdaptiveContext, AdaptiveDecision},
    authentication::{AttributeValue, Authentication},
    error::SsoError,
    services::{Service, ServicesManager},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

pub const DEFAULT_FAILURE_RANK: i32 = 0;
pub const DEFAULT_SERVICE_AUTHORIZATION_RANK: i32 = 100;
pub const DEFAULT_SURROGATE_SELECTION_RANK: i32 = 200;
pub const DEFAULT_MULTIFACTOR_RANK: i32 = 300;
pub const DEFAULT_SUCCESS_RANK: i32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidCredential,
    UnauthorizedService,
    UnauthorizedSsoService,
    TicketExpired,
    TicketNotFound,
    TicketAlreadyConsumed,
    ServiceMismatch,
    AdaptivePolicyRejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum Event {
    Success,
    StepUp { provider: String },
    /// Impersonation was requested without naming the account to act as.
    RequestSurrogate,
    Failure(FailureReason),
    Error,
}

impl Event {
    /// Fold an internal error into the outcome reported to the caller.
    #[must_use]
    pub fn from_error(err: &SsoError) -> Self {
        let reason = match err {
            SsoError::InvalidCredential { .. } => FailureReason::InvalidCredential,
            SsoError::UnauthorizedService(_) => FailureReason::UnauthorizedService,
            SsoError::UnauthorizedSsoService(_) => FailureReason::UnauthorizedSsoService,
            SsoError::TicketExpired(_) => FailureReason::TicketExpired,
            SsoError::TicketNotFound(_) => FailureReason::TicketNotFound,
            SsoError::TicketAlreadyConsumed(_) => FailureReason::TicketAlreadyConsumed,
            SsoError::ServiceMismatch { .. } => FailureReason::ServiceMismatch,
            SsoError::AdaptivePolicyRejected => FailureReason::AdaptivePolicyRejected,
            SsoError::RegistryUnavailable(_)
            | SsoError::TicketIdCollision(_)
            | SsoError::EntropyUnavailable(_) => return Self::Error,
        };
        Self::Failure(reason)
    }

    #[must_use]
    pub fn state(&self) -> FlowState {
        match self {
            Self::Success => FlowState::Success,
            Self::StepUp { .. } => FlowState::StepUp,
            Self::RequestSurrogate => FlowState::RequestSurrogate,
            Self::Failure(_) => FlowState::Failure,
            Self::Error => FlowState::Error,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Start,
    AdaptiveCheck,
    Resolve,
    Success,
    StepUp,
    RequestSurrogate,
    Failure,
    Error,
}

/// Every legal `(from, to)` pair of the login flow.
pub const TRANSITIONS: &[(FlowState, FlowState)] = &[
    (FlowState::Start, FlowState::AdaptiveCheck),
    (FlowState::AdaptiveCheck, FlowState::Resolve),
    (FlowState::AdaptiveCheck, FlowState::Failure),
    (FlowState::Resolve, FlowState::Success),
    (FlowState::Resolve, FlowState::StepUp),
    (FlowState::Resolve, FlowState::RequestSurrogate),
    (FlowState::Resolve, FlowState::Failure),
    (FlowState::Resolve, FlowState::Error),
];

impl FlowState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        TRANSITIONS.contains(&(self, next))
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !TRANSITIONS.iter().any(|(from, _)| *from == self)
    }
}

/// Everything the resolvers know about one attempt.
#[derive(Clone, Debug)]
pub struct AttemptContext {
    pub outcome: Result<Authentication, SsoError>,
    pub service: Option<Service>,
    pub request_surrogate: bool,
}

impl AttemptContext {
    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        self.outcome.as_ref().ok()
    }
}

pub trait EventResolver: Send + Sync {
    fn name(&self) -> &str;

    fn rank(&self) -> i32;

    /// `None` means "no opinion, ask the next resolver".
    fn resolve(&self, attempt: &AttemptContext) -> Option<Event>;
}

fn sort_by_rank(resolvers: &mut [Arc<dyn EventResolver>]) {
    resolvers.sort_by_key(|r| r.rank());
}

fn first_decisive(resolvers: &[Arc<dyn EventResolver>], attempt: &AttemptContext) -> Option<Event> {
    resolvers.iter().find_map(|resolver| {
        let event = resolver.resolve(attempt);
        if let Some(event) = &event {
            debug!("Resolver [{}] decided {:?}", resolver.name(), event);
        }
        event
    })
}

/// Groups resolvers under one rank and answers with the first decisive one.
pub struct DelegatingEventResolver {
    name: String,
    rank: i32,
    resolvers: Vec<Arc<dyn EventResolver>>,
}

impl DelegatingEventResolver {
    #[must_use]
    pub fn new(name: &str, rank: i32) -> Self {
        Self {
            name: name.to_string(),
            rank,
            resolvers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn EventResolver>) -> Self {
        self.resolvers.push(resolver);
        sort_by_rank(&mut self.resolvers);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl EventResolver for DelegatingEventResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn rank(&self) -> i32 {
        self.rank
    }

    fn resolve(&self, attempt: &AttemptContext) -> Option<Event> {
        first_decisive(&self.resolvers, attempt)
    }
}

pub struct AuthenticationFailureResolver;

impl EventResolver for AuthenticationFailureResolver {
    fn name(&self) -> &str {
        "authentication-failure"
    }

    fn rank(&self) -> i32 {
        DEFAULT_FAILURE_RANK
    }

    fn resolve(&self, attempt: &AttemptContext) -> Option<Event> {
        attempt.outcome.as_ref().err().map(Event::from_error)
    }
}

pub struct ServiceAuthorizationResolver {
    services: Arc<dyn ServicesManager>,
}

impl ServiceAuthorizationResolver {
    #[must_use]
    pub fn new(services: Arc<dyn ServicesManager>) -> Self {
        Self { services }
    }
}

impl EventResolver for ServiceAuthorizationResolver {
    fn name(&self) -> &str {
        "service-authorization"
    }

    fn rank(&self) -> i32 {
        DEFAULT_SERVICE_AUTHORIZATION_RANK
    }

    fn resolve(&self, attempt: &AttemptContext) -> Option<Event> {
        let service = attempt.service.as_ref()?;
        if self.services.is_authorized(service) {
            return None;
        }
        info!("Service [{}] is not authorized to use single sign-on", service.id);
        Some(Event::Failure(FailureReason::UnauthorizedService))
    }
}

pub struct SurrogateSelectionResolver;

impl EventResolver for SurrogateSelectionResolver {
    fn name(&self) -> &str {
        "surrogate-selection"
    }

    fn rank(&self) -> i32 {
        DEFAULT_SURROGATE_SELECTION_RANK
    }

    fn resolve(&self, attempt: &AttemptContext) -> Option<Event> {
        (attempt.request_surrogate && attempt.outcome.is_ok()).then_some(Event::RequestSurrogate)
    }
}

/// Steps up when an authentication attribute matches a pattern.
pub struct PrincipalAttributeStepUpResolver {
    attribute: String,
    pattern: Regex,
    provider: String,
}

impl PrincipalAttributeStepUpResolver {
    #[must_use]
    pub fn new(attribute: &str, pattern: Regex, provider: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            pattern,
            provider: provider.to_string(),
        }
    }
}

impl EventResolver for PrincipalAttributeStepUpResolver {
    fn name(&self) -> &str {
        "principal-attribute-step-up"
    }

    fn rank(&self) -> i32 {
        0
    }

    fn resolve(&self, attempt: &AttemptContext) -> Option<Event> {
        let values = attempt.authentication()?.attribute(&self.attribute)?;
        let matched = values.iter().any(|value| match value {
            AttributeValue::Text(text) => self.pattern.is_match(text),
            AttributeValue::Flag(flag) => self.pattern.is_match(&flag.to_string()),
        });
        matched.then(|| Event::StepUp {
            provider: self.provider.clone(),
        })
    }
}

/// Steps up when the requested service matches a pattern.
pub struct ServiceStepUpResolver {
    pattern: Regex,
    provider: String,
}

impl ServiceStepUpResolver {
    #[must_use]
    pub fn new(pattern: Regex, provider: &str) -> Self {
        Self {
            pattern,
            provider: provider.to_string(),
        }
    }
}

impl EventResolver for ServiceStepUpResolver {
    fn name(&self) -> &str {
        "service-step-up"
    }

    fn rank(&self) -> i32 {
        10
    }

    fn resolve(&self, attempt: &AttemptContext) -> Option<Event> {
        attempt.authentication()?;
        let service = attempt.service.as_ref()?;
        self.pattern.is_match(&service.id).then(|| Event::StepUp {
            provider: self.provider.clone(),
        })
    }
}

pub struct AuthenticationSuccessResolver;

impl EventResolver for AuthenticationSuccessResolver {
    fn name(&self) -> &str {
        "authentication-success"
    }

    fn rank(&self) -> i32 {
        DEFAULT_SUCCESS_RANK
    }

    fn resolve(&self, attempt: &AttemptContext) -> Option<Event> {
        attempt.outcome.is_ok().then_some(Event::Success)
    }
}

#[derive(Debug)]
pub struct Resolution {
    pub event: Event,
    /// States visited, starting with `FlowState::Start`.
    pub trace: Vec<FlowState>,
    /// `None` when the adaptive policy vetoed before the attempt ran.
    pub attempt: Option<AttemptContext>,
}

pub struct EventResolutionChain {
    policy: Arc<dyn AdaptiveAuthenticationPolicy>,
    resolvers: Vec<Arc<dyn EventResolver>>,
    default_event: Event,
}

impl EventResolutionChain {
    #[must_use]
    pub fn new(policy: Arc<dyn AdaptiveAuthenticationPolicy>) -> Self {
        Self {
            policy,
            resolvers: Vec::new(),
            default_event: Event::Error,
        }
    }

    /// The stock chain: failure, service authorization, surrogate selection,
    /// the `multifactor` group and finally success.
    #[must_use]
    pub fn standard(
        policy: Arc<dyn AdaptiveAuthenticationPolicy>,
        services: Arc<dyn ServicesManager>,
        step_up: Vec<Arc<dyn EventResolver>>,
    ) -> Self {
        let multifactor = step_up.into_iter().fold(
            DelegatingEventResolver::new("multifactor", DEFAULT_MULTIFACTOR_RANK),
            DelegatingEventResolver::with_resolver,
        );
        Self::new(policy)
            .with_resolver(Arc::new(AuthenticationFailureResolver))
            .with_resolver(Arc::new(ServiceAuthorizationResolver::new(services)))
            .with_resolver(Arc::new(SurrogateSelectionResolver))
            .with_resolver(Arc::new(multifactor))
            .with_resolver(Arc::new(AuthenticationSuccessResolver))
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn EventResolver>) -> Self {
        self.resolvers.push(resolver);
        sort_by_rank(&mut self.resolvers);
        self
    }

    #[must_use]
    pub fn with_default_event(mut self, event: Event) -> Self {
        self.default_event = event;
        self
    }

    #[must_use]
    pub fn resolver_names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    #[instrument(skip_all)]
    pub fn resolve<F>(&self, adaptive: &AdaptiveContext, attempt: F) -> Resolution
    where
        F: FnOnce() -> AttemptContext,
    {
        let mut trace = vec![FlowState::Start, FlowState::AdaptiveCheck];

        if self.policy.apply(adaptive) == AdaptiveDecision::Rejected {
            let event = Event::from_error(&SsoError::AdaptivePolicyRejected);
            trace.push(event.state());
            return Resolution {
                event,
                trace,
                attempt: None,
            };
        }

        trace.push(FlowState::Resolve);
        let attempt = attempt();
        let event = first_decisive(&self.resolvers, &attempt).unwrap_or_else(|| {
            debug!("No resolver was decisive, using {:?}", self.default_event);
            self.default_event.clone()
        });
        trace.push(event.state());

        Resolution {
            event,
            trace,
            attempt: Some(attempt),
        }
    }
}
