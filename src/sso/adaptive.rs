//! Risk-based veto applied before a credential is validated.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};
use utoipa::ToSchema;

/// Request facts the adaptive policy looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AdaptiveContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// ISO 3166 alpha-2 code resolved by an upstream geolocation step.
    pub country: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptiveDecision {
    Allowed,
    Rejected,
}

pub trait AdaptiveAuthenticationPolicy: Send + Sync {
    fn apply(&self, context: &AdaptiveContext) -> AdaptiveDecision;
}

#[derive(Clone, Debug)]
pub struct AllowAllAdaptivePolicy;

impl AdaptiveAuthenticationPolicy for AllowAllAdaptivePolicy {
    fn apply(&self, _context: &AdaptiveContext) -> AdaptiveDecision {
        AdaptiveDecision::Allowed
    }
}

/// Rejects requests by client address, browser or country.
///
/// Unknown facts never cause a rejection: a request without a user agent is
/// not matched against the browser pattern.
#[derive(Clone, Debug, Default)]
pub struct DefaultAdaptivePolicy {
    rejected_ip_pattern: Option<Regex>,
    rejected_browsers_pattern: Option<Regex>,
    rejected_countries: HashSet<String>,
}

impl DefaultAdaptivePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rejected_ip_pattern(mut self, pattern: Regex) -> Self {
        self.rejected_ip_pattern = Some(pattern);
        self
    }

    #[must_use]
    pub fn with_rejected_browsers_pattern(mut self, pattern: Regex) -> Self {
        self.rejected_browsers_pattern = Some(pattern);
        self
    }

    #[must_use]
    pub fn with_rejected_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rejected_countries = countries
            .into_iter()
            .map(|c| c.as_ref().trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn is_permissive(&self) -> bool {
        self.rejected_ip_pattern.is_none()
            && self.rejected_browsers_pattern.is_none()
            && self.rejected_countries.is_empty()
    }
}

impl AdaptiveAuthenticationPolicy for DefaultAdaptivePolicy {
    fn apply(&self, context: &AdaptiveContext) -> AdaptiveDecision {
        if let (Some(pattern), Some(ip)) = (&self.rejected_ip_pattern, &context.client_ip) {
            if pattern.is_match(ip) {
                warn!("Client IP [{}] is rejected for authentication", ip);
                return AdaptiveDecision::Rejected;
            }
        }

        if let (Some(pattern), Some(agent)) = (&self.rejected_browsers_pattern, &context.user_agent)
        {
            if pattern.is_match(agent) {
                warn!("User agent [{}] is rejected for authentication", agent);
                return AdaptiveDecision::Rejected;
            }
        }

        if let Some(country) = &context.country {
            if self.rejected_countries.contains(&country.to_ascii_uppercase()) {
                warn!("Country [{}] is rejected for authentication", country);
                return AdaptiveDecision::Rejected;
            }
        }

        debug!("Adaptive policy allowed the request");
        AdaptiveDecision::Allowed
    }
}
