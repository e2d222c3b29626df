//! Registered applications and the authorization predicate.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, warn};
use url::Url;
use utoipa::ToSchema;

/// Application requesting a ticket, identified by its service URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Service {
    pub id: String,
}

impl Service {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    /// Compare service identifiers after URL normalization (case of scheme
    /// and host, default ports). Identifiers that are not URLs are compared
    /// verbatim.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (Url::parse(&self.id), Url::parse(&other.id)) {
            (Ok(left), Ok(right)) => left == right,
            _ => self.id == other.id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegisteredService {
    pub id: u64,
    pub name: String,
    pub service_id: Regex,
    pub enabled: bool,
    pub sso_enabled: bool,
    pub evaluation_order: i32,
}

impl RegisteredService {
    /// # Errors
    /// Returns an error if the pattern is not a valid regular expression.
    pub fn new(id: u64, name: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            id,
            name: name.to_string(),
            service_id: Regex::new(pattern)?,
            enabled: true,
            sso_enabled: true,
            evaluation_order: 0,
        })
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_sso_enabled(mut self, sso_enabled: bool) -> Self {
        self.sso_enabled = sso_enabled;
        self
    }

    #[must_use]
    pub fn with_evaluation_order(mut self, order: i32) -> Self {
        self.evaluation_order = order;
        self
    }

    #[must_use]
    pub fn matches(&self, service_url: &str) -> bool {
        self.service_id.is_match(service_url)
    }
}

pub trait ServicesManager: Send + Sync {
    fn find_service_by(&self, service_url: &str) -> Option<RegisteredService>;

    fn is_authorized(&self, service: &Service) -> bool {
        self.find_service_by(&service.id)
            .is_some_and(|registered| registered.enabled)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryServicesManager {
    services: RwLock<Vec<RegisteredService>>,
}

impl InMemoryServicesManager {
    #[must_use]
    pub fn new(services: Vec<RegisteredService>) -> Self {
        let manager = Self::default();
        for service in services {
            manager.save(service);
        }
        manager
    }

    /// Insert or replace a service, keeping evaluation order.
    pub fn save(&self, service: RegisteredService) {
        let Ok(mut services) = self.services.write() else {
            warn!("Services manager lock poisoned, service [{}] not saved", service.name);
            return;
        };
        services.retain(|existing| existing.id != service.id);
        services.push(service);
        services.sort_by_key(|s| (s.evaluation_order, s.id));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.read().map_or(0, |services| services.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service_url: &str) -> Option<RegisteredService> {
        let services = self.services.read().ok()?;
        let found = services.iter().find(|s| s.matches(service_url)).cloned();
        if found.is_none() {
            debug!("No registered service matches [{}]", service_url);
        }
        found
    }
}
