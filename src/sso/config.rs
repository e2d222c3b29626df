//! Startup configuration and the factory that wires the authority together.

use crate::sso::{
    adaptive::DefaultAdaptivePolicy,
    authentication::{AcceptUsersAuthenticationHandler, AuthenticationHandler},
    cas::CentralAuthenticationService,
    cipher::{CacheCredentialsCipherExecutor, CipherExecutor},
    flow::LoginFlow,
    metadata::{MetadataConfig, MetadataPipeline},
    monitor::RegistryMonitor,
    registry::{InMemoryTicketRegistry, TicketRegistry},
    resolution::{
        EventResolutionChain, EventResolver, PrincipalAttributeStepUpResolver,
        ServiceStepUpResolver,
    },
    services::{InMemoryServicesManager, RegisteredService, ServicesManager},
    ticket::{Clock, ExpirationPolicy, SystemClock, TicketIdGenerator},
};
use anyhow::{Context, Result};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

pub const DEFAULT_SURROGATE_SEPARATOR: &str = "+";
pub const DEFAULT_REGISTRY_NAME: &str = "tickets";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub pattern: String,
    pub sso_enabled: bool,
}

impl ServiceDefinition {
    /// Parse `name=pattern`.
    ///
    /// # Errors
    /// Returns an error if the definition has no `=` or an empty name.
    pub fn parse(definition: &str, sso_enabled: bool) -> Result<Self> {
        let (name, pattern) = definition
            .split_once('=')
            .with_context(|| format!("Invalid service definition, expected name=pattern: {definition}"))?;
        let name = name.trim();
        anyhow::ensure!(!name.is_empty(), "Service definition without a name: {definition}");
        Ok(Self {
            name: name.to_string(),
            pattern: pattern.trim().to_string(),
            sso_enabled,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepUpRule {
    PrincipalAttribute {
        attribute: String,
        pattern: String,
        provider: String,
    },
    Service {
        pattern: String,
        provider: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketConfig {
    pub tgt_max_time_to_live_seconds: i64,
    pub tgt_time_to_kill_seconds: i64,
    /// Lifetime of remember-me sessions; `None` treats them like any other.
    pub remember_me_time_to_live_seconds: Option<i64>,
    pub st_time_to_live_seconds: i64,
    pub st_number_of_uses: u32,
    pub cleaner_interval_seconds: u64,
    /// Appended to every ticket id to identify the issuing node.
    pub id_suffix: String,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            tgt_max_time_to_live_seconds: 8 * 60 * 60,
            tgt_time_to_kill_seconds: 2 * 60 * 60,
            remember_me_time_to_live_seconds: None,
            st_time_to_live_seconds: 10,
            st_number_of_uses: 1,
            cleaner_interval_seconds: 120,
            id_suffix: String::new(),
        }
    }
}

impl TicketConfig {
    #[must_use]
    pub fn ticket_granting_policy(&self) -> ExpirationPolicy {
        let session = ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live_seconds: self.tgt_max_time_to_live_seconds,
            time_to_kill_seconds: self.tgt_time_to_kill_seconds,
        };
        match self.remember_me_time_to_live_seconds {
            Some(time_to_live_seconds) => ExpirationPolicy::RememberMe {
                remember_me: Box::new(ExpirationPolicy::HardTimeout {
                    time_to_live_seconds,
                }),
                session: Box::new(session),
            },
            None => session,
        }
    }

    #[must_use]
    pub fn service_ticket_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::MultiUse {
            number_of_uses: self.st_number_of_uses,
            time_to_live_seconds: self.st_time_to_live_seconds,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdaptiveConfig {
    pub rejected_ip_pattern: Option<String>,
    pub rejected_browsers_pattern: Option<String>,
    pub rejected_countries: Vec<String>,
}

impl AdaptiveConfig {
    /// # Errors
    /// Returns an error if a pattern is not a valid regular expression.
    pub fn policy(&self) -> Result<DefaultAdaptivePolicy> {
        let mut policy =
            DefaultAdaptivePolicy::new().with_rejected_countries(&self.rejected_countries);
        if let Some(pattern) = &self.rejected_ip_pattern {
            policy = policy.with_rejected_ip_pattern(
                Regex::new(pattern).context("Invalid rejected IP pattern")?,
            );
        }
        if let Some(pattern) = &self.rejected_browsers_pattern {
            policy = policy.with_rejected_browsers_pattern(
                Regex::new(pattern).context("Invalid rejected browsers pattern")?,
            );
        }
        Ok(policy)
    }
}

/// Everything needed to assemble the authority, passed by value at startup.
#[derive(Clone, Debug)]
pub struct SsoConfig {
    /// `user::password` pairs for the static handler.
    pub accept_users: Option<SecretString>,
    pub surrogate_separator: String,
    pub metadata: MetadataConfig,
    /// Base64 encoded 32 byte key protecting cached credentials.
    pub clearpass_key: Option<SecretString>,
    pub tickets: TicketConfig,
    pub adaptive: AdaptiveConfig,
    pub step_up: Vec<StepUpRule>,
    pub services: Vec<ServiceDefinition>,
    pub registry_name: String,
    /// Nominal registry size in bytes. Zero means unbounded.
    pub registry_capacity_bytes: u64,
    pub registry_eviction_warn: Option<u64>,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            accept_users: None,
            surrogate_separator: DEFAULT_SURROGATE_SEPARATOR.to_string(),
            metadata: MetadataConfig::default(),
            clearpass_key: None,
            tickets: TicketConfig::default(),
            adaptive: AdaptiveConfig::default(),
            step_up: Vec::new(),
            services: Vec::new(),
            registry_name: DEFAULT_REGISTRY_NAME.to_string(),
            registry_capacity_bytes: 0,
            registry_eviction_warn: None,
        }
    }
}

/// The assembled authority.
pub struct Sso {
    pub flow: Arc<LoginFlow>,
    pub cas: Arc<CentralAuthenticationService>,
    pub monitor: Arc<RegistryMonitor>,
    pub separator: String,
    pub cleaner_interval: Duration,
}

impl SsoConfig {
    /// Wire the authority with an in-memory registry and the system clock.
    ///
    /// # Errors
    /// Returns an error if a pattern or the clearpass key is invalid.
    pub fn build(&self) -> Result<Sso> {
        let registry: Arc<dyn TicketRegistry> =
            Arc::new(
                InMemoryTicketRegistry::new(&self.registry_name)
                    .with_capacity_bytes(self.registry_capacity_bytes),
            );
        self.build_with(registry, Arc::new(SystemClock))
    }

    /// # Errors
    /// Returns an error if a pattern or the clearpass key is invalid.
    pub fn build_with(&self, registry: Arc<dyn TicketRegistry>, clock: Arc<dyn Clock>) -> Result<Sso> {
        let services: Arc<dyn ServicesManager> = Arc::new(self.services_manager()?);

        let cas = Arc::new(
            CentralAuthenticationService::new(Arc::clone(&registry), Arc::clone(&services))
                .with_id_generator(Arc::new(TicketIdGenerator::new(&self.tickets.id_suffix)))
                .with_clock(clock)
                .with_ticket_granting_policy(self.tickets.ticket_granting_policy())
                .with_service_ticket_policy(self.tickets.service_ticket_policy()),
        );

        let cipher = match &self.clearpass_key {
            Some(key) if self.metadata.cache_credential => {
                let cipher: Arc<dyn CipherExecutor> =
                    Arc::new(CacheCredentialsCipherExecutor::from_base64(key)?);
                Some(cipher)
            }
            _ => None,
        };
        let metadata = Arc::new(MetadataPipeline::from_config(&self.metadata, cipher));

        let policy = self.adaptive.policy()?;
        if !policy.is_permissive() {
            info!("Adaptive authentication policy is active");
        }
        let chain = Arc::new(EventResolutionChain::standard(
            Arc::new(policy),
            services,
            self.step_up_resolvers()?,
        ));

        let flow = Arc::new(LoginFlow::new(
            self.handlers(),
            metadata,
            chain,
            Arc::clone(&cas),
        ));

        Ok(Sso {
            flow,
            cas,
            monitor: Arc::new(self.monitor(registry)),
            separator: self.surrogate_separator.clone(),
            cleaner_interval: Duration::from_secs(self.tickets.cleaner_interval_seconds),
        })
    }

    fn monitor(&self, registry: Arc<dyn TicketRegistry>) -> RegistryMonitor {
        let monitor = RegistryMonitor::new(registry);
        match self.registry_eviction_warn {
            Some(threshold) => monitor.with_eviction_warn_threshold(threshold),
            None => monitor,
        }
    }

    fn handlers(&self) -> Vec<Arc<dyn AuthenticationHandler>> {
        let handler = self
            .accept_users
            .as_ref()
            .map(|users| AcceptUsersAuthenticationHandler::from_users(users.expose_secret()))
            .filter(|handler| !handler.is_empty());

        match handler {
            Some(handler) => {
                info!("Static authentication handler accepts {} users", handler.len());
                let handler: Arc<dyn AuthenticationHandler> = Arc::new(handler);
                vec![handler]
            }
            None => {
                warn!("No authentication handler configured, every login will be rejected");
                Vec::new()
            }
        }
    }

    fn services_manager(&self) -> Result<InMemoryServicesManager> {
        let manager = InMemoryServicesManager::default();
        for (index, definition) in self.services.iter().enumerate() {
            let id = u64::try_from(index)?.saturating_add(1);
            let service = RegisteredService::new(id, &definition.name, &definition.pattern)
                .with_context(|| format!("Invalid pattern for service {}", definition.name))?
                .with_sso_enabled(definition.sso_enabled)
                .with_evaluation_order(i32::try_from(index)?);
            manager.save(service);
        }
        Ok(manager)
    }

    fn step_up_resolvers(&self) -> Result<Vec<Arc<dyn EventResolver>>> {
        let mut resolvers: Vec<Arc<dyn EventResolver>> = Vec::with_capacity(self.step_up.len());
        for rule in &self.step_up {
            match rule {
                StepUpRule::PrincipalAttribute {
                    attribute,
                    pattern,
                    provider,
                } => resolvers.push(Arc::new(PrincipalAttributeStepUpResolver::new(
                    attribute,
                    Regex::new(pattern).context("Invalid step-up attribute pattern")?,
                    provider,
                ))),
                StepUpRule::Service { pattern, provider } => {
                    resolvers.push(Arc::new(ServiceStepUpResolver::new(
                        Regex::new(pattern).context("Invalid step-up service pattern")?,
                        provider,
                    )));
                }
            }
        }
        Ok(resolvers)
    }
}
