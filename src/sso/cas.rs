//! Ticket lifecycle: creation, service ticket issuance, single-use validation
//! and cascading destruction.
//!
//! Expiration is evaluated on every read against the injected clock. Nothing
//! about a ticket's liveness is cached between calls.

use crate::sso::{
    authentication::Authentication,
    error::SsoError,
    registry::TicketRegistry,
    services::{Service, ServicesManager},
    ticket::{
        Clock, ExpirationPolicy, ServiceTicket, SystemClock, Ticket, TicketGrantingTicket,
        TicketIdGenerator, PROXY_GRANTING_TICKET_PREFIX, SERVICE_TICKET_PREFIX,
        TICKET_GRANTING_TICKET_PREFIX,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketCheck {
    Valid,
    Invalid,
    NotExists,
}

pub struct CentralAuthenticationService {
    registry: Arc<dyn TicketRegistry>,
    services: Arc<dyn ServicesManager>,
    id_generator: Arc<TicketIdGenerator>,
    clock: Arc<dyn Clock>,
    ticket_granting_policy: ExpirationPolicy,
    service_ticket_policy: ExpirationPolicy,
}

impl CentralAuthenticationService {
    #[must_use]
    pub fn new(registry: Arc<dyn TicketRegistry>, services: Arc<dyn ServicesManager>) -> Self {
        Self {
            registry,
            services,
            id_generator: Arc::new(TicketIdGenerator::new("")),
            clock: Arc::new(SystemClock),
            ticket_granting_policy: ExpirationPolicy::default_ticket_granting(),
            service_ticket_policy: ExpirationPolicy::default_service_ticket(),
        }
    }

    #[must_use]
    pub fn with_id_generator(mut self, id_generator: Arc<TicketIdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_ticket_granting_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.ticket_granting_policy = policy;
        self
    }

    #[must_use]
    pub fn with_service_ticket_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.service_ticket_policy = policy;
        self
    }

    #[must_use]
    pub fn registry(&self) -> Arc<dyn TicketRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn services(&self) -> Arc<dyn ServicesManager> {
        Arc::clone(&self.services)
    }

    /// # Errors
    /// `TicketIdCollision` if the minted id already exists, which is fatal for
    /// this call; `RegistryUnavailable` if the registry cannot be reached.
    #[instrument(skip_all, fields(principal = %authentication.principal_id()))]
    pub fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<TicketGrantingTicket, SsoError> {
        let id = self
            .id_generator
            .new_ticket_id(TICKET_GRANTING_TICKET_PREFIX)?;
        let tgt = TicketGrantingTicket::new(
            id,
            authentication,
            None,
            self.ticket_granting_policy.clone(),
            self.clock.now(),
        );
        self.registry.put(Ticket::Granting(tgt.clone()))?;
        info!("Created ticket-granting ticket [{}]", tgt.id);
        Ok(tgt)
    }

    /// # Errors
    /// `TicketExpired` if the ticket-granting ticket is gone or expired,
    /// `UnauthorizedService` if the service is unknown or disabled and
    /// `UnauthorizedSsoService` if the service requires a fresh credential.
    #[instrument(skip(self, service), fields(service = %service.id))]
    pub fn grant_service_ticket(
        &self,
        tgt_id: &str,
        service: &Service,
        credential_provided: bool,
    ) -> Result<ServiceTicket, SsoError> {
        let now = self.clock.now();
        let tgt = self.live_ticket_granting_ticket(tgt_id, now)?;

        let registered = self
            .services
            .find_service_by(&service.id)
            .filter(|registered| registered.enabled)
            .ok_or_else(|| SsoError::UnauthorizedService(service.id.clone()))?;

        if !registered.sso_enabled && !credential_provided {
            warn!(
                "Service [{}] does not allow single sign-on and no credential was presented",
                service.id
            );
            return Err(SsoError::UnauthorizedSsoService(service.id.clone()));
        }

        let st = ServiceTicket {
            id: self.id_generator.new_ticket_id(SERVICE_TICKET_PREFIX)?,
            parent_tgt_id: tgt.id.clone(),
            target_service: service.clone(),
            issued_at: now,
            consumed: false,
            from_new_login: credential_provided,
            expiration_policy: self.service_ticket_policy.clone(),
        };
        self.registry.put(Ticket::Service(st.clone()))?;
        self.attach(&tgt.id, &st.id, now)?;

        info!("Granted service ticket [{}] for [{}]", st.id, service.id);
        Ok(st)
    }

    /// Consume a service ticket. Exactly one concurrent caller succeeds.
    ///
    /// # Errors
    /// `TicketNotFound`, `TicketAlreadyConsumed`, `TicketExpired` or
    /// `ServiceMismatch`, checked in that order.
    #[instrument(skip(self, service), fields(service = %service.id))]
    pub fn validate_service_ticket(
        &self,
        st_id: &str,
        service: &Service,
    ) -> Result<Authentication, SsoError> {
        let now = self.clock.now();
        let st = match self.registry.get(st_id)? {
            Some(Ticket::Service(st)) => st,
            _ => return Err(SsoError::TicketNotFound(st_id.to_string())),
        };
        let parent = match self.registry.get(&st.parent_tgt_id)? {
            Some(Ticket::Granting(parent)) => parent,
            _ => {
                debug!(
                    "Parent [{}] of service ticket [{}] is gone",
                    st.parent_tgt_id, st_id
                );
                return Err(SsoError::TicketNotFound(st_id.to_string()));
            }
        };
        let lineage = self.lineage(&parent, now)?;
        if lineage == Lineage::Broken {
            debug!("Service ticket [{}] descends from a destroyed session", st_id);
            return Err(SsoError::TicketNotFound(st_id.to_string()));
        }

        if st.consumed {
            return Err(SsoError::TicketAlreadyConsumed(st_id.to_string()));
        }

        if st.is_expired(now) || lineage == Lineage::Expired {
            self.registry.evict(st_id)?;
            info!("Service ticket [{}] has expired", st_id);
            return Err(SsoError::TicketExpired(st_id.to_string()));
        }

        if !st.target_service.matches(service) {
            warn!(
                "Service ticket [{}] was issued for [{}] but presented by [{}]",
                st_id, st.target_service.id, service.id
            );
            return Err(SsoError::ServiceMismatch {
                ticket: st_id.to_string(),
                expected: st.target_service.id,
                presented: service.id.clone(),
            });
        }

        if !self.registry.compare_and_set_consumed(st_id, false, true)? {
            return Err(SsoError::TicketAlreadyConsumed(st_id.to_string()));
        }

        info!("Validated service ticket [{}]", st_id);
        Ok(parent.authentication)
    }

    /// Destroy a ticket-granting ticket and everything issued from it.
    /// Returns how many tickets were removed; unknown ids remove nothing.
    ///
    /// # Errors
    /// `RegistryUnavailable` if the registry cannot be reached.
    #[instrument(skip(self))]
    pub fn destroy_ticket_granting_ticket(&self, tgt_id: &str) -> Result<usize, SsoError> {
        let removed = self.destroy_cascade(tgt_id)?;
        if removed > 0 {
            info!("Destroyed ticket-granting ticket [{}] and {} descendants", tgt_id, removed - 1);
        } else {
            debug!("Ticket-granting ticket [{}] was already gone", tgt_id);
        }
        Ok(removed)
    }

    fn destroy_cascade(&self, tgt_id: &str) -> Result<usize, SsoError> {
        let Some(Ticket::Granting(tgt)) = self.registry.get(tgt_id)? else {
            return Ok(0);
        };

        let mut removed = 0;
        for descendant in &tgt.descendant_ids {
            match self.registry.get(descendant)? {
                Some(Ticket::Granting(_)) => removed += self.destroy_cascade(descendant)?,
                Some(Ticket::Service(_)) => removed += usize::from(self.registry.delete(descendant)?),
                None => {}
            }
        }
        removed += usize::from(self.registry.delete(tgt_id)?);
        Ok(removed)
    }

    /// # Errors
    /// `TicketExpired` if the parent is gone or expired.
    #[instrument(skip(self))]
    pub fn grant_proxy_granting_ticket(
        &self,
        tgt_id: &str,
    ) -> Result<TicketGrantingTicket, SsoError> {
        let now = self.clock.now();
        let parent = self.live_ticket_granting_ticket(tgt_id, now)?;

        let pgt = TicketGrantingTicket::new(
            self.id_generator
                .new_ticket_id(PROXY_GRANTING_TICKET_PREFIX)?,
            parent.authentication.clone(),
            Some(parent.id.clone()),
            self.ticket_granting_policy.clone(),
            now,
        );
        self.registry.put(Ticket::Granting(pgt.clone()))?;
        self.attach(&parent.id, &pgt.id, now)?;

        info!("Granted proxy-granting ticket [{}] from [{}]", pgt.id, tgt_id);
        Ok(pgt)
    }

    /// # Errors
    /// `RegistryUnavailable` if the registry cannot be reached.
    pub fn check_ticket_granting_ticket(&self, tgt_id: &str) -> Result<TicketCheck, SsoError> {
        let check = match self.registry.get(tgt_id)? {
            Some(Ticket::Granting(tgt)) if tgt.is_expired(self.clock.now()) => TicketCheck::Invalid,
            Some(Ticket::Granting(_)) => TicketCheck::Valid,
            _ => TicketCheck::NotExists,
        };
        debug!("Ticket-granting ticket [{}] is {:?}", tgt_id, check);
        Ok(check)
    }

    /// One registry cleaner pass. Expired ticket-granting tickets are
    /// destroyed with their descendants, expired service tickets evicted.
    ///
    /// # Errors
    /// `RegistryUnavailable` if the registry cannot be reached.
    #[instrument(skip(self))]
    pub fn clean_expired(&self) -> Result<usize, SsoError> {
        let now = self.clock.now();
        let (granting, service): (Vec<Ticket>, Vec<Ticket>) = self
            .registry
            .tickets()?
            .into_iter()
            .filter(|ticket| ticket.is_expired(now))
            .partition(|ticket| matches!(ticket, Ticket::Granting(_)));

        let mut removed = 0;
        for ticket in &granting {
            removed += self.destroy_cascade(ticket.id())?;
        }
        for ticket in &service {
            removed += usize::from(self.registry.evict(ticket.id())?);
        }

        if removed > 0 {
            info!("Registry cleaner removed {} expired tickets", removed);
        }
        Ok(removed)
    }

    fn live_ticket_granting_ticket(
        &self,
        tgt_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TicketGrantingTicket, SsoError> {
        let Some(Ticket::Granting(tgt)) = self.registry.get(tgt_id)? else {
            return Err(SsoError::TicketExpired(tgt_id.to_string()));
        };
        match self.lineage(&tgt, now)? {
            Lineage::Live => return Ok(tgt),
            Lineage::Expired => info!("Ticket-granting ticket [{}] has expired", tgt_id),
            Lineage::Broken => warn!("Ticket-granting ticket [{}] outlived its parent", tgt_id),
        }
        self.destroy_cascade(tgt_id)?;
        Err(SsoError::TicketExpired(tgt_id.to_string()))
    }

    /// Walk from `tgt` up through every proxy parent. A session is only as
    /// alive as its root.
    fn lineage(&self, tgt: &TicketGrantingTicket, now: DateTime<Utc>) -> Result<Lineage, SsoError> {
        if tgt.is_expired(now) {
            return Ok(Lineage::Expired);
        }
        let mut parent_id = tgt.parent_ticket_id.clone();
        while let Some(id) = parent_id {
            match self.registry.get(&id)? {
                Some(Ticket::Granting(parent)) if parent.is_expired(now) => {
                    return Ok(Lineage::Expired)
                }
                Some(Ticket::Granting(parent)) => parent_id = parent.parent_ticket_id,
                _ => return Ok(Lineage::Broken),
            }
        }
        Ok(Lineage::Live)
    }

    /// Link a freshly stored ticket to its parent, removing it again when the
    /// parent was destroyed in the meantime.
    fn attach(&self, parent_id: &str, child_id: &str, now: DateTime<Utc>) -> Result<(), SsoError> {
        match self.registry.add_descendant(parent_id, child_id, now) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.registry.delete(child_id)?;
                Err(match err {
                    SsoError::TicketNotFound(_) => SsoError::TicketExpired(parent_id.to_string()),
                    other => other,
                })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lineage {
    Live,
    Expired,
    /// An ancestor is gone, so this ticket survived a logout.
    Broken,
}
