//! Ticket storage contract and the in-memory backend.

use crate::sso::{
    error::SsoError,
    monitor::{CacheStatistics, MemberCount},
    ticket::Ticket,
};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};
use tracing::{debug, error};

/// Storage for tickets keyed by opaque id.
///
/// Implementations must make `put` an atomic create-if-absent and `get` an
/// atomic snapshot read. `add_descendant` and `compare_and_set_consumed`
/// mutate a single stored ticket in place and must not lose concurrent writes. Calls are expected to return within a bounded time;
/// timeouts surface as `SsoError::RegistryUnavailable`.
pub trait TicketRegistry: Send + Sync {
    /// # Errors
    /// `TicketIdCollision` if the id is taken, `RegistryUnavailable` on backend failure.
    fn put(&self, ticket: Ticket) -> Result<(), SsoError>;

    /// Record `child_id` as issued from the ticket-granting ticket `parent_id`
    /// and mark the parent as used at `used_at`.
    ///
    /// # Errors
    /// `TicketNotFound` if the parent no longer exists or is not a
    /// ticket-granting ticket.
    fn add_descendant(
        &self,
        parent_id: &str,
        child_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), SsoError>;

    /// # Errors
    /// `RegistryUnavailable` on backend failure.
    fn get(&self, id: &str) -> Result<Option<Ticket>, SsoError>;

    /// Returns whether a ticket was removed.
    ///
    /// # Errors
    /// `RegistryUnavailable` on backend failure.
    fn delete(&self, id: &str) -> Result<bool, SsoError>;

    /// Remove a ticket because it expired. Backends may count these.
    ///
    /// # Errors
    /// `RegistryUnavailable` on backend failure.
    fn evict(&self, id: &str) -> Result<bool, SsoError> {
        self.delete(id)
    }

    /// Flip the consumed flag of a service ticket from `expected` to `new`.
    /// Returns `false` when the current value is not `expected`.
    ///
    /// # Errors
    /// `TicketNotFound` if the id is absent or not a service ticket.
    fn compare_and_set_consumed(&self, id: &str, expected: bool, new: bool)
        -> Result<bool, SsoError>;

    /// # Errors
    /// `RegistryUnavailable` on backend failure.
    fn tickets(&self) -> Result<Vec<Ticket>, SsoError>;

    /// # Errors
    /// `RegistryUnavailable` on backend failure.
    fn statistics(&self) -> Result<Vec<CacheStatistics>, SsoError>;
}

#[derive(Debug)]
pub struct InMemoryTicketRegistry {
    name: String,
    capacity_bytes: u64,
    tickets: RwLock<HashMap<String, Ticket>>,
    evictions: AtomicU64,
}

impl InMemoryTicketRegistry {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capacity_bytes: 0,
            tickets: RwLock::new(HashMap::new()),
            evictions: AtomicU64::new(0),
        }
    }

    /// Nominal capacity reported in statistics. Not enforced.
    #[must_use]
    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    fn poisoned() -> SsoError {
        error!("Ticket registry lock poisoned");
        SsoError::RegistryUnavailable("in-memory registry lock poisoned".to_string())
    }
}

impl TicketRegistry for InMemoryTicketRegistry {
    fn put(&self, ticket: Ticket) -> Result<(), SsoError> {
        let mut tickets = self.tickets.write().map_err(|_| Self::poisoned())?;
        let id = ticket.id().to_string();
        if tickets.contains_key(&id) {
            error!("Ticket id collision for [{}]", id);
            return Err(SsoError::TicketIdCollision(id));
        }
        debug!("Added ticket [{}] to registry", id);
        tickets.insert(id, ticket);
        Ok(())
    }

    fn add_descendant(
        &self,
        parent_id: &str,
        child_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), SsoError> {
        let mut tickets = self.tickets.write().map_err(|_| Self::poisoned())?;
        match tickets.get_mut(parent_id) {
            Some(Ticket::Granting(parent)) => {
                parent.record_usage(used_at);
                parent.descendant_ids.push(child_id.to_string());
                Ok(())
            }
            _ => Err(SsoError::TicketNotFound(parent_id.to_string())),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Ticket>, SsoError> {
        let tickets = self.tickets.read().map_err(|_| Self::poisoned())?;
        Ok(tickets.get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<bool, SsoError> {
        let mut tickets = self.tickets.write().map_err(|_| Self::poisoned())?;
        Ok(tickets.remove(id).is_some())
    }

    fn evict(&self, id: &str) -> Result<bool, SsoError> {
        let removed = self.delete(id)?;
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn compare_and_set_consumed(
        &self,
        id: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, SsoError> {
        let mut tickets = self.tickets.write().map_err(|_| Self::poisoned())?;
        match tickets.get_mut(id) {
            Some(Ticket::Service(st)) => {
                if st.consumed != expected {
                    return Ok(false);
                }
                st.consumed = new;
                Ok(true)
            }
            _ => Err(SsoError::TicketNotFound(id.to_string())),
        }
    }

    fn tickets(&self) -> Result<Vec<Ticket>, SsoError> {
        let tickets = self.tickets.read().map_err(|_| Self::poisoned())?;
        Ok(tickets.values().cloned().collect())
    }

    fn statistics(&self) -> Result<Vec<CacheStatistics>, SsoError> {
        let tickets = self.tickets.read().map_err(|_| Self::poisoned())?;
        let memory_bytes = tickets
            .values()
            .map(|ticket| serde_json::to_vec(ticket).map_or(0, |bytes| bytes.len() as u64))
            .sum();
        Ok(vec![CacheStatistics {
            name: self.name.clone(),
            entry_count: tickets.len() as u64,
            capacity_bytes: self.capacity_bytes,
            memory_bytes,
            eviction_count: self.evictions.load(Ordering::Relaxed),
            member_count: MemberCount::Known(1),
            is_primary: true,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::{
        authentication::Authentication,
        services::Service,
        ticket::{ExpirationPolicy, ServiceTicket, TicketGrantingTicket},
    };
    use anyhow::Result;

    fn tgt(id: &str) -> Ticket {
        let now = Utc::now();
        Ticket::Granting(TicketGrantingTicket::new(
            id.to_string(),
            Authentication::new("alice", now),
            None,
            ExpirationPolicy::default_ticket_granting(),
            now,
        ))
    }

    fn st(id: &str) -> Ticket {
        Ticket::Service(ServiceTicket {
            id: id.to_string(),
            parent_tgt_id: "TGT-1".to_string(),
            target_service: Service::new("https://app.example.org"),
            issued_at: Utc::now(),
            consumed: false,
            from_new_login: true,
            expiration_policy: ExpirationPolicy::default_service_ticket(),
        })
    }

    #[test]
    fn put_refuses_existing_ids() -> Result<()> {
        let registry = InMemoryTicketRegistry::new("tickets");
        registry.put(tgt("TGT-1"))?;
        assert!(matches!(
            registry.put(tgt("TGT-1")),
            Err(SsoError::TicketIdCollision(_))
        ));
        Ok(())
    }

    #[test]
    fn add_descendant_requires_granting_parent() -> Result<()> {
        let registry = InMemoryTicketRegistry::new("tickets");
        assert!(matches!(
            registry.add_descendant("TGT-1", "ST-1", Utc::now()),
            Err(SsoError::TicketNotFound(_))
        ));
        registry.put(st("ST-1"))?;
        assert!(matches!(
            registry.add_descendant("ST-1", "ST-2", Utc::now()),
            Err(SsoError::TicketNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn concurrent_descendants_are_all_recorded() -> Result<()> {
        let registry = InMemoryTicketRegistry::new("tickets");
        registry.put(tgt("TGT-1"))?;
        let used_at = Utc::now();
        std::thread::scope(|scope| {
            for n in 0..16 {
                let registry = &registry;
                scope.spawn(move || registry.add_descendant("TGT-1", &format!("ST-{n}"), used_at));
            }
        });

        let Some(Ticket::Granting(parent)) = registry.get("TGT-1")? else {
            anyhow::bail!("ticket-granting ticket vanished");
        };
        assert_eq!(parent.descendant_ids.len(), 16);
        assert_eq!(parent.usage_count, 16);
        assert_eq!(parent.last_used_at, used_at);
        Ok(())
    }

    #[test]
    fn compare_and_set_consumed_flips_once() -> Result<()> {
        let registry = InMemoryTicketRegistry::new("tickets");
        registry.put(st("ST-1"))?;
        assert!(registry.compare_and_set_consumed("ST-1", false, true)?);
        assert!(!registry.compare_and_set_consumed("ST-1", false, true)?);
        assert!(matches!(
            registry.compare_and_set_consumed("ST-2", false, true),
            Err(SsoError::TicketNotFound(_))
        ));
        registry.put(tgt("TGT-1"))?;
        assert!(matches!(
            registry.compare_and_set_consumed("TGT-1", false, true),
            Err(SsoError::TicketNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn eviction_is_counted_in_statistics() -> Result<()> {
        let registry = InMemoryTicketRegistry::new("tickets").with_capacity_bytes(1024 * 1024);
        registry.put(st("ST-1"))?;
        registry.put(st("ST-2"))?;
        assert!(registry.evict("ST-1")?);
        assert!(!registry.evict("ST-1")?);
        assert!(registry.delete("ST-2")?);

        let stats = registry.statistics()?;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].entry_count, 0);
        assert_eq!(stats[0].eviction_count, 1);
        assert_eq!(stats[0].capacity_bytes, 1024 * 1024);
        Ok(())
    }

    #[test]
    fn statistics_estimate_memory() -> Result<()> {
        let registry = InMemoryTicketRegistry::new("tickets");
        registry.put(tgt("TGT-1"))?;
        let stats = registry.statistics()?;
        assert_eq!(stats[0].entry_count, 1);
        assert!(stats[0].memory_bytes > 0);
        assert_eq!(registry.tickets()?.len(), 1);
        Ok(())
    }
}
