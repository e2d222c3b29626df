//! Tickets, ticket ids and the clock used to age them.

pub mod expiration;

pub use expiration::{ExpirationPolicy, TicketState};

use crate::sso::{
    authentication::Authentication, error::SsoError, metadata::REMEMBER_ME_ATTRIBUTE,
    services::Service,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

pub const TICKET_GRANTING_TICKET_PREFIX: &str = "TGT";
pub const PROXY_GRANTING_TICKET_PREFIX: &str = "PGT";
pub const SERVICE_TICKET_PREFIX: &str = "ST";

const TICKET_ID_RANDOM_BYTES: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub usage_count: u32,
    pub authentication: Authentication,
    pub parent_ticket_id: Option<String>,
    pub expiration_policy: ExpirationPolicy,
    /// Service tickets and proxy-granting tickets issued from this ticket.
    pub descendant_ids: Vec<String>,
}

impl TicketGrantingTicket {
    #[must_use]
    pub fn new(
        id: String,
        authentication: Authentication,
        parent_ticket_id: Option<String>,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            created_at: now,
            last_used_at: now,
            usage_count: 0,
            authentication,
            parent_ticket_id,
            expiration_policy,
            descendant_ids: Vec::new(),
        }
    }

    pub fn record_usage(&mut self, now: DateTime<Utc>) {
        self.last_used_at = now;
        self.usage_count = self.usage_count.saturating_add(1);
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(self, now)
    }
}

impl TicketState for TicketGrantingTicket {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    fn usage_count(&self) -> u32 {
        self.usage_count
    }

    fn is_remember_me(&self) -> bool {
        self.authentication.has_flag(REMEMBER_ME_ATTRIBUTE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    pub id: String,
    pub parent_tgt_id: String,
    pub target_service: Service,
    pub issued_at: DateTime<Utc>,
    pub consumed: bool,
    pub from_new_login: bool,
    pub expiration_policy: ExpirationPolicy,
}

impl ServiceTicket {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(self, now)
    }
}

impl TicketState for ServiceTicket {
    fn created_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    fn last_used_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    fn usage_count(&self) -> u32 {
        u32::from(self.consumed)
    }

    fn is_remember_me(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ticket {
    Granting(TicketGrantingTicket),
    Service(ServiceTicket),
}

impl Ticket {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Granting(tgt) => &tgt.id,
            Self::Service(st) => &st.id,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Granting(tgt) => tgt.is_expired(now),
            Self::Service(st) => st.is_expired(now),
        }
    }
}

/// Mints `PREFIX-<counter>-<random>-<suffix>` ids.
///
/// The random part carries 256 bits from the OS entropy source; the counter
/// and suffix only help operators correlate ids with nodes.
#[derive(Debug)]
pub struct TicketIdGenerator {
    suffix: String,
    counter: AtomicU64,
}

impl TicketIdGenerator {
    #[must_use]
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
            counter: AtomicU64::new(1),
        }
    }

    /// # Errors
    /// Returns `SsoError::EntropyUnavailable` if the OS random source fails.
    pub fn new_ticket_id(&self, prefix: &str) -> Result<String, SsoError> {
        let mut bytes = [0u8; TICKET_ID_RANDOM_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SsoError::EntropyUnavailable(e.to_string()))?;
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let random = Base64UrlUnpadded::encode_string(&bytes);
        if self.suffix.is_empty() {
            Ok(format!("{prefix}-{counter}-{random}"))
        } else {
            Ok(format!("{prefix}-{counter}-{random}-{}", self.suffix))
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, seconds: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now += Duration::seconds(seconds);
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map_or_else(|poisoned| *poisoned.into_inner(), |now| *now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::authentication::AttributeValue;
    use anyhow::Result;
    use std::collections::HashSet;

    #[test]
    fn ticket_ids_are_unique_and_prefixed() -> Result<()> {
        let generator = TicketIdGenerator::new("node1");
        let ids: HashSet<String> = (0..500)
            .map(|_| generator.new_ticket_id(SERVICE_TICKET_PREFIX))
            .collect::<Result<_, _>>()?;
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("ST-") && id.ends_with("-node1")));
        Ok(())
    }

    #[test]
    fn ticket_id_random_part_is_long() -> Result<()> {
        let generator = TicketIdGenerator::new("");
        let id = generator.new_ticket_id(TICKET_GRANTING_TICKET_PREFIX)?;
        // "TGT-1-" followed by 43 base64url characters
        assert_eq!(id.len(), "TGT-1-".len() + 43);
        Ok(())
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        clock.advance(5);
        assert_eq!(clock.now(), start + Duration::seconds(5));
    }

    #[test]
    fn remember_me_is_read_from_authentication() {
        let now = Utc::now();
        let mut authentication = Authentication::new("alice", now);
        authentication.put_attribute(REMEMBER_ME_ATTRIBUTE, vec![AttributeValue::Flag(true)]);
        let tgt = TicketGrantingTicket::new(
            "TGT-1".to_string(),
            authentication,
            None,
            ExpirationPolicy::Never,
            now,
        );
        assert!(tgt.is_remember_me());
    }

    #[test]
    fn consumed_service_ticket_counts_as_used() {
        let now = Utc::now();
        let mut st = ServiceTicket {
            id: "ST-1".to_string(),
            parent_tgt_id: "TGT-1".to_string(),
            target_service: Service::new("https://app.example.org"),
            issued_at: now,
            consumed: false,
            from_new_login: true,
            expiration_policy: ExpirationPolicy::default_service_ticket(),
        };
        assert!(!st.is_expired(now));
        st.consumed = true;
        assert!(st.is_expired(now));
    }
}
