//! Expiration policies.
//!
//! Policies are pure: they look at the ticket state and the current instant
//! and nothing else. They are evaluated on every read because another node
//! sharing the registry may have touched the ticket since it was last seen.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_TGT_MAX_TIME_TO_LIVE_SECONDS: i64 = 8 * 60 * 60;
const DEFAULT_TGT_TIME_TO_KILL_SECONDS: i64 = 2 * 60 * 60;
const DEFAULT_ST_TIME_TO_LIVE_SECONDS: i64 = 10;
const DEFAULT_ST_NUMBER_OF_USES: u32 = 1;

/// The parts of a ticket an expiration policy may look at.
pub trait TicketState {
    fn created_at(&self) -> DateTime<Utc>;
    fn last_used_at(&self) -> DateTime<Utc>;
    fn usage_count(&self) -> u32;
    fn is_remember_me(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    Never,
    /// Expires a fixed time after creation regardless of use.
    HardTimeout { time_to_live_seconds: i64 },
    /// Expires after a period of inactivity.
    Timeout { time_to_kill_seconds: i64 },
    /// Expires after the idle timeout or the max lifetime, whichever comes first.
    TicketGrantingTicket {
        max_time_to_live_seconds: i64,
        time_to_kill_seconds: i64,
    },
    /// Expires after a number of uses or a fixed lifetime.
    MultiUse {
        number_of_uses: u32,
        time_to_live_seconds: i64,
    },
    /// Long-term policy for remember-me sessions, regular policy otherwise.
    RememberMe {
        remember_me: Box<ExpirationPolicy>,
        session: Box<ExpirationPolicy>,
    },
}

impl ExpirationPolicy {
    #[must_use]
    pub fn default_ticket_granting() -> Self {
        Self::TicketGrantingTicket {
            max_time_to_live_seconds: DEFAULT_TGT_MAX_TIME_TO_LIVE_SECONDS,
            time_to_kill_seconds: DEFAULT_TGT_TIME_TO_KILL_SECONDS,
        }
    }

    #[must_use]
    pub fn default_service_ticket() -> Self {
        Self::MultiUse {
            number_of_uses: DEFAULT_ST_NUMBER_OF_USES,
            time_to_live_seconds: DEFAULT_ST_TIME_TO_LIVE_SECONDS,
        }
    }

    #[must_use]
    pub fn is_expired(&self, ticket: &dyn TicketState, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::HardTimeout {
                time_to_live_seconds,
            } => exceeded(ticket.created_at(), now, *time_to_live_seconds),
            Self::Timeout {
                time_to_kill_seconds,
            } => exceeded(ticket.last_used_at(), now, *time_to_kill_seconds),
            Self::TicketGrantingTicket {
                max_time_to_live_seconds,
                time_to_kill_seconds,
            } => {
                exceeded(ticket.created_at(), now, *max_time_to_live_seconds)
                    || exceeded(ticket.last_used_at(), now, *time_to_kill_seconds)
            }
            Self::MultiUse {
                number_of_uses,
                time_to_live_seconds,
            } => {
                ticket.usage_count() >= *number_of_uses
                    || exceeded(ticket.created_at(), now, *time_to_live_seconds)
            }
            Self::RememberMe {
                remember_me,
                session,
            } => {
                if ticket.is_remember_me() {
                    remember_me.is_expired(ticket, now)
                } else {
                    session.is_expired(ticket, now)
                }
            }
        }
    }
}

/// A limit too large to represent is never exceeded.
fn exceeded(since: DateTime<Utc>, now: DateTime<Utc>, seconds: i64) -> bool {
    TimeDelta::try_seconds(seconds).is_some_and(|limit| now.signed_duration_since(since) > limit)
}
