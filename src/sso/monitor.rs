//! Registry statistics and health classification.
//!
//! Backends report whatever they know about themselves through
//! `TicketRegistry::statistics`; this module only formats and classifies.
//! Cluster membership is part of the synchronous report. A backend that does
//! not know its member count says `MemberCount::Unknown` instead of guessing.

use crate::sso::registry::TicketRegistry;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, error, warn};
use utoipa::ToSchema;

const BYTES_PER_KB: f64 = 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const WARN_FREE_PERCENT: u8 = 10;
const ERROR_FREE_PERCENT: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", content = "members", rename_all = "snake_case")]
pub enum MemberCount {
    Known(u32),
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CacheStatistics {
    pub name: String,
    pub entry_count: u64,
    /// Zero when the backend is unbounded.
    pub capacity_bytes: u64,
    pub memory_bytes: u64,
    pub eviction_count: u64,
    pub member_count: MemberCount,
    pub is_primary: bool,
}

impl CacheStatistics {
    /// Percentage of capacity still free, `None` for unbounded backends.
    #[must_use]
    pub fn percent_free(&self) -> Option<u8> {
        if self.capacity_bytes == 0 {
            return None;
        }
        let free = self.capacity_bytes.saturating_sub(self.memory_bytes);
        let percent = free.saturating_mul(100) / self.capacity_bytes;
        Some(u8::try_from(percent).unwrap_or(100))
    }
}

impl fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = match self.member_count {
            MemberCount::Known(count) => count.to_string(),
            MemberCount::Unknown => "unknown".to_string(),
        };
        write!(
            f,
            "Map: {} - Size: {} - Entries: {} - Evictions: {} - Members: {} - Primary: {}",
            self.name,
            format_memory(self.memory_bytes),
            self.entry_count,
            self.eviction_count,
            members,
            self.is_primary
        )
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_memory(bytes: u64) -> String {
    let value = bytes as f64;
    if value < BYTES_PER_KB {
        format!("{bytes}B")
    } else if value < BYTES_PER_MB {
        format!("{:.2}KB", value / BYTES_PER_KB)
    } else {
        format!("{:.2}MB", value / BYTES_PER_MB)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Warn,
    Error,
    Unavailable,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RegistryHealth {
    pub status: HealthStatus,
    pub statistics: Vec<CacheStatistics>,
}

pub struct RegistryMonitor {
    registry: Arc<dyn TicketRegistry>,
    eviction_warn_threshold: Option<u64>,
}

impl RegistryMonitor {
    #[must_use]
    pub fn new(registry: Arc<dyn TicketRegistry>) -> Self {
        Self {
            registry,
            eviction_warn_threshold: None,
        }
    }

    #[must_use]
    pub fn with_eviction_warn_threshold(mut self, threshold: u64) -> Self {
        self.eviction_warn_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn status_of(&self, statistics: &CacheStatistics) -> HealthStatus {
        if let Some(percent_free) = statistics.percent_free() {
            if percent_free < ERROR_FREE_PERCENT {
                return HealthStatus::Error;
            }
            if percent_free < WARN_FREE_PERCENT {
                return HealthStatus::Warn;
            }
        }
        if self
            .eviction_warn_threshold
            .is_some_and(|threshold| statistics.eviction_count > threshold)
        {
            return HealthStatus::Warn;
        }
        HealthStatus::Ok
    }

    /// Collect statistics and classify them; the worst cache decides.
    #[must_use]
    pub fn observe(&self) -> RegistryHealth {
        match self.registry.statistics() {
            Ok(statistics) => {
                let status = statistics
                    .iter()
                    .map(|s| self.status_of(s))
                    .max()
                    .unwrap_or(HealthStatus::Ok);
                for entry in &statistics {
                    debug!("Registry statistics: {entry}");
                }
                if status != HealthStatus::Ok {
                    warn!("Ticket registry health is {:?}", status);
                }
                RegistryHealth { status, statistics }
            }
            Err(err) => {
                error!("Failed to collect ticket registry statistics: {err}");
                RegistryHealth {
                    status: HealthStatus::Unavailable,
                    statistics: Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::registry::InMemoryTicketRegistry;

    fn stats(capacity_bytes: u64, memory_bytes: u64, eviction_count: u64) -> CacheStatistics {
        CacheStatistics {
            name: "tickets".to_string(),
            entry_count: 3,
            capacity_bytes,
            memory_bytes,
            eviction_count,
            member_count: MemberCount::Known(1),
            is_primary: true,
        }
    }

    #[test]
    fn percent_free_is_none_when_unbounded() {
        assert_eq!(stats(0, 10, 0).percent_free(), None);
        assert_eq!(stats(1000, 250, 0).percent_free(), Some(75));
        assert_eq!(stats(1000, 2000, 0).percent_free(), Some(0));
    }

    #[test]
    fn format_memory_picks_unit() {
        assert_eq!(format_memory(512), "512B");
        assert_eq!(format_memory(1536), "1.50KB");
        assert_eq!(format_memory(3 * 1024 * 1024), "3.00MB");
    }

    #[test]
    fn status_thresholds() {
        let registry: Arc<dyn TicketRegistry> = Arc::new(InMemoryTicketRegistry::new("tickets"));
        let monitor = RegistryMonitor::new(registry).with_eviction_warn_threshold(100);
        assert_eq!(monitor.status_of(&stats(0, 0, 0)), HealthStatus::Ok);
        assert_eq!(monitor.status_of(&stats(100, 92, 0)), HealthStatus::Warn);
        assert_eq!(monitor.status_of(&stats(100, 97, 0)), HealthStatus::Error);
        assert_eq!(monitor.status_of(&stats(0, 0, 101)), HealthStatus::Warn);
    }

    #[test]
    fn observe_reports_in_memory_registry() {
        let registry: Arc<dyn TicketRegistry> = Arc::new(InMemoryTicketRegistry::new("tickets"));
        let health = RegistryMonitor::new(registry).observe();
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.statistics.len(), 1);
        assert_eq!(health.statistics[0].member_count, MemberCount::Known(1));
        assert!(health.statistics[0].is_primary);
    }

    #[test]
    fn display_includes_unknown_members() {
        let mut entry = stats(0, 2048, 0);
        entry.member_count = MemberCount::Unknown;
        let text = entry.to_string();
        assert!(text.contains("Members: unknown"));
        assert!(text.contains("2.00KB"));
    }
}
