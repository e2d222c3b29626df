use thiserror::Error;

/// Errors raised by the ticket lifecycle and the authentication pipeline.
///
/// None of these cross the login pipeline boundary: `Event::from_error`
/// folds them into a symbolic outcome first.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SsoError {
    #[error("credential rejected by {handler}")]
    InvalidCredential { handler: String },
    #[error("service is not authorized: {0}")]
    UnauthorizedService(String),
    #[error("service does not participate in single sign-on: {0}")]
    UnauthorizedSsoService(String),
    #[error("ticket expired: {0}")]
    TicketExpired(String),
    #[error("ticket not found: {0}")]
    TicketNotFound(String),
    #[error("ticket already consumed: {0}")]
    TicketAlreadyConsumed(String),
    #[error("service mismatch for ticket {ticket}: issued for {expected}, presented {presented}")]
    ServiceMismatch {
        ticket: String,
        expected: String,
        presented: String,
    },
    #[error("ticket registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("authentication rejected by adaptive policy")]
    AdaptivePolicyRejected,
    #[error("ticket id collision: {0}")]
    TicketIdCollision(String),
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),
}

impl SsoError {
    /// Only registry outages are transient. Ticket consumption errors are
    /// definitional and must not be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RegistryUnavailable(_))
    }
}
