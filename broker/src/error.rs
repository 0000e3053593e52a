//! Error types for ticket and service registry operations.

use crate::ticket::TicketKind;
use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Error taxonomy for the ticket broker.
///
/// The first groups are authorization and session-state decisions: they
/// are final answers and are never retried internally. The last group is
/// infrastructure failure (storage unreachable, corrupt payloads), which
/// callers must be able to tell apart from a denial.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    // ═══════════════════════════════════════════════════════════
    // Ticket State
    // ═══════════════════════════════════════════════════════════

    /// No live entry exists under this id (never issued, consumed, or destroyed).
    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    /// The entry existed but failed its liveness check.
    #[error("Ticket has expired: {0}")]
    TicketExpired(String),

    /// A ticket of one kind was presented where another kind is required.
    #[error("Ticket {id} is a {actual} ticket, expected {expected}")]
    InvalidTicketKind {
        /// Offending ticket id
        id: String,
        /// Kind the operation accepts
        expected: TicketKind,
        /// Kind that was presented
        actual: TicketKind,
    },

    // ═══════════════════════════════════════════════════════════
    // Service Authorization
    // ═══════════════════════════════════════════════════════════

    /// No enabled registered service matches the presented URL.
    #[error("Service is not authorized: {0}")]
    UnauthorizedService(String),

    /// The matched service is not permitted to obtain proxy-granting tickets.
    #[error("Service is not allowed to proxy: {0}")]
    UnauthorizedProxy(String),

    /// The ticket was validated by a different service than it was issued for.
    #[error("Ticket was issued for {expected}, presented by {presented}")]
    ServiceBindingMismatch {
        /// Service URL recorded at issue time
        expected: String,
        /// Service URL presented at validation time
        presented: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Invariant Violations
    // ═══════════════════════════════════════════════════════════

    /// A generated ticket id collided with a live ticket.
    #[error("Duplicate ticket id: {0}")]
    DuplicateTicket(String),

    /// A generated service id collided with a registered service.
    #[error("Duplicate registered service id: {0}")]
    DuplicateServiceId(i64),

    /// A service pattern failed to compile.
    #[error("Invalid service pattern {pattern:?}: {reason}")]
    InvalidServicePattern {
        /// Pattern source text
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// Configuration values were rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// Storage backend failed (I/O, network partition, unavailable server).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Returns `true` if the ticket is simply unusable (absent or expired).
    ///
    /// Callers typically answer these by sending the principal back through
    /// authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ticket_broker::BrokerError;
    /// assert!(BrokerError::TicketNotFound("ST-1-abc".into()).is_ticket_unusable());
    /// assert!(!BrokerError::UnauthorizedService("https://x".into()).is_ticket_unusable());
    /// ```
    #[must_use]
    pub const fn is_ticket_unusable(&self) -> bool {
        matches!(self, Self::TicketNotFound(_) | Self::TicketExpired(_))
    }

    /// Returns `true` if this error indicates a likely attack or misuse.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ticket_broker::BrokerError;
    /// let err = BrokerError::ServiceBindingMismatch {
    ///     expected: "https://a".into(),
    ///     presented: "https://b".into(),
    /// };
    /// assert!(err.is_security_issue());
    /// assert!(!BrokerError::TicketExpired("TGT-1-x".into()).is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::ServiceBindingMismatch { .. }
                | Self::InvalidTicketKind { .. }
                | Self::UnauthorizedProxy(_)
        )
    }

    /// Returns `true` for infrastructure failures rather than authorization decisions.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ticket_broker::BrokerError;
    /// assert!(BrokerError::Storage("connection refused".into()).is_infrastructure_failure());
    /// assert!(!BrokerError::DuplicateServiceId(7).is_infrastructure_failure());
    /// ```
    #[must_use]
    pub const fn is_infrastructure_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Serialization(_) | Self::Internal(_)
        )
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_are_disjoint() {
        let all = [
            BrokerError::TicketNotFound("x".into()),
            BrokerError::TicketExpired("x".into()),
            BrokerError::UnauthorizedService("x".into()),
            BrokerError::Storage("x".into()),
            BrokerError::Serialization("x".into()),
        ];

        for err in &all {
            assert!(
                !(err.is_ticket_unusable() && err.is_infrastructure_failure()),
                "{err} classified twice"
            );
        }
    }

    #[test]
    fn test_kind_mismatch_message() {
        let err = BrokerError::InvalidTicketKind {
            id: "PT-3-abc".into(),
            expected: TicketKind::Service,
            actual: TicketKind::Proxy,
        };
        assert_eq!(err.to_string(), "Ticket PT-3-abc is a PT ticket, expected ST");
    }
}
