//! Ticket expiration policies.
//!
//! A policy is a pure function of a ticket's own timestamps. It never
//! looks at the parent chain; cascading liveness (a child can never
//! outlive its parent) is enforced by the ticket registry, which walks
//! the chain at access time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Expiration policy attached to a ticket.
///
/// Policies are small `Copy` values, stored alongside each ticket so a
/// remote backend can round-trip them with the rest of the ticket.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use ticket_broker::expiration::ExpirationPolicy;
///
/// let policy = ExpirationPolicy::HardTimeout { time_to_live: Duration::from_secs(10) };
/// let issued = Utc::now();
/// assert!(!policy.is_expired(issued, issued, issued + chrono::Duration::seconds(10)));
/// assert!(policy.is_expired(issued, issued, issued + chrono::Duration::seconds(11)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Session policy: hard lifetime plus sliding idle window.
    TicketGranting {
        /// Maximum lifetime measured from creation.
        max_time_to_live: Duration,
        /// Maximum gap since the last use.
        time_to_idle: Duration,
    },

    /// Expires a fixed time after creation, regardless of use.
    HardTimeout {
        /// Lifetime measured from creation.
        time_to_live: Duration,
    },

    /// Expires after a period without use.
    Timeout {
        /// Maximum gap since the last use.
        time_to_idle: Duration,
    },

    /// Never expires on its own. Parent-chain liveness still applies.
    Never,
}

impl ExpirationPolicy {
    /// Decide whether a ticket with these timestamps is expired at `now`.
    ///
    /// Both windows use strict comparisons: a ticket exactly at its limit
    /// is still alive.
    #[must_use]
    pub fn is_expired(
        &self,
        created_at: DateTime<Utc>,
        last_used_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        match *self {
            Self::TicketGranting {
                max_time_to_live,
                time_to_idle,
            } => {
                elapsed(created_at, now) > max_time_to_live
                    || elapsed(last_used_at, now) > time_to_idle
            }
            Self::HardTimeout { time_to_live } => elapsed(created_at, now) > time_to_live,
            Self::Timeout { time_to_idle } => elapsed(last_used_at, now) > time_to_idle,
            Self::Never => false,
        }
    }

    /// Upper bound on how long a ticket under this policy can live.
    ///
    /// Remote backends use this as a storage-level TTL backstop. `None`
    /// means the policy has no creation-relative bound.
    #[must_use]
    pub const fn max_lifetime(&self) -> Option<Duration> {
        match *self {
            Self::TicketGranting {
                max_time_to_live, ..
            } => Some(max_time_to_live),
            Self::HardTimeout { time_to_live } => Some(time_to_live),
            Self::Timeout { .. } | Self::Never => None,
        }
    }
}

/// Time elapsed from `since` to `now`, clamped at zero for clock skew.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
