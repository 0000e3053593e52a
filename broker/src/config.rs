//! Broker configuration.
//!
//! Lifetimes, reuse rules and ticket-id entropy settings. Values are
//! provided by the embedding application, either built in code or loaded
//! from the environment with [`BrokerConfig::from_env`].

use crate::error::{BrokerError, Result};
use crate::expiration::ExpirationPolicy;
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default alphabet for the random part of ticket ids.
pub const DEFAULT_TICKET_ID_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Ticket broker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Hard lifetime of a ticket-granting ticket.
    ///
    /// Default: 8 hours
    pub tgt_max_time_to_live: Duration,

    /// Idle window of a ticket-granting ticket.
    ///
    /// Default: 2 hours
    pub tgt_time_to_idle: Duration,

    /// Lifetime of a service ticket.
    ///
    /// Default: 10 seconds
    pub st_time_to_live: Duration,

    /// Whether service tickets survive validation.
    ///
    /// Default: `false` (single-use)
    pub st_reusable: bool,

    /// Hard lifetime of a proxy-granting ticket.
    ///
    /// Default: 8 hours
    pub pgt_max_time_to_live: Duration,

    /// Idle window of a proxy-granting ticket.
    ///
    /// Default: 2 hours
    pub pgt_time_to_idle: Duration,

    /// Lifetime of a proxy ticket.
    ///
    /// Default: 10 seconds
    pub pt_time_to_live: Duration,

    /// Number of random characters in every ticket id.
    ///
    /// Default: 32
    pub ticket_id_length: usize,

    /// Characters the random part of ticket ids is drawn from.
    ///
    /// Default: ASCII alphanumerics
    pub ticket_id_alphabet: String,

    /// Node suffix appended to every ticket id (e.g. `"node1"`).
    ///
    /// Default: none
    pub ticket_id_suffix: Option<String>,

    /// Interval between eager expiration sweeps.
    ///
    /// Default: 60 seconds
    pub cleaner_interval: Duration,
}

impl BrokerConfig {
    /// Set ticket-granting ticket lifetimes.
    #[must_use]
    pub const fn with_tgt_lifetime(mut self, max_time_to_live: Duration, time_to_idle: Duration) -> Self {
        self.tgt_max_time_to_live = max_time_to_live;
        self.tgt_time_to_idle = time_to_idle;
        self
    }

    /// Set service ticket lifetime.
    #[must_use]
    pub const fn with_st_time_to_live(mut self, time_to_live: Duration) -> Self {
        self.st_time_to_live = time_to_live;
        self
    }

    /// Allow service tickets to be validated more than once.
    #[must_use]
    pub const fn with_st_reusable(mut self, reusable: bool) -> Self {
        self.st_reusable = reusable;
        self
    }

    /// Set proxy-granting ticket lifetimes.
    #[must_use]
    pub const fn with_pgt_lifetime(mut self, max_time_to_live: Duration, time_to_idle: Duration) -> Self {
        self.pgt_max_time_to_live = max_time_to_live;
        self.pgt_time_to_idle = time_to_idle;
        self
    }

    /// Set proxy ticket lifetime.
    #[must_use]
    pub const fn with_pt_time_to_live(mut self, time_to_live: Duration) -> Self {
        self.pt_time_to_live = time_to_live;
        self
    }

    /// Set ticket id entropy.
    #[must_use]
    pub fn with_ticket_id_entropy(mut self, length: usize, alphabet: impl Into<String>) -> Self {
        self.ticket_id_length = length;
        self.ticket_id_alphabet = alphabet.into();
        self
    }

    /// Set the node suffix appended to ticket ids.
    #[must_use]
    pub fn with_ticket_id_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.ticket_id_suffix = Some(suffix.into());
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_cleaner_interval(mut self, interval: Duration) -> Self {
        self.cleaner_interval = interval;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to defaults. The result
    /// is validated before it is returned.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `SSO_TGT_MAX_TTL_SECS` | `tgt_max_time_to_live` |
    /// | `SSO_TGT_TTI_SECS` | `tgt_time_to_idle` |
    /// | `SSO_ST_TTL_SECS` | `st_time_to_live` |
    /// | `SSO_ST_REUSABLE` | `st_reusable` |
    /// | `SSO_PGT_MAX_TTL_SECS` | `pgt_max_time_to_live` |
    /// | `SSO_PGT_TTI_SECS` | `pgt_time_to_idle` |
    /// | `SSO_PT_TTL_SECS` | `pt_time_to_live` |
    /// | `SSO_TICKET_ID_LENGTH` | `ticket_id_length` |
    /// | `SSO_TICKET_ID_ALPHABET` | `ticket_id_alphabet` |
    /// | `SSO_TICKET_ID_SUFFIX` | `ticket_id_suffix` |
    /// | `SSO_CLEANER_INTERVAL_SECS` | `cleaner_interval` |
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidConfiguration`] if the loaded values
    /// fail [`BrokerConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            tgt_max_time_to_live: secs_var("SSO_TGT_MAX_TTL_SECS")
                .unwrap_or(defaults.tgt_max_time_to_live),
            tgt_time_to_idle: secs_var("SSO_TGT_TTI_SECS").unwrap_or(defaults.tgt_time_to_idle),
            st_time_to_live: secs_var("SSO_ST_TTL_SECS").unwrap_or(defaults.st_time_to_live),
            st_reusable: parsed_var("SSO_ST_REUSABLE").unwrap_or(defaults.st_reusable),
            pgt_max_time_to_live: secs_var("SSO_PGT_MAX_TTL_SECS")
                .unwrap_or(defaults.pgt_max_time_to_live),
            pgt_time_to_idle: secs_var("SSO_PGT_TTI_SECS").unwrap_or(defaults.pgt_time_to_idle),
            pt_time_to_live: secs_var("SSO_PT_TTL_SECS").unwrap_or(defaults.pt_time_to_live),
            ticket_id_length: parsed_var("SSO_TICKET_ID_LENGTH")
                .unwrap_or(defaults.ticket_id_length),
            ticket_id_alphabet: env::var("SSO_TICKET_ID_ALPHABET")
                .unwrap_or(defaults.ticket_id_alphabet),
            ticket_id_suffix: env::var("SSO_TICKET_ID_SUFFIX").ok().filter(|s| !s.is_empty()),
            cleaner_interval: secs_var("SSO_CLEANER_INTERVAL_SECS")
                .unwrap_or(defaults.cleaner_interval),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the broker cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidConfiguration`] if:
    /// - any lifetime or the sweep interval is zero
    /// - the id length is zero
    /// - the alphabet has fewer than two distinct characters
    /// - the id suffix is empty or not ASCII alphanumeric
    pub fn validate(&self) -> Result<()> {
        let lifetimes = [
            ("tgt_max_time_to_live", self.tgt_max_time_to_live),
            ("tgt_time_to_idle", self.tgt_time_to_idle),
            ("st_time_to_live", self.st_time_to_live),
            ("pgt_max_time_to_live", self.pgt_max_time_to_live),
            ("pgt_time_to_idle", self.pgt_time_to_idle),
            ("pt_time_to_live", self.pt_time_to_live),
            ("cleaner_interval", self.cleaner_interval),
        ];
        if let Some((name, _)) = lifetimes.iter().find(|(_, d)| d.is_zero()) {
            return Err(BrokerError::InvalidConfiguration(format!(
                "{name} must be greater than zero"
            )));
        }

        if self.ticket_id_length == 0 {
            return Err(BrokerError::InvalidConfiguration(
                "ticket_id_length must be greater than zero".to_string(),
            ));
        }

        let distinct: BTreeSet<char> = self.ticket_id_alphabet.chars().collect();
        if distinct.len() < 2 {
            return Err(BrokerError::InvalidConfiguration(
                "ticket_id_alphabet needs at least two distinct characters".to_string(),
            ));
        }
        if distinct.contains(&'-') {
            return Err(BrokerError::InvalidConfiguration(
                "ticket_id_alphabet must not contain the '-' separator".to_string(),
            ));
        }

        if let Some(suffix) = &self.ticket_id_suffix {
            if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(BrokerError::InvalidConfiguration(format!(
                    "ticket_id_suffix {suffix:?} must be non-empty ASCII alphanumeric"
                )));
            }
        }

        Ok(())
    }

    /// Expiration policy for new ticket-granting tickets.
    #[must_use]
    pub const fn tgt_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::TicketGranting {
            max_time_to_live: self.tgt_max_time_to_live,
            time_to_idle: self.tgt_time_to_idle,
        }
    }

    /// Expiration policy for new service tickets.
    #[must_use]
    pub const fn st_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::HardTimeout {
            time_to_live: self.st_time_to_live,
        }
    }

    /// Expiration policy for new proxy-granting tickets.
    #[must_use]
    pub const fn pgt_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::TicketGranting {
            max_time_to_live: self.pgt_max_time_to_live,
            time_to_idle: self.pgt_time_to_idle,
        }
    }

    /// Expiration policy for new proxy tickets.
    #[must_use]
    pub const fn pt_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::HardTimeout {
            time_to_live: self.pt_time_to_live,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            tgt_max_time_to_live: Duration::from_secs(8 * 60 * 60),
            tgt_time_to_idle: Duration::from_secs(2 * 60 * 60),
            st_time_to_live: Duration::from_secs(10),
            st_reusable: false,
            pgt_max_time_to_live: Duration::from_secs(8 * 60 * 60),
            pgt_time_to_idle: Duration::from_secs(2 * 60 * 60),
            pt_time_to_live: Duration::from_secs(10),
            ticket_id_length: 32,
            ticket_id_alphabet: DEFAULT_TICKET_ID_ALPHABET.to_string(),
            ticket_id_suffix: None,
            cleaner_interval: Duration::from_secs(60),
        }
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn secs_var(name: &str) -> Option<Duration> {
    parsed_var::<u64>(name).map(Duration::from_secs)
}
