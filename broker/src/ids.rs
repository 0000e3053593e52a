//! Unique ticket id generation.
//!
//! Ids look like `ST-42-q8FZ0...[-node1]`: the kind prefix, a per-kind
//! counter, a random string drawn from a CSPRNG over the configured
//! alphabet, and an optional node suffix. The counter only makes ids easy
//! to eyeball in logs; unguessability comes entirely from the random part.

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::ticket::{TicketId, TicketKind};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates ticket ids for every kind.
#[derive(Debug)]
pub struct TicketIdGenerator {
    counters: [AtomicU64; 4],
    length: usize,
    alphabet: Vec<char>,
    suffix: Option<String>,
}

impl TicketIdGenerator {
    /// Build a generator from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::InvalidConfiguration`] if the entropy
    /// settings are unusable.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            counters: Default::default(),
            length: config.ticket_id_length,
            alphabet: config.ticket_id_alphabet.chars().collect(),
            suffix: config.ticket_id_suffix.clone(),
        })
    }

    /// Generate a fresh id for `kind`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ticket_broker::config::BrokerConfig;
    /// use ticket_broker::ids::TicketIdGenerator;
    /// use ticket_broker::ticket::TicketKind;
    ///
    /// let ids = TicketIdGenerator::new(&BrokerConfig::default()).unwrap();
    /// let id = ids.next_id(TicketKind::Service);
    /// assert!(id.as_str().starts_with("ST-1-"));
    /// assert_eq!(id.kind(), Some(TicketKind::Service));
    /// ```
    #[must_use]
    pub fn next_id(&self, kind: TicketKind) -> TicketId {
        let sequence = self.counters[Self::slot(kind)].fetch_add(1, Ordering::Relaxed) + 1;

        let mut rng = rand::thread_rng();
        let random: String = (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect();

        let id = match &self.suffix {
            Some(suffix) => format!("{}-{sequence}-{random}-{suffix}", kind.prefix()),
            None => format!("{}-{sequence}-{random}", kind.prefix()),
        };
        TicketId::new(id)
    }

    const fn slot(kind: TicketKind) -> usize {
        match kind {
            TicketKind::TicketGranting => 0,
            TicketKind::Service => 1,
            TicketKind::ProxyGranting => 2,
            TicketKind::Proxy => 3,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_format() {
        let config = BrokerConfig::default()
            .with_ticket_id_entropy(20, "abcdef0123")
            .with_ticket_id_suffix("node7");
        let ids = TicketIdGenerator::new(&config).unwrap();

        let id = ids.next_id(TicketKind::ProxyGranting);
        let parts: Vec<&str> = id.as_str().split('-').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "PGT");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2].len(), 20);
        assert!(parts[2].chars().all(|c| "abcdef0123".contains(c)));
        assert_eq!(parts[3], "node7");
    }

    #[test]
    fn test_counters_are_per_kind() {
        let ids = TicketIdGenerator::new(&BrokerConfig::default()).unwrap();

        let _ = ids.next_id(TicketKind::TicketGranting);
        let _ = ids.next_id(TicketKind::TicketGranting);
        let st = ids.next_id(TicketKind::Service);
        let tgt = ids.next_id(TicketKind::TicketGranting);

        assert!(st.as_str().starts_with("ST-1-"));
        assert!(tgt.as_str().starts_with("TGT-3-"));
    }

    #[test]
    fn test_random_part_is_not_derived_from_prior_ids() {
        let ids = TicketIdGenerator::new(&BrokerConfig::default()).unwrap();

        let randoms: HashSet<String> = (0..1_000)
            .map(|_| {
                let id = ids.next_id(TicketKind::Service);
                id.as_str().rsplit('-').next().unwrap().to_string()
            })
            .collect();

        assert_eq!(randoms.len(), 1_000);
    }

    #[test]
    fn test_rejects_invalid_entropy() {
        let config = BrokerConfig::default().with_ticket_id_entropy(0, "ab");
        assert!(TicketIdGenerator::new(&config).is_err());
    }
}
