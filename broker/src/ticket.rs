//! Ticket entity types.
//!
//! Tickets form a tree: a ticket-granting ticket (TGT) is the root of a
//! session, service tickets (ST) and proxy-granting tickets (PGT) hang off
//! it, and proxy tickets (PT) hang off a PGT. The tree is stored as an
//! arena keyed by [`TicketId`]: `parent` and `children` hold ids, never
//! owning references, so cascading invalidation is a traversal over ids.

use crate::expiration::ExpirationPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Ticket kind, encoded as the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TicketKind {
    /// Root of an authenticated session (`TGT`).
    TicketGranting,
    /// Single service access, child of a TGT (`ST`).
    Service,
    /// Delegated session held by a proxying service (`PGT`).
    ProxyGranting,
    /// Single delegated access, child of a PGT (`PT`).
    Proxy,
}

impl TicketKind {
    /// Every kind, in prefix-length order used for parsing.
    pub const ALL: [Self; 4] = [
        Self::ProxyGranting,
        Self::TicketGranting,
        Self::Service,
        Self::Proxy,
    ];

    /// Id prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::Service => "ST",
            Self::ProxyGranting => "PGT",
            Self::Proxy => "PT",
        }
    }

    /// Whether tickets of this kind can spawn children (TGT, PGT).
    #[must_use]
    pub const fn is_granting(self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }

    /// Kind of ticket this kind grants, if any.
    #[must_use]
    pub const fn granted_kind(self) -> Option<Self> {
        match self {
            Self::TicketGranting => Some(Self::Service),
            Self::ProxyGranting => Some(Self::Proxy),
            Self::Service | Self::Proxy => None,
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Opaque ticket identifier: `<prefix>-<counter>-<random>[-<suffix>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Wrap a raw id string (as presented by a client).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind encoded in the prefix, or `None` for a malformed id.
    ///
    /// # Examples
    ///
    /// ```
    /// use ticket_broker::ticket::{TicketId, TicketKind};
    ///
    /// assert_eq!(TicketId::new("PGT-4-abc").kind(), Some(TicketKind::ProxyGranting));
    /// assert_eq!(TicketId::new("bogus").kind(), None);
    /// ```
    #[must_use]
    pub fn kind(&self) -> Option<TicketKind> {
        let (prefix, _) = self.0.split_once('-')?;
        TicketKind::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Ticket Payloads
// ═══════════════════════════════════════════════════════════════════════

/// Authenticated identity carried by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g. username).
    pub id: String,

    /// Multi-valued attributes resolved at authentication time.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Principal {
    /// Principal with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }
}

/// The service a ticket was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Id of the registered service that authorized issuance.
    pub registered_service_id: i64,

    /// Exact URL presented at issuance.
    pub url: String,
}

/// What a ticket grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grant", rename_all = "snake_case")]
pub enum TicketGrant {
    /// A session (TGT, PGT): carries the principal.
    Session {
        /// Authenticated principal.
        principal: Principal,
        /// For PGTs, the service holding the delegation.
        proxied_by: Option<ServiceBinding>,
    },

    /// One service access (ST, PT): bound to a single service URL.
    Access {
        /// Service the ticket was issued for.
        service: ServiceBinding,
    },
}

// ═══════════════════════════════════════════════════════════════════════
// Ticket
// ═══════════════════════════════════════════════════════════════════════

/// A capability token.
///
/// Identity fields are fixed at creation. Usage state (`last_used_at`,
/// `use_count`, `children`) is only changed by the ticket registry.
/// Liveness is never stored: it is recomputed from timestamps and the
/// parent chain on every access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unguessable identifier.
    pub id: TicketId,

    /// Ticket kind (always agrees with the id prefix).
    pub kind: TicketKind,

    /// Issue time.
    pub created_at: DateTime<Utc>,

    /// Last non-consuming access.
    pub last_used_at: DateTime<Utc>,

    /// Number of recorded accesses.
    pub use_count: u32,

    /// Liveness rule for this ticket's own timestamps.
    pub expiration_policy: ExpirationPolicy,

    /// Ticket this one was spawned from.
    pub parent: Option<TicketId>,

    /// Tickets spawned from this one.
    #[serde(default)]
    pub children: BTreeSet<TicketId>,

    /// Principal or service binding.
    pub grant: TicketGrant,
}

impl Ticket {
    /// New root ticket-granting ticket.
    #[must_use]
    pub fn ticket_granting(
        id: TicketId,
        principal: Principal,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            id,
            TicketKind::TicketGranting,
            None,
            TicketGrant::Session {
                principal,
                proxied_by: None,
            },
            policy,
            now,
        )
    }

    /// New proxy-granting ticket delegated to `proxied_by`.
    #[must_use]
    pub fn proxy_granting(
        id: TicketId,
        parent: TicketId,
        principal: Principal,
        proxied_by: ServiceBinding,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            id,
            TicketKind::ProxyGranting,
            Some(parent),
            TicketGrant::Session {
                principal,
                proxied_by: Some(proxied_by),
            },
            policy,
            now,
        )
    }

    /// New access ticket (ST or PT) spawned from a granting ticket.
    #[must_use]
    pub fn access(
        id: TicketId,
        kind: TicketKind,
        parent: TicketId,
        service: ServiceBinding,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            id,
            kind,
            Some(parent),
            TicketGrant::Access { service },
            policy,
            now,
        )
    }

    fn build(
        id: TicketId,
        kind: TicketKind,
        parent: Option<TicketId>,
        grant: TicketGrant,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            expiration_policy: policy,
            parent,
            children: BTreeSet::new(),
            grant,
        }
    }

    /// Whether this ticket's own policy says it is expired at `now`.
    ///
    /// Does not consider the parent chain.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy
            .is_expired(self.created_at, self.last_used_at, now)
    }

    /// Record a non-consuming use.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.last_used_at = now;
        self.use_count = self.use_count.saturating_add(1);
    }

    /// Principal carried by a session ticket.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        match &self.grant {
            TicketGrant::Session { principal, .. } => Some(principal),
            TicketGrant::Access { .. } => None,
        }
    }

    /// Service binding of an access ticket.
    #[must_use]
    pub const fn service(&self) -> Option<&ServiceBinding> {
        match &self.grant {
            TicketGrant::Access { service } => Some(service),
            TicketGrant::Session { .. } => None,
        }
    }

    /// Service holding a proxy-granting ticket.
    #[must_use]
    pub const fn proxied_by(&self) -> Option<&ServiceBinding> {
        match &self.grant {
            TicketGrant::Session { proxied_by, .. } => proxied_by.as_ref(),
            TicketGrant::Access { .. } => None,
        }
    }
}
