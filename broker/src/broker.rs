//! Ticket factory and protocol orchestration.
//!
//! [`TicketBroker`] is the only component that mints tickets. It combines
//! the ticket registry (session state) with the services manager
//! (authorization) to implement the login / service access / validation /
//! proxy / logout flows.
//!
//! # Flows
//!
//! ```text
//! login      principal ──▶ TGT
//! access     TGT + url ──▶ ST          (url must match a registered service)
//! validate   ST  + url ──▶ Assertion   (ST consumed, url must equal binding)
//! proxy      ST  + url ──▶ PGT         (service must be allowed to proxy)
//!            PGT + url ──▶ PT ──▶ validate like an ST
//! logout     TGT       ──▶ cascade delete of every descendant
//! ```

use crate::config::BrokerConfig;
use crate::environment::BrokerEnvironment;
use crate::error::{BrokerError, Result};
use crate::ids::TicketIdGenerator;
use crate::metrics::{outcome_label, SESSIONS_DESTROYED, TICKETS_ISSUED, TICKETS_VALIDATED};
use crate::providers::{ServiceRegistryDao, TicketRegistry};
use crate::services::RegisteredService;
use crate::ticket::{Principal, ServiceBinding, Ticket, TicketId, TicketKind};
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use ticket_broker_core::environment::Clock;

/// What a service learns from a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Authenticated principal, filtered by the service's attribute release policy.
    pub principal: Principal,

    /// Registered service the ticket was issued for.
    pub service: RegisteredService,

    /// URLs of the services the request was proxied through, nearest first.
    /// Empty for a service ticket obtained directly from a login session.
    pub proxy_chain: Vec<String>,
}

/// Result of a validation that also granted proxying rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGrant {
    /// Assertion for the ticket that was validated.
    pub assertion: Assertion,

    /// Newly minted proxy-granting ticket held by the validating service.
    pub proxy_granting_ticket: Ticket,
}

/// A validated access ticket and the granting ticket it descends from.
struct Validated {
    assertion: Assertion,
    granting: Ticket,
}

/// Issues, validates and destroys tickets.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ticket_broker::{BrokerConfig, BrokerEnvironment, TicketBroker};
/// use ticket_broker::services::{RegisteredService, ServicePattern, ServicesManager};
/// use ticket_broker::stores::{InMemoryServiceRegistryDao, InMemoryTicketRegistry};
/// use ticket_broker::ticket::Principal;
/// use ticket_broker_core::environment::system_clock;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let clock = system_clock();
/// let services = Arc::new(ServicesManager::new(InMemoryServiceRegistryDao::new()));
/// services
///     .save(RegisteredService::new("app", ServicePattern::regex("^https://app\\.example\\.org/")?))
///     .await?;
///
/// let env = BrokerEnvironment::new(
///     Arc::new(InMemoryTicketRegistry::new(clock.clone())),
///     services,
///     clock,
/// );
/// let broker = TicketBroker::new(env, BrokerConfig::default())?;
///
/// let tgt = broker.issue_ticket_granting_ticket(Principal::new("casuser")).await?;
/// let st = broker
///     .issue_service_ticket(&tgt.id, "https://app.example.org/login")
///     .await?;
/// let assertion = broker
///     .validate_service_ticket(&st.id, "https://app.example.org/login")
///     .await?;
/// assert_eq!(assertion.principal.id, "casuser");
/// # Ok(())
/// # }
/// ```
pub struct TicketBroker<R, D>
where
    R: TicketRegistry,
    D: ServiceRegistryDao,
{
    env: BrokerEnvironment<R, D>,
    config: BrokerConfig,
    ids: TicketIdGenerator,
}

/// Check an id's prefix against the kinds an operation accepts.
///
/// An id without a known prefix cannot have been issued, so it is reported
/// as not found.
fn require_kind(id: &TicketId, accepted: &[TicketKind]) -> Result<TicketKind> {
    match id.kind() {
        Some(kind) if accepted.contains(&kind) => Ok(kind),
        Some(actual) => Err(BrokerError::InvalidTicketKind {
            id: id.to_string(),
            expected: accepted.first().copied().unwrap_or(actual),
            actual,
        }),
        None => Err(BrokerError::TicketNotFound(id.to_string())),
    }
}

impl<R, D> TicketBroker<R, D>
where
    R: TicketRegistry,
    D: ServiceRegistryDao,
{
    /// Create a broker.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::InvalidConfiguration` if `config` fails validation.
    pub fn new(env: BrokerEnvironment<R, D>, config: BrokerConfig) -> Result<Self> {
        let ids = TicketIdGenerator::new(&config)?;

        tracing::info!(
            st_reusable = config.st_reusable,
            services = env.services.len(),
            "Ticket broker initialized"
        );

        Ok(Self { env, config, ids })
    }

    /// Injected dependencies.
    #[must_use]
    pub const fn environment(&self) -> &BrokerEnvironment<R, D> {
        &self.env
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════
    // Issuance
    // ═══════════════════════════════════════════════════════════════════

    /// Start a single-sign-on session for an authenticated principal.
    ///
    /// # Errors
    ///
    /// Returns error if the ticket registry rejects the ticket.
    pub async fn issue_ticket_granting_ticket(&self, principal: Principal) -> Result<Ticket> {
        let ticket = Ticket::ticket_granting(
            self.ids.next_id(TicketKind::TicketGranting),
            principal,
            self.config.tgt_policy(),
            self.env.clock.now(),
        );
        self.store(ticket).await
    }

    /// Issue a service ticket for `service_url` from a live login session.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `tgt_id` is not a ticket-granting ticket id → `InvalidTicketKind`
    /// - The session is absent or expired → `TicketExpired`
    /// - No enabled service matches `service_url` → `UnauthorizedService`
    /// - Storage operation fails
    pub async fn issue_service_ticket(&self, tgt_id: &TicketId, service_url: &str) -> Result<Ticket> {
        self.issue_access_ticket(tgt_id, TicketKind::TicketGranting, service_url)
            .await
    }

    /// Issue a proxy ticket for `target_service_url` from a proxy-granting ticket.
    ///
    /// # Errors
    ///
    /// Same as [`issue_service_ticket`](Self::issue_service_ticket), with a
    /// proxy-granting ticket in place of the login session.
    pub async fn issue_proxy_ticket(
        &self,
        pgt_id: &TicketId,
        target_service_url: &str,
    ) -> Result<Ticket> {
        self.issue_access_ticket(pgt_id, TicketKind::ProxyGranting, target_service_url)
            .await
    }

    /// Validate a service or proxy ticket and delegate proxying rights to
    /// the validating service.
    ///
    /// The presented ticket is validated exactly as by
    /// [`validate_proxy_ticket`](Self::validate_proxy_ticket) (and so
    /// consumed). The new proxy-granting ticket hangs off the same granting
    /// ticket, so it dies with the session.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Validation fails (see [`validate_proxy_ticket`](Self::validate_proxy_ticket))
    /// - The service is not allowed to proxy → `UnauthorizedProxy`
    /// - Storage operation fails
    pub async fn issue_proxy_granting_ticket(
        &self,
        ticket_id: &TicketId,
        service_url: &str,
    ) -> Result<ProxyGrant> {
        let Validated {
            assertion,
            granting,
        } = self
            .validate_recorded(ticket_id, service_url, &[TicketKind::Service, TicketKind::Proxy])
            .await?;

        if !assertion.service.allowed_to_proxy {
            tracing::warn!(
                service = service_url,
                service_id = assertion.service.id,
                "Proxy-granting ticket requested by service not allowed to proxy"
            );
            return Err(BrokerError::UnauthorizedProxy(service_url.to_string()));
        }

        let principal = granting.principal().cloned().ok_or_else(|| {
            BrokerError::Internal(format!("Granting ticket {} carries no principal", granting.id))
        })?;

        let ticket = Ticket::proxy_granting(
            self.ids.next_id(TicketKind::ProxyGranting),
            granting.id,
            principal,
            ServiceBinding {
                registered_service_id: assertion.service.id,
                url: service_url.to_string(),
            },
            self.config.pgt_policy(),
            self.env.clock.now(),
        );
        let proxy_granting_ticket = self.store(ticket).await?;

        Ok(ProxyGrant {
            assertion,
            proxy_granting_ticket,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════════════

    /// Validate a service ticket presented by `service_url`.
    ///
    /// The ticket is consumed (unless service tickets are configured
    /// reusable), whether or not the remaining checks pass.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `st_id` is not a service ticket id → `InvalidTicketKind`
    /// - The ticket is absent or already consumed → `TicketNotFound`
    /// - The ticket or its session expired → `TicketExpired`
    /// - `service_url` differs from the URL the ticket was issued for →
    ///   `ServiceBindingMismatch`
    /// - The service was disabled or removed since issuance → `UnauthorizedService`
    /// - Storage operation fails
    pub async fn validate_service_ticket(&self, st_id: &TicketId, service_url: &str) -> Result<Assertion> {
        self.validate_recorded(st_id, service_url, &[TicketKind::Service])
            .await
            .map(|v| v.assertion)
    }

    /// Validate a proxy ticket (or a service ticket) presented by `service_url`.
    ///
    /// # Errors
    ///
    /// Same as [`validate_service_ticket`](Self::validate_service_ticket).
    pub async fn validate_proxy_ticket(&self, ticket_id: &TicketId, service_url: &str) -> Result<Assertion> {
        self.validate_recorded(ticket_id, service_url, &[TicketKind::Proxy, TicketKind::Service])
            .await
            .map(|v| v.assertion)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Logout
    // ═══════════════════════════════════════════════════════════════════

    /// End a login session, invalidating every ticket spawned from it.
    ///
    /// # Returns
    ///
    /// Number of tickets removed; `0` if the session was already gone.
    ///
    /// # Errors
    ///
    /// Returns error if `tgt_id` is not a ticket-granting ticket id or the
    /// storage operation fails.
    pub async fn destroy_session(&self, tgt_id: &TicketId) -> Result<usize> {
        require_kind(tgt_id, &[TicketKind::TicketGranting])?;

        let removed = self.env.tickets.delete_ticket(tgt_id).await?;
        if removed > 0 {
            metrics::counter!(SESSIONS_DESTROYED).increment(1);
            tracing::info!(ticket_id = %tgt_id, removed = removed, "Session destroyed");
        } else {
            tracing::debug!(ticket_id = %tgt_id, "Logout for unknown session");
        }
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    async fn store(&self, ticket: Ticket) -> Result<Ticket> {
        self.env.tickets.add_ticket(ticket.clone()).await?;

        metrics::counter!(TICKETS_ISSUED, "kind" => ticket.kind.prefix()).increment(1);
        tracing::info!(
            ticket_id = %ticket.id,
            kind = %ticket.kind,
            parent = ?ticket.parent.as_ref().map(TicketId::as_str),
            "Issued ticket"
        );
        Ok(ticket)
    }

    async fn issue_access_ticket(
        &self,
        granting_id: &TicketId,
        granting_kind: TicketKind,
        service_url: &str,
    ) -> Result<Ticket> {
        require_kind(granting_id, &[granting_kind])?;

        let Some(granting) = self.env.tickets.get_ticket(granting_id).await? else {
            tracing::debug!(ticket_id = %granting_id, "Granting ticket absent or expired");
            return Err(BrokerError::TicketExpired(granting_id.to_string()));
        };

        let Some(service) = self.env.services.matches(service_url) else {
            tracing::warn!(service = service_url, "Ticket requested for unregistered service");
            return Err(BrokerError::UnauthorizedService(service_url.to_string()));
        };

        let kind = granting_kind.granted_kind().ok_or_else(|| {
            BrokerError::Internal(format!("{granting_kind} tickets cannot grant access"))
        })?;
        let policy = match kind {
            TicketKind::Proxy => self.config.pt_policy(),
            TicketKind::Service => self.config.st_policy(),
            TicketKind::TicketGranting | TicketKind::ProxyGranting => {
                return Err(BrokerError::Internal(format!(
                    "{kind} is not an access ticket kind"
                )));
            }
        };

        let ticket = Ticket::access(
            self.ids.next_id(kind),
            kind,
            granting.id,
            ServiceBinding {
                registered_service_id: service.id,
                url: service_url.to_string(),
            },
            policy,
            self.env.clock.now(),
        );
        self.store(ticket).await
    }

    /// [`validate`](Self::validate) plus metrics and logging.
    async fn validate_recorded(
        &self,
        ticket_id: &TicketId,
        service_url: &str,
        accepted: &[TicketKind],
    ) -> Result<Validated> {
        let result = self.validate(ticket_id, service_url, accepted).await;

        let kind = ticket_id.kind().map_or("unknown", TicketKind::prefix);
        metrics::counter!(TICKETS_VALIDATED, "kind" => kind, "outcome" => outcome_label(&result))
            .increment(1);

        match &result {
            Ok(validated) => tracing::info!(
                ticket_id = %ticket_id,
                service = service_url,
                principal = %validated.assertion.principal.id,
                proxies = validated.assertion.proxy_chain.len(),
                "Ticket validated"
            ),
            Err(e) if e.is_infrastructure_failure() => {
                tracing::error!(ticket_id = %ticket_id, error = %e, "Ticket validation failed");
            }
            Err(e) => {
                tracing::warn!(ticket_id = %ticket_id, service = service_url, error = %e, "Ticket rejected");
            }
        }

        result
    }

    async fn validate(
        &self,
        ticket_id: &TicketId,
        service_url: &str,
        accepted: &[TicketKind],
    ) -> Result<Validated> {
        let kind = require_kind(ticket_id, accepted)?;

        let ticket = if kind == TicketKind::Service && self.config.st_reusable {
            self.env
                .tickets
                .get_ticket(ticket_id)
                .await?
                .ok_or_else(|| BrokerError::TicketNotFound(ticket_id.to_string()))?
        } else {
            self.env.tickets.consume_single_use(ticket_id).await?
        };

        let binding = ticket.service().ok_or_else(|| {
            BrokerError::Internal(format!("Access ticket {ticket_id} has no service binding"))
        })?;

        if !constant_time_eq(binding.url.as_bytes(), service_url.as_bytes()) {
            return Err(BrokerError::ServiceBindingMismatch {
                expected: binding.url.clone(),
                presented: service_url.to_string(),
            });
        }

        let service = self
            .env
            .services
            .find_service_by(binding.registered_service_id)
            .filter(|s| s.enabled)
            .ok_or_else(|| BrokerError::UnauthorizedService(service_url.to_string()))?;

        let (granting, proxy_chain) = self.resolve_session(&ticket).await?;
        let principal = granting.principal().ok_or_else(|| {
            BrokerError::Internal(format!("Granting ticket {} carries no principal", granting.id))
        })?;

        Ok(Validated {
            assertion: Assertion {
                principal: service.attribute_release.apply(principal),
                service,
                proxy_chain,
            },
            granting,
        })
    }

    /// Granting parent of an access ticket, and the proxy chain above it.
    async fn resolve_session(&self, ticket: &Ticket) -> Result<(Ticket, Vec<String>)> {
        let parent_id = ticket.parent.as_ref().ok_or_else(|| {
            BrokerError::Internal(format!("Access ticket {} has no parent", ticket.id))
        })?;
        let granting = self.live_ticket(parent_id).await?;

        let mut proxy_chain = Vec::new();
        let mut current = granting.clone();
        loop {
            if let Some(proxied_by) = current.proxied_by() {
                proxy_chain.push(proxied_by.url.clone());
            }
            let Some(next) = current.parent.clone() else {
                break;
            };
            current = self.live_ticket(&next).await?;
        }

        Ok((granting, proxy_chain))
    }

    async fn live_ticket(&self, id: &TicketId) -> Result<Ticket> {
        self.env
            .tickets
            .get_ticket(id)
            .await?
            .ok_or_else(|| BrokerError::TicketExpired(id.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::{ServicePattern, ServicesManager};
    use crate::stores::{InMemoryServiceRegistryDao, InMemoryTicketRegistry};
    use std::sync::Arc;
    use ticket_broker_testing::ManualClock;

    type TestBroker = TicketBroker<InMemoryTicketRegistry, InMemoryServiceRegistryDao>;

    async fn broker(config: BrokerConfig) -> (TestBroker, ManualClock) {
        let clock = ManualClock::default();
        let services = Arc::new(ServicesManager::new(InMemoryServiceRegistryDao::new()));
        services
            .save(RegisteredService::new("app", ServicePattern::exact("https://app")).with_proxy(true))
            .await
            .unwrap();
        let env = BrokerEnvironment::new(
            Arc::new(InMemoryTicketRegistry::new(Arc::new(clock.clone()))),
            services,
            Arc::new(clock.clone()),
        );
        (TicketBroker::new(env, config).unwrap(), clock)
    }

    #[test]
    fn test_require_kind() {
        let st = TicketId::new("ST-1-abc");
        assert_eq!(require_kind(&st, &[TicketKind::Service]).unwrap(), TicketKind::Service);
        assert_eq!(
            require_kind(&st, &[TicketKind::TicketGranting]).unwrap_err(),
            BrokerError::InvalidTicketKind {
                id: "ST-1-abc".to_string(),
                expected: TicketKind::TicketGranting,
                actual: TicketKind::Service,
            }
        );
        assert!(matches!(
            require_kind(&TicketId::new("bogus"), &[TicketKind::Service]),
            Err(BrokerError::TicketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let clock = ManualClock::default();
        let env = BrokerEnvironment::new(
            Arc::new(InMemoryTicketRegistry::new(Arc::new(clock.clone()))),
            Arc::new(ServicesManager::new(InMemoryServiceRegistryDao::new())),
            Arc::new(clock),
        );
        let config = BrokerConfig::default().with_ticket_id_entropy(0, "abc");

        assert!(matches!(
            TicketBroker::new(env, config),
            Err(BrokerError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_tgt_is_not_a_service_ticket() {
        let (broker, _clock) = broker(BrokerConfig::default()).await;
        let tgt = broker
            .issue_ticket_granting_ticket(Principal::new("casuser"))
            .await
            .unwrap();

        let err = broker.validate_service_ticket(&tgt.id, "https://app").await.unwrap_err();
        assert!(err.is_security_issue());

        // The session is untouched by the rejected validation.
        assert!(broker.issue_service_ticket(&tgt.id, "https://app").await.is_ok());
    }

    #[tokio::test]
    async fn test_reusable_service_ticket_validates_until_expiry() {
        let config = BrokerConfig::default().with_st_reusable(true);
        let (broker, clock) = broker(config).await;
        let tgt = broker
            .issue_ticket_granting_ticket(Principal::new("casuser"))
            .await
            .unwrap();
        let st = broker.issue_service_ticket(&tgt.id, "https://app").await.unwrap();

        broker.validate_service_ticket(&st.id, "https://app").await.unwrap();
        broker.validate_service_ticket(&st.id, "https://app").await.unwrap();

        clock.advance(std::time::Duration::from_secs(11));
        assert!(broker
            .validate_service_ticket(&st.id, "https://app")
            .await
            .unwrap_err()
            .is_ticket_unusable());
    }

    #[tokio::test]
    async fn test_access_ticket_kind_and_policy_follow_granting_kind() {
        let config = BrokerConfig::default()
            .with_st_time_to_live(std::time::Duration::from_secs(10))
            .with_pt_time_to_live(std::time::Duration::from_secs(30));
        let (broker, _clock) = broker(config.clone()).await;
        let tgt = broker
            .issue_ticket_granting_ticket(Principal::new("casuser"))
            .await
            .unwrap();

        let st = broker.issue_service_ticket(&tgt.id, "https://app").await.unwrap();
        assert_eq!(st.kind, TicketKind::Service);
        assert_eq!(st.expiration_policy, config.st_policy());

        let grant = broker
            .issue_proxy_granting_ticket(&st.id, "https://app")
            .await
            .unwrap();
        let pt = broker
            .issue_proxy_ticket(&grant.proxy_granting_ticket.id, "https://app")
            .await
            .unwrap();
        assert_eq!(pt.kind, TicketKind::Proxy);
        assert_eq!(pt.expiration_policy, config.pt_policy());
        assert_eq!(pt.parent.as_ref(), Some(&grant.proxy_granting_ticket.id));
    }
}
