//! Broker environment.
//!
//! Bundles the process-wide registries and the clock. Built once at startup
//! and handed to [`TicketBroker`](crate::TicketBroker).

use crate::providers::{ServiceRegistryDao, TicketRegistry};
use crate::services::ServicesManager;
use std::sync::Arc;
use ticket_broker_core::environment::Clock;

/// External dependencies of the ticket broker.
///
/// # Type Parameters
///
/// - `R`: Ticket registry backend
/// - `D`: Service registry persistence backend
pub struct BrokerEnvironment<R, D>
where
    R: TicketRegistry,
    D: ServiceRegistryDao,
{
    /// Ticket registry (in-memory or `Redis`).
    pub tickets: Arc<R>,

    /// Registered services and matching.
    pub services: Arc<ServicesManager<D>>,

    /// Time source for issue timestamps and expiration checks.
    pub clock: Arc<dyn Clock>,
}

impl<R, D> BrokerEnvironment<R, D>
where
    R: TicketRegistry,
    D: ServiceRegistryDao,
{
    /// Create a new broker environment.
    ///
    /// The ticket registry should read time from the same `clock`.
    #[must_use]
    pub fn new(tickets: Arc<R>, services: Arc<ServicesManager<D>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tickets,
            services,
            clock,
        }
    }
}

impl<R, D> Clone for BrokerEnvironment<R, D>
where
    R: TicketRegistry,
    D: ServiceRegistryDao,
{
    fn clone(&self) -> Self {
        Self {
            tickets: Arc::clone(&self.tickets),
            services: Arc::clone(&self.services),
            clock: Arc::clone(&self.clock),
        }
    }
}
