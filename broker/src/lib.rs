//! # Ticket Broker
//!
//! Ticket lifecycle and service authorization engine for single sign-on.
//!
//! A user logs in once and receives a **ticket-granting ticket** (TGT). From
//! it, short-lived **service tickets** (ST) are minted for registered client
//! applications; an application validates its ST exactly once to learn who
//! the user is. Applications allowed to proxy receive **proxy-granting
//! tickets** (PGT) and mint **proxy tickets** (PT) for back-end services.
//!
//! ## Features
//!
//! - **Replay-proof**: single-use tickets are consumed atomically
//! - **Cascading logout**: destroying a TGT invalidates every descendant
//! - **Chained expiration**: a child is never live once its parent is gone
//! - **Ordered service matching**: exact, regex and wildcard patterns with
//!   deterministic precedence
//! - **Pluggable storage**: in-memory, `Redis` (feature `redis`), JSON file
//!
//! ## Architecture
//!
//! ```text
//! TicketBroker ──▶ BrokerEnvironment ──┬──▶ TicketRegistry   (tickets)
//!                                      ├──▶ ServicesManager  (services)
//!                                      └──▶ Clock
//! ```
//!
//! ## Example: login, access, validate
//!
//! ```no_run
//! use std::sync::Arc;
//! use ticket_broker::*;
//! use ticket_broker::services::{RegisteredService, ServicePattern, ServicesManager};
//! use ticket_broker::stores::{JsonServiceRegistryDao, InMemoryTicketRegistry};
//! use ticket_broker::ticket::Principal;
//! use ticket_broker_core::environment::system_clock;
//!
//! # async fn example() -> Result<()> {
//! let config = BrokerConfig::from_env()?;
//! let clock = system_clock();
//!
//! let services = ServicesManager::load(JsonServiceRegistryDao::new("services.json")).await?;
//! let tickets = Arc::new(InMemoryTicketRegistry::new(clock.clone()));
//! let env = BrokerEnvironment::new(tickets, Arc::new(services), clock);
//! let broker = TicketBroker::new(env, config)?;
//!
//! let tgt = broker.issue_ticket_granting_ticket(Principal::new("casuser")).await?;
//! let st = broker.issue_service_ticket(&tgt.id, "https://app.example.org/").await?;
//! let assertion = broker.validate_service_ticket(&st.id, "https://app.example.org/").await?;
//! assert_eq!(assertion.principal.id, "casuser");
//!
//! broker.destroy_session(&tgt.id).await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod broker;
pub mod cleaner;
pub mod config;
pub mod environment;
pub mod error;
pub mod expiration;
pub mod ids;
pub mod metrics;
pub mod providers;
pub mod services;
pub mod stores;
pub mod ticket;

// Re-export main types for convenience
pub use broker::{Assertion, ProxyGrant, TicketBroker};
pub use cleaner::RegistryCleaner;
pub use config::BrokerConfig;
pub use environment::BrokerEnvironment;
pub use error::{BrokerError, Result};
pub use expiration::ExpirationPolicy;
pub use providers::{ServiceRegistryDao, TicketRegistry};
pub use ticket::{Principal, Ticket, TicketId, TicketKind};
