//! Storage providers.
//!
//! This module defines the traits the broker is written against. The
//! broker never touches a concrete backend; the application picks one at
//! startup and injects it.
//!
//! ```text
//! ┌──────────────┐      ┌────────────────────┐      ┌─────────────────────┐
//! │ TicketBroker │─────▶│ TicketRegistry     │─────▶│ InMemory / Redis    │
//! │              │      └────────────────────┘      └─────────────────────┘
//! │              │      ┌────────────────────┐      ┌─────────────────────┐
//! │              │─────▶│ ServicesManager    │─────▶│ ServiceRegistryDao  │
//! └──────────────┘      │ (snapshot + match) │      │ InMemory / JSON     │
//!                       └────────────────────┘      └─────────────────────┘
//! ```
//!
//! This enables:
//! - **Testing**: in-memory backends, deterministic clocks
//! - **Production**: replicated backends with atomic server-side operations

pub mod service_registry;
pub mod ticket_registry;

// Re-export provider traits
pub use service_registry::ServiceRegistryDao;
pub use ticket_registry::TicketRegistry;
