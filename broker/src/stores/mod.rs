//! Storage implementations.
//!
//! - **Ticket registry** (in-memory) - single-node arena behind one mutex
//! - **Ticket registry** (`Redis`) - shared across nodes, atomic via Lua and `GETDEL`
//! - **Service registry** (in-memory) - programmatic registration
//! - **Service registry** (JSON file) - survives restarts

pub mod service_json;
pub mod service_memory;
pub mod ticket_memory;
#[cfg(feature = "redis")]
pub mod ticket_redis;

// Re-exports
pub use service_json::JsonServiceRegistryDao;
pub use service_memory::InMemoryServiceRegistryDao;
pub use ticket_memory::InMemoryTicketRegistry;
#[cfg(feature = "redis")]
pub use ticket_redis::RedisTicketRegistry;
