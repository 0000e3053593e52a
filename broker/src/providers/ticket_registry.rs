//! Ticket registry trait.
//!
//! This module defines the store of live tickets, with cascading
//! invalidation and atomic single-use consumption.

use crate::error::Result;
use crate::ticket::{Ticket, TicketId};

/// Concurrent store of live tickets.
///
/// # Liveness
///
/// A stored ticket is live only if its own expiration policy holds AND
/// every ancestor on its `parent` chain is present and live. Both the
/// lazy check in `get_ticket` and the eager `sweep_expired` use this one
/// definition.
///
/// # Security Requirements
///
/// 1. **Atomicity**: `consume_single_use()` must atomically check and delete.
///    Of any number of concurrent calls for one id, exactly one succeeds.
/// 2. **Cascade**: `delete_ticket()` removes every ticket reachable through
///    `children`, transitively.
/// 3. **No orphans**: a child must never be reported live once its parent is
///    gone, even if the cascade has not reached it yet.
///
/// # Implementation Notes
///
/// - In-memory: one mutex over the whole arena
/// - `Redis`: Lua scripts / `GETDEL` so every check-and-mutate is one
///   server-side step
pub trait TicketRegistry: Send + Sync {
    /// Store a newly created ticket.
    ///
    /// If the ticket has a parent, it is linked into the parent's
    /// `children` in the same atomic step.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The id collides with a stored ticket → `BrokerError::DuplicateTicket`
    /// - The parent is absent or expired → `BrokerError::TicketExpired`
    /// - Storage operation fails
    fn add_ticket(&self, ticket: Ticket) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Fetch a live ticket.
    ///
    /// Granting tickets (TGT, PGT) have their use recorded: `last_used_at`
    /// is refreshed and `use_count` incremented, sliding the idle window.
    ///
    /// # Returns
    ///
    /// `None` if absent or expired. An expired ticket found here is
    /// deleted (with its descendants) before returning.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn get_ticket(
        &self,
        id: &TicketId,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>>> + Send;

    /// Delete a ticket and, recursively, every ticket spawned from it.
    ///
    /// # Returns
    ///
    /// Number of tickets removed; `0` if the id was unknown.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn delete_ticket(
        &self,
        id: &TicketId,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;

    /// Atomically fetch and invalidate a single-use ticket.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Nothing is stored under `id` → `BrokerError::TicketNotFound`
    /// - The ticket was stored but not live → `BrokerError::TicketExpired`
    ///   (it is deleted either way)
    /// - Storage operation fails
    fn consume_single_use(
        &self,
        id: &TicketId,
    ) -> impl std::future::Future<Output = Result<Ticket>> + Send;

    /// Delete every ticket that is no longer live.
    ///
    /// # Returns
    ///
    /// Number of tickets removed, descendants included.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn sweep_expired(&self) -> impl std::future::Future<Output = Result<usize>> + Send;
}
