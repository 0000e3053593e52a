//! In-memory ticket registry.
//!
//! All tickets live in one arena (`HashMap<TicketId, Ticket>`) behind a
//! single mutex. Every operation, including the parent-chain liveness walk
//! and the cascading delete, runs inside one critical section, which makes
//! each operation linearizable and single-use consumption race-free.

use crate::error::{BrokerError, Result};
use crate::providers::TicketRegistry;
use crate::ticket::{Ticket, TicketId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use ticket_broker_core::environment::Clock;

type Arena = HashMap<TicketId, Ticket>;

/// In-memory ticket registry.
///
/// Clones share the same arena.
#[derive(Clone)]
pub struct InMemoryTicketRegistry {
    tickets: Arc<Mutex<Arena>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTicketRegistry {
    /// Create an empty registry reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tickets: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Number of stored tickets, live or not yet swept.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn ticket_count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Arena>> {
        self.tickets
            .lock()
            .map_err(|_| BrokerError::Internal("Mutex lock failed".to_string()))
    }
}

impl fmt::Debug for InMemoryTicketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTicketRegistry")
            .field("tickets", &self.tickets.lock().map(|t| t.len()).ok())
            .finish_non_exhaustive()
    }
}

/// Liveness of `ticket`: own policy, then every ancestor.
fn is_live(arena: &Arena, ticket: &Ticket, now: DateTime<Utc>) -> bool {
    if ticket.is_expired_at(now) {
        return false;
    }

    let mut next = ticket.parent.as_ref();
    // A chain longer than the arena can only be a cycle.
    let mut remaining = arena.len();
    while let Some(parent_id) = next {
        let Some(parent) = arena.get(parent_id) else {
            return false;
        };
        if parent.is_expired_at(now) || remaining == 0 {
            return false;
        }
        remaining -= 1;
        next = parent.parent.as_ref();
    }

    true
}

/// Remove `id` and everything reachable through `children`.
fn remove_cascade(arena: &mut Arena, id: &TicketId) -> usize {
    let Some(root) = arena.remove(id) else {
        return 0;
    };

    if let Some(parent) = root.parent.as_ref().and_then(|p| arena.get_mut(p)) {
        parent.children.remove(id);
    }

    let mut removed = 1;
    let mut pending: Vec<TicketId> = root.children.into_iter().collect();
    while let Some(child_id) = pending.pop() {
        if let Some(child) = arena.remove(&child_id) {
            removed += 1;
            pending.extend(child.children);
        }
    }

    removed
}

impl TicketRegistry for InMemoryTicketRegistry {
    async fn add_ticket(&self, ticket: Ticket) -> Result<()> {
        let now = self.clock.now();
        let mut arena = self.lock()?;

        if arena.contains_key(&ticket.id) {
            return Err(BrokerError::DuplicateTicket(ticket.id.to_string()));
        }

        if let Some(parent_id) = &ticket.parent {
            let parent_live = arena.get(parent_id).map(|p| is_live(&arena, p, now));
            match parent_live {
                Some(true) => {
                    if let Some(parent) = arena.get_mut(parent_id) {
                        parent.children.insert(ticket.id.clone());
                    }
                }
                Some(false) => {
                    let removed = remove_cascade(&mut arena, parent_id);
                    tracing::debug!(
                        parent_id = %parent_id,
                        removed = removed,
                        "Parent expired while adding child ticket"
                    );
                    return Err(BrokerError::TicketExpired(parent_id.to_string()));
                }
                None => return Err(BrokerError::TicketExpired(parent_id.to_string())),
            }
        }

        tracing::debug!(
            ticket_id = %ticket.id,
            kind = %ticket.kind,
            parent = ?ticket.parent.as_ref().map(TicketId::as_str),
            "Added ticket"
        );
        arena.insert(ticket.id.clone(), ticket);
        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let now = self.clock.now();
        let mut arena = self.lock()?;

        let Some(ticket) = arena.get(id) else {
            tracing::trace!(ticket_id = %id, "Ticket not found");
            return Ok(None);
        };

        if !is_live(&arena, ticket, now) {
            let removed = remove_cascade(&mut arena, id);
            tracing::debug!(ticket_id = %id, removed = removed, "Removed expired ticket on access");
            return Ok(None);
        }

        let Some(ticket) = arena.get_mut(id) else {
            return Ok(None);
        };
        if ticket.kind.is_granting() {
            ticket.mark_used(now);
        }
        Ok(Some(ticket.clone()))
    }

    async fn delete_ticket(&self, id: &TicketId) -> Result<usize> {
        let removed = remove_cascade(&mut *self.lock()?, id);

        if removed > 0 {
            tracing::info!(ticket_id = %id, removed = removed, "Deleted ticket and descendants");
        } else {
            tracing::trace!(ticket_id = %id, "Ticket delete: not found");
        }
        Ok(removed)
    }

    async fn consume_single_use(&self, id: &TicketId) -> Result<Ticket> {
        let now = self.clock.now();
        let mut arena = self.lock()?;

        // Check-and-remove happens under one guard: of any number of
        // concurrent callers, exactly one finds the entry.
        let Some(ticket) = arena.get(id).cloned() else {
            return Err(BrokerError::TicketNotFound(id.to_string()));
        };
        let live = is_live(&arena, &ticket, now);
        remove_cascade(&mut arena, id);

        if live {
            tracing::debug!(ticket_id = %id, "Ticket consumed (single-use)");
            Ok(ticket)
        } else {
            tracing::debug!(ticket_id = %id, "Consumed ticket was expired");
            Err(BrokerError::TicketExpired(id.to_string()))
        }
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut arena = self.lock()?;

        let expired: Vec<TicketId> = arena
            .values()
            .filter(|t| !is_live(&arena, t, now))
            .map(|t| t.id.clone())
            .collect();

        let removed = expired
            .iter()
            .map(|id| remove_cascade(&mut arena, id))
            .sum();
        Ok(removed)
    }
}
