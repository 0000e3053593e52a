//! `Redis`-based ticket registry.
//!
//! Lets several broker nodes share one ticket space.
//!
//! # Architecture
//!
//! - **Ticket key**: `sso:ticket:{id}` → JSON-serialized [`Ticket`] (with an
//!   empty `children` field)
//! - **Children key**: `sso:children:{id}` → set of child ticket ids
//! - **TTL**: the policy's hard lifetime, when it has one. This is only a
//!   memory bound; liveness is always re-evaluated on read.
//!
//! # Atomicity
//!
//! - **Add**: a Lua script checks for duplicates, checks the parent exists,
//!   links the child into the parent's set and stores the ticket in one step
//! - **Consume**: `GETDEL`, so of any number of concurrent consumers exactly
//!   one receives the ticket
//! - **Delete**: a Lua script walks the children sets and deletes the whole
//!   subtree in one step
//!
//! Usage updates on granting tickets are written with `SET ... XX KEEPTTL`,
//! so a concurrent delete is never undone by a late write.
//!
//! # Example
//!
//! ```no_run
//! use ticket_broker::stores::RedisTicketRegistry;
//! use ticket_broker_core::environment::system_clock;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RedisTicketRegistry::new("redis://127.0.0.1:6379", system_clock()).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BrokerError, Result};
use crate::providers::TicketRegistry;
use crate::ticket::{Ticket, TicketId};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use ticket_broker_core::environment::Clock;

const TICKET_PREFIX: &str = "sso:ticket:";
const CHILDREN_PREFIX: &str = "sso:children:";

/// Longest parent chain followed before giving up (TGT → PGT → PGT → ...).
const MAX_CHAIN_DEPTH: usize = 64;

/// Keys scanned per `SCAN` round trip during a sweep.
const SCAN_BATCH: usize = 250;

// KEYS[1] ticket, KEYS[2] parent ticket, KEYS[3] parent children set (optional)
// ARGV[1] ticket json, ARGV[2] ttl in ms (0 = none), ARGV[3] ticket id
// Returns 1 stored, 0 duplicate id, -1 parent missing.
const ADD_SCRIPT: &str = r"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end

    if #KEYS == 3 then
        if redis.call('EXISTS', KEYS[2]) == 0 then
            return -1
        end
        redis.call('SADD', KEYS[3], ARGV[3])
        local parent_ttl = redis.call('PTTL', KEYS[2])
        if parent_ttl > 0 then
            redis.call('PEXPIRE', KEYS[3], parent_ttl)
        end
    end

    local ttl = tonumber(ARGV[2])
    if ttl > 0 then
        redis.call('SET', KEYS[1], ARGV[1], 'PX', ttl)
    else
        redis.call('SET', KEYS[1], ARGV[1])
    end
    return 1
";

// ARGV[1] root id, ARGV[2] ticket key prefix, ARGV[3] children key prefix
// Returns the number of ticket keys deleted.
const CASCADE_DELETE_SCRIPT: &str = r"
    local tickets = ARGV[2]
    local children = ARGV[3]
    local root = ARGV[1]

    local raw = redis.call('GET', tickets .. root)
    if raw then
        local ok, decoded = pcall(cjson.decode, raw)
        if ok and type(decoded['parent']) == 'string' then
            redis.call('SREM', children .. decoded['parent'], root)
        end
    end

    local removed = 0
    local pending = { root }
    while #pending > 0 do
        local id = table.remove(pending)
        removed = removed + redis.call('DEL', tickets .. id)
        for _, child in ipairs(redis.call('SMEMBERS', children .. id)) do
            table.insert(pending, child)
        end
        redis.call('DEL', children .. id)
    end
    return removed
";

/// `Redis`-backed ticket registry.
///
/// This type is `Clone`; clones share the same `ConnectionManager`.
#[derive(Clone)]
pub struct RedisTicketRegistry {
    conn_manager: ConnectionManager,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisTicketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTicketRegistry").finish_non_exhaustive()
    }
}

fn storage_error(context: &str, e: &redis::RedisError) -> BrokerError {
    BrokerError::Storage(format!("{context}: {e}"))
}

impl RedisTicketRegistry {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is malformed or the connection fails.
    pub async fn new(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| storage_error("Failed to create Redis client", &e))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| storage_error("Failed to create Redis connection manager", &e))?;

        tracing::info!("RedisTicketRegistry initialized successfully");

        Ok(Self {
            conn_manager,
            clock,
        })
    }

    fn ticket_key(id: &TicketId) -> String {
        format!("{TICKET_PREFIX}{id}")
    }

    fn children_key(id: &TicketId) -> String {
        format!("{CHILDREN_PREFIX}{id}")
    }

    /// Stored form: the children live in their own set.
    fn encode(ticket: &Ticket) -> Result<Vec<u8>> {
        if ticket.children.is_empty() {
            return Ok(serde_json::to_vec(ticket)?);
        }
        let mut stored = ticket.clone();
        stored.children = BTreeSet::new();
        Ok(serde_json::to_vec(&stored)?)
    }

    async fn fetch(conn: &mut ConnectionManager, id: &TicketId) -> Result<Option<Ticket>> {
        let bytes: Option<Vec<u8>> = conn
            .get(Self::ticket_key(id))
            .await
            .map_err(|e| storage_error("Failed to read ticket", &e))?;

        bytes
            .map(|b| serde_json::from_slice(&b).map_err(BrokerError::from))
            .transpose()
    }

    async fn children_of(
        conn: &mut ConnectionManager,
        id: &TicketId,
    ) -> Result<BTreeSet<TicketId>> {
        let members: Vec<String> = conn
            .smembers(Self::children_key(id))
            .await
            .map_err(|e| storage_error("Failed to read ticket children", &e))?;
        Ok(members.into_iter().map(TicketId::new).collect())
    }

    /// Own policy, then every ancestor.
    async fn is_live(
        conn: &mut ConnectionManager,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if ticket.is_expired_at(now) {
            return Ok(false);
        }

        let mut next = ticket.parent.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            let Some(parent_id) = next else {
                return Ok(true);
            };
            let Some(parent) = Self::fetch(conn, &parent_id).await? else {
                return Ok(false);
            };
            if parent.is_expired_at(now) {
                return Ok(false);
            }
            next = parent.parent;
        }

        tracing::warn!(ticket_id = %ticket.id, "Ticket chain exceeds maximum depth");
        Ok(false)
    }

    async fn cascade_delete(conn: &mut ConnectionManager, id: &TicketId) -> Result<usize> {
        let removed: usize = redis::Script::new(CASCADE_DELETE_SCRIPT)
            .arg(id.as_str())
            .arg(TICKET_PREFIX)
            .arg(CHILDREN_PREFIX)
            .invoke_async(conn)
            .await
            .map_err(|e| storage_error("Failed to execute cascading delete", &e))?;
        Ok(removed)
    }
}

impl TicketRegistry for RedisTicketRegistry {
    async fn add_ticket(&self, ticket: Ticket) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let now = self.clock.now();

        if let Some(parent_id) = &ticket.parent {
            let parent_live = match Self::fetch(&mut conn, parent_id).await? {
                Some(parent) => Self::is_live(&mut conn, &parent, now).await?,
                None => false,
            };
            if !parent_live {
                Self::cascade_delete(&mut conn, parent_id).await?;
                return Err(BrokerError::TicketExpired(parent_id.to_string()));
            }
        }

        let ttl_ms = ticket
            .expiration_policy
            .max_lifetime()
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1));

        let script = redis::Script::new(ADD_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(Self::ticket_key(&ticket.id))
            .arg(Self::encode(&ticket)?)
            .arg(ttl_ms)
            .arg(ticket.id.as_str());
        if let Some(parent_id) = &ticket.parent {
            invocation
                .key(Self::ticket_key(parent_id))
                .key(Self::children_key(parent_id));
        }

        let outcome: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| storage_error("Failed to store ticket", &e))?;

        match outcome {
            1 => {
                tracing::debug!(
                    ticket_id = %ticket.id,
                    kind = %ticket.kind,
                    ttl_ms = ttl_ms,
                    "Stored ticket in Redis"
                );
                Ok(())
            }
            0 => Err(BrokerError::DuplicateTicket(ticket.id.to_string())),
            _ => {
                // Parent vanished between the liveness check and the script.
                let parent = ticket.parent.as_ref().map(ToString::to_string).unwrap_or_default();
                Err(BrokerError::TicketExpired(parent))
            }
        }
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut conn = self.conn_manager.clone();
        let now = self.clock.now();

        let Some(mut ticket) = Self::fetch(&mut conn, id).await? else {
            return Ok(None);
        };

        if !Self::is_live(&mut conn, &ticket, now).await? {
            let removed = Self::cascade_delete(&mut conn, id).await?;
            tracing::debug!(ticket_id = %id, removed = removed, "Removed expired ticket on access");
            return Ok(None);
        }

        if ticket.kind.is_granting() {
            ticket.mark_used(now);
            let updated: Option<String> = redis::cmd("SET")
                .arg(Self::ticket_key(id))
                .arg(Self::encode(&ticket)?)
                .arg("XX")
                .arg("KEEPTTL")
                .query_async(&mut conn)
                .await
                .map_err(|e| storage_error("Failed to record ticket use", &e))?;
            if updated.is_none() {
                // Deleted concurrently.
                return Ok(None);
            }
        }

        ticket.children = Self::children_of(&mut conn, id).await?;
        Ok(Some(ticket))
    }

    async fn delete_ticket(&self, id: &TicketId) -> Result<usize> {
        let mut conn = self.conn_manager.clone();
        let removed = Self::cascade_delete(&mut conn, id).await?;

        if removed > 0 {
            tracing::info!(ticket_id = %id, removed = removed, "Deleted ticket and descendants from Redis");
        }
        Ok(removed)
    }

    async fn consume_single_use(&self, id: &TicketId) -> Result<Ticket> {
        let mut conn = self.conn_manager.clone();
        let now = self.clock.now();

        // GETDEL claims the ticket: only one caller can observe the value.
        let bytes: Option<Vec<u8>> = conn
            .get_del(Self::ticket_key(id))
            .await
            .map_err(|e| storage_error("Failed to consume ticket", &e))?;
        let Some(bytes) = bytes else {
            return Err(BrokerError::TicketNotFound(id.to_string()));
        };
        let ticket: Ticket = serde_json::from_slice(&bytes)?;

        if let Some(parent_id) = &ticket.parent {
            let _: () = conn
                .srem(Self::children_key(parent_id), id.as_str())
                .await
                .map_err(|e| storage_error("Failed to unlink consumed ticket", &e))?;
        }
        Self::cascade_delete(&mut conn, id).await?;

        if Self::is_live(&mut conn, &ticket, now).await? {
            tracing::debug!(ticket_id = %id, "Ticket consumed (single-use)");
            Ok(ticket)
        } else {
            tracing::debug!(ticket_id = %id, "Consumed ticket was expired");
            Err(BrokerError::TicketExpired(id.to_string()))
        }
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let mut conn = self.conn_manager.clone();
        let now = self.clock.now();
        let pattern = format!("{TICKET_PREFIX}*");

        let mut ids = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| storage_error("Failed to scan tickets", &e))?;

            ids.extend(
                keys.iter()
                    .filter_map(|k| k.strip_prefix(TICKET_PREFIX))
                    .map(TicketId::new),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut removed = 0;
        for id in ids {
            let Some(ticket) = Self::fetch(&mut conn, &id).await? else {
                continue;
            };
            if !Self::is_live(&mut conn, &ticket, now).await? {
                removed += Self::cascade_delete(&mut conn, &id).await?;
            }
        }
        Ok(removed)
    }
}
