//! Ticket cache
//!
//! GetFlightInfo mints a ticket for a table; DoGet redeems it. A ticket is
//! the 16 raw bytes of a random UUID and stays valid until its TTL elapses.
//! Redeeming does not consume it.
//!
//! Expiry is enforced on every [`TicketCache::redeem`]; the sweeper task only
//! reclaims memory.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use arrow_flight::Ticket;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::DEFAULT_TICKET_TTL;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct TicketEntry {
    table_name: String,
    deadline: Instant,
}

/// Concurrent ticket → table name map with per-entry expiry.
#[derive(Debug)]
pub struct TicketCache {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, TicketEntry>>,
}

impl Default for TicketCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TICKET_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a ticket for `table_name`, returning it with its wall-clock expiry.
    pub fn issue(&self, table_name: &str) -> (Ticket, SystemTime) {
        let id = Uuid::new_v4();
        let entry = TicketEntry {
            table_name: table_name.to_string(),
            deadline: Instant::now() + self.ttl,
        };
        self.entries.write().insert(id, entry);

        let ticket = Ticket::new(id.as_bytes().to_vec());
        (ticket, SystemTime::now() + self.ttl)
    }

    /// Look up the table a ticket was issued for.
    pub fn redeem(&self, ticket: &[u8]) -> Result<String> {
        let id = Uuid::from_slice(ticket)
            .map_err(|e| Error::InvalidTicket(format!("malformed ticket: {e}")))?;

        let entries = self.entries.read();
        match entries.get(&id) {
            Some(entry) if entry.deadline > Instant::now() => Ok(entry.table_name.clone()),
            Some(_) => Err(Error::InvalidTicket(format!("ticket {id} has expired"))),
            None => Err(Error::InvalidTicket(format!("ticket {id} is unknown"))),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.deadline > now);
        before - entries.len()
    }

    /// Run [`purge_expired`](Self::purge_expired) every `period` until the
    /// cache is dropped or the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired tickets purged");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_then_redeem() {
        let cache = TicketCache::new();
        for name in ["events", "users", ""] {
            let (ticket, _) = cache.issue(name);
            assert_eq!(ticket.ticket.len(), 16);
            assert_eq!(cache.redeem(&ticket.ticket).unwrap(), name);
        }
    }

    #[test]
    fn test_redeem_does_not_consume() {
        let cache = TicketCache::new();
        let (ticket, _) = cache.issue("events");
        assert_eq!(cache.redeem(&ticket.ticket).unwrap(), "events");
        assert_eq!(cache.redeem(&ticket.ticket).unwrap(), "events");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tickets_are_distinct() {
        let cache = TicketCache::new();
        let (a, _) = cache.issue("events");
        let (b, _) = cache.issue("events");
        assert_ne!(a.ticket, b.ticket);
    }

    #[test]
    fn test_unknown_ticket() {
        let cache = TicketCache::new();
        cache.issue("events");
        let stranger = Uuid::new_v4();
        assert!(matches!(
            cache.redeem(stranger.as_bytes()),
            Err(Error::InvalidTicket(_))
        ));
    }

    #[test]
    fn test_malformed_ticket() {
        let cache = TicketCache::new();
        assert!(matches!(cache.redeem(b"events"), Err(Error::InvalidTicket(_))));
        assert!(matches!(cache.redeem(&[]), Err(Error::InvalidTicket(_))));
    }

    #[test]
    fn test_expiry_reported_one_ttl_ahead() {
        let cache = TicketCache::with_ttl(Duration::from_secs(300));
        let before = SystemTime::now();
        let (_, expiry) = cache.issue("events");
        let ahead = expiry.duration_since(before).unwrap();
        assert!(ahead >= Duration::from_secs(300));
        assert!(ahead < Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redeem_after_ttl_fails() {
        let cache = TicketCache::new();
        let (ticket, _) = cache.issue("events");

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.redeem(&ticket.ticket).unwrap(), "events");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(cache.redeem(&ticket.ticket), Err(Error::InvalidTicket(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = TicketCache::with_ttl(Duration::from_secs(10));
        cache.issue("old");
        tokio::time::advance(Duration::from_secs(6)).await;
        let (fresh, _) = cache.issue("fresh");
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.redeem(&fresh.ticket).unwrap(), "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_entries() {
        let cache = Arc::new(TicketCache::with_ttl(Duration::from_secs(1)));
        let sweeper = cache.spawn_sweeper(Duration::from_millis(500));
        cache.issue("events");
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.is_empty());
        sweeper.abort();
    }
}
