//! The ticket store and its expiry sweep.

use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tpcore_types::{Protocol, SessionId, SessionTicket};
use tracing::{debug, info, warn};

/// Lower bound for the sweep period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

type TicketMap = HashMap<SessionId, SessionTicket>;

/// Tunables for ticket lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How long an unclaimed ticket stays valid after issuance.
    pub ticket_ttl: Duration,
    /// Period of the background expiry sweep.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ticket_ttl: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Thread-safe mapping from ticket id to [`SessionTicket`].
///
/// All access goes through one coarse lock. No operation performs I/O while
/// holding it.
pub struct SessionRegistry {
    tickets: Arc<Mutex<TicketMap>>,
    config: RegistryConfig,
    sweeper: Mutex<Option<Sweeper>>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            tickets: Arc::new(Mutex::new(HashMap::new())),
            config,
            sweeper: Mutex::new(None),
        }
    }

    // ================================================================
    // Lifecycle
    // ================================================================

    /// Starts the background expiry sweep on the current tokio runtime.
    pub fn start(&self) -> RegistryResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RegistryError::NoRuntime(e.to_string()))?;

        let mut slot = lock(&self.sweeper);
        if slot.is_some() {
            return Err(RegistryError::AlreadyStarted);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let tickets = Arc::clone(&self.tickets);
        let ttl = self.config.ticket_ttl;
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = sweep(&tickets, ttl, Utc::now());
                        if removed > 0 {
                            debug!(removed, "Swept expired session tickets");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *slot = Some(Sweeper { shutdown, handle });
        info!(
            ttl_secs = ttl.as_secs(),
            sweep_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Session registry started"
        );
        Ok(())
    }

    /// Stops the expiry sweep and waits for it to exit. No-op when not running.
    pub async fn stop(&self) {
        let sweeper = lock(&self.sweeper).take();
        let Some(sweeper) = sweeper else {
            return;
        };

        let _ = sweeper.shutdown.send(true);
        if let Err(e) = sweeper.handle.await {
            warn!("Session registry sweep task ended abnormally: {}", e);
        }
        info!(remaining = self.len(), "Session registry stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.sweeper).is_some()
    }

    // ================================================================
    // Ticket operations
    // ================================================================

    /// Adds a freshly issued ticket. Ids must be unique among live tickets.
    pub fn insert(&self, ticket: SessionTicket) -> RegistryResult<()> {
        let mut tickets = lock(&self.tickets);
        match tickets.entry(ticket.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateTicket(ticket.id)),
            Entry::Vacant(slot) => {
                debug!(sid = %ticket.id, protocol = %ticket.protocol, "Session ticket issued");
                slot.insert(ticket);
                Ok(())
            }
        }
    }

    /// Returns a copy of a live ticket without changing it.
    ///
    /// `None` when the id is unknown, already consumed, or expired.
    pub fn take(&self, id: &str) -> Option<SessionTicket> {
        let now = Utc::now();
        let tickets = lock(&self.tickets);
        tickets
            .get(id)
            .filter(|t| !is_expired(t, self.config.ticket_ttl, now))
            .cloned()
    }

    /// Claims a ticket for a module serving `protocol`.
    ///
    /// Increments `ref_count` and returns a copy reflecting the new count.
    pub fn claim(&self, id: &str, protocol: Protocol) -> RegistryResult<SessionTicket> {
        let now = Utc::now();
        let mut tickets = lock(&self.tickets);
        let ticket = tickets
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if is_expired(ticket, self.config.ticket_ttl, now) {
            return Err(RegistryError::Expired(id.to_string()));
        }
        if ticket.protocol != protocol {
            return Err(RegistryError::ProtocolMismatch {
                id: id.to_string(),
                expected: ticket.protocol,
                actual: protocol,
            });
        }

        ticket.ref_count = ticket.ref_count.saturating_add(1);
        Ok(ticket.clone())
    }

    /// Drops one claim on a ticket and returns the remaining count.
    ///
    /// When the count reaches zero the ticket is consumed and removed.
    pub fn release(&self, id: &str) -> RegistryResult<u32> {
        let mut tickets = lock(&self.tickets);
        let ticket = tickets
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if ticket.ref_count == 0 {
            return Err(RegistryError::NotClaimed(id.to_string()));
        }
        ticket.ref_count -= 1;
        let remaining = ticket.ref_count;

        if remaining == 0 {
            tickets.remove(id);
            debug!(sid = %id, "Session ticket consumed");
        }
        Ok(remaining)
    }

    /// Removes every expired ticket now. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.tickets, self.config.ticket_ttl, Utc::now())
    }

    pub fn len(&self) -> usize {
        lock(&self.tickets).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tickets).is_empty()
    }

    /// Ids of all live tickets, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.tickets).keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
/// Every critical section leaves the map consistent before it can panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unclaimed tickets older than the ttl are expired. Claimed ones never are.
fn is_expired(ticket: &SessionTicket, ttl: Duration, now: DateTime<Utc>) -> bool {
    ticket.ref_count == 0
        && ticket
            .age(now)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
}

fn sweep(tickets: &Mutex<TicketMap>, ttl: Duration, now: DateTime<Utc>) -> usize {
    let mut tickets = lock(tickets);
    let before = tickets.len();
    tickets.retain(|_, t| !is_expired(t, ttl, now));
    before - tickets.len()
}
