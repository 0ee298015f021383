//! The core side of the module callback table.
//!
//! Modules call in from their own threads. Registry calls are short and
//! lock-bound; authority calls are async and are driven to completion on the
//! core runtime after the registry lock has been released.

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tpcore_plugin_host::{BrokerError, SessionBroker};
use tpcore_session::SessionRegistry;
use tpcore_types::{Protocol, SessionTicket};
use tracing::{debug, warn};

use crate::authority::Authority;

pub struct GatewayBroker {
    registry: Arc<SessionRegistry>,
    authority: Arc<dyn Authority>,
    runtime: Handle,
}

impl GatewayBroker {
    pub fn new(registry: Arc<SessionRegistry>, authority: Arc<dyn Authority>, runtime: Handle) -> Self {
        Self {
            registry,
            authority,
            runtime,
        }
    }

    /// Blocks the calling module thread until `fut` completes on the core
    /// runtime.
    fn block_on<T, F>(&self, fut: F) -> T
    where
        T: Send,
        F: Future<Output = T> + Send,
    {
        if Handle::try_current().is_err() {
            return self.runtime.block_on(fut);
        }

        // Called from inside some runtime (e.g. a module's blocking task):
        // drive the future from a scratch thread instead.
        let runtime = &self.runtime;
        std::thread::scope(|s| {
            s.spawn(move || runtime.block_on(fut))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })
    }
}

impl SessionBroker for GatewayBroker {
    fn take_session(&self, protocol: Protocol, id: &str) -> Option<SessionTicket> {
        match self.registry.claim(id, protocol) {
            Ok(ticket) => {
                debug!(sid = %id, %protocol, ref_count = ticket.ref_count, "Session ticket claimed");
                Some(ticket)
            }
            Err(e) => {
                warn!(sid = %id, %protocol, error = %e, "Session ticket refused");
                None
            }
        }
    }

    fn free_session(&self, protocol: Protocol, ticket: SessionTicket) {
        if ticket.protocol != protocol {
            warn!(sid = %ticket.id, %protocol, "Ignoring release of another protocol's ticket");
            return;
        }
        match self.registry.release(ticket.id.as_str()) {
            Ok(remaining) => debug!(sid = %ticket.id, remaining, "Session ticket released"),
            Err(e) => warn!(sid = %ticket.id, error = %e, "Session ticket release failed"),
        }
    }

    fn session_begin(&self, protocol: Protocol, ticket: &SessionTicket) -> Result<i64, BrokerError> {
        // Report the registry's copy, not whatever the module hands back.
        let canonical = self
            .registry
            .take(ticket.id.as_str())
            .filter(|t| t.protocol == protocol && t.ref_count > 0)
            .ok_or_else(|| BrokerError::TicketNotClaimed(ticket.id.to_string()))?;

        match self.block_on(self.authority.session_begin(&canonical)) {
            Ok(db_id) => {
                debug!(sid = %canonical.id, db_id, "Session begin accepted");
                Ok(db_id)
            }
            Err(e) => {
                warn!(sid = %canonical.id, error = %e, "Session begin failed");
                Err(e.into())
            }
        }
    }

    fn session_end(&self, db_id: i64, result_code: i32) -> Result<(), BrokerError> {
        self.block_on(self.authority.session_end(db_id, result_code))
            .map_err(|e| {
                warn!(db_id, result_code, error = %e, "Session end report failed");
                BrokerError::from(e)
            })
    }
}
