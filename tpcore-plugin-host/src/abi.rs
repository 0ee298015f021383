//! The contract between the core and a protocol module.
//!
//! A module exposes three entry points under fixed symbol names:
//!
//! | symbol      | signature                     |
//! |-------------|-------------------------------|
//! | `tpp_init`  | `fn(InitArgs) -> ModuleResult` |
//! | `tpp_start` | `fn() -> ModuleResult`         |
//! | `tpp_stop`  | `fn()`                         |
//!
//! `init` must not block. `start` returns quickly; long-running work lives
//! on threads the module owns. `stop` tears that work down, must tolerate
//! being called when `start` never ran, and must be idempotent.
//!
//! Modules reach back into the core only through [`SessionCallbacks`].

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tpcore_types::{AuthorityError, Protocol, SessionTicket};

pub const INIT_SYMBOL: &str = "tpp_init";
pub const START_SYMBOL: &str = "tpp_start";
pub const STOP_SYMBOL: &str = "tpp_stop";

/// Failure reported by a module entry point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ModuleError(pub String);

impl ModuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Success or failure of `init` / `start`. There is no partial success.
pub type ModuleResult = Result<(), ModuleError>;

pub type InitFn = Arc<dyn Fn(InitArgs) -> ModuleResult + Send + Sync>;
pub type StartFn = Arc<dyn Fn() -> ModuleResult + Send + Sync>;
pub type StopFn = Arc<dyn Fn() + Send + Sync>;

/// A protocol module written against the trait interface.
///
/// [`StaticLibrary::from_module`](crate::StaticLibrary::from_module) exports
/// the three methods under the fixed symbol names.
pub trait ProtocolModule: Send + Sync + 'static {
    fn init(&self, args: InitArgs) -> ModuleResult;
    fn start(&self) -> ModuleResult;
    fn stop(&self);
}

/// Errors surfaced to a module by the session callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Authority(#[from] AuthorityError),

    /// `session_begin` for a ticket this module does not hold.
    #[error("session ticket {0} is not claimed by this module")]
    TicketNotClaimed(String),
}

/// Core services a module may call, bound by the core.
///
/// Implementations must be callable from arbitrary module threads and must
/// never hand out references into core state.
pub trait SessionBroker: Send + Sync {
    /// Claims a ticket for `protocol` and returns a copy.
    fn take_session(&self, protocol: Protocol, id: &str) -> Option<SessionTicket>;

    /// Returns a claimed ticket.
    fn free_session(&self, protocol: Protocol, ticket: SessionTicket);

    /// Reports a session start to the authority and yields its `db_id`.
    fn session_begin(&self, protocol: Protocol, ticket: &SessionTicket) -> Result<i64, BrokerError>;

    /// Reports a session end with its result code.
    fn session_end(&self, db_id: i64, result_code: i32) -> Result<(), BrokerError>;
}

/// The callback table handed to one module.
///
/// The protocol is fixed when the table is built, so a module can only ever
/// claim tickets issued for its own protocol.
#[derive(Clone)]
pub struct SessionCallbacks {
    broker: Arc<dyn SessionBroker>,
    protocol: Protocol,
}

impl SessionCallbacks {
    pub fn new(broker: Arc<dyn SessionBroker>, protocol: Protocol) -> Self {
        Self { broker, protocol }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn take_session(&self, id: &str) -> Option<SessionTicket> {
        self.broker.take_session(self.protocol, id)
    }

    pub fn free_session(&self, ticket: SessionTicket) {
        self.broker.free_session(self.protocol, ticket)
    }

    /// Callers must not proceed with the session when this fails.
    pub fn session_begin(&self, ticket: &SessionTicket) -> Result<i64, BrokerError> {
        self.broker.session_begin(self.protocol, ticket)
    }

    pub fn session_end(&self, db_id: i64, result_code: i32) -> Result<(), BrokerError> {
        self.broker.session_end(db_id, result_code)
    }
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Read-only bundle passed to `tpp_init`.
#[derive(Debug, Clone)]
pub struct InitArgs {
    /// Span carrying the module name; enter it for module logging.
    pub logger: tracing::Span,
    /// Directory holding the core executable and its modules.
    pub exec_dir: PathBuf,
    /// Directory holding the configuration file.
    pub etc_dir: PathBuf,
    /// Directory for session recordings.
    pub replay_dir: PathBuf,
    /// The whole parsed configuration document.
    pub config: Arc<toml::Table>,
    /// Name of this module's own config section, e.g. `protocol-ssh`.
    pub section: String,
    pub callbacks: SessionCallbacks,
}

impl InitArgs {
    /// This module's own config section.
    pub fn module_config(&self) -> Option<&toml::Table> {
        self.config.get(&self.section).and_then(toml::Value::as_table)
    }
}
