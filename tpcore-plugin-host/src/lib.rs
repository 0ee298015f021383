//! Protocol module host for tpcore.
//!
//! Loads protocol modules under a fixed lifecycle contract
//! (`tpp_init` → `tpp_start` → `tpp_stop`), hands each one a callback table
//! bound to the core's session services, and stops them on shutdown with a
//! bounded grace period.
//!
//! How module code is found is behind [`ModuleCatalog`]; the host only sees
//! resolved entry points.

mod abi;
mod error;
mod library;
mod manager;
mod record;

pub use abi::{
    BrokerError, INIT_SYMBOL, InitArgs, InitFn, ModuleError, ModuleResult, ProtocolModule,
    START_SYMBOL, STOP_SYMBOL, SessionBroker, SessionCallbacks, StartFn, StopFn,
};
pub use error::PluginHostError;
pub use library::{ModuleCatalog, ModuleLibrary, StaticCatalog, StaticLibrary, Symbol, library_filename};
pub use manager::{HostEnv, ModuleSpec, PluginHost, StopOutcome};
pub use record::{LifecycleState, PluginRecord};
