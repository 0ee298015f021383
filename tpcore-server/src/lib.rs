//! tpcore: the bastion gateway's core process.
//!
//! Hosts protocol modules, brokers session tickets between the upstream
//! authority and those modules, and exposes a small JSON RPC listener.
//!
//! - [`config`]: `tpcore.toml` loading
//! - [`authority`]: the upstream authority client
//! - [`broker`]: module callbacks bound to the registry and authority
//! - [`rpc`]: inbound RPC listener
//! - [`orchestrator`]: startup, service loop and shutdown
//! - [`modules`]: protocol modules compiled into the binary

pub mod authority;
pub mod broker;
pub mod config;
pub mod exit;
pub mod modules;
pub mod orchestrator;
pub mod rpc;

pub use authority::{Authority, HttpAuthority};
pub use broker::GatewayBroker;
pub use config::{ConfigError, CoreConfig};
pub use exit::ExitSignal;
pub use orchestrator::{CorePaths, CoreState, Orchestrator, OrchestratorError, RunReport};
pub use rpc::{RpcError, RpcServer, RpcState, build_router};
