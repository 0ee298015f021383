//! Service orchestrator: startup sequence, service loop, unified shutdown.
//!
//! ```text
//! Idle → RegistryStarting → RpcStarting → PluginsLoading → Ready → Draining → Stopped
//!              └───────────────┴──────────────┴──▶ Failed ──▶ Draining
//! ```
//!
//! Every path ends in the same drain: stop modules, stop the RPC listener,
//! stop the registry, each best-effort.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tpcore_plugin_host::{HostEnv, ModuleCatalog, PluginHost, SessionBroker, StopOutcome};
use tpcore_session::{RegistryError, SessionRegistry};
use tracing::{error, info, warn};

use crate::authority::Authority;
use crate::broker::GatewayBroker;
use crate::config::{ConfigError, CoreConfig};
use crate::exit::ExitSignal;
use crate::rpc::{ModuleStatus, RpcError, RpcServer, RpcState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreState {
    Idle,
    RegistryStarting,
    RpcStarting,
    PluginsLoading,
    Ready,
    Draining,
    Stopped,
    Failed,
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoreState::Idle => "idle",
            CoreState::RegistryStarting => "registry-starting",
            CoreState::RpcStarting => "rpc-starting",
            CoreState::PluginsLoading => "plugins-loading",
            CoreState::Ready => "ready",
            CoreState::Draining => "draining",
            CoreState::Stopped => "stopped",
            CoreState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session registry failed to start: {0}")]
    RegistryStart(#[from] RegistryError),

    #[error("RPC listener failed to start: {0}")]
    RpcStart(#[from] RpcError),
}

/// Directories handed to modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorePaths {
    pub exec_dir: PathBuf,
    pub etc_dir: PathBuf,
    pub replay_dir: PathBuf,
}

impl CorePaths {
    pub fn resolve(config: &CoreConfig, exec_dir: &Path) -> Self {
        Self {
            exec_dir: exec_dir.to_path_buf(),
            etc_dir: config.etc_dir(),
            replay_dir: config.replay_dir(exec_dir),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailure {
    pub module: String,
    pub reason: String,
}

/// What happened during one run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Every state entered, in order.
    pub states: Vec<CoreState>,
    pub startup_error: Option<OrchestratorError>,
    pub loaded: Vec<String>,
    pub failures: Vec<ModuleFailure>,
    pub stopped: Vec<(String, StopOutcome)>,
}

impl RunReport {
    pub fn reached_ready(&self) -> bool {
        self.states.contains(&CoreState::Ready)
    }

    pub fn all_ok(&self) -> bool {
        self.startup_error.is_none() && self.failures.is_empty() && !self.loaded.is_empty()
    }
}

pub struct Orchestrator {
    config: CoreConfig,
    paths: CorePaths,
    catalog: Arc<dyn ModuleCatalog>,
    authority: Arc<dyn Authority>,
    exit: ExitSignal,
    state: CoreState,
    states: Vec<CoreState>,
}

impl Orchestrator {
    pub fn new(
        config: CoreConfig,
        paths: CorePaths,
        catalog: Arc<dyn ModuleCatalog>,
        authority: Arc<dyn Authority>,
        exit: ExitSignal,
    ) -> Self {
        Self {
            config,
            paths,
            catalog,
            authority,
            exit,
            state: CoreState::Idle,
            states: vec![CoreState::Idle],
        }
    }

    fn enter(&mut self, next: CoreState) {
        info!(from = %self.state, to = %next, "Core state change");
        self.state = next;
        self.states.push(next);
    }

    /// Runs the core to completion. Returns once drained.
    pub async fn run(mut self) -> RunReport {
        let stop_timeout = self.config.common.stop_timeout();
        let registry = Arc::new(SessionRegistry::new(self.config.common.registry_config()));
        let broker: Arc<dyn SessionBroker> = Arc::new(GatewayBroker::new(
            Arc::clone(&registry),
            Arc::clone(&self.authority),
            Handle::current(),
        ));
        let rpc_state = Arc::new(RpcState::new(Arc::clone(&registry), self.exit.clone()));
        let mut rpc = RpcServer::new(self.config.rpc.bind_addr(), Arc::clone(&rpc_state));
        let mut host = PluginHost::new(
            Arc::clone(&self.catalog),
            HostEnv {
                exec_dir: self.paths.exec_dir.clone(),
                etc_dir: self.paths.etc_dir.clone(),
                replay_dir: self.paths.replay_dir.clone(),
                config: self.config.document(),
                broker,
            },
        )
        .with_stop_timeout(stop_timeout);

        let mut report = RunReport::default();

        match self.start_services(&registry, &mut rpc).await {
            Err(e) => {
                error!(error = %e, "Core startup failed");
                report.startup_error = Some(e);
                self.enter(CoreState::Failed);
            }
            Ok(()) => {
                self.enter(CoreState::PluginsLoading);
                self.load_modules(&mut host, &mut report);
                rpc_state.set_modules(module_statuses(&host));

                if report.all_ok() {
                    self.enter(CoreState::Ready);
                    self.serve(&rpc_state).await;
                } else {
                    if report.loaded.is_empty() {
                        error!("No protocol module loaded");
                    }
                    error!(
                        loaded = report.loaded.len(),
                        failed = report.failures.len(),
                        "Protocol module startup incomplete"
                    );
                    self.enter(CoreState::Failed);
                }
            }
        }

        self.enter(CoreState::Draining);
        report.stopped = host.stop_all().await;
        rpc.stop(stop_timeout).await;
        registry.stop().await;
        host.unload_all();
        self.enter(CoreState::Stopped);

        report.states = self.states;
        report
    }

    async fn start_services(
        &mut self,
        registry: &SessionRegistry,
        rpc: &mut RpcServer,
    ) -> Result<(), OrchestratorError> {
        self.enter(CoreState::RegistryStarting);
        registry.start()?;

        self.enter(CoreState::RpcStarting);
        rpc.start().await?;
        Ok(())
    }

    /// Attempts every enabled module. Failures are collected, not fatal to
    /// the loop; already-loaded modules stay up until the drain.
    fn load_modules(&self, host: &mut PluginHost, report: &mut RunReport) {
        for entry in self.config.module_specs() {
            let spec = match entry {
                Ok(spec) => spec,
                Err(e) => {
                    let module = match &e {
                        ConfigError::UnknownProtocol { section, .. } => section.clone(),
                        other => other.to_string(),
                    };
                    error!(module = %module, error = %e, "Protocol module rejected");
                    report.failures.push(ModuleFailure {
                        module,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match host.load(&spec, &self.paths.exec_dir) {
                Ok(record) => report.loaded.push(record.name().to_string()),
                Err(e) => {
                    error!(module = %spec.name, kind = e.kind(), error = %e, "Protocol module failed to load");
                    report.failures.push(ModuleFailure {
                        module: spec.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Ready: announce the core, then park until the exit signal.
    async fn serve(&self, rpc_state: &RpcState) {
        if let Some(url) = rpc_state.rpc_url() {
            tokio::select! {
                result = self.authority.register_core(&url) => match result {
                    Ok(()) => info!(rpc = %url, "Registered with authority"),
                    Err(e) => warn!(rpc = %url, error = %e, "Authority registration failed"),
                },
                () = self.exit.wait() => {}
            }
        }

        info!("tpcore ready");
        self.exit.wait().await;
        info!("Exit signal received, shutting down");
    }
}

fn module_statuses(host: &PluginHost) -> Vec<ModuleStatus> {
    host.records()
        .iter()
        .map(|r| ModuleStatus {
            name: r.name().to_string(),
            protocol: r.protocol(),
            state: r.state(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_requires_a_loaded_module() {
        let report = RunReport::default();
        assert!(!report.all_ok());

        let report = RunReport {
            loaded: vec!["protocol-ssh".into()],
            ..Default::default()
        };
        assert!(report.all_ok());
        assert!(!report.reached_ready());
    }

    #[test]
    fn state_names_are_kebab_case() {
        assert_eq!(CoreState::PluginsLoading.to_string(), "plugins-loading");
        assert_eq!(CoreState::Failed.to_string(), "failed");
    }
}
