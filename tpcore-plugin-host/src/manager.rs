//! Central protocol module lifecycle manager.
//!
//! Owns every loaded [`PluginRecord`], drives `init` → `start` on load and
//! `stop` on shutdown, and keeps records in load order.

use crate::abi::{InitArgs, SessionBroker, SessionCallbacks};
use crate::error::PluginHostError;
use crate::library::{ModuleCatalog, library_filename};
use crate::record::{LifecycleState, PluginRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tpcore_types::Protocol;
use tracing::{debug, error, info, info_span, warn};

/// Everything the host shares with modules through `InitArgs`.
#[derive(Clone)]
pub struct HostEnv {
    pub exec_dir: PathBuf,
    pub etc_dir: PathBuf,
    pub replay_dir: PathBuf,
    pub config: Arc<toml::Table>,
    pub broker: Arc<dyn SessionBroker>,
}

/// What to load: a config section, its library and its protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    /// Config section name, e.g. `protocol-ssh`.
    pub name: String,
    /// Library base name from the `lib` key.
    pub lib: String,
    pub protocol: Protocol,
}

/// Outcome of stopping one module during `stop_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    Panicked,
    TimedOut,
}

/// Manages the lifecycle of all loaded protocol modules.
pub struct PluginHost {
    catalog: Arc<dyn ModuleCatalog>,
    env: HostEnv,
    records: Vec<PluginRecord>,
    stop_timeout: Duration,
}

impl PluginHost {
    pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(catalog: Arc<dyn ModuleCatalog>, env: HostEnv) -> Self {
        Self {
            catalog,
            env,
            records: Vec::new(),
            stop_timeout: Self::DEFAULT_STOP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    // ================================================================
    // Loading
    // ================================================================

    /// Loads, initializes and starts one module from `search_path`.
    ///
    /// On any failure the module is dropped on the spot and nothing is
    /// registered. On success the record is kept at `Started`.
    pub fn load(
        &mut self,
        spec: &ModuleSpec,
        search_path: &Path,
    ) -> Result<&PluginRecord, PluginHostError> {
        if self.records.iter().any(|r| r.name() == spec.name) {
            return Err(PluginHostError::AlreadyLoaded(spec.name.clone()));
        }

        let path = search_path.join(library_filename(&spec.lib));
        debug!(module = %spec.name, path = %path.display(), "Loading protocol module");

        let library = self
            .catalog
            .open(&path)
            .map_err(|reason| PluginHostError::ModuleLoad {
                library: spec.lib.clone(),
                path: path.clone(),
                reason,
            })?;

        let mut record = PluginRecord::new(spec.name.clone(), spec.protocol, library);
        record.resolve()?;
        record.init(self.init_args(spec))?;
        record.start()?;

        info!(
            module = %spec.name,
            library = %record.library_name(),
            protocol = %spec.protocol,
            "Protocol module started"
        );
        let idx = self.records.len();
        self.records.push(record);
        Ok(&self.records[idx])
    }

    fn init_args(&self, spec: &ModuleSpec) -> InitArgs {
        InitArgs {
            logger: info_span!("protocol", module = %spec.name),
            exec_dir: self.env.exec_dir.clone(),
            etc_dir: self.env.etc_dir.clone(),
            replay_dir: self.env.replay_dir.clone(),
            config: Arc::clone(&self.env.config),
            section: spec.name.clone(),
            callbacks: SessionCallbacks::new(Arc::clone(&self.env.broker), spec.protocol),
        }
    }

    // ================================================================
    // Shutdown
    // ================================================================

    /// Stops every started module in load order.
    ///
    /// Each `stop` runs on the blocking pool under `stop_timeout`. A module
    /// that panics or overruns is logged and abandoned; the rest still stop.
    pub async fn stop_all(&mut self) -> Vec<(String, StopOutcome)> {
        let mut outcomes = Vec::new();

        for record in &mut self.records {
            let Some(stop) = record.take_stop() else {
                continue;
            };
            let name = record.name().to_string();
            debug!(module = %name, "Stopping protocol module");

            let task = tokio::task::spawn_blocking(move || stop());
            let outcome = match tokio::time::timeout(self.stop_timeout, task).await {
                Ok(Ok(())) => {
                    info!(module = %name, "Protocol module stopped");
                    StopOutcome::Stopped
                }
                Ok(Err(e)) => {
                    error!(module = %name, "Protocol module panicked in stop(): {}", e);
                    StopOutcome::Panicked
                }
                Err(_) => {
                    warn!(
                        module = %name,
                        timeout_ms = u64::try_from(self.stop_timeout.as_millis()).unwrap_or(u64::MAX),
                        "Protocol module did not stop in time, abandoning"
                    );
                    StopOutcome::TimedOut
                }
            };
            outcomes.push((name, outcome));
        }
        outcomes
    }

    /// Drops every record, unloading the modules.
    pub fn unload_all(&mut self) {
        for record in self.records.drain(..) {
            if record.state() == LifecycleState::Started {
                warn!(module = %record.name(), "Unloading protocol module that was never stopped");
            }
            debug!(module = %record.name(), "Protocol module unloaded");
        }
    }

    // ================================================================
    // Queries
    // ================================================================

    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records.iter().find(|r| r.name() == name)
    }

    /// Number of loaded modules.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.unload_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{BrokerError, ModuleError, ModuleResult, STOP_SYMBOL};
    use crate::library::{StaticCatalog, StaticLibrary, Symbol};
    use std::sync::Mutex;
    use tpcore_types::SessionTicket;

    struct NullBroker;

    impl SessionBroker for NullBroker {
        fn take_session(&self, _protocol: Protocol, _id: &str) -> Option<SessionTicket> {
            None
        }
        fn free_session(&self, _protocol: Protocol, _ticket: SessionTicket) {}
        fn session_begin(&self, _p: Protocol, t: &SessionTicket) -> Result<i64, BrokerError> {
            Err(BrokerError::TicketNotClaimed(t.id.to_string()))
        }
        fn session_end(&self, _db_id: i64, _code: i32) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn ok_init() -> Symbol {
        Symbol::Init(Arc::new(|_: InitArgs| -> ModuleResult { Ok(()) }))
    }

    fn ok_start() -> Symbol {
        Symbol::Start(Arc::new(|| -> ModuleResult { Ok(()) }))
    }

    /// Library whose entry points append to a shared log.
    fn logging_library(file: &str, log: &Log, fail_at: Option<&'static str>) -> StaticLibrary {
        let (l1, l2, l3) = (Arc::clone(log), Arc::clone(log), Arc::clone(log));
        StaticLibrary::new(file)
            .export(
                "tpp_init",
                Symbol::Init(Arc::new(move |args: InitArgs| {
                    l1.lock().unwrap().push(format!("init:{}", args.section));
                    match fail_at {
                        Some("init") => Err(ModuleError::new("boom")),
                        _ => Ok(()),
                    }
                })),
            )
            .export(
                "tpp_start",
                Symbol::Start(Arc::new(move || {
                    l2.lock().unwrap().push("start".into());
                    match fail_at {
                        Some("start") => Err(ModuleError::new("port in use")),
                        _ => Ok(()),
                    }
                })),
            )
            .export(
                "tpp_stop",
                Symbol::Stop(Arc::new(move || l3.lock().unwrap().push("stop".into()))),
            )
    }

    fn env() -> HostEnv {
        HostEnv {
            exec_dir: PathBuf::from("/opt/tp/bin"),
            etc_dir: PathBuf::from("/opt/tp/etc"),
            replay_dir: PathBuf::from("/opt/tp/replay"),
            config: Arc::new(toml::Table::new()),
            broker: Arc::new(NullBroker),
        }
    }

    fn spec(name: &str, lib: &str, protocol: Protocol) -> ModuleSpec {
        ModuleSpec {
            name: name.into(),
            lib: lib.into(),
            protocol,
        }
    }

    fn host_with(catalog: StaticCatalog) -> PluginHost {
        PluginHost::new(Arc::new(catalog), env())
    }

    #[test]
    fn load_runs_init_then_start() {
        let log: Log = Arc::default();
        let mut catalog = StaticCatalog::new();
        let l = Arc::clone(&log);
        catalog.register("tpssh", move || logging_library("libtpssh.so", &l, None));

        let mut host = host_with(catalog);
        let record = host
            .load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/opt/tp/bin"))
            .unwrap();

        assert_eq!(record.state(), LifecycleState::Started);
        assert_eq!(record.protocol(), Protocol::Ssh);
        assert_eq!(*log.lock().unwrap(), vec!["init:protocol-ssh", "start"]);
        assert_eq!(host.count(), 1);
    }

    #[test]
    fn missing_library_is_module_load_error() {
        let mut host = host_with(StaticCatalog::new());
        let result = host.load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/x"));
        assert!(matches!(result, Err(PluginHostError::ModuleLoad { .. })));
        assert_eq!(host.count(), 0);
    }

    #[test]
    fn missing_symbol_is_resolution_error_and_nothing_called() {
        let log: Log = Arc::default();
        let mut catalog = StaticCatalog::new();
        let l = Arc::clone(&log);
        catalog.register("tpssh", move || {
            logging_library("libtpssh.so", &l, None).without(STOP_SYMBOL)
        });

        let mut host = host_with(catalog);
        let err = host
            .load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/x"))
            .unwrap_err();

        match err {
            PluginHostError::SymbolResolution { missing, .. } => {
                assert_eq!(missing, vec!["tpp_stop"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(host.count(), 0);
    }

    #[test]
    fn init_failure_drops_module_without_start() {
        let log: Log = Arc::default();
        let mut catalog = StaticCatalog::new();
        let l = Arc::clone(&log);
        catalog.register("tpssh", move || logging_library("libtpssh.so", &l, Some("init")));

        let mut host = host_with(catalog);
        let result = host.load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/x"));
        assert!(matches!(result, Err(PluginHostError::PluginInit { .. })));
        assert_eq!(*log.lock().unwrap(), vec!["init:protocol-ssh"]);
        assert_eq!(host.count(), 0);
    }

    #[test]
    fn start_failure_drops_module() {
        let log: Log = Arc::default();
        let mut catalog = StaticCatalog::new();
        let l = Arc::clone(&log);
        catalog.register("tprdp", move || logging_library("libtprdp.so", &l, Some("start")));

        let mut host = host_with(catalog);
        let result = host.load(&spec("protocol-rdp", "tprdp", Protocol::Rdp), Path::new("/x"));
        assert!(matches!(result, Err(PluginHostError::PluginStart { .. })));
        assert_eq!(host.count(), 0);
    }

    #[test]
    fn same_section_twice_is_rejected() {
        let log: Log = Arc::default();
        let mut catalog = StaticCatalog::new();
        let l = Arc::clone(&log);
        catalog.register("tpssh", move || logging_library("libtpssh.so", &l, None));

        let mut host = host_with(catalog);
        let s = spec("protocol-ssh", "tpssh", Protocol::Ssh);
        host.load(&s, Path::new("/x")).unwrap();
        assert!(matches!(
            host.load(&s, Path::new("/x")),
            Err(PluginHostError::AlreadyLoaded(_))
        ));
    }

    #[tokio::test]
    async fn stop_all_stops_once_in_load_order() {
        let log: Log = Arc::default();
        let mut catalog = StaticCatalog::new();
        for lib in ["tpssh", "tptelnet"] {
            let l = Arc::clone(&log);
            let file = library_filename(lib);
            catalog.register(lib, move || logging_library(&file, &l, None));
        }

        let mut host = host_with(catalog);
        host.load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/x"))
            .unwrap();
        host.load(&spec("protocol-telnet", "tptelnet", Protocol::Telnet), Path::new("/x"))
            .unwrap();

        let outcomes = host.stop_all().await;
        assert_eq!(
            outcomes,
            vec![
                ("protocol-ssh".to_string(), StopOutcome::Stopped),
                ("protocol-telnet".to_string(), StopOutcome::Stopped),
            ]
        );
        assert!(host.records().iter().all(|r| r.state() == LifecycleState::Stopped));

        // second call is a no-op
        assert!(host.stop_all().await.is_empty());
        let stops = log.lock().unwrap().iter().filter(|e| *e == "stop").count();
        assert_eq!(stops, 2);
    }

    #[tokio::test]
    async fn hung_stop_is_abandoned() {
        let mut catalog = StaticCatalog::new();
        catalog.register("tphang", || {
            StaticLibrary::new("libtphang.so")
                .export("tpp_init", ok_init())
                .export("tpp_start", ok_start())
                .export(
                    "tpp_stop",
                    Symbol::Stop(Arc::new(|| std::thread::sleep(Duration::from_millis(500)))),
                )
        });
        let log: Log = Arc::default();
        let l = Arc::clone(&log);
        catalog.register("tpssh", move || logging_library("libtpssh.so", &l, None));

        let mut host = host_with(catalog).with_stop_timeout(Duration::from_millis(50));
        host.load(&spec("protocol-vnc", "tphang", Protocol::Vnc), Path::new("/x"))
            .unwrap();
        host.load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/x"))
            .unwrap();

        let outcomes = host.stop_all().await;
        assert_eq!(outcomes[0].1, StopOutcome::TimedOut);
        assert_eq!(outcomes[1].1, StopOutcome::Stopped);
        assert!(log.lock().unwrap().contains(&"stop".to_string()));
    }

    #[tokio::test]
    async fn panicking_stop_does_not_block_others() {
        let mut catalog = StaticCatalog::new();
        catalog.register("tpbad", || {
            StaticLibrary::new("libtpbad.so")
                .export("tpp_init", ok_init())
                .export("tpp_start", ok_start())
                .export("tpp_stop", Symbol::Stop(Arc::new(|| panic!("stop exploded"))))
        });
        let log: Log = Arc::default();
        let l = Arc::clone(&log);
        catalog.register("tpssh", move || logging_library("libtpssh.so", &l, None));

        let mut host = host_with(catalog);
        host.load(&spec("protocol-rdp", "tpbad", Protocol::Rdp), Path::new("/x"))
            .unwrap();
        host.load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/x"))
            .unwrap();

        let outcomes = host.stop_all().await;
        assert_eq!(outcomes[0].1, StopOutcome::Panicked);
        assert_eq!(outcomes[1].1, StopOutcome::Stopped);
    }

    #[test]
    fn init_args_carry_paths_and_section() {
        let seen: Arc<Mutex<Option<InitArgs>>> = Arc::default();
        let s = Arc::clone(&seen);
        let mut catalog = StaticCatalog::new();
        catalog.register("tpssh", move || {
            let s = Arc::clone(&s);
            StaticLibrary::new("libtpssh.so")
                .export(
                    "tpp_init",
                    Symbol::Init(Arc::new(move |args: InitArgs| -> ModuleResult {
                        *s.lock().unwrap() = Some(args);
                        Ok(())
                    })),
                )
                .export("tpp_start", ok_start())
                .export("tpp_stop", Symbol::Stop(Arc::new(|| {})))
        });

        let mut host = host_with(catalog);
        host.load(&spec("protocol-ssh", "tpssh", Protocol::Ssh), Path::new("/x"))
            .unwrap();

        let args = seen.lock().unwrap().take().unwrap();
        assert_eq!(args.exec_dir, PathBuf::from("/opt/tp/bin"));
        assert_eq!(args.etc_dir, PathBuf::from("/opt/tp/etc"));
        assert_eq!(args.replay_dir, PathBuf::from("/opt/tp/replay"));
        assert_eq!(args.section, "protocol-ssh");
        assert_eq!(args.callbacks.protocol(), Protocol::Ssh);
    }
}
