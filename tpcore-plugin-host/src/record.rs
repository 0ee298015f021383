//! One loaded protocol module and its lifecycle state machine.
//!
//! ```text
//! Loaded ──resolve──▶ Loaded(resolved) ──init──▶ Initialized ──start──▶ Started ──stop──▶ Stopped
//!    └───────────────────────┴─────────────────────────┴──── failure ──▶ Failed
//! ```

use crate::abi::{
    INIT_SYMBOL, InitArgs, InitFn, START_SYMBOL, STOP_SYMBOL, StartFn, StopFn,
};
use crate::error::PluginHostError;
use crate::library::{ModuleLibrary, Symbol};
use serde::Serialize;
use std::fmt;
use tpcore_types::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Loaded,
    Initialized,
    Started,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Loaded => "loaded",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct EntryPoints {
    init: InitFn,
    start: StartFn,
    stop: StopFn,
}

/// A loaded module. Dropping the record unloads its library.
pub struct PluginRecord {
    name: String,
    protocol: Protocol,
    state: LifecycleState,
    entry: Option<EntryPoints>,
    // Declared last so entry points drop before the library.
    library: Box<dyn ModuleLibrary>,
}

impl PluginRecord {
    pub(crate) fn new(name: String, protocol: Protocol, library: Box<dyn ModuleLibrary>) -> Self {
        Self {
            name,
            protocol,
            state: LifecycleState::Loaded,
            entry: None,
            library,
        }
    }

    /// Config section the module was loaded for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library_name(&self) -> &str {
        self.library.file_name()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Resolves all three entry points. Any missing one fails the record.
    pub(crate) fn resolve(&mut self) -> Result<(), PluginHostError> {
        let init = match self.library.symbol(INIT_SYMBOL) {
            Some(Symbol::Init(f)) => Some(f),
            _ => None,
        };
        let start = match self.library.symbol(START_SYMBOL) {
            Some(Symbol::Start(f)) => Some(f),
            _ => None,
        };
        let stop = match self.library.symbol(STOP_SYMBOL) {
            Some(Symbol::Stop(f)) => Some(f),
            _ => None,
        };

        match (init, start, stop) {
            (Some(init), Some(start), Some(stop)) => {
                self.entry = Some(EntryPoints { init, start, stop });
                Ok(())
            }
            (init, start, stop) => {
                let missing = [
                    (INIT_SYMBOL, init.is_none()),
                    (START_SYMBOL, start.is_none()),
                    (STOP_SYMBOL, stop.is_none()),
                ]
                .into_iter()
                .filter_map(|(sym, absent)| absent.then_some(sym))
                .collect();
                self.state = LifecycleState::Failed;
                Err(PluginHostError::SymbolResolution {
                    library: self.library_name().to_string(),
                    missing,
                })
            }
        }
    }

    pub(crate) fn init(&mut self, args: InitArgs) -> Result<(), PluginHostError> {
        let result = match (&self.entry, self.state) {
            (Some(entry), LifecycleState::Loaded) => (entry.init)(args).map_err(|e| e.0),
            _ => Err(format!("cannot init from state {}", self.state)),
        };
        match result {
            Ok(()) => {
                self.state = LifecycleState::Initialized;
                Ok(())
            }
            Err(reason) => {
                self.state = LifecycleState::Failed;
                Err(PluginHostError::PluginInit {
                    module: self.name.clone(),
                    reason,
                })
            }
        }
    }

    pub(crate) fn start(&mut self) -> Result<(), PluginHostError> {
        let result = match (&self.entry, self.state) {
            (Some(entry), LifecycleState::Initialized) => (entry.start)().map_err(|e| e.0),
            _ => Err(format!("cannot start from state {}", self.state)),
        };
        match result {
            Ok(()) => {
                self.state = LifecycleState::Started;
                Ok(())
            }
            Err(reason) => {
                self.state = LifecycleState::Failed;
                Err(PluginHostError::PluginStart {
                    module: self.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Hands out the stop entry point exactly once, and only for a started
    /// module. The record is `Stopped` from then on, whatever `stop` does.
    pub(crate) fn take_stop(&mut self) -> Option<StopFn> {
        if self.state != LifecycleState::Started {
            return None;
        }
        let stop = self.entry.as_ref().map(|e| std::sync::Arc::clone(&e.stop))?;
        self.state = LifecycleState::Stopped;
        Some(stop)
    }
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("library", &self.library_name())
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .finish()
    }
}
