//! Error types for the plugin host.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("failed to load module '{library}' from {}: {reason}", path.display())]
    ModuleLoad {
        library: String,
        path: PathBuf,
        reason: String,
    },

    #[error("module '{library}' does not export {}", missing.join(", "))]
    SymbolResolution {
        library: String,
        missing: Vec<&'static str>,
    },

    #[error("failed to init protocol module '{module}': {reason}")]
    PluginInit { module: String, reason: String },

    #[error("failed to start protocol module '{module}': {reason}")]
    PluginStart { module: String, reason: String },

    #[error("protocol module already loaded: {0}")]
    AlreadyLoaded(String),
}

impl PluginHostError {
    /// Short machine-friendly kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginHostError::ModuleLoad { .. } => "module_load",
            PluginHostError::SymbolResolution { .. } => "symbol_resolution",
            PluginHostError::PluginInit { .. } => "plugin_init",
            PluginHostError::PluginStart { .. } => "plugin_start",
            PluginHostError::AlreadyLoaded(_) => "already_loaded",
        }
    }
}
