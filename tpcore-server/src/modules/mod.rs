//! Protocol modules compiled into the `tpcore` binary.

pub mod ping;

use tpcore_plugin_host::StaticCatalog;

pub use ping::{PING_LIB, PingModule};

/// Catalog of every built-in module, keyed by its `lib` name.
pub fn builtin_catalog() -> StaticCatalog {
    let mut catalog = StaticCatalog::new();
    catalog.register_module(PING_LIB, PingModule::new);
    catalog
}
