//! How module code is obtained.
//!
//! A [`ModuleCatalog`] opens a module file and yields a [`ModuleLibrary`],
//! which resolves entry points by symbol name. The host never depends on how
//! a catalog finds code; [`StaticCatalog`] serves modules compiled into the
//! core binary.

use crate::abi::{
    INIT_SYMBOL, InitArgs, InitFn, ProtocolModule, START_SYMBOL, STOP_SYMBOL, StartFn, StopFn,
};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// One exported entry point.
#[derive(Clone)]
pub enum Symbol {
    Init(InitFn),
    Start(StartFn),
    Stop(StopFn),
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Init(_) => f.write_str("Symbol::Init"),
            Symbol::Start(_) => f.write_str("Symbol::Start"),
            Symbol::Stop(_) => f.write_str("Symbol::Stop"),
        }
    }
}

/// A loaded module. Dropping it unloads the module.
pub trait ModuleLibrary: Send + Sync {
    /// File name the library was opened from.
    fn file_name(&self) -> &str;

    /// Looks up an exported entry point.
    fn symbol(&self, name: &str) -> Option<Symbol>;
}

/// Opens module files.
pub trait ModuleCatalog: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleLibrary>, String>;
}

/// Platform-specific module file name for a base name.
pub fn library_filename(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{name}.dylib")
    } else {
        format!("lib{name}.so")
    }
}

/// A library whose symbol table is built in memory.
#[derive(Clone, Default)]
pub struct StaticLibrary {
    file_name: String,
    symbols: HashMap<String, Symbol>,
}

impl StaticLibrary {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Exports all three entry points of a trait-based module.
    pub fn from_module<M: ProtocolModule>(file_name: impl Into<String>, module: Arc<M>) -> Self {
        let init = Arc::clone(&module);
        let start = Arc::clone(&module);
        let stop = module;
        Self::new(file_name)
            .export(INIT_SYMBOL, Symbol::Init(Arc::new(move |args: InitArgs| init.init(args))))
            .export(START_SYMBOL, Symbol::Start(Arc::new(move || start.start())))
            .export(STOP_SYMBOL, Symbol::Stop(Arc::new(move || stop.stop())))
    }

    #[must_use]
    pub fn export(mut self, name: impl Into<String>, symbol: Symbol) -> Self {
        self.symbols.insert(name.into(), symbol);
        self
    }

    /// Removes an export. Useful for modelling incomplete modules.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.symbols.remove(name);
        self
    }
}

impl ModuleLibrary for StaticLibrary {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).cloned()
    }
}

type Factory = Arc<dyn Fn() -> StaticLibrary + Send + Sync>;

/// Catalog of modules compiled into the binary, keyed by base name.
///
/// Every `open` calls the factory again, so two config sections naming the
/// same library get independent module instances.
#[derive(Clone, Default)]
pub struct StaticCatalog {
    factories: HashMap<String, Factory>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a library under its base name (`lib = "<name>"` in config).
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> StaticLibrary + Send + Sync + 'static,
    {
        self.factories
            .insert(library_filename(name), Arc::new(factory));
        self
    }

    /// Registers a trait-based module built fresh on every open.
    pub fn register_module<M, F>(&mut self, name: &str, make: F) -> &mut Self
    where
        M: ProtocolModule,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let file_name = library_filename(name);
        self.register(name, move || {
            StaticLibrary::from_module(file_name.clone(), Arc::new(make()))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&library_filename(name))
    }
}

impl ModuleCatalog for StaticCatalog {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleLibrary>, String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("invalid module path {}", path.display()))?;

        let factory = self
            .factories
            .get(file_name)
            .ok_or_else(|| format!("no such module: {}", path.display()))?;

        Ok(Box::new(factory()))
    }
}
