//! `tpcore.toml` loading.
//!
//! The document is parsed once into a [`toml::Table`] that is shared
//! read-only with every protocol module. The core's own sections are then
//! deserialized into typed structs; `protocol-*` sections are enumerated in
//! file order, which is also the module load order.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tpcore_plugin_host::ModuleSpec;
use tpcore_session::RegistryConfig;
use tpcore_types::Protocol;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "tpcore.toml";
pub const PROTOCOL_SECTION_PREFIX: &str = "protocol-";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid [{section}] section: {reason}")]
    InvalidSection { section: String, reason: String },

    #[error("section [{section}] names unknown protocol `{protocol}`")]
    UnknownProtocol { section: String, protocol: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommonConfig {
    pub replay_path: Option<PathBuf>,
    pub log_level: String,
    pub stop_timeout_ms: u64,
    pub ticket_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            replay_path: None,
            log_level: "info".to_string(),
            stop_timeout_ms: 5000,
            ticket_ttl_secs: 15,
            sweep_interval_secs: 1,
        }
    }
}

impl CommonConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            ticket_ttl: Duration::from_secs(self.ticket_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RpcConfig {
    pub bind_ip: IpAddr,
    pub bind_port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([127, 0, 0, 1]),
            bind_port: 52080,
        }
    }
}

impl RpcConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.bind_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuthorityConfig {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:7190/rpc".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl AuthorityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A parsed `tpcore.toml`.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    path: PathBuf,
    pub common: CommonConfig,
    pub rpc: RpcConfig,
    pub authority: AuthorityConfig,
    document: Arc<toml::Table>,
}

impl CoreConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parses `text` as if it had been read from `path`.
    pub fn parse(text: &str, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let document: toml::Table = text.parse().map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            common: typed_section(&document, "common")?,
            rpc: typed_section(&document, "rpc")?,
            authority: typed_section(&document, "authority")?,
            document: Arc::new(document),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the config file.
    pub fn etc_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Recording directory; defaults to `<base>/data/replay` where `base` is
    /// the parent of `exec_dir`.
    pub fn replay_dir(&self, exec_dir: &Path) -> PathBuf {
        match &self.common.replay_path {
            Some(p) => p.clone(),
            None => exec_dir
                .parent()
                .unwrap_or(exec_dir)
                .join("data")
                .join("replay"),
        }
    }

    /// The whole document, as handed to modules.
    pub fn document(&self) -> Arc<toml::Table> {
        Arc::clone(&self.document)
    }

    /// Enabled `protocol-*` sections in file order.
    ///
    /// Disabled sections and sections without a `lib` key are skipped
    /// silently. An enabled section whose suffix is not a known protocol
    /// yields an error entry so the caller can count it as a failed load.
    pub fn module_specs(&self) -> Vec<Result<ModuleSpec, ConfigError>> {
        let mut specs = Vec::new();

        for (name, value) in self.document.iter() {
            let Some(suffix) = name.strip_prefix(PROTOCOL_SECTION_PREFIX) else {
                continue;
            };
            if suffix.is_empty() {
                debug!(section = %name, "Protocol section has no protocol name, skipping");
                continue;
            }
            let Some(section) = value.as_table() else {
                warn!(section = %name, "Ignoring non-table protocol entry");
                continue;
            };

            let enabled = match section.get("enabled") {
                None => false,
                Some(toml::Value::Boolean(b)) => *b,
                Some(other) => {
                    warn!(section = %name, value = %other, "`enabled` is not a boolean, treating as false");
                    false
                }
            };
            if !enabled {
                debug!(section = %name, "Protocol section disabled, skipping");
                continue;
            }

            let Some(lib) = section.get("lib").and_then(toml::Value::as_str) else {
                debug!(section = %name, "Protocol section has no `lib`, skipping");
                continue;
            };

            let spec = suffix
                .parse::<Protocol>()
                .map(|protocol| ModuleSpec {
                    name: name.clone(),
                    lib: lib.to_string(),
                    protocol,
                })
                .map_err(|_| ConfigError::UnknownProtocol {
                    section: name.clone(),
                    protocol: suffix.to_string(),
                });
            specs.push(spec);
        }

        specs
    }
}

fn typed_section<T>(document: &toml::Table, name: &str) -> Result<T, ConfigError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match document.get(name) {
        None => Ok(T::default()),
        Some(value) => value
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::InvalidSection {
                section: name.to_string(),
                reason: e.message().to_string(),
            }),
    }
}

/// Default config location: `<etc_dir>/tpcore.toml`, where `etc_dir` is the
/// `etc` directory next to the executable's directory.
pub fn default_config_path(exec_dir: &Path) -> PathBuf {
    exec_dir
        .parent()
        .unwrap_or(exec_dir)
        .join("etc")
        .join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> CoreConfig {
        CoreConfig::parse(text, "/opt/tpcore/etc/tpcore.toml").unwrap()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse("");
        assert_eq!(cfg.common, CommonConfig::default());
        assert_eq!(cfg.rpc.bind_addr(), "127.0.0.1:52080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.authority.timeout(), Duration::from_secs(10));
        assert!(cfg.module_specs().is_empty());
    }

    #[test]
    fn typed_sections_are_kebab_case() {
        let cfg = parse(
            r#"
            [common]
            log-level = "debug"
            stop-timeout-ms = 250
            ticket-ttl-secs = 30

            [rpc]
            bind-ip = "0.0.0.0"
            bind-port = 6000
            "#,
        );
        assert_eq!(cfg.common.log_level, "debug");
        assert_eq!(cfg.common.stop_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.common.registry_config().ticket_ttl, Duration::from_secs(30));
        assert_eq!(cfg.rpc.bind_addr(), "0.0.0.0:6000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn bad_typed_section_is_error() {
        let err = CoreConfig::parse("[rpc]\nbind-port = \"x\"", "tpcore.toml").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSection { ref section, .. } if section == "rpc"));
    }

    #[test]
    fn module_specs_follow_file_order_and_skip_disabled() {
        let cfg = parse(
            r#"
            [protocol-telnet]
            lib = "tptelnet"
            enabled = true

            [protocol-vnc]
            lib = "tpvnc"

            [protocol-rdp]
            enabled = true

            [protocol-ssh]
            lib = "tpssh"
            enabled = true
            port = 52189
            "#,
        );
        let specs: Vec<ModuleSpec> = cfg.module_specs().into_iter().map(Result::unwrap).collect();
        assert_eq!(
            specs,
            vec![
                ModuleSpec {
                    name: "protocol-telnet".into(),
                    lib: "tptelnet".into(),
                    protocol: Protocol::Telnet,
                },
                ModuleSpec {
                    name: "protocol-ssh".into(),
                    lib: "tpssh".into(),
                    protocol: Protocol::Ssh,
                },
            ]
        );
    }

    #[test]
    fn unknown_protocol_suffix_is_reported_when_enabled() {
        let cfg = parse(
            r#"
            [protocol-x11]
            lib = "tpx11"
            enabled = true

            [protocol-ftp]
            lib = "tpftp"
            "#,
        );
        let specs = cfg.module_specs();
        assert_eq!(specs.len(), 1);
        assert!(matches!(
            &specs[0],
            Err(ConfigError::UnknownProtocol { protocol, .. }) if protocol == "x11"
        ));
    }

    #[test]
    fn bare_protocol_prefix_is_skipped() {
        let cfg = parse(
            r#"
            [protocol-]
            lib = "tpnone"
            enabled = true

            [protocol-rdp]
            lib = "tprdp"
            enabled = true
            "#,
        );
        let specs = cfg.module_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].as_ref().unwrap().name, "protocol-rdp");
    }

    #[test]
    fn non_boolean_enabled_is_false() {
        let cfg = parse("[protocol-ssh]\nlib = \"tpssh\"\nenabled = \"yes\"");
        assert!(cfg.module_specs().is_empty());
    }

    #[test]
    fn directories_derive_from_paths() {
        let cfg = parse("");
        assert_eq!(cfg.etc_dir(), PathBuf::from("/opt/tpcore/etc"));
        assert_eq!(
            cfg.replay_dir(Path::new("/opt/tpcore/bin")),
            PathBuf::from("/opt/tpcore/data/replay")
        );
        assert_eq!(
            default_config_path(Path::new("/opt/tpcore/bin")),
            PathBuf::from("/opt/tpcore/etc/tpcore.toml")
        );

        let cfg = parse("[common]\nreplay-path = \"/srv/replay\"");
        assert_eq!(cfg.replay_dir(Path::new("/opt/tpcore/bin")), PathBuf::from("/srv/replay"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = CoreConfig::load("/nonexistent/tpcore.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
