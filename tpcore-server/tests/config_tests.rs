use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;
use tpcore_server::config::{CONFIG_FILE_NAME, ConfigError};
use tpcore_server::CoreConfig;
use tpcore_types::Protocol;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(CONFIG_FILE_NAME);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn load_from_disk_resolves_etc_dir() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [common]
        log-level = "warn"

        [protocol-ssh]
        lib = "tpssh"
        enabled = true
        port = 52189
        "#,
    );

    let cfg = CoreConfig::load(&path).unwrap();
    assert_eq!(cfg.path(), path.as_path());
    assert_eq!(cfg.etc_dir(), dir.path());
    assert_eq!(cfg.common.log_level, "warn");

    let specs: Vec<_> = cfg.module_specs().into_iter().map(Result::unwrap).collect();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].protocol, Protocol::Ssh);
}

#[test]
fn module_sections_stay_visible_in_shared_document() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[protocol-ssh]\nlib = \"tpssh\"\nenabled = true\nport = 52189\nlib-path = \"x\"\n",
    );

    let doc = CoreConfig::load(&path).unwrap().document();
    let section = doc.get("protocol-ssh").and_then(toml::Value::as_table).unwrap();
    assert_eq!(section.get("port").and_then(toml::Value::as_integer), Some(52189));
    assert_eq!(section.get("lib-path").and_then(toml::Value::as_str), Some("x"));
}

#[test]
fn syntax_error_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[protocol-ssh\nlib = ");
    let err = CoreConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}
