//! Unit tests for configuration discovery and root folder resolution
//!
//! Uses serial_test to prevent ENV variable race conditions: tests that
//! manipulate SCSNG_ROOT_FOLDER or SCSNG_CONFIG are marked with #[serial].

use scsng_common::config::{
    get_default_root_folder, load_toml, resolve_config_path, resolve_root_folder, LoggingConfig,
    CONFIG_ENV, ROOT_FOLDER_ENV,
};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct Bootstrap {
    root_folder: Option<PathBuf>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root_folder = resolve_root_folder(None, ROOT_FOLDER_ENV, None);
    assert_eq!(root_folder, get_default_root_folder());
    assert!(!root_folder.as_os_str().is_empty());
}

#[test]
#[serial]
fn test_resolver_cli_beats_env_and_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/scsng-env-root");

    let root_folder = resolve_root_folder(
        Some(Path::new("/tmp/scsng-cli-root")),
        ROOT_FOLDER_ENV,
        Some(Path::new("/tmp/scsng-toml-root")),
    );
    assert_eq!(root_folder, PathBuf::from("/tmp/scsng-cli-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/scsng-env-root");

    let root_folder =
        resolve_root_folder(None, ROOT_FOLDER_ENV, Some(Path::new("/tmp/scsng-toml-root")));
    assert_eq!(root_folder, PathBuf::from("/tmp/scsng-env-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_toml_used_without_cli_or_env() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root_folder =
        resolve_root_folder(None, ROOT_FOLDER_ENV, Some(Path::new("/tmp/scsng-toml-root")));
    assert_eq!(root_folder, PathBuf::from("/tmp/scsng-toml-root"));
}

#[test]
#[serial]
fn test_explicit_missing_config_is_error() {
    env::remove_var(CONFIG_ENV);

    let result = resolve_config_path(Some(Path::new("/nonexistent/scsng.toml")), CONFIG_ENV);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_config_path_from_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, "root_folder = \"/data/scs\"\n").unwrap();
    env::set_var(CONFIG_ENV, &path);

    let resolved = resolve_config_path(None, CONFIG_ENV).unwrap();
    assert_eq!(resolved, Some(path));

    env::remove_var(CONFIG_ENV);
}

#[test]
fn test_load_toml_with_default_logging() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, "root_folder = \"/data/scs\"\n").unwrap();

    let config: Bootstrap = load_toml(&path).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/data/scs")));
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.file.is_none());
}

#[test]
fn test_load_toml_reports_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "root_folder = [unterminated").unwrap();

    let result: scsng_common::Result<Bootstrap> = load_toml(&path);
    assert!(matches!(result, Err(scsng_common::Error::Config(_))));
}
