//! Settings loading from disk.
//!
//! A base JSON file (`appsettings.json` by default) is merged with an
//! optional environment-specific override (`appsettings.<env>.json`) before
//! deserialization, so the override only needs the keys it changes.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::schema::Options;

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

/// Environment variable naming the override file's environment.
pub const ENVIRONMENT_VAR: &str = "FTPSERVER_ENVIRONMENT";

/// Error type for settings loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
    Schema(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read settings file {}: {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "invalid JSON in {}: {}", path.display(), e),
            ConfigError::Schema(e) => write!(f, "invalid settings: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(_, e) | ConfigError::Schema(e) => Some(e),
        }
    }
}

/// Load options from the settings file and its environment override.
///
/// An explicitly named file must exist; the default file is optional.
pub fn load_options(path: Option<&Path>, environment: Option<&str>) -> Result<Options, ConfigError> {
    let (base_path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
    };

    let mut merged = match read_json(&base_path)? {
        Some(value) => {
            tracing::debug!(path = %base_path.display(), "Settings file loaded");
            value
        }
        None if required => {
            return Err(ConfigError::Io(
                base_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            ))
        }
        None => Value::Object(Default::default()),
    };

    if let Some(environment) = environment.filter(|env| !env.is_empty()) {
        let override_path = override_path(&base_path, environment);
        if let Some(overrides) = read_json(&override_path)? {
            tracing::debug!(path = %override_path.display(), "Settings override loaded");
            merge(&mut merged, overrides);
        }
    }

    serde_json::from_value(merged).map_err(ConfigError::Schema)
}

/// `dir/appsettings.json` + `Development` → `dir/appsettings.Development.json`.
pub fn override_path(base: &Path, environment: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "appsettings".to_string());
    base.with_file_name(format!("{}.{}.json", stem, environment))
}

fn read_json(path: &Path) -> Result<Option<Value>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::Io(path.to_path_buf(), e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

/// Deep-merge `overrides` into `base`; objects merge key by key, everything else is replaced.
pub fn merge(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendKind;
    use serde_json::json;

    #[test]
    fn merge_is_deep() {
        let mut base = json!({"server": {"port": 21, "address": "127.0.0.1"}, "backend": "unix"});
        merge(&mut base, json!({"server": {"port": 2121}}));
        assert_eq!(base, json!({"server": {"port": 2121, "address": "127.0.0.1"}, "backend": "unix"}));
    }

    #[test]
    fn override_file_name() {
        let path = override_path(Path::new("/etc/ftp/appsettings.json"), "Development");
        assert_eq!(path, PathBuf::from("/etc/ftp/appsettings.Development.json"));
    }

    #[test]
    fn loads_file_and_override() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("appsettings.json");
        fs::write(&base, r#"{"backend": "system-io", "server": {"port": 2121}}"#).unwrap();
        fs::write(
            dir.path().join("appsettings.Test.json"),
            r#"{"server": {"address": "0.0.0.0"}}"#,
        )
        .unwrap();

        let options = load_options(Some(&base), Some("Test")).unwrap();
        assert_eq!(options.backend, BackendKind::SystemIo);
        assert_eq!(options.server.port, Some(2121));
        assert_eq!(options.server.address.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn explicit_missing_file_fails() {
        let err = load_options(Some(Path::new("/definitely/not/here.json")), None).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn bad_token_in_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("appsettings.json");
        fs::write(&base, r#"{"authentication": ["bogus"]}"#).unwrap();
        assert!(matches!(load_options(Some(&base), None), Err(ConfigError::Schema(_))));
    }
}
