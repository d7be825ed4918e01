use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_TARGET_TRIPLE: &str = "x86_64-unknown-linux-gnu";

/// Settings shared by all parsers, deserialized from `.sbom-parsers/config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Platform passed to `cargo metadata --filter-platform`.
    pub cargo_target_triple: String,
    /// Maven global settings file forwarded as `-gs <file>`.
    pub global_settings: Option<PathBuf>,
    /// Timeout for registry HTTP requests.
    pub registry_timeout_secs: u64,
    /// How many dependency levels the Ruby parser follows below the root.
    pub ruby_max_depth: usize,
    /// Skip registry enrichment entirely.
    pub offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cargo_target_triple: DEFAULT_TARGET_TRIPLE.to_string(),
            global_settings: None,
            registry_timeout_secs: 5,
            ruby_max_depth: 3,
            offline: false,
        }
    }
}

/// Load the configuration, searching in order:
///
/// 1. `config_override` (path passed via `--config`)
/// 2. `<project_path>/.sbom-parsers/config.toml`
/// 3. `~/.config/sbom-parsers/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_path.join(".sbom-parsers").join("config.toml");
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config").join("sbom-parsers").join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::parse(format!("read config {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_when_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path(), None).unwrap();
        // a user-level file may exist on the machine; only check fields it cannot affect
        assert!(cfg.registry_timeout_secs > 0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "cargo_target_triple = \"aarch64-apple-darwin\"").unwrap();
        writeln!(f, "offline = true").unwrap();
        let cfg = load_config(Path::new("."), Some(f.path())).unwrap();
        assert_eq!(cfg.cargo_target_triple, "aarch64-apple-darwin");
        assert!(cfg.offline);
        assert_eq!(cfg.registry_timeout_secs, 5);
        assert_eq!(cfg.ruby_max_depth, 3);
    }

    #[test]
    fn test_project_config_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".sbom-parsers");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "global_settings = \"/etc/maven/settings.xml\"\n",
        )
        .unwrap();
        let cfg = load_config(dir.path(), None).unwrap();
        assert_eq!(
            cfg.global_settings,
            Some(PathBuf::from("/etc/maven/settings.xml"))
        );
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "ruby_max_depth = \"deep\"").unwrap();
        let err = load_config(Path::new("."), Some(f.path())).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
