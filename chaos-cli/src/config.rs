//! Config file discovery for chaos-cli.

use anyhow::{Context, Result};
use chaos_harness::Config;
use std::path::{Path, PathBuf};

/// Pick the config file: an explicit path, else `./chaos.toml`, else the
/// per-user config directory.
pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let local = Config::default_path();
    if local.exists() {
        return local;
    }
    directories::ProjectDirs::from("io", "fabric", "chaos-cli")
        .map(|dirs| dirs.config_dir().join("chaos.toml"))
        .unwrap_or(local)
}

/// Load and validate the config file.
pub fn load(path: &Path) -> Result<Config> {
    let config = Config::from_file(path)?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
[[components]]
id = "ctrl1"
kind = "controller"
host = { id = "h1", address = "10.0.0.1" }
edge_url = "https://10.0.0.1:1280"
mgmt_address = "10.0.0.1:6262"
"#;

    #[test]
    fn explicit_path_wins() {
        let path = PathBuf::from("/etc/fabric/chaos.toml");
        assert_eq!(resolve_path(Some(path.clone())), path);
    }

    #[test]
    fn load_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chaos.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.components.len(), 1);

        std::fs::write(&path, "validations = []\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("no components configured"));
    }

    #[test]
    fn missing_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
