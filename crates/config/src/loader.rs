use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "chatrelay.toml",
    "chatrelay.yaml",
    "chatrelay.yml",
    "chatrelay.json",
];

/// Serialization format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Format implied by the file extension; no extension means TOML.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        match ext {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("unsupported config format: .{ext}"),
        }
    }
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let value = load_config_value(path)?;
    serde_json::from_value(value)
        .map_err(|e| anyhow::anyhow!("invalid config in {}: {e}", path.display()))
}

/// Read a config file with env substitution into an untyped tree.
pub fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let format = ConfigFormat::from_path(path)?;
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config_value(&substitute_env(&raw), format)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./chatrelay.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/chatrelay/chatrelay.{toml,yaml,yml,json}`
///
/// Returns `RelayConfig::default()` if no config file is found or it fails
/// to load.
pub fn discover_and_load() -> RelayConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    RelayConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/chatrelay/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "chatrelay").map(|d| d.config_dir().to_path_buf())
}

/// Parse raw config text into an untyped tree.
pub fn parse_config_value(raw: &str, format: ConfigFormat) -> anyhow::Result<serde_json::Value> {
    let value = match format {
        ConfigFormat::Toml => {
            let v: toml::Value = toml::from_str(raw)?;
            serde_json::to_value(v)?
        },
        ConfigFormat::Yaml => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            serde_json::to_value(v)?
        },
        ConfigFormat::Json => serde_json::from_str(raw)?,
    };
    // An empty YAML document parses to null.
    Ok(if value.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        value
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::fs};

    #[test]
    fn loads_every_supported_format() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            (
                "chatrelay.toml",
                "[bus]\nqueue_capacity = 8\n[channels.signal]\nenabled = true\n",
            ),
            (
                "chatrelay.yaml",
                "bus:\n  queue_capacity: 8\nchannels:\n  signal:\n    enabled: true\n",
            ),
            (
                "chatrelay.json",
                r#"{"bus":{"queue_capacity":8},"channels":{"signal":{"enabled":true}}}"#,
            ),
        ];
        for (name, body) in files {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            let cfg = load_config(&path).unwrap();
            assert_eq!(cfg.bus.queue_capacity, 8, "{name}");
            assert_eq!(cfg.channels.signal.unwrap()["enabled"], true, "{name}");
        }
    }

    #[test]
    fn substitutes_defaults_before_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatrelay.toml");
        fs::write(
            &path,
            "[channels.signal]\nsignal_service = \"${CHATRELAY_TEST_UNSET_SERVICE:-127.0.0.1:8080}\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(
            cfg.channels.signal.unwrap()["signal_service"],
            "127.0.0.1:8080"
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatrelay.ini");
        fs::write(&path, "x=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn reports_type_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatrelay.toml");
        fs::write(&path, "[bus]\nqueue_capacity = \"lots\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("chatrelay.toml"));
    }

    #[test]
    fn finds_first_standard_name_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_in(dir.path()).is_none());
        fs::write(dir.path().join("chatrelay.json"), "{}").unwrap();
        fs::write(dir.path().join("chatrelay.yaml"), "").unwrap();
        assert_eq!(
            find_in(dir.path()).unwrap(),
            dir.path().join("chatrelay.yaml")
        );
        let cfg = load_config(&dir.path().join("chatrelay.yaml")).unwrap();
        assert_eq!(cfg, RelayConfig::default());
    }
}
