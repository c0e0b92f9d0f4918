//! Client configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/fileshare/client.toml`
//! - Windows: `%APPDATA%/fileshare/client.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the share server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Chunk size in bytes for new transfers.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,

    /// Where finished downloads are written. Empty means `~/Downloads`.
    #[serde(default)]
    pub download_dir: String,

    /// Where transfer history is kept. Empty means next to this file.
    #[serde(default)]
    pub state_dir: String,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_chunk_size() -> u64 {
    fileshare_transfer::DEFAULT_CHUNK_SIZE
}

fn default_request_timeout_secs() -> u64 {
    fileshare_http::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_max_concurrent_transfers() -> usize {
    fileshare_transfer::DEFAULT_MAX_CONCURRENT
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            download_dir: String::new(),
            state_dir: String::new(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `path`, creating a default there if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = ClientConfig::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_dir(&self) -> PathBuf {
        if self.download_dir.is_empty() {
            home_dir().join("Downloads")
        } else {
            PathBuf::from(&self.download_dir)
        }
    }

    /// State directory; relative to `config_dir` when unset.
    pub fn state_dir(&self, config_dir: &Path) -> PathBuf {
        if self.state_dir.is_empty() {
            config_dir.join("state")
        } else {
            PathBuf::from(&self.state_dir)
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("fileshare")
            .join("client.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("fileshare").join("client.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/fileshare/client.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:8080");
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_concurrent_transfers, 3);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"server_url = "http://share.local:9000""#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server_url, "http://share.local:9000");
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert!(config.download_dir.is_empty());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = ClientConfig {
            chunk_size: 1_000_000,
            download_dir: "/srv/downloads".into(),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/client.toml");

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn directories_fall_back() {
        let config = ClientConfig::default();
        assert!(config.download_dir().ends_with("Downloads"));
        assert_eq!(
            config.state_dir(Path::new("/etc/fileshare")),
            PathBuf::from("/etc/fileshare/state")
        );

        let config = ClientConfig {
            state_dir: "/var/lib/fileshare".into(),
            ..Default::default()
        };
        assert_eq!(
            config.state_dir(Path::new("/etc/fileshare")),
            PathBuf::from("/var/lib/fileshare")
        );
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path().unwrap();
        assert!(path.ends_with("client.toml"));
    }
}
