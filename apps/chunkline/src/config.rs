//! Configuration for the `chunkline` binary.
//!
//! Reads/writes JSON at `~/.config/chunkline/config.json` (or the path in
//! `CHUNKLINE_CONFIG`). Every field is optional; missing or out-of-range
//! values fall back to defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chunkline_client::RetryPolicy;
use chunkline_protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use chunkline_server::ServerConfig;

const CONFIG_ENV: &str = "CHUNKLINE_CONFIG";
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// On-disk config format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    client: ClientSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bind: Option<SocketAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    upload_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resume_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    retry: RetrySection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_delay_ms: Option<u64>,
}

/// Client-side settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    /// Where incomplete transfers are recorded.
    pub resume_file: PathBuf,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    file_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let file_path = config_file_path();
        let resume_file = file_path
            .parent()
            .map(|dir| dir.join("incomplete.json"))
            .unwrap_or_else(|| PathBuf::from("incomplete.json"));
        Self {
            server: ServerConfig::default(),
            client: ClientConfig {
                server_url: DEFAULT_SERVER_URL.into(),
                resume_file,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                retry: RetryPolicy::default(),
            },
            file_path,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file_path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
        let mut config = AppConfig {
            file_path: file_path.clone(),
            ..Default::default()
        };

        if file_path.exists() {
            let content = std::fs::read_to_string(&file_path)?;
            match serde_json::from_str::<ConfigFile>(&content) {
                Ok(file) => config.apply(file),
                Err(e) => tracing::warn!(
                    path = %file_path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                ),
            }
        }

        Ok(config)
    }

    /// Saves configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.to_file())?;
        std::fs::write(&self.file_path, &json)?;
        set_permissions_0600(&self.file_path);

        tracing::debug!(path = %self.file_path.display(), "configuration saved");
        Ok(())
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn apply(&mut self, file: ConfigFile) {
        let server = file.server;
        if let Some(bind) = server.bind {
            self.server.bind = bind;
        }
        if let Some(dir) = server.upload_dir.filter(|d| !d.as_os_str().is_empty()) {
            self.server.upload_dir = dir;
        }
        match server.chunk_size {
            Some(size) if (MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&size) => {
                self.server.chunk_size = size;
            }
            Some(size) => tracing::warn!(
                chunk_size = size,
                default = DEFAULT_CHUNK_SIZE,
                "chunk size out of range, using default"
            ),
            None => {}
        }
        if let Some(secs) = server.session_ttl_secs.filter(|s| *s > 0) {
            self.server.session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = server.sweep_interval_secs.filter(|s| *s > 0) {
            self.server.sweep_interval = Duration::from_secs(secs);
        }

        let client = file.client;
        if let Some(url) = client.server_url.filter(|u| !u.is_empty()) {
            self.client.server_url = url;
        }
        if let Some(path) = client.resume_file.filter(|p| !p.as_os_str().is_empty()) {
            self.client.resume_file = path;
        }
        if let Some(secs) = client.request_timeout_secs.filter(|s| *s > 0) {
            self.client.request_timeout = Duration::from_secs(secs);
        }

        let retry = &mut self.client.retry;
        if let Some(n) = client.retry.max_attempts.filter(|n| *n >= 1) {
            retry.max_attempts = n;
        }
        if let Some(ms) = client.retry.base_delay_ms {
            retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = client.retry.max_delay_ms {
            retry.max_delay = Duration::from_millis(ms);
        }
        if retry.max_delay < retry.base_delay {
            retry.max_delay = retry.base_delay;
        }
    }

    fn to_file(&self) -> ConfigFile {
        ConfigFile {
            server: ServerSection {
                bind: Some(self.server.bind),
                upload_dir: Some(self.server.upload_dir.clone()),
                chunk_size: Some(self.server.chunk_size),
                session_ttl_secs: Some(self.server.session_ttl.as_secs()),
                sweep_interval_secs: Some(self.server.sweep_interval.as_secs()),
            },
            client: ClientSection {
                server_url: Some(self.client.server_url.clone()),
                resume_file: Some(self.client.resume_file.clone()),
                request_timeout_secs: Some(self.client.request_timeout.as_secs()),
                retry: RetrySection {
                    max_attempts: Some(self.client.retry.max_attempts),
                    base_delay_ms: Some(self.client.retry.base_delay.as_millis() as u64),
                    max_delay_ms: Some(self.client.retry.max_delay.as_millis() as u64),
                },
            },
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

fn config_file_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    config_base_dir().join("chunkline").join("config.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
            return PathBuf::from(dir);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkline_server::config::{DEFAULT_SESSION_TTL, DEFAULT_SWEEP_INTERVAL};
    use tempfile::TempDir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("config.json"))).unwrap();

        assert_eq!(config.server.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.server.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.server.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(config.client.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.client.retry, RetryPolicy::default());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "server": { "bind": "0.0.0.0:8080", "chunkSize": 2097152 },
                "client": { "serverUrl": "http://uploads.local:8080", "retry": { "maxAttempts": 2 } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.server.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.server.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.client.server_url, "http://uploads.local:8080");
        assert_eq!(config.client.retry.max_attempts, 2);
        assert_eq!(
            config.client.retry.base_delay,
            RetryPolicy::default().base_delay
        );
    }

    #[test]
    fn out_of_range_values_fall_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "server": { "chunkSize": 10, "sessionTtlSecs": 0 },
                "client": { "retry": { "maxAttempts": 0, "baseDelayMs": 2000, "maxDelayMs": 100 } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.server.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.client.retry.max_attempts, RetryPolicy::default().max_attempts);
        assert_eq!(config.client.retry.max_delay, Duration::from_millis(2000));
    }

    #[test]
    fn invalid_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.client.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::load(Some(&path)).unwrap();
        config.server.chunk_size = 4 * 1024 * 1024;
        config.client.server_url = "http://example:9000".into();
        config.save().unwrap();

        let reloaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(reloaded.server.chunk_size, 4 * 1024 * 1024);
        assert_eq!(reloaded.client.server_url, "http://example:9000");
        assert_eq!(reloaded.file_path(), path);
    }
}
