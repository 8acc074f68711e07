//! Gateway configuration
//!
//! One TOML file holds the server settings, the provider set and the
//! failover tunables. The management API writes provider changes back
//! through [`FileConfigStore`], so the file stays the source of truth
//! across restarts.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

use modelgate_core::{Capability, FailoverConfig, ProviderConfig, ProviderConfigStore};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Upstream provider definitions
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default)]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: "pretty".to_string(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Read the TOML config, falling back to defaults when the file is absent
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);
        if !config_path.exists() {
            info!("No config file at {}, starting with defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(config_path)
            .with_context(|| format!("reading config file {}", path))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path))?;

        info!("Configuration loaded from {}", path);
        Ok(config)
    }

    /// Write the config out without ever leaving a torn file behind: the
    /// content lands in a sibling temp file that is renamed over the target
    /// only once fully synced.
    pub fn save(&self, path: &str) -> Result<()> {
        let rendered = toml::to_string_pretty(self).context("serializing configuration")?;

        let target = Path::new(path);
        let dir = target.parent().unwrap_or(Path::new("."));
        let staged = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("creating staging file in {:?}", dir))?;

        staged
            .as_file()
            .write_all(rendered.as_bytes())
            .context("writing staged config")?;
        staged
            .as_file()
            .sync_all()
            .context("syncing staged config")?;

        // The file carries provider API keys; keep it owner-only
        #[cfg(unix)]
        {
            let mut perms = staged.as_file().metadata()?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(staged.path(), perms)
                .context("restricting config file permissions")?;
        }

        staged
            .persist(path)
            .with_context(|| format!("replacing config file {}", path))?;

        info!("Configuration saved to {}", path);
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: default_bind_address(),
                port: default_port(),
            },
            providers: vec![ProviderConfig {
                name: "openai".to_string(),
                display_name: Some("OpenAI".to_string()),
                url: "https://api.openai.com".to_string(),
                api_key: None,
                capabilities: vec![Capability::Chat, Capability::Audio, Capability::Embeddings],
                max_concurrent: 32,
                priority: 100,
                enabled: true,
            }],
            failover: FailoverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// File-backed provider config store for runtime updates
///
/// Holds the full gateway config so provider changes made through the
/// management API are persisted next to the server settings.
pub struct FileConfigStore {
    config: RwLock<Config>,
    path: String,
}

impl FileConfigStore {
    pub fn new(config: Config, path: String) -> Self {
        Self {
            config: RwLock::new(config),
            path,
        }
    }
}

impl ProviderConfigStore for FileConfigStore {
    fn get_providers(&self) -> Vec<ProviderConfig> {
        self.config.read().providers.clone()
    }

    fn replace_providers(&self, providers: Vec<ProviderConfig>) -> Result<()> {
        let snapshot = {
            let mut config = self.config.write();
            config.providers = providers;
            config.clone()
        };
        snapshot.save(&self.path)
    }
}
