use anyhow::{Context, Result, ensure};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const LISTEN_ADDR_ENV: &str = "RATEWATCH_LISTEN_ADDR";
pub const DATA_PATH_ENV: &str = "RATEWATCH_DATA_PATH";

pub const DEFAULT_KASPI_URL: &str =
    "https://guide.kaspi.kz/client/api/v2/intgr/currency/rate/aggregate";
pub const DEFAULT_HALYK_URL: &str = "https://back.halykbank.kz/common/currency-history";
pub const DEFAULT_FREEDOM_URL: &str = "https://bankffin.kz/api/exchange-rates/getRates";
pub const DEFAULT_RBK_URL: &str = "https://backend.bankrbk.kz/api/v1/modules/exchange_rates/data";
pub const DEFAULT_HOME_URL: &str = "https://home.kz/api/public/getCurrency";
pub const DEFAULT_NBRK_URL: &str = "https://nationalbank.kz/rss/rates_all.xml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EndpointConfig {
    pub url: String,
}

impl EndpointConfig {
    fn new(url: &str) -> Option<Self> {
        Some(Self {
            url: url.to_string(),
        })
    }
}

/// Enabled sources and their endpoints. A source left out of a config file
/// that has a `sources` section is disabled.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourcesConfig {
    #[serde(default)]
    pub kaspi: Option<EndpointConfig>,
    #[serde(default)]
    pub halyk: Option<EndpointConfig>,
    #[serde(default)]
    pub freedom: Option<EndpointConfig>,
    #[serde(default)]
    pub rbk: Option<EndpointConfig>,
    #[serde(default)]
    pub home: Option<EndpointConfig>,
    #[serde(default)]
    pub nbrk: Option<EndpointConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            kaspi: EndpointConfig::new(DEFAULT_KASPI_URL),
            halyk: EndpointConfig::new(DEFAULT_HALYK_URL),
            freedom: EndpointConfig::new(DEFAULT_FREEDOM_URL),
            rbk: EndpointConfig::new(DEFAULT_RBK_URL),
            home: EndpointConfig::new(DEFAULT_HOME_URL),
            nbrk: EndpointConfig::new(DEFAULT_NBRK_URL),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_interval_secs() -> u64 {
    30 * 60
}

fn default_deadline_secs() -> u64 {
    25
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.interval_secs > 0,
            "refresh.interval_secs must be greater than zero"
        );
        ensure!(
            self.deadline_secs > 0,
            "refresh.deadline_secs must be greater than zero"
        );
        Ok(())
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub data_path: Option<String>,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_path: None,
            refresh: RefreshConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the default config file, falling back to built-in defaults when
    /// it has not been created yet.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using built-in defaults",
                config_path.display()
            );
            return Ok(Self::default().with_env_overrides());
        }
        Ok(Self::load_from_path(&config_path)?.with_env_overrides())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("kz", "ratewatch", "ratewatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("kz", "ratewatch", "ratewatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .refresh
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(LISTEN_ADDR_ENV).ok(),
            std::env::var(DATA_PATH_ENV).ok(),
        )
    }

    fn with_overrides(mut self, listen_addr: Option<String>, data_path: Option<String>) -> Self {
        if let Some(addr) = listen_addr.filter(|v| !v.is_empty()) {
            debug!("Overriding listen address from environment: {addr}");
            self.listen_addr = addr;
        }
        if let Some(path) = data_path.filter(|v| !v.is_empty()) {
            debug!("Overriding data path from environment: {path}");
            self.data_path = Some(path);
        }
        self
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen_addr))
    }
}
