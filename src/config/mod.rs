use crate::fds::client::Endpoint;
use crate::fds::transport::TransportConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// FDS profile: where to connect and with which credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Explicit endpoint host or URL; wins over `region`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Region used to derive `<region>.fds.api.xiaomi.com` (default: cnbj0)
    #[serde(default = "default_region")]
    pub region: String,

    pub access_key: String,

    pub secret_key: String,

    #[serde(default = "default_enable_https")]
    pub enable_https: bool,

    /// Serve `download_uri` through the region's CDN host
    #[serde(default)]
    pub enable_cdn_for_download: bool,

    /// Optional default bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

fn default_region() -> String {
    Endpoint::DEFAULT_REGION.to_string()
}

fn default_enable_https() -> bool {
    true
}

impl Profile {
    pub fn endpoint(&self) -> Endpoint {
        let endpoint = match self.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(explicit) => Endpoint::new(explicit, self.enable_https),
            None => Endpoint::for_region(&self.region, self.enable_https),
        };
        if self.enable_cdn_for_download {
            endpoint.with_cdn(&self.region)
        } else {
            endpoint
        }
    }
}

/// Transport settings shared by every profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Retries after connection-level failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_tls: bool,
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            insecure_tls: false,
        }
    }
}

impl ClientConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Duration::from_secs(self.request_timeout),
            max_retries: self.max_retries,
            insecure_tls: self.insecure_tls,
            ..TransportConfig::default()
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a profile by name, or the default profile if not specified
    pub fn get_profile(&self, name: Option<&str>) -> Option<&Profile> {
        if let Some(name) = name {
            self.profiles.get(name)
        } else if let Some(default) = &self.default_profile {
            self.profiles.get(default)
        } else {
            self.profiles.values().next()
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Load configuration from environment variables (and `.env` if present)
///
/// - GALAXY_FDS_KEY / FDS_AK
/// - GALAXY_FDS_SECRET / FDS_SK
/// - GALAXY_FDS_ENDPOINT / FDS_ENDPOINT (optional)
/// - GALAXY_FDS_REGION (optional, defaults to cnbj0)
/// - GALAXY_FDS_BUCKET (optional)
/// - GALAXY_FDS_HTTPS, GALAXY_FDS_CDN (optional flags)
pub fn load_from_env() -> Result<Config> {
    let _ = dotenvy::dotenv();

    let access_key = std::env::var("GALAXY_FDS_KEY")
        .or_else(|_| std::env::var("FDS_AK"))
        .context("Neither GALAXY_FDS_KEY nor FDS_AK environment variable is set")?;

    let secret_key = std::env::var("GALAXY_FDS_SECRET")
        .or_else(|_| std::env::var("FDS_SK"))
        .context("Neither GALAXY_FDS_SECRET nor FDS_SK environment variable is set")?;

    let endpoint = std::env::var("GALAXY_FDS_ENDPOINT")
        .or_else(|_| std::env::var("FDS_ENDPOINT"))
        .ok()
        .filter(|e| !e.trim().is_empty());

    let region = std::env::var("GALAXY_FDS_REGION")
        .ok()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(default_region);

    let profile = Profile {
        endpoint,
        region,
        access_key,
        secret_key,
        enable_https: env_flag("GALAXY_FDS_HTTPS").unwrap_or_else(default_enable_https),
        enable_cdn_for_download: env_flag("GALAXY_FDS_CDN").unwrap_or(false),
        bucket: std::env::var("GALAXY_FDS_BUCKET").ok(),
    };

    let mut config = Config::new();
    config.profiles.insert("default".to_string(), profile);
    config.default_profile = Some("default".to_string());
    Ok(config)
}

/// Load from a YAML file when a path is given, otherwise from the environment.
/// `profile_name` must exist in the file and becomes the default profile.
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        if let Some(name) = profile_name {
            if !config.profiles.contains_key(name) {
                anyhow::bail!("Profile '{}' not found in config file", name);
            }
            config.default_profile = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}
