//! Probe configuration.
//!
//! Backend sections use the same option names as the HNAS section of
//! `cinder.conf`, so values can be copied over verbatim:
//!
//! ```toml
//! [hnas]
//! enabled_backends = ["hnas-nfs"]
//! cinder_manage_host = "controller"
//!
//! [backends.hnas-nfs]
//! volume_backend_name = "hnas_nfs"
//! hnas_mgmt_ip0 = "172.24.44.15"
//! hnas_username = "supervisor"
//! hnas_password = "supervisor"
//! hnas_svc0_hdp = "172.24.49.21:/nfs_cinder"
//! hnas_svc0_pool_name = "default"
//! ```

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::remote::SshTarget;

/// Cinder volume log watched by the SSC limit test
pub const DEFAULT_VOLUME_LOG_PATH: &str = "/home/ubuntu/devstack_logs/c-vol.log";

/// Number of `hnas_svcN_*` option pairs a backend may define
pub const MAX_SERVICES: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("backend '{0}' is enabled but has no [backends.{0}] section")]
    MissingBackend(String),
    #[error("backend '{0}' has no service with both hdp and pool name set")]
    NoServices(String),
    #[error("backend '{backend}': hdp '{hdp}' is not of the form <ip>:/<export>")]
    InvalidHdp { backend: String, hdp: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct HnasConfig {
    pub hnas: HnasSection,
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HnasSection {
    /// Names of the backend sections under test
    #[serde(default)]
    pub enabled_backends: Vec<String>,
    /// Host part of `host@backend#pool` used when managing volumes
    #[serde(default = "default_manage_host")]
    pub cinder_manage_host: String,
    #[serde(default = "default_volume_log_path")]
    pub volume_log_path: PathBuf,
}

fn default_manage_host() -> String {
    "localhost".to_string()
}

fn default_volume_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_VOLUME_LOG_PATH)
}

/// One HNAS backend, as configured for the cinder driver.
#[derive(Clone, Deserialize)]
pub struct BackendConfig {
    pub volume_backend_name: Option<String>,
    pub hnas_mgmt_ip0: IpAddr,
    pub hnas_username: String,
    pub hnas_password: Option<String>,
    /// Key for the management host login; preferred over the password
    pub hnas_ssh_private_key: Option<PathBuf>,
    pub hnas_ssh_port: Option<u16>,
    pub hnas_svc0_hdp: Option<String>,
    pub hnas_svc0_pool_name: Option<String>,
    pub hnas_svc1_hdp: Option<String>,
    pub hnas_svc1_pool_name: Option<String>,
    pub hnas_svc2_hdp: Option<String>,
    pub hnas_svc2_pool_name: Option<String>,
    pub hnas_svc3_hdp: Option<String>,
    pub hnas_svc3_pool_name: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("volume_backend_name", &self.volume_backend_name)
            .field("hnas_mgmt_ip0", &self.hnas_mgmt_ip0)
            .field("hnas_username", &self.hnas_username)
            .field("hnas_password", &self.hnas_password.as_ref().map(|_| "***"))
            .field("services", &self.services())
            .finish_non_exhaustive()
    }
}

impl BackendConfig {
    /// `(pool_name, hdp)` pairs for every service with both options set.
    pub fn services(&self) -> Vec<(String, String)> {
        let pairs = [
            (&self.hnas_svc0_pool_name, &self.hnas_svc0_hdp),
            (&self.hnas_svc1_pool_name, &self.hnas_svc1_hdp),
            (&self.hnas_svc2_pool_name, &self.hnas_svc2_hdp),
            (&self.hnas_svc3_pool_name, &self.hnas_svc3_hdp),
        ];
        pairs
            .into_iter()
            .filter_map(|(pool, hdp)| match (pool.as_deref(), hdp.as_deref()) {
                (Some(pool), Some(hdp)) if !pool.is_empty() && !hdp.is_empty() => {
                    Some((pool.to_string(), hdp.to_string()))
                }
                _ => None,
            })
            .collect()
    }

    /// SSH login to the management host.
    pub fn ssh_target(&self) -> SshTarget {
        SshTarget::new(self.hnas_mgmt_ip0.to_string(), self.hnas_username.clone())
            .with_password(self.hnas_password.clone())
            .with_private_key(self.hnas_ssh_private_key.clone())
            .with_port(self.hnas_ssh_port)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let services = self.services();
        if services.is_empty() {
            return Err(ConfigError::NoServices(name.to_string()));
        }
        for (_, hdp) in services {
            if split_hdp(&hdp).is_none() {
                return Err(ConfigError::InvalidHdp {
                    backend: name.to_string(),
                    hdp,
                });
            }
        }
        Ok(())
    }
}

/// Split an hdp such as `172.24.49.21:/nfs_cinder` into the EVS address and
/// the export path (`nfs_cinder`).
pub fn split_hdp(hdp: &str) -> Option<(&str, &str)> {
    let (ip, export) = hdp.split_once(":/")?;
    if ip.is_empty() || export.is_empty() {
        return None;
    }
    Some((ip, export))
}

impl HnasConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HnasConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Every enabled backend must have a section with at least one usable service.
    pub fn validate(&self) -> Result<()> {
        for name in &self.hnas.enabled_backends {
            self.backends
                .get(name)
                .ok_or_else(|| ConfigError::MissingBackend(name.clone()))?
                .validate(name)?;
        }
        Ok(())
    }

    /// Enabled backends in the order they are listed.
    pub fn enabled_backends(&self) -> Result<Vec<(&str, &BackendConfig)>> {
        self.hnas
            .enabled_backends
            .iter()
            .map(|name| {
                self.backends
                    .get(name)
                    .map(|backend| (name.as_str(), backend))
                    .ok_or_else(|| ConfigError::MissingBackend(name.clone()))
            })
            .collect()
    }

    pub fn backend(&self, name: &str) -> Result<&BackendConfig> {
        self.backends
            .get(name)
            .ok_or_else(|| ConfigError::MissingBackend(name.to_string()))
    }
}
