// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The agent configuration, as read from the YAML config file.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{ConfigError, ConfigResult};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/infra/inframanager-config.yaml";
pub const DEFAULT_STORE_PATH: &str = "/var/lib/inframanager/endpoints.json";
pub const DEFAULT_GRPC_PORT: u16 = 50002;
pub const DEFAULT_P4RT_ADDRESS: &str = "127.0.0.1:9559";
pub const DEFAULT_DEVICE_ID: u64 = 1;
pub const DEFAULT_ELECTION_TIMEOUT_SECS: u64 = 5;

/// Top level configuration of the infra manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentConfig {
    pub infra_manager: InfraManagerConfig,
    pub client: ClientConfig,
    pub device_id: u64,
    pub p4_pipeline: Option<PipelineConfig>,
    pub store: StoreConfig,
    pub dataplane: DataplaneConfig,
    /// Tracing config string, `tag=level` items separated by commas.
    #[serde(alias = "tracing")]
    pub log_level: Option<String>,
    /// Deadline applied to each provisioning request, if any.
    pub request_timeout_secs: Option<u64>,
}

/// The service front listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct InfraManagerConfig {
    pub addr: SocketAddr,
    /// HTTP/2 and TCP keepalive interval in seconds.
    pub keepalive: Option<u64>,
}

/// The connection to the P4Runtime server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientConfig {
    /// `host:port` of the P4Runtime server.
    pub addr: String,
    pub election_id: ElectionIdConfig,
    pub election_timeout_secs: u64,
    pub arbitration_retry_secs: u64,
    /// Keep running as backup if primary is not granted in time.
    pub tolerate_backup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElectionIdConfig {
    pub high: u64,
    pub low: u64,
}

/// Forwarding pipeline to push to the device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineConfig {
    pub bin_path: Option<PathBuf>,
    pub p4_info_path: Option<PathBuf>,
    pub cookie: u64,
    pub set_on_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

/// P4Info ids of the tables, match fields and actions used to steer traffic to endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct DataplaneConfig {
    pub mac_table_id: u32,
    pub mac_match_field_id: u32,
    pub ipv4_table_id: u32,
    pub ipv4_match_field_id: u32,
    pub endpoint_action_id: u32,
    pub host_action_id: u32,
    pub port_param_id: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            infra_manager: InfraManagerConfig::default(),
            client: ClientConfig::default(),
            device_id: DEFAULT_DEVICE_ID,
            p4_pipeline: None,
            store: StoreConfig::default(),
            dataplane: DataplaneConfig::default(),
            log_level: None,
            request_timeout_secs: None,
        }
    }
}

impl Default for InfraManagerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_GRPC_PORT)),
            keepalive: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_P4RT_ADDRESS.to_string(),
            election_id: ElectionIdConfig::default(),
            election_timeout_secs: DEFAULT_ELECTION_TIMEOUT_SECS,
            arbitration_retry_secs: 1,
            tolerate_backup: false,
        }
    }
}

impl Default for ElectionIdConfig {
    fn default() -> Self {
        Self { high: 0, low: 1 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            mac_table_id: 0x0200_0001,
            mac_match_field_id: 1,
            ipv4_table_id: 0x0200_0002,
            ipv4_match_field_id: 1,
            endpoint_action_id: 0x0100_0001,
            host_action_id: 0x0100_0002,
            port_param_id: 1,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn election_timeout(&self) -> Duration {
        Duration::from_secs(self.election_timeout_secs)
    }
    #[must_use]
    pub fn arbitration_retry(&self) -> Duration {
        Duration::from_secs(self.arbitration_retry_secs)
    }
}

impl AgentConfig {
    /// Parse a configuration from YAML text. Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if the text is not a valid configuration document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Read and parse the config file at `path`. The result is not validated.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file can't be read, [`ConfigError::Parse`] if it is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the configuration. An explicitly requested file must exist; when none was requested
    /// the default location is tried and, if absent, the built-in defaults are used.
    ///
    /// # Errors
    ///
    /// Any error of [`AgentConfig::from_file`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    warn!("No config file at {DEFAULT_CONFIG_PATH}, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Check the configuration for values the agent can't run with.
    ///
    /// # Errors
    ///
    /// The first problem found, as a [`ConfigError`].
    pub fn validate(&self) -> ConfigResult {
        debug!("Validating configuration");
        if self.device_id == 0 {
            return Err(ConfigError::ZeroDeviceId);
        }
        let election = self.client.election_id;
        if election.high == 0 && election.low == 0 {
            return Err(ConfigError::ZeroElectionId);
        }
        if self.client.election_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("client.electionTimeoutSecs"));
        }
        if self.client.addr.rsplit_once(':').is_none() {
            return Err(ConfigError::BadAddress(
                self.client.addr.clone(),
                "expected host:port",
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout("requestTimeoutSecs"));
        }
        self.dataplane.validate()?;
        if let Some(pipeline) = &self.p4_pipeline
            && pipeline.set_on_start
        {
            if pipeline.bin_path.is_none() {
                return Err(ConfigError::MissingPipelinePath("p4Pipeline.binPath"));
            }
            if pipeline.p4_info_path.is_none() {
                return Err(ConfigError::MissingPipelinePath("p4Pipeline.p4InfoPath"));
            }
        }
        Ok(())
    }
}

impl DataplaneConfig {
    fn validate(&self) -> ConfigResult {
        let ids = [
            (self.mac_table_id, "dataplane.macTableId"),
            (self.mac_match_field_id, "dataplane.macMatchFieldId"),
            (self.ipv4_table_id, "dataplane.ipv4TableId"),
            (self.ipv4_match_field_id, "dataplane.ipv4MatchFieldId"),
            (self.endpoint_action_id, "dataplane.endpointActionId"),
            (self.host_action_id, "dataplane.hostActionId"),
            (self.port_param_id, "dataplane.portParamId"),
        ];
        match ids.iter().find(|(id, _)| *id == 0) {
            Some((_, name)) => Err(ConfigError::MissingDataplaneId(*name)),
            None => Ok(()),
        }
    }
}
