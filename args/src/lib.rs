// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use config::AgentConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "inframanager")]
#[command(version)]
#[command(about = "Programs a P4 dataplane on behalf of the node's container networking", long_about = None)]
pub struct CmdArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Configuration file (YAML). Defaults to /etc/infra/inframanager-config.yaml if it exists"
    )]
    config: Option<PathBuf>,

    /// gRPC server address
    #[arg(
        long,
        value_name = "ADDRESS",
        help = "IP Address and port to listen for infra agent connections"
    )]
    grpc_address: Option<SocketAddr>,

    #[arg(
        long,
        value_name = "HOST:PORT",
        help = "Address of the P4Runtime server"
    )]
    p4rt_address: Option<String>,

    #[arg(long, value_name = "ID", help = "P4Runtime device id")]
    device_id: Option<u64>,

    #[arg(long, value_name = "N", help = "High 64 bits of the election id")]
    election_high: Option<u64>,

    #[arg(long, value_name = "N", help = "Low 64 bits of the election id")]
    election_low: Option<u64>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Endpoint store file (implies the file backend)"
    )]
    store_path: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = false,
        help = "Show configurable tracing targets and exit"
    )]
    show_tracing_targets: bool,

    #[arg(long, help = "generate tracing configuration as a string and exit")]
    tracing_config_generate: bool,

    #[arg(
        long,
        value_name = "tracing configuration",
        help = "Tracing config string as comma-separated sequence of tag=level, with level one in [off,error,warn,info,debug,trace].
Passing default=level sets the default log-level.
Passing all=level allows setting the log-level of all targets to level.
E.g. default=error,all=info,session=debug"
    )]
    tracing: Option<String>,
}

impl CmdArgs {
    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }
    pub fn show_tracing_targets(&self) -> bool {
        self.show_tracing_targets
    }
    pub fn tracing_config_generate(&self) -> bool {
        self.tracing_config_generate
    }
    pub fn tracing(&self) -> Option<&String> {
        self.tracing.as_ref()
    }

    /// Apply the command line overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut AgentConfig) {
        if let Some(addr) = self.grpc_address {
            config.infra_manager.addr = addr;
        }
        if let Some(addr) = &self.p4rt_address {
            config.client.addr.clone_from(addr);
        }
        if let Some(id) = self.device_id {
            config.device_id = id;
        }
        if let Some(high) = self.election_high {
            config.client.election_id.high = high;
        }
        if let Some(low) = self.election_low {
            config.client.election_id.low = low;
        }
        if let Some(path) = &self.store_path {
            config.store.backend = config::StoreBackend::File;
            config.store.path.clone_from(path);
        }
        if let Some(tracing) = &self.tracing {
            config.log_level = Some(tracing.clone());
        }
        debug!("Configuration after command line overrides: {config:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::StoreBackend;
    use pretty_assertions::assert_eq;

    #[test]
    fn no_flags_keep_the_file_values() {
        let args = CmdArgs::parse_from(["inframanager"]);
        let mut config = AgentConfig::default();
        args.apply(&mut config);
        assert_eq!(config, AgentConfig::default());
        assert!(args.config_path().is_none());
        assert!(args.tracing().is_none());
    }

    #[test]
    fn flags_override_the_file_values() {
        let args = CmdArgs::parse_from([
            "inframanager",
            "--config",
            "/tmp/im.yaml",
            "--grpc-address",
            "127.0.0.1:6000",
            "--p4rt-address",
            "switch:9559",
            "--device-id",
            "4",
            "--election-high",
            "1",
            "--election-low",
            "9",
            "--store-path",
            "/tmp/endpoints.json",
            "--tracing",
            "all=debug",
        ]);
        let mut config = AgentConfig::default();
        config.store.backend = StoreBackend::Memory;
        args.apply(&mut config);

        assert_eq!(args.config_path(), Some(&PathBuf::from("/tmp/im.yaml")));
        assert_eq!(args.tracing().map(String::as_str), Some("all=debug"));
        assert_eq!(config.infra_manager.addr.port(), 6000);
        assert_eq!(config.client.addr, "switch:9559");
        assert_eq!(config.device_id, 4);
        assert_eq!(config.client.election_id.high, 1);
        assert_eq!(config.client.election_id.low, 9);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.path, PathBuf::from("/tmp/endpoints.json"));
        assert_eq!(config.log_level.as_deref(), Some("all=debug"));
    }

    #[test]
    fn bad_grpc_address_is_rejected() {
        assert!(CmdArgs::try_parse_from(["inframanager", "--grpc-address", "nowhere"]).is_err());
    }
}
