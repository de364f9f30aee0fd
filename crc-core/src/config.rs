//! Node configuration, loaded the way `authenticator::Authenticator::new`
//! loads its config: a `serde_json`-deserialized struct read from a file on
//! disk, plus a little validation performed once at startup.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

/// Optional bootstrap target: the existing network this node joins on
/// startup. Absent for the network's seed server.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// Display-only name of the remote host; never used for addressing.
    pub connect_to_host: String,
    #[serde(default = "default_bootstrap_addr")]
    pub connect_to_host_addr: Ipv4Addr,
    pub connect_to_port: u16,
}

fn default_bootstrap_addr() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: u64,
    pub server_name: String,
    #[serde(default)]
    pub server_info: String,
    pub port: u16,
    #[serde(default)]
    pub bootstrap: Option<BootstrapConfig>,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl NodeConfig {
    /// Reads and validates a `NodeConfig` from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<NodeConfig> {
        let file = fs::File::open(path)?;
        let config: NodeConfig = serde_json::from_reader(file)
            .map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::Config(
                "id 0 is reserved and cannot be used by a host".to_string(),
            ));
        }
        if self.server_name.is_empty() {
            return Err(Error::Config("server_name must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_id() {
        let config = NodeConfig {
            id: 0,
            server_name: "s1".to_string(),
            server_info: String::new(),
            port: 9000,
            bootstrap: None,
            log_file: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_name() {
        let config = NodeConfig {
            id: 1,
            server_name: String::new(),
            server_info: String::new(),
            port: 9000,
            bootstrap: None,
            log_file: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let config = NodeConfig {
            id: 1,
            server_name: "s1".to_string(),
            server_info: "seed server".to_string(),
            port: 9000,
            bootstrap: None,
            log_file: None,
        };
        assert!(config.validate().is_ok());
    }
}
