//! Node configuration: TOML file plus command-line overrides.

use serde::Deserialize;
use shared_types::NodeType;
use std::path::PathBuf;

/// Runtime configuration for a Trellis node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bootstrap coordinator address.
    pub bootstrap_addr: String,
    /// Published stream listen address (server-style and bridge nodes).
    pub listen_addr: Option<String>,
    /// Datagram bind address (client-style nodes).
    pub datagram_bind: Option<String>,
    /// Participant classification.
    pub node_type: NodeType,
    /// Whether this node relays onboarding for NAT-restricted joiners.
    pub is_bridge: bool,
    /// Identity/data directory. `None` runs with an ephemeral identity.
    pub data_dir: Option<PathBuf>,
    /// Build identifier announced on registration.
    pub build_id: String,
    /// Bootstrap join attempts before giving up.
    pub max_join_attempts: u32,
    /// Backchannel secret presented when acting as a bridge.
    pub bridge_secret: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bootstrap_addr: "127.0.0.1:9470".into(),
            listen_addr: Some("0.0.0.0:9471".into()),
            datagram_bind: None,
            node_type: NodeType::Server,
            is_bridge: false,
            data_dir: None,
            build_id: "dev".into(),
            max_join_attempts: 5,
            bridge_secret: None,
        }
    }
}

/// TOML shape of the config file; every field optional.
#[derive(Debug, Default, Deserialize)]
struct NodeConfigFile {
    bootstrap_addr: Option<String>,
    listen_addr: Option<String>,
    datagram_bind: Option<String>,
    node_type: Option<String>,
    is_bridge: Option<bool>,
    data_dir: Option<PathBuf>,
    build_id: Option<String>,
    max_join_attempts: Option<u32>,
    bridge_secret: Option<String>,
}

impl NodeConfig {
    /// Merge a TOML file over the defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let file: NodeConfigFile = toml::from_str(text)?;
        let mut config = Self::default();
        if let Some(v) = file.bootstrap_addr {
            config.bootstrap_addr = v;
        }
        if let Some(v) = file.listen_addr {
            config.listen_addr = Some(v);
        }
        if let Some(v) = file.datagram_bind {
            config.datagram_bind = Some(v);
        }
        if let Some(v) = file.node_type {
            config.node_type = parse_node_type(&v);
        }
        if let Some(v) = file.is_bridge {
            config.is_bridge = v;
        }
        if let Some(v) = file.data_dir {
            config.data_dir = Some(v);
        }
        if let Some(v) = file.build_id {
            config.build_id = v;
        }
        if let Some(v) = file.max_join_attempts {
            config.max_join_attempts = v;
        }
        if let Some(v) = file.bridge_secret {
            config.bridge_secret = Some(v);
        }
        // Client-style nodes do not publish a stream address.
        if config.node_type == NodeType::Client {
            config.listen_addr = None;
            if config.datagram_bind.is_none() {
                config.datagram_bind = Some("0.0.0.0:0".into());
            }
        }
        Ok(config)
    }

    /// Apply `--key value` style command-line overrides.
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), String> {
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let mut take = || {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("flag {flag} needs a value"))
            };
            match flag.as_str() {
                "--bootstrap" => self.bootstrap_addr = take()?,
                "--listen" => self.listen_addr = Some(take()?),
                "--datagram" => self.datagram_bind = Some(take()?),
                "--node-type" => {
                    self.node_type = parse_node_type(&take()?);
                    if self.node_type == NodeType::Client {
                        self.listen_addr = None;
                        if self.datagram_bind.is_none() {
                            self.datagram_bind = Some("0.0.0.0:0".into());
                        }
                    }
                }
                "--bridge" => self.is_bridge = true,
                "--bridge-secret" => self.bridge_secret = Some(take()?),
                "--data-dir" => self.data_dir = Some(PathBuf::from(take()?)),
                "--build-id" => self.build_id = take()?,
                "--config" => {
                    let path = take()?;
                    let text = std::fs::read_to_string(&path)
                        .map_err(|e| format!("read {path}: {e}"))?;
                    *self = Self::from_toml(&text).map_err(|e| format!("parse {path}: {e}"))?;
                }
                other => return Err(format!("unknown flag {other}")),
            }
        }
        Ok(())
    }
}

fn parse_node_type(s: &str) -> NodeType {
    match s {
        "client" => NodeType::Client,
        "bridge" => NodeType::Bridge,
        _ => NodeType::Server,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            bootstrap_addr = "198.51.100.1:9470"
            node_type = "client"
            "#,
        )
        .unwrap();
        assert_eq!(config.bootstrap_addr, "198.51.100.1:9470");
        assert_eq!(config.node_type, NodeType::Client);
        // Clients publish no stream address and get a datagram socket.
        assert!(config.listen_addr.is_none());
        assert!(config.datagram_bind.is_some());
    }

    #[test]
    fn args_override_in_order() {
        let mut config = NodeConfig::default();
        let args: Vec<String> = ["--bootstrap", "10.0.0.1:9470", "--bridge"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.apply_args(&args).unwrap();
        assert_eq!(config.bootstrap_addr, "10.0.0.1:9470");
        assert!(config.is_bridge);
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let mut config = NodeConfig::default();
        let args = vec!["--wat".to_string()];
        assert!(config.apply_args(&args).is_err());
    }
}
