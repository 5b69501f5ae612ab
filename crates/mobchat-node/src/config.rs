//! Node configuration.
//!
//! Loaded from an optional TOML file, then overlaid with `key=value`
//! arguments from the command line.

use anyhow::{bail, Context, Result};
use mobchat_crypto::PrivateKey;
use mobchat_network::{Advertise, NetworkConfig, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Listen port.
    pub port: u16,
    /// Address advertised when not public.
    pub address: Ipv4Addr,
    /// Comma-separated bootstrap `ip:port` entries.
    pub checkin: String,
    /// Advertise as server-capable.
    pub public: bool,
    /// Incoming peer slots.
    #[serde(alias = "maxincoming")]
    pub max_incoming: usize,
    /// Outgoing connection limit.
    #[serde(alias = "maxoutgoing")]
    pub max_outgoing: usize,
    /// Private key file; generated when missing.
    pub keyfile: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            address: Ipv4Addr::LOCALHOST,
            checkin: format!("127.0.0.1:{DEFAULT_PORT}"),
            public: true,
            max_incoming: 5,
            max_outgoing: 5,
            keyfile: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and `key=value` overrides.
    pub fn load(config_path: &Path, overrides: &[String]) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        for entry in overrides {
            let Some((key, value)) = entry.split_once('=') else {
                bail!("Expected key=value, got '{entry}'");
            };
            config.set(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    /// Apply one flat configuration entry.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "port" => self.port = value.parse().context("Invalid port")?,
            "address" => self.address = value.parse().context("Invalid address")?,
            "checkin" => self.checkin = value.to_string(),
            "public" => self.public = value.parse().context("Invalid public flag")?,
            "maxincoming" => self.max_incoming = value.parse().context("Invalid maxincoming")?,
            "maxoutgoing" => self.max_outgoing = value.parse().context("Invalid maxoutgoing")?,
            "keyfile" => self.keyfile = Some(PathBuf::from(value)),
            other => bail!("Unknown configuration key '{other}'"),
        }
        Ok(())
    }

    /// Network service settings for this node.
    pub fn network_config(&self, bootstrap: Vec<SocketAddr>) -> NetworkConfig {
        let advertise = if self.public {
            Advertise::Public
        } else {
            Advertise::Private(self.address)
        };
        NetworkConfig {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port),
            advertise,
            bootstrap,
            max_incoming: self.max_incoming,
            max_outgoing: self.max_outgoing,
            ..Default::default()
        }
    }

    /// Load the node key from the key file, or generate one (and write it
    /// there if a key file is configured).
    pub fn load_or_generate_key(&self) -> Result<PrivateKey> {
        match &self.keyfile {
            Some(path) if path.exists() => {
                let key = PrivateKey::load(path)
                    .with_context(|| format!("Failed to load key from {}", path.display()))?;
                info!(path = %path.display(), "Loaded node key");
                Ok(key)
            }
            Some(path) => {
                let key = PrivateKey::generate().context("Failed to generate node key")?;
                key.save(path)
                    .with_context(|| format!("Failed to write key to {}", path.display()))?;
                info!(path = %path.display(), "Generated new node key");
                Ok(key)
            }
            None => PrivateKey::generate().context("Failed to generate node key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.port, 9999);
        assert_eq!(config.checkin, "127.0.0.1:9999");
        assert!(config.public);
        assert_eq!(config.max_incoming, 5);
        assert_eq!(config.max_outgoing, 5);
    }

    #[test]
    fn test_overrides() {
        let overrides = vec![
            "port=4000".to_string(),
            "public=false".to_string(),
            "address=10.1.2.3".to_string(),
            "maxincoming=0".to_string(),
            "checkin=127.0.0.1:4001,127.0.0.1:4002".to_string(),
        ];
        let config = NodeConfig::load(Path::new("/nonexistent/mobchat.toml"), &overrides).unwrap();
        assert_eq!(config.port, 4000);
        assert!(!config.public);
        assert_eq!(config.max_incoming, 0);

        let network = config.network_config(Vec::new());
        assert_eq!(network.listen_addr.port(), 4000);
        assert_eq!(
            network.advertise,
            Advertise::Private(Ipv4Addr::new(10, 1, 2, 3))
        );
    }

    #[test]
    fn test_bad_overrides() {
        let mut config = NodeConfig::default();
        assert!(config.set("colour", "blue").is_err());
        assert!(config.set("port", "99999").is_err());
        assert!(NodeConfig::load(Path::new("/nonexistent"), &["port".to_string()]).is_err());
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "port = 5000\nmaxoutgoing = 2\n").unwrap();

        let config = NodeConfig::load(&path, &["public=false".to_string()]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_outgoing, 2);
        assert_eq!(config.max_incoming, 5);
        assert!(!config.public);
    }

    #[test]
    fn test_keyfile_generated_then_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            keyfile: Some(dir.path().join("node.key")),
            ..Default::default()
        };
        let first = config.load_or_generate_key().unwrap();
        let second = config.load_or_generate_key().unwrap();
        assert_eq!(first.id(), second.id());
    }
}
