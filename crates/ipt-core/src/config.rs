use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration (loaded from ipfs-tiles.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IptConfig {
    pub node: NodeConfig,
    pub publish: PublishConfig,
    pub descriptor: DescriptorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Kubo RPC API endpoint
    pub api_url: String,
    /// Per-request timeout; repo gc on a large node can take minutes
    pub request_timeout_secs: u64,
    /// Upper bound for probing a previously published root
    pub probe_timeout_secs: u64,
    /// CID version used when adding tile bytes
    pub cid_version: u8,
}

/// How the descriptor addresses tiles when no fixed domain is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// `{gateway}/ipns/{key id}`: stable, follows every republish
    Ipns,
    /// `{gateway}/ipfs/{root}`: immutable, pinned to this snapshot
    Ipfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Public gateway used in tile links
    pub gateway: String,
    /// Fixed domain for tile links; overrides gateway + address when set
    pub domain: Option<String>,
    pub link_mode: LinkMode,
    /// Entries merged between two garbage collections
    pub gc_batch_size: usize,
    /// Key type for new naming keys
    pub key_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Directory that receives `{tileset id}.json`
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5001".into(),
            request_timeout_secs: 300,
            probe_timeout_secs: 10,
            cid_version: 0,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            gateway: "https://cloudflare-ipfs.com".into(),
            domain: None,
            link_mode: LinkMode::Ipns,
            gc_batch_size: 1000,
            key_type: "ed25519".into(),
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("public/static/tilejson"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl IptConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> crate::IptResult<()> {
        if self.publish.gc_batch_size == 0 {
            return Err(crate::IptError::Config(
                "publish.gc_batch_size must be at least 1".into(),
            ));
        }
        if !self.node.api_url.starts_with("http://") && !self.node.api_url.starts_with("https://")
        {
            return Err(crate::IptError::Config(format!(
                "node.api_url must be an http(s) URL, got {}",
                self.node.api_url
            )));
        }
        if self.node.cid_version > 1 {
            return Err(crate::IptError::Config(format!(
                "node.cid_version must be 0 or 1, got {}",
                self.node.cid_version
            )));
        }
        Ok(())
    }
}
