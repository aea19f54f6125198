//! The content-node capability consumed by the publisher.
//!
//! Every method may suspend on the network. Addresses are opaque: the
//! publisher only compares them for equality.

use async_trait::async_trait;
use ipt_core::{Cid, IptResult, NamingKey};

/// Size information for a stored block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStat {
    pub cid: Cid,
    pub size: u64,
}

/// Outcome of a garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcSummary {
    pub removed: usize,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait ContentNode: Send + Sync {
    /// Node software version, used as a liveness check.
    async fn version(&self) -> IptResult<String>;

    /// Store bytes and return their address; `pin` protects them from gc.
    async fn add(&self, data: Vec<u8>, pin: bool) -> IptResult<Cid>;

    /// Address of an empty directory.
    async fn empty_directory(&self) -> IptResult<Cid>;

    /// Link `child` at `path` under directory `parent`, creating missing
    /// intermediate directories. Returns the new parent address; `parent`
    /// itself is untouched.
    async fn patch_add_link(&self, parent: &Cid, path: &str, child: &Cid) -> IptResult<Cid>;

    /// Bytes of the file at `path` under `root` (empty path = `root` itself).
    async fn cat(&self, root: &Cid, path: &str) -> IptResult<Vec<u8>>;

    /// Fetch block information; fails when the block is not retrievable.
    async fn stat(&self, cid: &Cid) -> IptResult<BlockStat>;

    async fn pin_add(&self, cid: &Cid) -> IptResult<()>;

    async fn pin_rm(&self, cid: &Cid) -> IptResult<()>;

    async fn key_list(&self) -> IptResult<Vec<NamingKey>>;

    async fn key_gen(&self, name: &str, key_type: &str) -> IptResult<NamingKey>;

    async fn key_rm(&self, name: &str) -> IptResult<()>;

    /// Point the stable name owned by `key` at `cid`.
    async fn name_publish(&self, key: &NamingKey, cid: &Cid) -> IptResult<()>;

    /// Current target of the stable name, `None` when it never published or
    /// cannot be resolved.
    async fn name_resolve(&self, key: &NamingKey) -> IptResult<Option<Cid>>;

    /// Reclaim unpinned blocks. Completes when the node finished its pass.
    async fn repo_gc(&self) -> IptResult<GcSummary>;
}
