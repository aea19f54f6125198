//! Deletion controller: drop a tileset's key, root pin and descriptor.

use ipt_core::{Cid, IptResult, NamingKey};
use ipt_storage::ContentNode;
use tracing::{debug, info, warn};

use crate::controller::Publisher;
use crate::descriptor::remove_descriptor;

#[derive(Debug, Clone)]
pub struct DeleteReport {
    pub tileset_id: String,
    pub key: NamingKey,
    pub root: Option<Cid>,
    pub unpinned: bool,
    pub descriptor_removed: bool,
}

impl<N: ContentNode + ?Sized> Publisher<'_, N> {
    /// Delete a tileset.
    ///
    /// Fails with `UnknownTileset` when no key exists. The key is removed
    /// unconditionally; unpinning the resolved root and removing the
    /// descriptor are best effort.
    pub async fn delete(&self, tileset_id: &str) -> IptResult<DeleteReport> {
        let node = self.node();
        let key = self.namer().resolve_key(tileset_id, false).await?;

        let root = match node.name_resolve(&key).await {
            Ok(root) => root,
            Err(e) => {
                debug!(key = %key.name, "name resolution failed: {e}");
                None
            }
        };

        node.key_rm(&key.name).await?;
        info!(tileset = %tileset_id, key = %key.name, "naming key removed");

        let mut unpinned = false;
        if let Some(root) = &root {
            match node.pin_rm(root).await {
                Ok(()) => {
                    unpinned = true;
                    info!(%root, "root unpinned");
                }
                Err(e) => warn!(%root, "could not unpin root: {e}"),
            }
        }

        let descriptor_removed = match remove_descriptor(self.output(), tileset_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(tileset = %tileset_id, "could not remove descriptor: {e}");
                false
            }
        };

        Ok(DeleteReport {
            tileset_id: tileset_id.to_string(),
            key,
            root,
            unpinned,
            descriptor_removed,
        })
    }
}
