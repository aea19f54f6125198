//! Snapshot namer: tileset id -> naming key -> current snapshot root

use ipt_core::{Cid, IptError, IptResult, NamingKey, TileInfo};
use ipt_storage::ContentNode;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Naming keys owned by this tool are called `tiles-{tileset id}`
pub const KEY_PREFIX: &str = "tiles-";

pub fn key_name(tileset_id: &str) -> String {
    format!("{KEY_PREFIX}{tileset_id}")
}

/// Tileset id for a run: the explicit override, else the archive's own id.
///
/// The id names the naming key and the descriptor file, so path separators
/// and leading dots are rejected.
pub fn tileset_id(info: &TileInfo, explicit: Option<&str>) -> IptResult<String> {
    let id = explicit
        .or(info.id.as_deref())
        .map(str::trim)
        .unwrap_or_default();
    if id.is_empty() {
        return Err(IptError::Config(
            "no tileset id: pass --id or use an archive with a file name".into(),
        ));
    }
    if id.starts_with('.') || id.contains(['/', '\\']) {
        return Err(IptError::Config(format!("invalid tileset id {id:?}")));
    }
    Ok(id.to_string())
}

pub struct Namer<'a, N: ContentNode + ?Sized> {
    node: &'a N,
    key_type: String,
    probe_timeout: Duration,
}

impl<'a, N: ContentNode + ?Sized> Namer<'a, N> {
    pub fn new(node: &'a N, key_type: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            node,
            key_type: key_type.into(),
            probe_timeout,
        }
    }

    /// Existing key for `tileset_id`, if any
    pub async fn find_key(&self, tileset_id: &str) -> IptResult<Option<NamingKey>> {
        let name = key_name(tileset_id);
        let keys = self.node.key_list().await?;
        Ok(keys.into_iter().find(|k| k.name == name))
    }

    /// Return the tileset's key. When absent, create it if `create` is set,
    /// else fail with `UnknownTileset`.
    pub async fn resolve_key(&self, tileset_id: &str, create: bool) -> IptResult<NamingKey> {
        if let Some(key) = self.find_key(tileset_id).await? {
            debug!(key = %key.name, id = %key.id, "naming key found");
            return Ok(key);
        }
        if !create {
            return Err(IptError::UnknownTileset {
                id: tileset_id.to_string(),
            });
        }
        let key = self
            .node
            .key_gen(&key_name(tileset_id), &self.key_type)
            .await?;
        info!(key = %key.name, id = %key.id, "naming key created");
        Ok(key)
    }

    /// Root the key's stable name points at, or `None` when it never
    /// published, does not resolve, or the root is not retrievable in time.
    pub async fn resolve_current_root(&self, key: &NamingKey) -> Option<Cid> {
        let cid = match self.node.name_resolve(key).await {
            Ok(Some(cid)) => cid,
            Ok(None) => {
                debug!(key = %key.name, "no published root");
                return None;
            }
            Err(e) => {
                warn!(key = %key.name, "name resolution failed, treating as unpublished: {e}");
                return None;
            }
        };

        match tokio::time::timeout(self.probe_timeout, self.node.stat(&cid)).await {
            Ok(Ok(_)) => Some(cid),
            Ok(Err(e)) => {
                let stale = IptError::StaleReference { cid: cid.to_string() };
                warn!(key = %key.name, "{stale}: {e}");
                None
            }
            Err(_) => {
                let stale = IptError::StaleReference { cid: cid.to_string() };
                warn!(key = %key.name, timeout = ?self.probe_timeout, "{stale}: probe timed out");
                None
            }
        }
    }

    /// Every tileset key on the node, with its tileset id
    pub async fn list_tilesets(&self) -> IptResult<Vec<(String, NamingKey)>> {
        let keys = self.node.key_list().await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| {
                let id = k.name.strip_prefix(KEY_PREFIX)?.to_string();
                Some((id, k))
            })
            .collect())
    }
}
