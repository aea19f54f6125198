use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{IptError, IptResult};

/// Path of the synthetic metadata entry at the root of every snapshot
pub const INFO_ENTRY_PATH: &str = "info.json";

/// Highest zoom level accepted in a tile key
pub const MAX_ZOOM: u8 = 30;

/// XYZ address of one tile inside one archive revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// Build a key, rejecting coordinates outside `[0, 2^zoom)` or zoom > 30.
    pub fn new(zoom: u8, x: u32, y: u32) -> IptResult<Self> {
        if zoom > MAX_ZOOM {
            return Err(IptError::Archive(format!("zoom {zoom} exceeds {MAX_ZOOM}")));
        }
        let extent = 1u64 << zoom;
        if u64::from(x) >= extent || u64::from(y) >= extent {
            return Err(IptError::Archive(format!(
                "tile {zoom}/{x}/{y} outside the {extent}x{extent} grid"
            )));
        }
        Ok(Self { zoom, x, y })
    }

    /// Directory path of this tile in a snapshot: `{z}/{x}/{y}.{ext}`
    pub fn path(&self, ext: &str) -> String {
        format!("{}/{}/{}.{}", self.zoom, self.x, self.y, ext)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// One file of a snapshot: a tile or the `info.json` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl TileEntry {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }
}

/// Content address on the content network (opaque string form, e.g. `Qm…` / `bafy…`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn new(s: impl Into<String>) -> Self {
        Cid(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the `/ipfs/<cid>[/...]` form returned by name resolution.
    pub fn from_ipfs_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix("/ipfs/").unwrap_or(path);
        let cid = rest.split('/').next().unwrap_or_default();
        if cid.is_empty() {
            None
        } else {
            Some(Cid(cid.to_string()))
        }
    }

    pub fn ipfs_path(&self) -> String {
        format!("/ipfs/{}", self.0)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A naming key owned by the content node: `name` is local, `id` is the
/// public identifier that the stable name resolves under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingKey {
    pub name: String,
    pub id: String,
}

/// Archive metadata, read once per run.
///
/// Unknown metadata rows are kept in `extra` so `info.json` carries everything
/// the archive declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default)]
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_layers: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TileInfo {
    /// Declared tiling scheme; archives that omit it are addressed in XYZ.
    pub fn scheme(&self) -> &str {
        self.scheme.as_deref().unwrap_or("xyz")
    }

    /// Fail with `UnsupportedScheme` unless the scheme is `xyz`, and reject
    /// archives without a tile format (the entry paths need an extension).
    pub fn validate(&self) -> IptResult<()> {
        if self.scheme() != "xyz" {
            return Err(IptError::UnsupportedScheme {
                scheme: self.scheme().to_string(),
            });
        }
        if self.format.is_empty() {
            return Err(IptError::Archive("archive metadata has no tile format".into()));
        }
        Ok(())
    }

    /// Pretty JSON body of the `info.json` entry.
    pub fn to_entry_bytes(&self) -> IptResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
