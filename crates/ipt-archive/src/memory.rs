//! In-memory tile archive, used by tests and fixtures

use ipt_core::{IptError, IptResult, TileInfo, TileKey};
use std::cell::Cell;

use crate::{RawTile, TileArchive};

/// Tiles held in insertion order; insertion order is the native order.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    info: TileInfo,
    tiles: Vec<(TileKey, Vec<u8>)>,
    reads: Cell<usize>,
}

impl MemoryArchive {
    pub fn new(info: TileInfo) -> Self {
        Self {
            info,
            tiles: Vec::new(),
            reads: Cell::new(0),
        }
    }

    /// Append a tile (stored bytes, possibly gzip/zlib wrapped).
    pub fn with_tile(mut self, key: TileKey, data: Vec<u8>) -> Self {
        self.push_tile(key, data);
        self
    }

    /// Replace a tile in place, or append it when absent.
    pub fn push_tile(&mut self, key: TileKey, data: Vec<u8>) {
        match self.tiles.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = data,
            None => self.tiles.push((key, data)),
        }
    }

    pub fn info_mut(&mut self) -> &mut TileInfo {
        &mut self.info
    }

    /// Number of `get_tile` calls served so far
    pub fn tiles_read(&self) -> usize {
        self.reads.get()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TileArchive for MemoryArchive {
    fn info(&self) -> IptResult<TileInfo> {
        Ok(self.info.clone())
    }

    fn tile_keys(&self) -> Box<dyn Iterator<Item = IptResult<TileKey>> + '_> {
        Box::new(self.tiles.iter().map(|(k, _)| Ok(*k)))
    }

    fn get_tile(&self, key: &TileKey) -> IptResult<RawTile> {
        self.reads.set(self.reads.get() + 1);
        self.tiles
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, data)| RawTile::sniffed(data.clone()))
            .ok_or_else(|| IptError::Archive(format!("tile {key} not found")))
    }
}
