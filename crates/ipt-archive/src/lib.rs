//! ipt-archive: read tiles out of a single-file tile archive
//!
//! # Overview
//! - `mbtiles`: SQLite-backed MBTiles reader (metadata + XYZ tile access)
//! - `encoding`: transfer-encoding sniffing and gzip/zlib unwrapping
//! - `extract`: lazy `(path, bytes)` entry stream consumed by the publisher
//! - `memory`: in-memory archive for tests

pub mod encoding;
pub mod extract;
pub mod mbtiles;
pub mod memory;

use ipt_core::{IptResult, TileInfo, TileKey};

pub use encoding::{decode_tile, TransferEncoding};
pub use extract::{extract, TileExtractor};
pub use mbtiles::MbtilesArchive;
pub use memory::MemoryArchive;

/// Raw tile payload as stored in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTile {
    pub data: Vec<u8>,
    pub encoding: TransferEncoding,
}

impl RawTile {
    /// Wrap stored bytes, sniffing the transfer encoding from magic bytes.
    pub fn sniffed(data: Vec<u8>) -> Self {
        let encoding = TransferEncoding::sniff(&data);
        Self { data, encoding }
    }
}

/// Read access to a tile archive.
///
/// Key enumeration is forward-only; callers needing a second pass must ask
/// for a fresh iterator.
pub trait TileArchive {
    /// Archive metadata.
    fn info(&self) -> IptResult<TileInfo>;

    /// Tile coordinates in the archive's native order.
    fn tile_keys(&self) -> Box<dyn Iterator<Item = IptResult<TileKey>> + '_>;

    /// Stored bytes of one tile.
    fn get_tile(&self, key: &TileKey) -> IptResult<RawTile>;
}
