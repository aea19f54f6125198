//! Transfer encodings of stored tiles
//!
//! Vector tiles are usually stored gzip-compressed inside MBTiles; the
//! published directory holds the plain payload so gateways can serve it
//! without a `Content-Encoding` header.

use flate2::read::{GzDecoder, ZlibDecoder};
use ipt_core::{IptError, IptResult, TileKey};
use std::io::Read;

use crate::RawTile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl TransferEncoding {
    /// Detect the wrapper from the first bytes of a stored tile.
    pub fn sniff(data: &[u8]) -> Self {
        match data {
            [0x1f, 0x8b, ..] => TransferEncoding::Gzip,
            // zlib with a 32K window, one header per compression level; a
            // looser CMF/FLG check also matches plain protobuf tiles
            [0x78, 0x01 | 0x5e | 0x9c | 0xda, ..] => TransferEncoding::Deflate,
            _ => TransferEncoding::Identity,
        }
    }

    /// HTTP `Content-Encoding` value, if any.
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            TransferEncoding::Identity => None,
            TransferEncoding::Gzip => Some("gzip"),
            TransferEncoding::Deflate => Some("deflate"),
        }
    }
}

/// Strip the transfer encoding of a tile, returning the payload.
///
/// A wrapper that fails to decode is a `CorruptTile` error.
pub fn decode_tile(key: &TileKey, tile: RawTile) -> IptResult<Vec<u8>> {
    let mut out = Vec::with_capacity(tile.data.len() * 2);
    let result = match tile.encoding {
        TransferEncoding::Identity => return Ok(tile.data),
        TransferEncoding::Gzip => GzDecoder::new(tile.data.as_slice()).read_to_end(&mut out),
        TransferEncoding::Deflate => ZlibDecoder::new(tile.data.as_slice()).read_to_end(&mut out),
    };
    result.map_err(|e| IptError::CorruptTile {
        key: key.to_string(),
        message: format!("{:?} decode failed: {e}", tile.encoding),
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn key() -> TileKey {
        TileKey::new(3, 2, 1).unwrap()
    }

    #[test]
    fn sniff_detects_wrappers() {
        assert_eq!(TransferEncoding::sniff(&gzip(b"pbf")), TransferEncoding::Gzip);
        assert_eq!(TransferEncoding::sniff(&zlib(b"pbf")), TransferEncoding::Deflate);
        assert_eq!(
            TransferEncoding::sniff(b"\x89PNG\r\n\x1a\n"),
            TransferEncoding::Identity
        );
        assert_eq!(TransferEncoding::sniff(b""), TransferEncoding::Identity);
        assert_eq!(TransferEncoding::sniff(b"\x1a"), TransferEncoding::Identity);
    }

    #[test]
    fn zlib_levels_sniff_as_deflate() {
        for level in [1, 6, 9] {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level));
            enc.write_all(b"pbf").unwrap();
            let data = enc.finish().unwrap();
            assert_eq!(TransferEncoding::sniff(&data), TransferEncoding::Deflate, "level {level}");
        }
    }

    #[test]
    fn raw_protobuf_with_zlib_like_prefix_is_untouched() {
        // 08 1d passes the generic CMF/FLG checksum but is a varint field tag
        let pbf = vec![0x08, 0x1d, 0x1a, 0x03, b'a', b'b', b'c'];
        assert_eq!(TransferEncoding::sniff(&pbf), TransferEncoding::Identity);
        let tile = RawTile::sniffed(pbf.clone());
        assert_eq!(decode_tile(&key(), tile).unwrap(), pbf);
    }

    #[test]
    fn gzip_tile_is_unwrapped() {
        let tile = RawTile::sniffed(gzip(b"vector tile payload"));
        assert_eq!(decode_tile(&key(), tile).unwrap(), b"vector tile payload");
    }

    #[test]
    fn deflate_tile_is_unwrapped() {
        let tile = RawTile::sniffed(zlib(b"deflated payload"));
        assert_eq!(decode_tile(&key(), tile).unwrap(), b"deflated payload");
    }

    #[test]
    fn identity_tile_is_untouched() {
        let png = b"\x89PNG\r\n\x1a\nrest".to_vec();
        let tile = RawTile::sniffed(png.clone());
        assert_eq!(decode_tile(&key(), tile).unwrap(), png);
    }

    #[test]
    fn truncated_gzip_is_corrupt() {
        let mut data = gzip(b"some longer payload that will be cut short");
        data.truncate(12);
        let err = decode_tile(&key(), RawTile::sniffed(data)).unwrap_err();
        match err {
            IptError::CorruptTile { key, .. } => assert_eq!(key, "3/2/1"),
            other => panic!("expected CorruptTile, got {other:?}"),
        }
    }

    #[test]
    fn header_values() {
        assert_eq!(TransferEncoding::Gzip.header_value(), Some("gzip"));
        assert_eq!(TransferEncoding::Identity.header_value(), None);
    }
}
