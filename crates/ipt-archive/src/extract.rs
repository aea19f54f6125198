//! Tile extraction: archive -> lazy stream of snapshot entries
//!
//! The stream starts with exactly one `info.json` entry followed by one entry
//! per tile key, in the archive's native order. Tiles are fetched and
//! decoded one at a time as the consumer pulls, so a slow consumer slows
//! archive reads instead of buffering them.

use ipt_core::{IptResult, TileEntry, TileInfo, TileKey, INFO_ENTRY_PATH};
use tracing::{debug, trace};

use crate::encoding::decode_tile;
use crate::TileArchive;

/// Forward-only entry stream over one archive.
///
/// After the first error the stream ends; a run never continues past a
/// corrupt tile.
pub struct TileExtractor<'a, A: TileArchive + ?Sized> {
    archive: &'a A,
    format: String,
    info_entry: Option<TileEntry>,
    keys: Box<dyn Iterator<Item = IptResult<TileKey>> + 'a>,
    emitted: u64,
    failed: bool,
}

impl<'a, A: TileArchive + ?Sized> TileExtractor<'a, A> {
    /// Validate `info` and prepare the stream. Fails with `UnsupportedScheme`
    /// before any tile is read when the archive is not XYZ.
    pub fn new(archive: &'a A, info: &TileInfo) -> IptResult<Self> {
        info.validate()?;
        let info_entry = TileEntry::new(INFO_ENTRY_PATH, info.to_entry_bytes()?);
        Ok(Self {
            archive,
            format: info.format.clone(),
            info_entry: Some(info_entry),
            keys: archive.tile_keys(),
            emitted: 0,
            failed: false,
        })
    }

    /// Number of tile entries produced so far (the info entry not included).
    pub fn tiles_emitted(&self) -> u64 {
        self.emitted
    }

    fn next_tile(&mut self) -> Option<IptResult<TileEntry>> {
        let key = match self.keys.next()? {
            Ok(key) => key,
            Err(e) => return Some(Err(e)),
        };
        let entry = self
            .archive
            .get_tile(&key)
            .and_then(|raw| {
                trace!(tile = %key, encoding = ?raw.encoding, bytes = raw.data.len(), "read tile");
                decode_tile(&key, raw)
            })
            .map(|bytes| TileEntry::new(key.path(&self.format), bytes));
        Some(entry)
    }
}

impl<A: TileArchive + ?Sized> Iterator for TileExtractor<'_, A> {
    type Item = IptResult<TileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(info) = self.info_entry.take() {
            return Some(Ok(info));
        }
        let item = self.next_tile();
        match &item {
            Some(Ok(_)) => self.emitted += 1,
            Some(Err(e)) => {
                debug!(after = self.emitted, "tile extraction stopped: {e}");
                self.failed = true;
            }
            None => debug!(tiles = self.emitted, "tile extraction complete"),
        }
        item
    }
}

/// Read the archive's metadata and open its entry stream.
pub fn extract<A: TileArchive + ?Sized>(archive: &A) -> IptResult<(TileInfo, TileExtractor<'_, A>)> {
    let info = archive.info()?;
    let extractor = TileExtractor::new(archive, &info)?;
    Ok((info, extractor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryArchive;
    use ipt_core::IptError;

    fn info(scheme: Option<&str>) -> TileInfo {
        TileInfo {
            scheme: scheme.map(String::from),
            format: "png".into(),
            minzoom: Some(0),
            maxzoom: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn info_entry_comes_first_then_native_order() {
        let archive = MemoryArchive::new(info(Some("xyz")))
            .with_tile(TileKey::new(1, 1, 1).unwrap(), b"c".to_vec())
            .with_tile(TileKey::new(0, 0, 0).unwrap(), b"a".to_vec())
            .with_tile(TileKey::new(1, 0, 0).unwrap(), b"b".to_vec());

        let (_, extractor) = extract(&archive).unwrap();
        let paths: Vec<String> = extractor.map(|e| e.unwrap().path).collect();
        assert_eq!(paths, vec!["info.json", "1/1/1.png", "0/0/0.png", "1/0/0.png"]);
    }

    #[test]
    fn info_entry_is_info_json() {
        let archive = MemoryArchive::new(info(None));
        let (info, mut extractor) = extract(&archive).unwrap();
        let first = extractor.next().unwrap().unwrap();
        let parsed: TileInfo = serde_json::from_slice(&first.bytes).unwrap();
        assert_eq!(parsed, info);
        assert!(extractor.next().is_none());
        assert_eq!(extractor.tiles_emitted(), 0);
    }

    #[test]
    fn tms_archive_fails_before_reading_tiles() {
        let archive = MemoryArchive::new(info(Some("tms")))
            .with_tile(TileKey::new(0, 0, 0).unwrap(), b"a".to_vec());
        let err = extract(&archive).err().unwrap();
        assert!(matches!(err, IptError::UnsupportedScheme { .. }));
        assert_eq!(archive.tiles_read(), 0);
    }

    #[test]
    fn stream_stops_after_corrupt_tile() {
        let archive = MemoryArchive::new(info(None))
            .with_tile(TileKey::new(0, 0, 0).unwrap(), vec![0x1f, 0x8b, 0x08, 0x00])
            .with_tile(TileKey::new(1, 0, 0).unwrap(), b"fine".to_vec());

        let (_, mut extractor) = extract(&archive).unwrap();
        assert!(extractor.next().unwrap().is_ok());
        assert!(matches!(
            extractor.next(),
            Some(Err(IptError::CorruptTile { .. }))
        ));
        assert!(extractor.next().is_none());
        assert_eq!(archive.tiles_read(), 1);
    }

    #[test]
    fn uncompressed_vector_tile_streams_verbatim() {
        let pbf = vec![0x08, 0x1d, 0x1a, 0x03, b'a', b'b', b'c'];
        let archive = MemoryArchive::new(TileInfo {
            format: "pbf".into(),
            ..info(None)
        })
        .with_tile(TileKey::new(0, 0, 0).unwrap(), pbf.clone());

        let (_, extractor) = extract(&archive).unwrap();
        let entries: Vec<TileEntry> = extractor.map(|e| e.unwrap()).collect();
        assert_eq!(entries[1].path, "0/0/0.pbf");
        assert_eq!(entries[1].bytes, pbf);
    }
}
