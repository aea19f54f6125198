//! MBTiles reader
//!
//! MBTiles stores tiles in TMS row order; this reader flips rows so every
//! key it hands out is XYZ. Tile keys are paged out of SQLite with
//! `LIMIT/OFFSET` in the table's own order so arbitrarily large archives
//! stream without loading the index into memory.

use ipt_core::{IptError, IptResult, TileInfo, TileKey};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{RawTile, TileArchive};

/// Rows fetched per key page
pub const KEY_PAGE_SIZE: i64 = 1000;

fn sql_err(context: &'static str) -> impl Fn(rusqlite::Error) -> IptError {
    move |e| IptError::Archive(format!("{context}: {e}"))
}

/// A read-only MBTiles archive
pub struct MbtilesArchive {
    conn: Connection,
    path: PathBuf,
}

impl MbtilesArchive {
    /// Open an `.mbtiles` file read-only.
    pub fn open(path: &Path) -> IptResult<Self> {
        if !path.is_file() {
            return Err(IptError::Archive(format!(
                "archive not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| IptError::Archive(format!("opening {}: {e}", path.display())))?;

        debug!(path = %path.display(), "opened mbtiles archive");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default tileset id: the file name without extension.
    fn file_stem(&self) -> Option<String> {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }

    fn zoom_range(&self) -> IptResult<Option<(u8, u8)>> {
        let (min, max): (Option<i64>, Option<i64>) = self
            .conn
            .query_row(
                "SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(sql_err("reading zoom range"))?;
        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((to_zoom(min)?, to_zoom(max)?))),
            _ => Ok(None),
        }
    }

    /// Geographic extent of the tiles present at `zoom`.
    fn tile_bounds(&self, zoom: u8) -> IptResult<Option<Vec<f64>>> {
        if zoom > ipt_core::types::MAX_ZOOM {
            return Ok(None);
        }
        let extent: Option<(i64, i64, i64, i64)> = self
            .conn
            .query_row(
                "SELECT MIN(tile_column), MAX(tile_column), MIN(tile_row), MAX(tile_row) \
                 FROM tiles WHERE zoom_level = ?1",
                params![i64::from(zoom)],
                |row| {
                    let cols: (Option<i64>, Option<i64>) = (row.get(0)?, row.get(1)?);
                    let rows: (Option<i64>, Option<i64>) = (row.get(2)?, row.get(3)?);
                    Ok(match (cols, rows) {
                        ((Some(a), Some(b)), (Some(c), Some(d))) => Some((a, b, c, d)),
                        _ => None,
                    })
                },
            )
            .map_err(sql_err("reading tile extent"))?;

        Ok(extent.map(|(min_x, max_x, min_row, max_row)| {
            let n = (1i64 << zoom) as f64;
            // TMS rows grow northwards
            let top_y = ((1i64 << zoom) - 1 - max_row) as f64;
            let bottom_y = ((1i64 << zoom) - 1 - min_row + 1) as f64;
            vec![
                tile_lon(min_x as f64, n),
                tile_lat(bottom_y, n),
                tile_lon((max_x + 1) as f64, n),
                tile_lat(top_y, n),
            ]
        }))
    }
}

fn tile_lon(x: f64, n: f64) -> f64 {
    x / n * 360.0 - 180.0
}

fn tile_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

fn to_zoom(v: i64) -> IptResult<u8> {
    u8::try_from(v).map_err(|_| IptError::Archive(format!("invalid zoom level {v}")))
}

fn parse_floats(name: &str, value: &str) -> IptResult<Vec<f64>> {
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| IptError::Archive(format!("metadata {name} = {value:?}: {e}")))
        })
        .collect()
}

fn parse_zoom(name: &str, value: &str) -> IptResult<u8> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|e| IptError::Archive(format!("metadata {name} = {value:?}: {e}")))
}

/// Fold the rows of the `metadata` table into a `TileInfo`.
pub fn info_from_metadata(rows: Vec<(String, String)>) -> IptResult<TileInfo> {
    let mut info = TileInfo::default();
    for (name, value) in rows {
        match name.as_str() {
            "id" => info.id = Some(value),
            "name" => info.name = Some(value),
            "description" => info.description = Some(value),
            "version" => info.version = Some(value),
            "attribution" => info.attribution = Some(value),
            "scheme" => info.scheme = Some(value),
            "format" => info.format = value,
            "minzoom" => info.minzoom = Some(parse_zoom(&name, &value)?),
            "maxzoom" => info.maxzoom = Some(parse_zoom(&name, &value)?),
            "bounds" => info.bounds = Some(parse_floats(&name, &value)?),
            "center" => info.center = Some(parse_floats(&name, &value)?),
            "json" => {
                let parsed: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(&value)
                        .map_err(|e| IptError::Archive(format!("metadata json: {e}")))?;
                for (k, v) in parsed {
                    if k == "vector_layers" {
                        info.vector_layers = Some(v);
                    } else {
                        info.extra.insert(k, v);
                    }
                }
            }
            _ => {
                info.extra.insert(name, serde_json::Value::String(value));
            }
        }
    }
    Ok(info)
}

impl TileArchive for MbtilesArchive {
    fn info(&self) -> IptResult<TileInfo> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM metadata")
            .map_err(sql_err("preparing metadata query"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(sql_err("reading metadata"))?
            .filter_map(|r| match r {
                Ok((name, Some(value))) => Some(Ok((name, value))),
                Ok((_, None)) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err("reading metadata row"))?;

        let mut info = info_from_metadata(rows)?;
        if info.id.is_none() {
            info.id = self.file_stem();
        }

        if info.minzoom.is_none() || info.maxzoom.is_none() {
            if let Some((min, max)) = self.zoom_range()? {
                info.minzoom.get_or_insert(min);
                info.maxzoom.get_or_insert(max);
            }
        }

        if info.bounds.is_none() {
            if let Some(maxzoom) = info.maxzoom {
                info.bounds = self.tile_bounds(maxzoom)?;
            }
        }

        if info.center.is_none() {
            if let (Some(b), Some(min), Some(max)) = (&info.bounds, info.minzoom, info.maxzoom) {
                if b.len() == 4 {
                    let range = max.saturating_sub(min);
                    let zoom = if range <= 1 { max } else { range / 2 + min };
                    info.center = Some(vec![
                        (b[2] - b[0]) / 2.0 + b[0],
                        (b[3] - b[1]) / 2.0 + b[1],
                        f64::from(zoom),
                    ]);
                }
            }
        }

        Ok(info)
    }

    fn tile_keys(&self) -> Box<dyn Iterator<Item = IptResult<TileKey>> + '_> {
        Box::new(KeyPages {
            conn: &self.conn,
            offset: 0,
            page: VecDeque::new(),
            exhausted: false,
        })
    }

    fn get_tile(&self, key: &TileKey) -> IptResult<RawTile> {
        let row = flip_row(key.zoom, i64::from(key.y));
        let data: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT tile_data FROM tiles \
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![i64::from(key.zoom), i64::from(key.x), row],
                |r| r.get(0),
            )
            .optional()
            .map_err(sql_err("reading tile"))?;

        match data {
            Some(data) => Ok(RawTile::sniffed(data)),
            None => Err(IptError::Archive(format!("tile {key} not found"))),
        }
    }
}

/// TMS row <-> XYZ y (the flip is its own inverse)
fn flip_row(zoom: u8, v: i64) -> i64 {
    (1i64 << zoom) - 1 - v
}

struct KeyPages<'a> {
    conn: &'a Connection,
    offset: i64,
    page: VecDeque<(i64, i64, i64)>,
    exhausted: bool,
}

impl KeyPages<'_> {
    fn fetch_page(&mut self) -> IptResult<()> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT zoom_level, tile_column, tile_row FROM tiles LIMIT ?1 OFFSET ?2",
            )
            .map_err(sql_err("preparing tile key query"))?;
        let rows = stmt
            .query_map(params![KEY_PAGE_SIZE, self.offset], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(sql_err("reading tile keys"))?
            .collect::<Result<Vec<(i64, i64, i64)>, _>>()
            .map_err(sql_err("reading tile key row"))?;

        if (rows.len() as i64) < KEY_PAGE_SIZE {
            self.exhausted = true;
        }
        self.offset += rows.len() as i64;
        self.page.extend(rows);
        Ok(())
    }
}

impl Iterator for KeyPages<'_> {
    type Item = IptResult<TileKey>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (z, x, row) = self.page.pop_front()?;
        Some(to_key(z, x, row))
    }
}

fn to_key(z: i64, x: i64, row: i64) -> IptResult<TileKey> {
    let zoom = to_zoom(z)?;
    if zoom > ipt_core::types::MAX_ZOOM {
        return Err(IptError::Archive(format!("invalid zoom level {z}")));
    }
    let y = flip_row(zoom, row);
    let x = u32::try_from(x).map_err(|_| IptError::Archive(format!("invalid column {x} at zoom {z}")))?;
    let y = u32::try_from(y).map_err(|_| IptError::Archive(format!("invalid row {row} at zoom {z}")))?;
    TileKey::new(zoom, x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_rows_fold_into_info() {
        let rows = vec![
            ("name".to_string(), "Test".to_string()),
            ("format".to_string(), "pbf".to_string()),
            ("minzoom".to_string(), "0".to_string()),
            ("maxzoom".to_string(), "14".to_string()),
            ("bounds".to_string(), "-180,-85.0511,180,85.0511".to_string()),
            ("center".to_string(), "2.35, 48.85, 5".to_string()),
            ("type".to_string(), "overlay".to_string()),
            (
                "json".to_string(),
                r#"{"vector_layers":[{"id":"water","fields":{}}],"tilestats":{}}"#.to_string(),
            ),
        ];
        let info = info_from_metadata(rows).unwrap();
        assert_eq!(info.name.as_deref(), Some("Test"));
        assert_eq!(info.format, "pbf");
        assert_eq!(info.maxzoom, Some(14));
        assert_eq!(info.center, Some(vec![2.35, 48.85, 5.0]));
        assert_eq!(info.bounds.as_ref().map(|b| b.len()), Some(4));
        assert_eq!(info.vector_layers.as_ref().unwrap()[0]["id"], "water");
        assert!(info.extra.contains_key("tilestats"));
        assert_eq!(info.extra["type"], "overlay");
    }

    #[test]
    fn bad_zoom_metadata_is_an_error() {
        let rows = vec![("minzoom".to_string(), "zero".to_string())];
        assert!(matches!(info_from_metadata(rows), Err(IptError::Archive(_))));
    }

    #[test]
    fn flip_row_is_involutive() {
        for zoom in 0..8u8 {
            for v in 0..(1i64 << zoom) {
                assert_eq!(flip_row(zoom, flip_row(zoom, v)), v);
            }
        }
        assert_eq!(flip_row(1, 0), 1);
    }

    #[test]
    fn world_tile_covers_web_mercator_extent() {
        let n = 1.0;
        assert_eq!(tile_lon(0.0, n), -180.0);
        assert_eq!(tile_lon(1.0, n), 180.0);
        assert!((tile_lat(0.0, n) - 85.0511).abs() < 1e-3);
        assert!((tile_lat(1.0, n) + 85.0511).abs() < 1e-3);
    }
}
