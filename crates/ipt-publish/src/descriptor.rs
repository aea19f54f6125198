//! TileJSON descriptor for front-end map clients.
//!
//! The document is disposable: it is recomputed on every run from the
//! archive info and whichever root is canonical after the run, and written to
//! `{tileset id}.json` through an OpenDAL operator.

use anyhow::Context;
use ipt_core::config::{LinkMode, PublishConfig};
use ipt_core::{Cid, IptResult, NamingKey, TileInfo};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const TILEJSON_VERSION: &str = "3.0.0";

/// Web Mercator extent, used when the archive declares no bounds
const WORLD_BOUNDS: [f64; 4] = [-180.0, -85.051_128_779_806_6, 180.0, 85.051_128_779_806_6];

/// Values that take precedence over the archive metadata
#[derive(Debug, Clone, Default)]
pub struct DescriptorOverrides {
    pub title: Option<String>,
    pub description: Option<String>,
    pub attribution: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileJson {
    pub tilejson: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub attribution: String,
    pub scheme: String,
    pub tiles: Vec<String>,
    pub minzoom: u8,
    pub maxzoom: u8,
    pub bounds: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<Vec<f64>>,
    /// Empty array for raster tilesets
    pub vector_layers: serde_json::Value,
}

/// URL prefix under which `{z}/{x}/{y}.{format}` resolves.
///
/// A fixed domain wins; otherwise the gateway serves either the stable
/// name (follows every republish) or the immutable root.
pub fn tile_prefix(publish: &PublishConfig, key: &NamingKey, root: &Cid) -> String {
    if let Some(domain) = publish.domain.as_deref().filter(|d| !d.trim().is_empty()) {
        return domain.trim_end_matches('/').to_string();
    }
    let gateway = publish.gateway.trim_end_matches('/');
    match publish.link_mode {
        LinkMode::Ipns => format!("{gateway}/ipns/{}", key.id),
        LinkMode::Ipfs => format!("{gateway}/ipfs/{root}"),
    }
}

pub fn build_descriptor(
    info: &TileInfo,
    tileset_id: &str,
    overrides: &DescriptorOverrides,
    prefix: &str,
) -> TileJson {
    let pick = |over: &Option<String>, meta: &Option<String>| {
        over.clone().or_else(|| meta.clone()).unwrap_or_default()
    };

    TileJson {
        tilejson: TILEJSON_VERSION.to_string(),
        name: overrides
            .title
            .clone()
            .or_else(|| info.name.clone())
            .unwrap_or_else(|| tileset_id.to_string()),
        description: pick(&overrides.description, &info.description),
        version: pick(&overrides.version, &info.version),
        attribution: pick(&overrides.attribution, &info.attribution),
        scheme: "xyz".to_string(),
        tiles: vec![format!("{prefix}/{{z}}/{{x}}/{{y}}.{}", info.format)],
        minzoom: info.minzoom.unwrap_or(0),
        maxzoom: info.maxzoom.unwrap_or(ipt_core::types::MAX_ZOOM),
        bounds: info
            .bounds
            .clone()
            .filter(|b| b.len() == 4)
            .unwrap_or_else(|| WORLD_BOUNDS.to_vec()),
        center: info.center.clone(),
        vector_layers: info
            .vector_layers
            .clone()
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
    }
}

pub fn descriptor_path(tileset_id: &str) -> String {
    format!("{tileset_id}.json")
}

/// Write the descriptor; returns its path relative to the operator root.
pub async fn write_descriptor(op: &Operator, tileset_id: &str, doc: &TileJson) -> IptResult<String> {
    let path = descriptor_path(tileset_id);
    let bytes = serde_json::to_vec_pretty(doc)?;
    op.write(&path, bytes)
        .await
        .with_context(|| format!("writing descriptor {path}"))?;
    info!(%path, tiles = ?doc.tiles, "descriptor written");
    Ok(path)
}

/// Remove a tileset's descriptor; a missing file is not an error.
pub async fn remove_descriptor(op: &Operator, tileset_id: &str) -> IptResult<()> {
    let path = descriptor_path(tileset_id);
    op.delete(&path)
        .await
        .with_context(|| format!("removing descriptor {path}"))?;
    debug!(%path, "descriptor removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipt_storage::memory_operator;

    fn key() -> NamingKey {
        NamingKey {
            name: "tiles-roads".into(),
            id: "k51roads".into(),
        }
    }

    fn info() -> TileInfo {
        TileInfo {
            name: Some("Roads".into()),
            attribution: Some("© contributors".into()),
            format: "pbf".into(),
            minzoom: Some(0),
            maxzoom: Some(14),
            center: Some(vec![2.35, 48.85, 10.0]),
            vector_layers: Some(serde_json::json!([{"id": "roads"}])),
            ..Default::default()
        }
    }

    #[test]
    fn prefix_modes() {
        let root = Cid::new("QmRoot");
        let mut publish = PublishConfig {
            gateway: "https://gw.example/".into(),
            ..Default::default()
        };
        assert_eq!(tile_prefix(&publish, &key(), &root), "https://gw.example/ipns/k51roads");

        publish.link_mode = LinkMode::Ipfs;
        assert_eq!(tile_prefix(&publish, &key(), &root), "https://gw.example/ipfs/QmRoot");

        publish.domain = Some("https://tiles.example.org/roads/".into());
        assert_eq!(tile_prefix(&publish, &key(), &root), "https://tiles.example.org/roads");

        publish.domain = Some(String::new());
        assert_eq!(tile_prefix(&publish, &key(), &root), "https://gw.example/ipfs/QmRoot");
    }

    #[test]
    fn template_uses_format_extension() {
        let doc = build_descriptor(&info(), "roads", &DescriptorOverrides::default(), "https://p");
        assert_eq!(doc.tiles, vec!["https://p/{z}/{x}/{y}.pbf"]);
        assert_eq!(doc.tilejson, "3.0.0");
        assert_eq!(doc.scheme, "xyz");
        assert_eq!(doc.maxzoom, 14);
        assert_eq!(doc.bounds, WORLD_BOUNDS.to_vec());
    }

    #[test]
    fn overrides_and_fallbacks() {
        let doc = build_descriptor(&info(), "roads", &DescriptorOverrides::default(), "p");
        assert_eq!(doc.name, "Roads");
        assert_eq!(doc.description, "");
        assert_eq!(doc.version, "");

        let overrides = DescriptorOverrides {
            title: Some("Custom".into()),
            description: Some("desc".into()),
            version: Some("2.0.0".into()),
            attribution: None,
        };
        let doc = build_descriptor(&info(), "roads", &overrides, "p");
        assert_eq!(doc.name, "Custom");
        assert_eq!(doc.description, "desc");
        assert_eq!(doc.version, "2.0.0");
        assert_eq!(doc.attribution, "© contributors");

        let bare = TileInfo {
            format: "png".into(),
            ..Default::default()
        };
        let doc = build_descriptor(&bare, "fallback-id", &DescriptorOverrides::default(), "p");
        assert_eq!(doc.name, "fallback-id");
        assert_eq!(doc.vector_layers, serde_json::json!([]));
        assert!(doc.center.is_none());
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["vector_layers"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn write_then_remove() {
        let op = memory_operator().unwrap();
        let doc = build_descriptor(&info(), "roads", &DescriptorOverrides::default(), "p");
        let path = write_descriptor(&op, "roads", &doc).await.unwrap();
        assert_eq!(path, "roads.json");

        let stored: TileJson = serde_json::from_slice(&op.read(&path).await.unwrap().to_vec()).unwrap();
        assert_eq!(stored, doc);

        remove_descriptor(&op, "roads").await.unwrap();
        assert!(!op.exists(&path).await.unwrap());
        // second removal is a no-op
        remove_descriptor(&op, "roads").await.unwrap();
    }
}
