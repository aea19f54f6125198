//! Publication controller: drives one create/update run.
//!
//! Stages, in order:
//!   START -> RESOLVE_KEY -> RESOLVE_PREVIOUS -> BUILD -> COMPARE
//!         -> (PUBLISH | SKIP_PUBLISH) -> DESCRIPTOR_EMIT -> END
//!
//! The name repoint in PUBLISH is the only externally visible commit. A run
//! that fails earlier leaves the stable name on the previous root.

use ipt_archive::{TileArchive, TileExtractor};
use ipt_core::config::{IptConfig, PublishConfig};
use ipt_core::{Cid, IptError, IptResult, NamingKey};
use ipt_storage::ContentNode;
use opendal::Operator;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::builder::{BuildMode, BuildStats, ProgressFn, SnapshotBuilder};
use crate::descriptor::{build_descriptor, tile_prefix, write_descriptor, DescriptorOverrides, TileJson};
use crate::namer::{tileset_id, Namer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Create the naming key when missing; merge into any previous root
    Create,
    /// Require an existing key with a published root
    Update,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Create => f.write_str("create"),
            Flow::Update => f.write_str("update"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ResolveKey,
    ResolvePrevious,
    Build,
    Compare,
    Publish,
    SkipPublish,
    DescriptorEmit,
    End,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "START",
            Stage::ResolveKey => "RESOLVE_KEY",
            Stage::ResolvePrevious => "RESOLVE_PREVIOUS",
            Stage::Build => "BUILD",
            Stage::Compare => "COMPARE",
            Stage::Publish => "PUBLISH",
            Stage::SkipPublish => "SKIP_PUBLISH",
            Stage::DescriptorEmit => "DESCRIPTOR_EMIT",
            Stage::End => "END",
        };
        f.write_str(s)
    }
}

/// Per-run options (CLI flags on top of config)
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub flow: Flow,
    /// Overrides the archive's own id
    pub tileset_id: Option<String>,
    /// Bulk build even when a previous root exists
    pub force_full: bool,
    pub overrides: DescriptorOverrides,
}

impl PublishOptions {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            tileset_id: None,
            force_full: false,
            overrides: DescriptorOverrides::default(),
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub tileset_id: String,
    pub key: NamingKey,
    pub previous: Option<Cid>,
    /// Canonical root after the run (new if published, previous if skipped)
    pub root: Cid,
    pub published: bool,
    pub mode: BuildMode,
    pub stats: BuildStats,
    pub descriptor: TileJson,
    pub descriptor_path: String,
    pub stages: Vec<Stage>,
}

pub struct Publisher<'a, N: ContentNode + ?Sized> {
    node: &'a N,
    output: Operator,
    publish: PublishConfig,
    probe_timeout: Duration,
    progress: Option<ProgressFn>,
}

impl<'a, N: ContentNode + ?Sized> Publisher<'a, N> {
    pub fn new(node: &'a N, config: &IptConfig, output: Operator) -> Self {
        Self {
            node,
            output,
            publish: config.publish.clone(),
            probe_timeout: Duration::from_secs(config.node.probe_timeout_secs),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn namer(&self) -> Namer<'a, N> {
        Namer::new(self.node, self.publish.key_type.clone(), self.probe_timeout)
    }

    pub fn output(&self) -> &Operator {
        &self.output
    }

    pub(crate) fn node(&self) -> &'a N {
        self.node
    }

    /// Publish `archive` under its tileset id.
    pub async fn run<A: TileArchive + ?Sized>(
        &self,
        archive: &A,
        opts: &PublishOptions,
    ) -> IptResult<PublishReport> {
        let mut stages = Vec::new();
        let mut enter = |stage: Stage| {
            debug!(%stage, "stage");
            stages.push(stage);
        };

        enter(Stage::Start);
        let info = archive.info()?;
        // scheme and format are checked before any key or upload exists
        info.validate()?;
        let id = tileset_id(&info, opts.tileset_id.as_deref())?;
        info!(tileset = %id, flow = %opts.flow, "publication started");

        enter(Stage::ResolveKey);
        let namer = self.namer();
        let key = namer.resolve_key(&id, opts.flow == Flow::Create).await?;

        enter(Stage::ResolvePrevious);
        let previous = namer.resolve_current_root(&key).await;
        if opts.flow == Flow::Update && previous.is_none() {
            return Err(IptError::UnknownTileset { id });
        }
        match &previous {
            Some(root) => info!(tileset = %id, %root, "previous root"),
            None => info!(tileset = %id, "no previous root"),
        }

        enter(Stage::Build);
        let entries = TileExtractor::new(archive, &info)?;
        let builder = SnapshotBuilder::new(self.node)
            .gc_batch_size(self.publish.gc_batch_size)
            .progress(self.progress.as_ref());
        let outcome = match (&previous, opts.force_full) {
            (Some(base), false) => builder.merge(base, entries).await?,
            _ => builder.bulk(entries).await?,
        };

        enter(Stage::Compare);
        let published = previous.as_ref() != Some(&outcome.root);
        if published {
            enter(Stage::Publish);
            self.node.name_publish(&key, &outcome.root).await?;
            info!(tileset = %id, root = %outcome.root, key = %key.id, "stable name published");
            if let Some(old) = &previous {
                if let Err(e) = self.node.pin_rm(old).await {
                    warn!(root = %old, "could not unpin superseded root: {e}");
                }
            }
        } else {
            enter(Stage::SkipPublish);
            info!(tileset = %id, root = %outcome.root, "unchanged, stable name left as is");
        }

        enter(Stage::DescriptorEmit);
        let prefix = tile_prefix(&self.publish, &key, &outcome.root);
        let descriptor = build_descriptor(&info, &id, &opts.overrides, &prefix);
        let descriptor_path = write_descriptor(&self.output, &id, &descriptor).await?;

        enter(Stage::End);
        info!(
            tileset = %id,
            root = %outcome.root,
            mode = %outcome.mode,
            entries = outcome.stats.entries,
            published,
            "publication complete"
        );

        Ok(PublishReport {
            tileset_id: id,
            key,
            previous,
            root: outcome.root,
            published,
            mode: outcome.mode,
            stats: outcome.stats,
            descriptor,
            descriptor_path,
            stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipt_archive::MemoryArchive;
    use ipt_core::{TileInfo, TileKey};
    use ipt_storage::{memory_operator, MemoryNode};

    fn archive() -> MemoryArchive {
        MemoryArchive::new(TileInfo {
            id: Some("demo".into()),
            format: "png".into(),
            minzoom: Some(0),
            maxzoom: Some(1),
            ..Default::default()
        })
        .with_tile(TileKey::new(0, 0, 0).unwrap(), b"t000".to_vec())
        .with_tile(TileKey::new(1, 0, 0).unwrap(), b"t100".to_vec())
    }

    fn publisher(node: &MemoryNode) -> Publisher<'_, MemoryNode> {
        Publisher::new(node, &IptConfig::default(), memory_operator().unwrap())
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::SkipPublish.to_string(), "SKIP_PUBLISH");
        assert_eq!(Stage::DescriptorEmit.to_string(), "DESCRIPTOR_EMIT");
    }

    #[tokio::test]
    async fn first_create_walks_publish_path() {
        let node = MemoryNode::new();
        let report = publisher(&node)
            .run(&archive(), &PublishOptions::new(Flow::Create))
            .await
            .unwrap();
        assert_eq!(
            report.stages,
            vec![
                Stage::Start,
                Stage::ResolveKey,
                Stage::ResolvePrevious,
                Stage::Build,
                Stage::Compare,
                Stage::Publish,
                Stage::DescriptorEmit,
                Stage::End,
            ]
        );
        assert_eq!(report.mode, BuildMode::Bulk);
        assert!(report.published);
        assert_eq!(node.name_resolve(&report.key).await.unwrap(), Some(report.root));
    }

    #[tokio::test]
    async fn second_create_skips_publish() {
        let node = MemoryNode::new();
        let p = publisher(&node);
        let first = p.run(&archive(), &PublishOptions::new(Flow::Create)).await.unwrap();
        let second = p.run(&archive(), &PublishOptions::new(Flow::Create)).await.unwrap();
        assert_eq!(second.mode, BuildMode::Merge);
        assert_eq!(second.root, first.root);
        assert!(!second.published);
        assert!(second.stages.contains(&Stage::SkipPublish));
        assert!(second.stages.contains(&Stage::DescriptorEmit));
        assert_eq!(node.stats().publishes, 1);
    }

    #[tokio::test]
    async fn update_requires_published_root() {
        let node = MemoryNode::new();
        let p = publisher(&node);
        let err = p.run(&archive(), &PublishOptions::new(Flow::Update)).await.unwrap_err();
        assert!(matches!(err, IptError::UnknownTileset { .. }));

        // key exists but never published
        p.namer().resolve_key("demo", true).await.unwrap();
        let err = p.run(&archive(), &PublishOptions::new(Flow::Update)).await.unwrap_err();
        assert!(matches!(err, IptError::UnknownTileset { .. }));
    }

    #[tokio::test]
    async fn publish_failure_leaves_name_untouched() {
        let node = MemoryNode::new();
        let p = publisher(&node);
        let first = p.run(&archive(), &PublishOptions::new(Flow::Create)).await.unwrap();

        let mut changed = archive();
        changed.push_tile(TileKey::new(1, 1, 1).unwrap(), b"t111".to_vec());
        node.fail_after("name/publish", 0);
        let err = p.run(&changed, &PublishOptions::new(Flow::Update)).await.unwrap_err();
        assert!(matches!(err, IptError::StorageUnavailable { .. }));
        assert_eq!(node.name_resolve(&first.key).await.unwrap(), Some(first.root.clone()));
        assert!(node.is_pinned(&first.root));
    }
}
