//! Snapshot builder: entry stream -> snapshot root on the content node
//!
//! Two modes:
//!   - bulk: upload every entry unpinned, record it in a [`DirectoryTree`],
//!     materialize the tree once and pin the resulting root
//!   - merge: link each entry into an existing root; the root address only
//!     moves when the entry is new or changed, and every moved root is pinned
//!     as it is adopted so each link is a durable checkpoint
//!
//! Entries are applied strictly in stream order, so the last write for a
//! path wins.

use ipt_core::{Cid, IptResult, TileEntry};
use ipt_storage::ContentNode;
use std::fmt;
use tracing::{debug, info, warn};

use crate::tree::DirectoryTree;

/// Progress callback type (entries_done, entries_total, message).
/// `entries_total` is 0 when the stream length is unknown.
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Entries merged between two garbage collections
pub const DEFAULT_GC_BATCH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Bulk,
    Merge,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Bulk => f.write_str("bulk"),
            BuildMode::Merge => f.write_str("merge"),
        }
    }
}

/// Counters for one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub entries: u64,
    /// Merge only: entries that moved the working root
    pub changed: u64,
    /// Merge only: entries already present with the same bytes
    pub unchanged: u64,
    pub bytes: u64,
    pub gc_runs: u64,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub root: Cid,
    pub mode: BuildMode,
    pub stats: BuildStats,
}

pub struct SnapshotBuilder<'a, N: ContentNode + ?Sized> {
    node: &'a N,
    gc_batch_size: usize,
    progress: Option<&'a ProgressFn>,
}

impl<'a, N: ContentNode + ?Sized> SnapshotBuilder<'a, N> {
    pub fn new(node: &'a N) -> Self {
        Self {
            node,
            gc_batch_size: DEFAULT_GC_BATCH,
            progress: None,
        }
    }

    pub fn gc_batch_size(mut self, n: usize) -> Self {
        self.gc_batch_size = n.max(1);
        self
    }

    pub fn progress(mut self, progress: Option<&'a ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    fn report(&self, done: u64, path: &str) {
        if let Some(cb) = self.progress {
            cb(done, 0, path);
        }
    }

    /// Build a fresh snapshot from every entry of the stream.
    pub async fn bulk<I>(&self, entries: I) -> IptResult<BuildOutcome>
    where
        I: Iterator<Item = IptResult<TileEntry>>,
    {
        let mut tree = DirectoryTree::new();
        let mut stats = BuildStats::default();

        for entry in entries {
            let entry = entry?;
            stats.bytes += entry.bytes.len() as u64;
            let cid = self.node.add(entry.bytes, false).await?;
            debug!(path = %entry.path, %cid, "uploaded");
            if tree.insert(&entry.path, cid)?.is_some() {
                debug!(path = %entry.path, "duplicate path, later entry wins");
            }
            stats.entries += 1;
            self.report(stats.entries, &entry.path);
        }

        let root = tree.materialize(self.node).await?;
        self.node.pin_add(&root).await?;
        info!(%root, entries = stats.entries, files = tree.len(), "bulk snapshot built");
        Ok(BuildOutcome {
            root,
            mode: BuildMode::Bulk,
            stats,
        })
    }

    /// Merge the stream into `base`, reusing everything that did not change.
    ///
    /// `base` itself is never unpinned here: it stays protected until the
    /// caller has published the new root.
    pub async fn merge<I>(&self, base: &Cid, entries: I) -> IptResult<BuildOutcome>
    where
        I: Iterator<Item = IptResult<TileEntry>>,
    {
        let mut working = base.clone();
        let mut working_pinned = false;
        let mut stats = BuildStats::default();

        let merged = self
            .merge_entries(base, entries, &mut working, &mut working_pinned, &mut stats)
            .await;
        if let Err(e) = merged {
            if working_pinned {
                // nothing references this root once the run is abandoned
                warn!(
                    root = %working,
                    entries = stats.entries,
                    "merge aborted, intermediate root left pinned: {e}"
                );
            }
            return Err(e);
        }

        info!(
            root = %working,
            entries = stats.entries,
            changed = stats.changed,
            unchanged = stats.unchanged,
            "merge complete"
        );
        Ok(BuildOutcome {
            root: working,
            mode: BuildMode::Merge,
            stats,
        })
    }

    async fn merge_entries<I>(
        &self,
        base: &Cid,
        entries: I,
        working: &mut Cid,
        working_pinned: &mut bool,
        stats: &mut BuildStats,
    ) -> IptResult<()>
    where
        I: Iterator<Item = IptResult<TileEntry>>,
    {
        for entry in entries {
            let entry = entry?;
            stats.bytes += entry.bytes.len() as u64;
            let cid = self.node.add(entry.bytes, false).await?;
            let next = self
                .node
                .patch_add_link(working, &entry.path, &cid)
                .await?;

            if next == *working {
                stats.unchanged += 1;
                debug!(path = %entry.path, "unchanged");
            } else {
                self.node.pin_add(&next).await?;
                if *working_pinned {
                    self.node.pin_rm(working).await?;
                }
                debug!(path = %entry.path, from = %working, to = %next, "working root advanced");
                // a root that returned to `base` keeps the caller's pin
                *working_pinned = next != *base;
                *working = next;
                stats.changed += 1;
            }

            stats.entries += 1;
            self.report(stats.entries, &entry.path);

            if stats.entries % self.gc_batch_size as u64 == 0 {
                self.collect_garbage(stats).await;
            }
        }
        Ok(())
    }

    async fn collect_garbage(&self, stats: &mut BuildStats) {
        match self.node.repo_gc().await {
            Ok(summary) => {
                stats.gc_runs += 1;
                debug!(removed = summary.removed, after = stats.entries, "gc pass");
                for e in summary.errors {
                    warn!("gc: {e}");
                }
            }
            Err(e) => warn!(after = stats.entries, "gc failed, continuing: {e}"),
        }
    }
}
