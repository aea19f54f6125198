//! Path-prefix map of a snapshot directory, used by bulk builds.
//!
//! Each directory is keyed by its path prefix (`""` is the root, `"3/4"` the
//! column directory of zoom 3, x 4) and holds the file links directly below
//! it. Subdirectory links are derived when the tree is materialized on the
//! node, deepest directories first.

use ipt_core::{Cid, IptError, IptResult};
use ipt_storage::ContentNode;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DirectoryTree {
    dirs: BTreeMap<String, BTreeMap<String, Cid>>,
    files: usize,
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &str) -> IptResult<(String, String)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.split_last() {
        Some((name, parents)) => Ok((parents.join("/"), (*name).to_string())),
        None => Err(IptError::Archive(format!("empty entry path {path:?}"))),
    }
}

fn parent_of(prefix: &str) -> Option<(&str, &str)> {
    if prefix.is_empty() {
        return None;
    }
    Some(match prefix.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", prefix),
    })
}

impl DirectoryTree {
    pub fn new() -> Self {
        let mut dirs = BTreeMap::new();
        dirs.insert(String::new(), BTreeMap::new());
        Self { dirs, files: 0 }
    }

    /// Number of distinct file paths
    pub fn len(&self) -> usize {
        self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files == 0
    }

    pub fn get(&self, path: &str) -> Option<&Cid> {
        let (prefix, name) = split_path(path).ok()?;
        self.dirs.get(&prefix)?.get(&name)
    }

    /// Link `cid` at `path`. A later insert for the same path wins; the
    /// displaced address is returned.
    pub fn insert(&mut self, path: &str, cid: Cid) -> IptResult<Option<Cid>> {
        let (prefix, name) = split_path(path)?;
        let full = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if self.dirs.contains_key(&full) {
            return Err(IptError::Archive(format!("{path} is already a directory")));
        }

        // refuse to descend through a file, then register every ancestor
        let mut ancestors = Vec::new();
        let mut current = prefix.as_str();
        while let Some((parent, dir_name)) = parent_of(current) {
            if self.dirs.get(parent).is_some_and(|links| links.contains_key(dir_name)) {
                return Err(IptError::Archive(format!("{current} is already a file")));
            }
            ancestors.push(current.to_string());
            current = parent;
        }
        for dir in ancestors {
            self.dirs.entry(dir).or_default();
        }

        let previous = self.dirs.entry(prefix).or_default().insert(name, cid);
        if previous.is_none() {
            self.files += 1;
        }
        Ok(previous)
    }

    /// Write every directory to the node and return the root address.
    ///
    /// Only `empty_directory` and `patch_add_link` are used, so the root is
    /// the same address an entry-by-entry merge of the same files reaches.
    pub async fn materialize<N: ContentNode + ?Sized>(&self, node: &N) -> IptResult<Cid> {
        let mut pending = self.dirs.clone();
        let mut order: Vec<String> = pending.keys().cloned().collect();
        order.sort_by_key(|prefix| std::cmp::Reverse(depth(prefix)));

        let empty = node.empty_directory().await?;
        let mut root = empty.clone();
        for prefix in order {
            let links = pending.remove(&prefix).unwrap_or_default();
            let mut dir = empty.clone();
            for (name, child) in &links {
                dir = node.patch_add_link(&dir, name, child).await?;
            }
            debug!(dir = %prefix, links = links.len(), cid = %dir, "directory materialized");
            match parent_of(&prefix) {
                Some((parent, name)) => {
                    pending
                        .entry(parent.to_string())
                        .or_default()
                        .insert(name.to_string(), dir);
                }
                None => root = dir,
            }
        }
        Ok(root)
    }
}

fn depth(prefix: &str) -> usize {
    if prefix.is_empty() {
        0
    } else {
        prefix.matches('/').count() + 1
    }
}
