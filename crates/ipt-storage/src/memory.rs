//! In-process content node for tests and dry runs
//!
//! Blocks are addressed by BLAKE3 over a type tag and their content.
//! Directory addresses derive from the sorted link table, so two directories
//! with the same links share one address no matter how they were assembled.
//! Garbage collection removes every block not reachable from a pin.

use async_trait::async_trait;
use ipt_core::{Cid, IptError, IptResult, NamingKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use crate::node::{BlockStat, ContentNode, GcSummary};

#[derive(Debug, Clone)]
enum Block {
    File(Vec<u8>),
    Dir(BTreeMap<String, Cid>),
}

impl Block {
    fn size(&self) -> u64 {
        match self {
            Block::File(data) => data.len() as u64,
            Block::Dir(links) => links
                .iter()
                .map(|(name, cid)| (name.len() + cid.as_str().len()) as u64)
                .sum(),
        }
    }
}

/// Call counters, read by tests to assert on node traffic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub add_calls: u64,
    /// Blocks stored that were not already present
    pub blocks_written: u64,
    pub patch_calls: u64,
    pub pin_adds: u64,
    pub pin_rms: u64,
    pub publishes: u64,
    pub gc_runs: u64,
    pub gc_removed: u64,
}

#[derive(Debug, Default)]
struct State {
    blocks: HashMap<Cid, Block>,
    pins: BTreeSet<Cid>,
    keys: BTreeMap<String, NamingKey>,
    names: HashMap<String, Cid>,
    stats: NodeStats,
    failures: HashMap<String, usize>,
}

impl State {
    /// Consume one call of `operation` against an injected failure budget.
    fn check(&mut self, operation: &str) -> IptResult<()> {
        match self.failures.get_mut(operation) {
            Some(0) => Err(IptError::storage(operation, "injected failure")),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn store(&mut self, block: Block) -> Cid {
        let cid = address(&block);
        if !self.blocks.contains_key(&cid) {
            self.stats.blocks_written += 1;
            self.blocks.insert(cid.clone(), block);
        }
        cid
    }

    fn dir(&self, cid: &Cid) -> IptResult<BTreeMap<String, Cid>> {
        match self.blocks.get(cid) {
            Some(Block::Dir(links)) => Ok(links.clone()),
            Some(Block::File(_)) => Err(IptError::storage("patch", format!("{cid} is not a directory"))),
            None => Err(IptError::storage("patch", format!("block {cid} not found"))),
        }
    }

    fn link(&mut self, parent: &Cid, segments: &[&str], child: &Cid) -> IptResult<Cid> {
        let mut links = self.dir(parent)?;
        let (name, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Err(IptError::storage("patch", "empty link path")),
        };
        let target = if rest.is_empty() {
            child.clone()
        } else {
            let sub = match links.get(*name) {
                Some(existing) => existing.clone(),
                None => self.store(Block::Dir(BTreeMap::new())),
            };
            self.link(&sub, rest, child)?
        };
        links.insert((*name).to_string(), target);
        Ok(self.store(Block::Dir(links)))
    }

    fn reachable(&self) -> BTreeSet<Cid> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<Cid> = self.pins.iter().cloned().collect();
        while let Some(cid) = stack.pop() {
            if !seen.insert(cid.clone()) {
                continue;
            }
            if let Some(Block::Dir(links)) = self.blocks.get(&cid) {
                stack.extend(links.values().cloned());
            }
        }
        seen
    }
}

fn address(block: &Block) -> Cid {
    let mut hasher = blake3::Hasher::new();
    let tag = match block {
        Block::File(data) => {
            hasher.update(b"file\0");
            hasher.update(data);
            "f"
        }
        Block::Dir(links) => {
            hasher.update(b"dir\0");
            for (name, cid) in links {
                hasher.update(name.as_bytes());
                hasher.update(b"\0");
                hasher.update(cid.as_str().as_bytes());
                hasher.update(b"\n");
            }
            "d"
        }
    };
    Cid::new(format!("b3{tag}{}", hasher.finalize().to_hex()))
}

/// Content node backed by process memory
#[derive(Debug, Default)]
pub struct MemoryNode {
    state: Mutex<State>,
    stat_delay: Mutex<Option<Duration>>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> IptResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| IptError::storage("memory_node", "state lock poisoned"))
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> NodeStats {
        self.lock().map(|s| s.stats.clone()).unwrap_or_default()
    }

    pub fn is_pinned(&self, cid: &Cid) -> bool {
        self.lock().map(|s| s.pins.contains(cid)).unwrap_or(false)
    }

    pub fn pinned(&self) -> Vec<Cid> {
        self.lock()
            .map(|s| s.pins.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_block(&self, cid: &Cid) -> bool {
        self.lock().map(|s| s.blocks.contains_key(cid)).unwrap_or(false)
    }

    pub fn block_count(&self) -> usize {
        self.lock().map(|s| s.blocks.len()).unwrap_or(0)
    }

    /// Drop a block as if the network lost it.
    pub fn forget(&self, cid: &Cid) {
        if let Ok(mut s) = self.lock() {
            s.blocks.remove(cid);
        }
    }

    /// Let `operation` succeed `after` more times, then fail every call.
    /// Operation names match the error `operation` field (`add`, `patch`,
    /// `pin/add`, `pin/rm`, `name/publish`, `repo/gc`, ...).
    pub fn fail_after(&self, operation: &str, after: usize) {
        if let Ok(mut s) = self.lock() {
            s.failures.insert(operation.to_string(), after);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut s) = self.lock() {
            s.failures.clear();
        }
    }

    /// Make every `stat` wait before answering, to simulate an unreachable block.
    pub fn set_stat_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.stat_delay.lock() {
            *d = Some(delay);
        }
    }
}

#[async_trait]
impl ContentNode for MemoryNode {
    async fn version(&self) -> IptResult<String> {
        self.lock()?.check("version")?;
        Ok(format!("memory-{}", env!("CARGO_PKG_VERSION")))
    }

    async fn add(&self, data: Vec<u8>, pin: bool) -> IptResult<Cid> {
        let mut s = self.lock()?;
        s.check("add")?;
        s.stats.add_calls += 1;
        let cid = s.store(Block::File(data));
        if pin {
            s.pins.insert(cid.clone());
        }
        Ok(cid)
    }

    async fn empty_directory(&self) -> IptResult<Cid> {
        let mut s = self.lock()?;
        s.check("object/new")?;
        Ok(s.store(Block::Dir(BTreeMap::new())))
    }

    async fn patch_add_link(&self, parent: &Cid, path: &str, child: &Cid) -> IptResult<Cid> {
        let mut s = self.lock()?;
        s.check("patch")?;
        s.stats.patch_calls += 1;
        if !s.blocks.contains_key(child) {
            return Err(IptError::storage("patch", format!("block {child} not found")));
        }
        let segments: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        s.link(parent, &segments, child)
    }

    async fn cat(&self, root: &Cid, path: &str) -> IptResult<Vec<u8>> {
        let s = self.lock()?;
        let mut current = root.clone();
        for segment in path.split('/').filter(|p| !p.is_empty()) {
            current = match s.blocks.get(&current) {
                Some(Block::Dir(links)) => links
                    .get(segment)
                    .cloned()
                    .ok_or_else(|| IptError::storage("cat", format!("no link named {segment:?}")))?,
                _ => return Err(IptError::storage("cat", format!("{current} is not a directory"))),
            };
        }
        match s.blocks.get(&current) {
            Some(Block::File(data)) => Ok(data.clone()),
            Some(Block::Dir(_)) => Err(IptError::storage("cat", "this dag node is a directory")),
            None => Err(IptError::storage("cat", format!("block {current} not found"))),
        }
    }

    async fn stat(&self, cid: &Cid) -> IptResult<BlockStat> {
        let delay = self.stat_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut s = self.lock()?;
        s.check("block/stat")?;
        s.blocks
            .get(cid)
            .map(|b| BlockStat {
                cid: cid.clone(),
                size: b.size(),
            })
            .ok_or_else(|| IptError::storage("block/stat", format!("block {cid} not found")))
    }

    async fn pin_add(&self, cid: &Cid) -> IptResult<()> {
        let mut s = self.lock()?;
        s.check("pin/add")?;
        if !s.blocks.contains_key(cid) {
            return Err(IptError::storage("pin/add", format!("block {cid} not found")));
        }
        s.stats.pin_adds += 1;
        s.pins.insert(cid.clone());
        Ok(())
    }

    async fn pin_rm(&self, cid: &Cid) -> IptResult<()> {
        let mut s = self.lock()?;
        s.check("pin/rm")?;
        if !s.pins.remove(cid) {
            return Err(IptError::storage("pin/rm", "not pinned or pinned indirectly"));
        }
        s.stats.pin_rms += 1;
        Ok(())
    }

    async fn key_list(&self) -> IptResult<Vec<NamingKey>> {
        let mut s = self.lock()?;
        s.check("key/list")?;
        Ok(s.keys.values().cloned().collect())
    }

    async fn key_gen(&self, name: &str, _key_type: &str) -> IptResult<NamingKey> {
        let mut s = self.lock()?;
        s.check("key/gen")?;
        if s.keys.contains_key(name) {
            return Err(IptError::storage("key/gen", format!("key with name '{name}' already exists")));
        }
        let id = format!("k51{}", &blake3::hash(name.as_bytes()).to_hex()[..40]);
        let key = NamingKey {
            name: name.to_string(),
            id,
        };
        s.keys.insert(name.to_string(), key.clone());
        Ok(key)
    }

    async fn key_rm(&self, name: &str) -> IptResult<()> {
        let mut s = self.lock()?;
        s.check("key/rm")?;
        match s.keys.remove(name) {
            Some(key) => {
                s.names.remove(&key.id);
                Ok(())
            }
            None => Err(IptError::storage("key/rm", format!("no key named {name} was found"))),
        }
    }

    async fn name_publish(&self, key: &NamingKey, cid: &Cid) -> IptResult<()> {
        let mut s = self.lock()?;
        s.check("name/publish")?;
        if !s.keys.contains_key(&key.name) {
            return Err(IptError::storage("name/publish", format!("no key named {}", key.name)));
        }
        s.stats.publishes += 1;
        s.names.insert(key.id.clone(), cid.clone());
        Ok(())
    }

    async fn name_resolve(&self, key: &NamingKey) -> IptResult<Option<Cid>> {
        let mut s = self.lock()?;
        s.check("name/resolve")?;
        Ok(s.names.get(&key.id).cloned())
    }

    async fn repo_gc(&self) -> IptResult<GcSummary> {
        let mut s = self.lock()?;
        s.check("repo/gc")?;
        let live = s.reachable();
        let before = s.blocks.len();
        s.blocks.retain(|cid, _| live.contains(cid));
        let removed = before - s.blocks.len();
        s.stats.gc_runs += 1;
        s.stats.gc_removed += removed as u64;
        Ok(GcSummary {
            removed,
            errors: Vec::new(),
        })
    }
}
