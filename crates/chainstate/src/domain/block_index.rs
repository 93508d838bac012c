//! # Block Index
//!
//! Arena of every block header ever seen, arranged as a tree.
//!
//! Entries are addressed by [`EntryId`] (their position in the arena) and
//! looked up by hash. Each entry points at its parent by id; children are
//! tracked in a separate multimap that plays no part in ownership. Entries
//! are never removed while the index lives. Invalid ones stay behind as
//! tombstones so the same block is not processed twice.
//!
//! Headers whose parent is unknown are stored unlinked. They are wired into
//! the tree, with height, work and skip pointer, as soon as the parent
//! arrives.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

use primitive_types::U256;
use shared_types::{BlockHeader, Hash};

use super::abla::AblaState;
use super::error::{ChainstateError, ChainstateResult};
use super::status::{BlockStatus, BlockValidity};

/// Number of ancestors (including the entry) in the median-time-past window.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Position of an entry in the index arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u32);

impl EntryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One known block header and what has been learned about it.
#[derive(Debug, Clone)]
pub struct BlockIndexEntry {
    pub hash: Hash,
    pub header: BlockHeader,
    /// Parent entry. `None` for genesis and for unlinked orphans.
    pub parent: Option<EntryId>,
    /// Skip-list ancestor for logarithmic ancestor lookup.
    pub skip: Option<EntryId>,
    /// False while the parent is unknown.
    pub linked: bool,
    pub height: u64,
    /// Total work of the chain ending here.
    pub chain_work: U256,
    pub status: BlockStatus,
    /// Order in which the header was first seen. Breaks work ties.
    pub sequence_id: u64,
    /// Block body is available.
    pub has_data: bool,
    /// This block and every ancestor have their body available.
    pub chain_data_complete: bool,
    /// Serialized size of the body, once known.
    pub block_size: Option<u64>,
    /// Adaptive limit state, set once the block is connected with the
    /// adaptive limit active.
    pub abla_state: Option<AblaState>,
}

impl BlockIndexEntry {
    pub fn time(&self) -> u64 {
        self.header.timestamp
    }

    pub fn is_genesis(&self) -> bool {
        self.linked && self.parent.is_none()
    }
}

/// Height of the skip pointer for an entry at `height`.
pub fn get_skip_height(height: u64) -> u64 {
    fn invert_lowest_one(n: u64) -> u64 {
        n & n.wrapping_sub(1)
    }

    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// The block-header tree.
#[derive(Debug, Default)]
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
    by_hash: HashMap<Hash, EntryId>,
    children: HashMap<EntryId, Vec<EntryId>>,
    /// Unlinked entries keyed by the parent hash they wait for.
    unlinked: HashMap<Hash, Vec<EntryId>>,
    genesis: Option<EntryId>,
    next_sequence: u64,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn genesis(&self) -> Option<EntryId> {
        self.genesis
    }

    pub fn lookup(&self, hash: &Hash) -> Option<EntryId> {
        self.by_hash.get(hash).copied()
    }

    /// Entry by id.
    ///
    /// Ids are only handed out by this index, so a missing id means the
    /// index was cleared under the caller.
    pub fn get(&self, id: EntryId) -> &BlockIndexEntry {
        &self.entries[id.index()]
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut BlockIndexEntry {
        &mut self.entries[id.index()]
    }

    pub fn try_get(&self, id: EntryId) -> Option<&BlockIndexEntry> {
        self.entries.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &BlockIndexEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (EntryId(i as u32), e))
    }

    pub fn children(&self, id: EntryId) -> &[EntryId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Insert a header, or return the entry that already holds it.
    ///
    /// When the parent is unknown the entry is still recorded, unlinked,
    /// and `OrphanHeader` is returned. It is linked automatically once its
    /// parent is inserted.
    pub fn insert(&mut self, header: BlockHeader) -> ChainstateResult<EntryId> {
        let hash = header.hash();
        if let Some(id) = self.lookup(&hash) {
            let entry = self.get(id);
            if entry.linked {
                return Ok(id);
            }
            return Err(ChainstateError::OrphanHeader {
                hash,
                parent: entry.header.parent_hash,
            });
        }

        if header.is_genesis() {
            if self.genesis.is_some() {
                return Err(ChainstateError::DuplicateGenesis);
            }
            let id = self.push_entry(hash, header);
            let work = self.get(id).header.work();
            let entry = self.get_mut(id);
            entry.linked = true;
            entry.chain_work = work;
            self.genesis = Some(id);
            self.link_waiting(id);
            return Ok(id);
        }

        let parent_hash = header.parent_hash;
        let parent = self.lookup(&parent_hash).filter(|p| self.get(*p).linked);
        let id = self.push_entry(hash, header);

        match parent {
            Some(parent) => {
                self.link(id, parent);
                self.link_waiting(id);
                Ok(id)
            }
            None => {
                self.unlinked.entry(parent_hash).or_default().push(id);
                Err(ChainstateError::OrphanHeader {
                    hash,
                    parent: parent_hash,
                })
            }
        }
    }

    fn push_entry(&mut self, hash: Hash, header: BlockHeader) -> EntryId {
        let id = EntryId(self.entries.len() as u32);
        self.entries.push(BlockIndexEntry {
            hash,
            header,
            parent: None,
            skip: None,
            linked: false,
            height: 0,
            chain_work: U256::zero(),
            status: BlockStatus::default(),
            sequence_id: self.next_sequence,
            has_data: false,
            chain_data_complete: false,
            block_size: None,
            abla_state: None,
        });
        self.next_sequence += 1;
        self.by_hash.insert(hash, id);
        id
    }

    fn link(&mut self, id: EntryId, parent: EntryId) {
        let (height, work) = {
            let p = self.get(parent);
            (p.height + 1, p.chain_work + self.get(id).header.work())
        };
        let skip = self.ancestor(parent, get_skip_height(height));
        let entry = self.get_mut(id);
        entry.parent = Some(parent);
        entry.height = height;
        entry.chain_work = work;
        entry.skip = skip;
        entry.linked = true;
        self.children.entry(parent).or_default().push(id);
    }

    /// Link every orphan transitively waiting on `root`.
    fn link_waiting(&mut self, root: EntryId) {
        let mut queue = VecDeque::from([root]);
        while let Some(parent) = queue.pop_front() {
            let hash = self.get(parent).hash;
            if let Some(waiting) = self.unlinked.remove(&hash) {
                for child in waiting {
                    self.link(child, parent);
                    queue.push_back(child);
                }
            }
        }
    }

    /// Ancestor of `id` at `height`, using skip pointers.
    pub fn ancestor(&self, id: EntryId, height: u64) -> Option<EntryId> {
        let entry = self.get(id);
        if height > entry.height || !entry.linked {
            return None;
        }

        let mut walk = id;
        let mut height_walk = entry.height;
        while height_walk > height {
            let height_skip = get_skip_height(height_walk);
            let height_skip_prev = get_skip_height(height_walk - 1);
            let current = self.get(walk);
            let use_skip = current.skip.is_some()
                && (height_skip == height
                    || (height_skip > height
                        && !(height_skip_prev + 2 < height_skip && height_skip_prev >= height)));
            match (use_skip, current.skip, current.parent) {
                (true, Some(skip), _) => {
                    walk = skip;
                    height_walk = height_skip;
                }
                (_, _, Some(parent)) => {
                    walk = parent;
                    height_walk -= 1;
                }
                _ => return None,
            }
        }
        Some(walk)
    }

    /// True when `ancestor` lies on the path from `id` to genesis
    /// (inclusive of `id` itself).
    pub fn is_ancestor(&self, ancestor: EntryId, id: EntryId) -> bool {
        let height = self.get(ancestor).height;
        self.ancestor(id, height) == Some(ancestor)
    }

    /// Last entry shared by the paths from `a` and `b` to genesis.
    pub fn common_ancestor(&self, a: EntryId, b: EntryId) -> Option<EntryId> {
        let (ha, hb) = (self.get(a).height, self.get(b).height);
        let mut a = self.ancestor(a, ha.min(hb))?;
        let mut b = self.ancestor(b, ha.min(hb))?;
        while a != b {
            a = self.get(a).parent?;
            b = self.get(b).parent?;
        }
        Some(a)
    }

    /// Median timestamp of the entry and up to ten of its ancestors.
    pub fn median_time_past(&self, id: EntryId) -> u64 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            let entry = self.get(current);
            times.push(entry.time());
            cursor = entry.parent;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Entry with most work among linked entries whose status is at least
    /// `min`. Equal work goes to the entry seen first.
    pub fn best_tip(&self, min: BlockValidity) -> Option<EntryId> {
        self.best_tip_where(|e| e.status.is_valid(min))
    }

    /// Entry with most work among linked entries matching `filter`.
    pub fn best_tip_where<F>(&self, filter: F) -> Option<EntryId>
    where
        F: Fn(&BlockIndexEntry) -> bool,
    {
        self.iter()
            .filter(|(_, e)| e.linked && filter(e))
            .max_by_key(|(_, e)| (e.chain_work, Reverse(e.sequence_id)))
            .map(|(id, _)| id)
    }

    /// All linked descendants of `id` in breadth-first order, excluding `id`.
    pub fn descendants(&self, id: EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for child in self.children(current) {
                out.push(*child);
                queue.push_back(*child);
            }
        }
        out
    }

    /// Mark `id` invalid and every descendant as having a failed ancestor.
    ///
    /// Returns the descendants that were infected.
    pub fn mark_invalid(&mut self, id: EntryId) -> Vec<EntryId> {
        self.get_mut(id).status.mark_invalid();
        let descendants = self.descendants(id);
        for child in &descendants {
            self.get_mut(*child).status.mark_failed_ancestor();
        }
        descendants
    }

    /// Clear failure marks from `id`, its descendants and its ancestors.
    pub fn reconsider(&mut self, id: EntryId) {
        self.get_mut(id).status.clear_failure();
        for child in self.descendants(id) {
            self.get_mut(child).status.clear_failure();
        }
        let mut cursor = self.get(id).parent;
        while let Some(current) = cursor {
            let entry = self.get_mut(current);
            entry.status.clear_failure();
            cursor = entry.parent;
        }
    }

    /// Record that the body of `id` is available, and propagate
    /// `chain_data_complete` to descendants whose bodies are present.
    pub fn set_have_data(&mut self, id: EntryId, block_size: u64) {
        let entry = self.get_mut(id);
        entry.has_data = true;
        entry.block_size = Some(block_size);

        let parent_complete = match self.get(id).parent {
            Some(parent) => self.get(parent).chain_data_complete,
            None => self.get(id).is_genesis(),
        };
        if !parent_complete {
            return;
        }

        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            self.get_mut(current).chain_data_complete = true;
            for child in self.children(current) {
                let c = self.get(*child);
                if c.has_data && !c.chain_data_complete {
                    queue.push_back(*child);
                }
            }
        }
    }

    /// Drop every entry. Ids handed out earlier become meaningless.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
