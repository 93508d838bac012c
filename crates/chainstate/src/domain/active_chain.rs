//! The active chain: entries from genesis to the active tip, by height.

use super::block_index::{BlockIndex, EntryId};

#[derive(Debug, Default, Clone)]
pub struct ActiveChain {
    entries: Vec<EntryId>,
}

impl ActiveChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip(&self) -> Option<EntryId> {
        self.entries.last().copied()
    }

    pub fn genesis(&self) -> Option<EntryId> {
        self.entries.first().copied()
    }

    /// Height of the tip, `None` when empty.
    pub fn height(&self) -> Option<u64> {
        self.entries.len().checked_sub(1).map(|h| h as u64)
    }

    pub fn at(&self, height: u64) -> Option<EntryId> {
        self.entries.get(height as usize).copied()
    }

    pub fn contains(&self, index: &BlockIndex, id: EntryId) -> bool {
        self.at(index.get(id).height) == Some(id)
    }

    /// Append `id`, which must be a child of the current tip.
    pub fn push(&mut self, id: EntryId) {
        self.entries.push(id);
    }

    pub fn pop(&mut self) -> Option<EntryId> {
        self.entries.pop()
    }

    /// Make `tip` the active tip, rewriting the path back to the fork point.
    pub fn set_tip(&mut self, index: &BlockIndex, tip: Option<EntryId>) {
        let Some(tip) = tip else {
            self.entries.clear();
            return;
        };
        let height = index.get(tip).height as usize;
        self.entries.resize(height + 1, tip);
        let mut cursor = Some(tip);
        while let Some(id) = cursor {
            let h = index.get(id).height as usize;
            if self.entries[h] == id && h != height {
                break;
            }
            self.entries[h] = id;
            cursor = index.get(id).parent;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.entries.iter().copied()
    }
}
