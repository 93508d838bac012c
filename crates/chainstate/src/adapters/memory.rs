//! In-memory block and undo stores.
//!
//! Used by tests and by nodes that rebuild their state at startup.

use std::collections::HashMap;

use parking_lot::RwLock;
use shared_types::{Block, Hash};

use crate::domain::BlockUndo;
use crate::ports::{BlockStore, UndoStore};

/// Block bodies keyed by hash.
#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<Hash, Block>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn put_block(&self, block: Block) -> Result<(), String> {
        self.blocks.write().insert(block.hash(), block);
        Ok(())
    }

    fn get_block(&self, hash: &Hash) -> Result<Option<Block>, String> {
        Ok(self.blocks.read().get(hash).cloned())
    }

    fn has_block(&self, hash: &Hash) -> bool {
        self.blocks.read().contains_key(hash)
    }
}

/// Undo records keyed by block hash.
#[derive(Debug, Default)]
pub struct InMemoryUndoStore {
    undo: RwLock<HashMap<Hash, BlockUndo>>,
}

impl InMemoryUndoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.undo.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.read().is_empty()
    }

    /// Replace the stored record for `hash`. Lets tests simulate corrupted
    /// undo data.
    pub fn overwrite(&self, hash: Hash, undo: BlockUndo) {
        self.undo.write().insert(hash, undo);
    }
}

impl UndoStore for InMemoryUndoStore {
    fn put_undo(&self, hash: Hash, undo: BlockUndo) -> Result<(), String> {
        self.undo.write().insert(hash, undo);
        Ok(())
    }

    fn get_undo(&self, hash: &Hash) -> Result<Option<BlockUndo>, String> {
        Ok(self.undo.read().get(hash).cloned())
    }

    fn remove_undo(&self, hash: &Hash) -> Result<(), String> {
        self.undo.write().remove(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TxUndo;

    #[test]
    fn test_block_store_roundtrip() {
        let store = InMemoryBlockStore::new();
        let block = Block::default();
        let hash = block.hash();

        assert!(!store.has_block(&hash));
        store.put_block(block.clone()).unwrap();
        assert!(store.has_block(&hash));
        assert_eq!(store.get_block(&hash).unwrap(), Some(block));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_undo_store_remove() {
        let store = InMemoryUndoStore::new();
        let undo = BlockUndo {
            txs: vec![TxUndo::default()],
        };
        store.put_undo([7; 32], undo.clone()).unwrap();
        assert_eq!(store.get_undo(&[7; 32]).unwrap(), Some(undo));

        store.remove_undo(&[7; 32]).unwrap();
        assert!(store.get_undo(&[7; 32]).unwrap().is_none());
        assert!(store.is_empty());
    }
}
