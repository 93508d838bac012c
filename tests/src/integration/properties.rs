//! # Chain Selection Properties
//!
//! Random block trees, submitted parent-first with activation at random
//! points. Whatever the shape, the active tip ends up as the block with the
//! most work, ties going to the block seen first.

#[cfg(test)]
mod tests {
    use std::cmp::Reverse;

    use chainstate::{BlockValidity, ChainstateApi, ChainstateConfig};
    use proptest::prelude::*;
    use proptest::sample::Index;
    use shared_types::Block;

    use crate::fixtures::{genesis, service, ChainBuilder, TestChainstate, HEAVY_BITS, LIGHT_BITS};

    /// Deep forks must stay reachable.
    fn unfinalized() -> TestChainstate {
        service(ChainstateConfig {
            finalization_enabled: false,
            ..ChainstateConfig::default()
        })
    }

    /// `(parent, heavy, activate_after)` per block.
    fn tree_strategy() -> impl Strategy<Value = Vec<(Index, bool, bool)>> {
        prop::collection::vec((any::<Index>(), prop::bool::weighted(0.2), any::<bool>()), 1..12)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_active_tip_is_most_work_first_seen(tree in tree_strategy()) {
            let chainstate = unfinalized();
            let g = genesis();
            chainstate.accept_block(g.clone()).unwrap();

            let mut blocks: Vec<(Block, u64)> = vec![(g, 0)];
            for (i, (parent, heavy, activate)) in tree.iter().enumerate() {
                let (parent_block, parent_height) = blocks[parent.index(blocks.len())].clone();
                let block = ChainBuilder::on(&parent_block, parent_height)
                    .tag(i as u8 + 1)
                    .bits(if *heavy { HEAVY_BITS } else { LIGHT_BITS })
                    .mine_next();
                chainstate.accept_block(block.clone()).unwrap();
                blocks.push((block, parent_height + 1));
                if *activate {
                    chainstate.activate_best_chain().unwrap();
                }
            }
            chainstate.activate_best_chain().unwrap();

            let expected = blocks
                .iter()
                .enumerate()
                .map(|(seen, (block, _))| {
                    let summary = chainstate.block_summary(&block.hash()).unwrap();
                    (summary.chain_work, Reverse(seen), summary.hash)
                })
                .max()
                .map(|(_, _, hash)| hash);

            let tip = chainstate.active_tip().unwrap();
            prop_assert_eq!(Some(tip.hash), expected);
            prop_assert_eq!(tip.status.validity, BlockValidity::ScriptsValid);
            prop_assert_eq!(
                chainstate.best_tip(BlockValidity::TransactionsValid).map(|s| s.hash),
                expected
            );
            prop_assert_eq!(chainstate.active_chain().len() as u64, tip.height + 1);
        }

        #[test]
        fn prop_invalidate_then_reconsider_restores_tip(
            tree in tree_strategy(),
            victim in any::<Index>(),
        ) {
            let chainstate = unfinalized();
            let g = genesis();
            chainstate.accept_block(g.clone()).unwrap();

            let mut blocks: Vec<(Block, u64)> = vec![(g, 0)];
            for (i, (parent, heavy, _)) in tree.iter().enumerate() {
                let (parent_block, parent_height) = blocks[parent.index(blocks.len())].clone();
                let block = ChainBuilder::on(&parent_block, parent_height)
                    .tag(i as u8 + 1)
                    .bits(if *heavy { HEAVY_BITS } else { LIGHT_BITS })
                    .mine_next();
                chainstate.accept_block(block.clone()).unwrap();
                blocks.push((block, parent_height + 1));
            }
            chainstate.activate_best_chain().unwrap();
            let tip = chainstate.active_tip().unwrap().hash;
            let ledger = chainstate.ledger_snapshot().unwrap();

            // Genesis is refused, so pick among the rest.
            let (target, _) = &blocks[1 + victim.index(blocks.len() - 1)];
            chainstate.invalidate_block(&target.hash()).unwrap();
            let after = chainstate.active_tip().unwrap().hash;
            prop_assert!(chainstate.block_status(&after).map_or(false, |s| !s.is_failed()));

            chainstate.reconsider_block(&target.hash()).unwrap();
            prop_assert_eq!(chainstate.active_tip().unwrap().hash, tip);
            prop_assert_eq!(chainstate.ledger_snapshot().unwrap(), ledger);
        }
    }
}
