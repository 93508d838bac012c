//! # Chain-State Scenarios
//!
//! End-to-end runs of the connection pipeline:
//!
//! 1. **Genesis**: a lone genesis block connects to the top validity level.
//! 2. **Adaptive limit**: full blocks grow the elastic buffer until it
//!    saturates, after which the limit stops moving.
//! 3. **Reorg**: the heavier of two branches wins in either arrival order,
//!    and rolling back restores the exact ledger bytes.
//! 4. **Infection**: an invalidated block takes its descendants with it.

#[cfg(test)]
mod tests {
    use chainstate::{
        AblaConfig, AblaState, BlockValidity, ChainstateApi, ChainstateConfig, RejectReason,
        Upgrade,
    };
    use shared_types::OutPoint;

    use crate::fixtures::{
        genesis, regtest_service, service, spend, submit_all, ChainBuilder, HEAVY_BITS,
    };

    // =============================================================================
    // GENESIS
    // =============================================================================

    #[test]
    fn test_genesis_only_chain() {
        let chainstate = regtest_service();
        let g = genesis();
        chainstate.accept_block(g.clone()).unwrap();

        let summary = chainstate.block_summary(&g.hash()).unwrap();
        assert_eq!(summary.height, 0);
        assert_eq!(summary.status.validity, BlockValidity::TransactionsValid);

        let report = chainstate.activate_best_chain().unwrap();
        assert_eq!(report.connected, vec![g.hash()]);
        let tip = chainstate.active_tip().unwrap();
        assert_eq!(tip.hash, g.hash());
        assert_eq!(tip.status.validity, BlockValidity::ScriptsValid);
        assert!(chainstate.disconnect_tip().unwrap().is_some());
        assert!(chainstate.active_tip().is_none());
    }

    // =============================================================================
    // ADAPTIVE LIMIT
    // =============================================================================

    #[test]
    fn test_elastic_buffer_grows_until_saturated() {
        let mut config = AblaConfig {
            initial_control_size: 32_000_000,
            initial_elastic_buffer: 0,
            growth_factor_xb7: 192,
            shrink_rate_reciprocal: 37938,
            decay_step: 10,
            buffer_decay_reciprocal: 37938,
            control_size_max: 0,
            elastic_buffer_max: 0,
        };
        config.set_max();
        config.control_size_max = 32_050_000;
        config.elastic_buffer_max = 100_000;
        assert!(config.is_valid().is_ok());

        let mut state = AblaState::new(&config);
        let mut saturated_at = None;
        let mut limits = Vec::new();
        for n in 0..400 {
            let limit = state.block_size_limit(false);
            limits.push(limit);
            let next = state.with_block_size(limit).next_block_state(&config, limit);
            match saturated_at {
                None if next.elastic_buffer == config.elastic_buffer_max => saturated_at = Some(n),
                None => assert!(next.elastic_buffer > state.elastic_buffer),
                Some(_) => assert_eq!(next.elastic_buffer, config.elastic_buffer_max),
            }
            state = next;
        }

        assert!(saturated_at.is_some());
        let plateau = config.control_size_max + config.elastic_buffer_max;
        assert_eq!(limits.last().copied(), Some(plateau));
        assert!(limits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            AblaState::new(&config).calc_lookahead_block_size_limit(&config, 400, false),
            plateau
        );
    }

    #[test]
    fn test_adaptive_limit_through_service() {
        let json = r#"{
            "epsilon0": 100000, "beta0": 100000, "zeta": 192,
            "gammaReciprocal": 37938, "delta": 10, "thetaReciprocal": 37938
        }"#;
        let abla = AblaConfig::from_json(json).unwrap();
        let chainstate = service(ChainstateConfig {
            upgrade10_activation_time: Some(0),
            abla_override: Some(abla),
            ..ChainstateConfig::default()
        });

        let g = genesis();
        let blocks = ChainBuilder::on(&g, 0).take(4);
        chainstate.accept_block(g.clone()).unwrap();
        submit_all(&chainstate, &blocks);
        chainstate.activate_best_chain().unwrap();

        let tip = blocks[3].hash();
        assert_eq!(
            chainstate.activation_height(Upgrade::Upgrade10, &tip).unwrap(),
            Some(0)
        );
        assert_eq!(chainstate.next_block_size_limit(&tip).unwrap(), 200_000);

        // Small blocks keep the controller at its floor, so a lookahead from
        // the tip matches one from a fresh state.
        let expected = AblaState::new(&abla).calc_lookahead_block_size_limit(&abla, 50, false);
        assert_eq!(
            chainstate.lookahead_block_size_limit(&tip, 50).unwrap(),
            expected
        );
    }

    // =============================================================================
    // REORG
    // =============================================================================

    #[test]
    fn test_heavier_branch_wins_in_either_order() {
        let g = genesis();
        let light = ChainBuilder::on(&g, 0).tag(1).take(3);
        let heavy = ChainBuilder::on(&g, 0).tag(2).bits(HEAVY_BITS).take(3);

        for heavy_first in [false, true] {
            let chainstate = regtest_service();
            chainstate.accept_block(g.clone()).unwrap();
            let (first, second) = if heavy_first {
                (&heavy, &light)
            } else {
                (&light, &heavy)
            };
            submit_all(&chainstate, first);
            chainstate.activate_best_chain().unwrap();
            submit_all(&chainstate, second);
            chainstate.activate_best_chain().unwrap();

            assert_eq!(chainstate.active_tip().unwrap().hash, heavy[2].hash());
            assert_eq!(
                chainstate.best_tip(BlockValidity::TransactionsValid).unwrap().hash,
                heavy[2].hash()
            );
        }
    }

    #[test]
    fn test_reorg_restores_ledger_bytes() {
        let chainstate = regtest_service();
        let g = genesis();
        let funding = OutPoint::new(g.transactions[0].txid(), 0);

        let mut light_builder = ChainBuilder::on(&g, 0).tag(1);
        let light = vec![
            light_builder.mine_next(),
            light_builder.mine_with(vec![spend(funding, 30)]),
            light_builder.mine_next(),
        ];
        let heavy = ChainBuilder::on(&g, 0).tag(2).bits(HEAVY_BITS).take(3);

        chainstate.accept_block(g).unwrap();
        submit_all(&chainstate, &light);
        chainstate.activate_best_chain().unwrap();
        assert!(chainstate.coin(&funding).is_none());
        let light_bytes = chainstate.ledger_snapshot().unwrap();

        submit_all(&chainstate, &heavy);
        let report = chainstate.activate_best_chain().unwrap();
        assert_eq!(
            report.disconnected,
            light.iter().rev().map(|b| b.hash()).collect::<Vec<_>>()
        );
        assert_eq!(chainstate.coin(&funding).unwrap().output.value, 50);
        let heavy_bytes = chainstate.ledger_snapshot().unwrap();

        chainstate.invalidate_block(&heavy[0].hash()).unwrap();
        assert_eq!(chainstate.ledger_snapshot().unwrap(), light_bytes);

        chainstate.reconsider_block(&heavy[0].hash()).unwrap();
        assert_eq!(chainstate.ledger_snapshot().unwrap(), heavy_bytes);
    }

    // =============================================================================
    // INFECTION
    // =============================================================================

    #[test]
    fn test_invalidated_entry_never_selected_again() {
        let chainstate = regtest_service();
        let g = genesis();
        let mut builder = ChainBuilder::on(&g, 0);
        let blocks = builder.take(6);
        chainstate.accept_block(g).unwrap();
        submit_all(&chainstate, &blocks);
        chainstate.activate_best_chain().unwrap();

        let mid = blocks[2].hash();
        chainstate.invalidate_block(&mid).unwrap();
        assert_eq!(chainstate.active_tip().unwrap().hash, blocks[1].hash());

        for block in &blocks[2..] {
            let status = chainstate.block_status(&block.hash()).unwrap();
            assert!(status.is_failed());
            assert!(!status.is_valid(BlockValidity::HeaderValid));
        }

        // Extending the dead branch does not revive it.
        let extension = builder.mine_next();
        let err = chainstate.accept_block(extension).unwrap_err();
        assert_eq!(err.reject_reason(), Some(&RejectReason::BadPrevBlock));
        for min in [BlockValidity::HeaderValid, BlockValidity::TransactionsValid] {
            assert_eq!(chainstate.best_tip(min).unwrap().hash, blocks[1].hash());
        }
    }
}
