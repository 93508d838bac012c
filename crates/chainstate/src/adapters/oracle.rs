//! Ledger-effect oracle backed by the unspent-output view.
//!
//! Structural checks run in [`LedgerOracle::evaluate`]. Script checks are
//! delegated to a [`ScriptVerifier`] and fanned out over the rayon pool, one
//! task per input.

use std::collections::HashSet;

use rayon::prelude::*;
use shared_types::{Coin, Transaction};
use tracing::trace;

use crate::domain::{CoinsViewCache, RejectReason, ScriptFlags, TxEffects};
use crate::ports::{LedgerOracle, ScriptVerifier, TxContext};

/// Oracle that spends every input and creates every output of a
/// transaction once its inputs exist and its values balance.
#[derive(Debug, Default)]
pub struct UtxoLedgerOracle<S> {
    verifier: S,
}

impl<S: ScriptVerifier> UtxoLedgerOracle<S> {
    pub fn new(verifier: S) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &S {
        &self.verifier
    }
}

impl<S: ScriptVerifier> LedgerOracle for UtxoLedgerOracle<S> {
    fn evaluate(
        &self,
        tx: &Transaction,
        view: &CoinsViewCache<'_>,
        ctx: &TxContext,
    ) -> Result<TxEffects, RejectReason> {
        let total_out = tx
            .total_output_value()
            .ok_or_else(|| RejectReason::OracleRejected("output value overflow".into()))?;

        if tx.is_coinbase() {
            return Ok(TxEffects::from_transaction(tx));
        }
        if tx.inputs.is_empty() {
            return Err(RejectReason::OracleRejected("transaction has no inputs".into()));
        }

        let mut seen = HashSet::with_capacity(tx.inputs.len());
        let mut total_in = 0u64;
        for input in &tx.inputs {
            if !seen.insert(input.prevout) {
                return Err(RejectReason::OracleRejected("duplicate input".into()));
            }
            let coin = view
                .get_coin(&input.prevout)
                .ok_or(RejectReason::MissingInputs)?;
            total_in = total_in
                .checked_add(coin.output.value)
                .ok_or_else(|| RejectReason::OracleRejected("input value overflow".into()))?;
        }
        if total_out > total_in {
            return Err(RejectReason::OracleRejected(format!(
                "outputs {total_out} exceed inputs {total_in}"
            )));
        }

        trace!(height = ctx.height, inputs = tx.inputs.len(), "transaction effects accepted");
        Ok(TxEffects::from_transaction(tx))
    }

    fn verify_scripts(
        &self,
        tx: &Transaction,
        spent: &[Coin],
        ctx: &TxContext,
    ) -> Result<(), RejectReason> {
        if spent.len() != tx.inputs.len() {
            return Err(RejectReason::MissingInputs);
        }
        let scripts_ok = spent
            .par_iter()
            .enumerate()
            .all(|(i, coin)| self.verifier.verify_input(tx, i, coin, ctx.flags));
        if !scripts_ok {
            return Err(RejectReason::OracleRejected("script verification failed".into()));
        }
        Ok(())
    }
}

/// Script verifier that accepts every input.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllScripts;

impl ScriptVerifier for AcceptAllScripts {
    fn verify_input(&self, _tx: &Transaction, _idx: usize, _spent: &Coin, _flags: ScriptFlags) -> bool {
        true
    }
}

/// Toy verifier: an input is valid when its unlocking script equals the
/// locking script of the coin it spends.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatchingScriptVerifier;

impl ScriptVerifier for MatchingScriptVerifier {
    fn verify_input(&self, tx: &Transaction, idx: usize, spent: &Coin, _flags: ScriptFlags) -> bool {
        tx.inputs
            .get(idx)
            .is_some_and(|input| input.script_sig == spent.output.script_pubkey)
    }
}
