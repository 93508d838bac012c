//! # Rule Activation
//!
//! Every protocol upgrade is a monotonic predicate over block-index entries:
//! once it holds for an entry it holds for all descendants. A predicate that
//! holds at entry `X` means the upgraded rules apply to the blocks built on
//! top of `X`.
//!
//! [`ActivationTracker`] finds, for any tip where a predicate holds, the
//! earliest ancestor where it first held. The answer is cached and reused as
//! long as it remains an ancestor of the queried tip.

use std::ops::{BitOr, BitOrAssign};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::block_index::{BlockIndex, EntryId};
use super::params::ConsensusParams;

/// How a rule threshold is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonMode {
    /// Entry height is at least the threshold.
    Height,
    /// Entry median-time-past is at least the threshold.
    MedianTimePast,
}

/// A monotonic rule predicate over block-index entries.
pub trait ActivationPredicate: Send + Sync {
    fn is_active(&self, params: &ConsensusParams, index: &BlockIndex, entry: EntryId) -> bool;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> ActivationPredicate for F
where
    F: Fn(&ConsensusParams, &BlockIndex, EntryId) -> bool + Send + Sync,
{
    fn is_active(&self, params: &ConsensusParams, index: &BlockIndex, entry: EntryId) -> bool {
        self(params, index, entry)
    }
}

/// One row of the rule table: `(name, threshold, mode)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RulePredicate {
    pub name: &'static str,
    pub threshold: u64,
    pub mode: ComparisonMode,
}

impl RulePredicate {
    pub fn height(name: &'static str, height: u64) -> Self {
        Self {
            name,
            threshold: height,
            mode: ComparisonMode::Height,
        }
    }

    pub fn median_time(name: &'static str, time: u64) -> Self {
        Self {
            name,
            threshold: time,
            mode: ComparisonMode::MedianTimePast,
        }
    }

    /// Whether the rule applies to blocks built on `entry`.
    pub fn holds(&self, index: &BlockIndex, entry: EntryId) -> bool {
        match self.mode {
            ComparisonMode::Height => index.get(entry).height >= self.threshold,
            ComparisonMode::MedianTimePast => {
                is_fork_active_on_next_block(index, entry, self.threshold)
            }
        }
    }
}

impl ActivationPredicate for RulePredicate {
    fn is_active(&self, _params: &ConsensusParams, index: &BlockIndex, entry: EntryId) -> bool {
        self.holds(index, entry)
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Whether a time-activated fork applies to the child of `entry`.
pub fn is_fork_active_on_next_block(index: &BlockIndex, entry: EntryId, time: u64) -> bool {
    index.median_time_past(entry) >= time
}

/// Whether a time-activated fork applies to `entry` itself, judged from its
/// parent's median-time-past.
pub fn fork_activated(index: &BlockIndex, entry: EntryId, time: u64) -> bool {
    match index.get(entry).parent {
        Some(parent) => is_fork_active_on_next_block(index, parent, time),
        None => false,
    }
}

/// Protocol upgrades, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Upgrade {
    Uahf,
    Daa,
    Nov2018,
    Nov2019,
    May2020,
    Nov2020,
    May2022,
    /// May 2023: tokens and 32-byte P2SH.
    Upgrade9,
    /// May 2024: adaptive block size limit.
    Upgrade10,
}

impl Upgrade {
    pub const ALL: [Upgrade; 9] = [
        Upgrade::Uahf,
        Upgrade::Daa,
        Upgrade::Nov2018,
        Upgrade::Nov2019,
        Upgrade::May2020,
        Upgrade::Nov2020,
        Upgrade::May2022,
        Upgrade::Upgrade9,
        Upgrade::Upgrade10,
    ];

    /// The rule row for this upgrade under `params`.
    pub fn rule(&self, params: &ConsensusParams) -> RulePredicate {
        match self {
            Self::Uahf => RulePredicate::height("uahf", params.uahf_height),
            Self::Daa => RulePredicate::height("daa", params.daa_height),
            Self::Nov2018 => RulePredicate::height("nov2018", params.nov2018_height),
            Self::Nov2019 => RulePredicate::height("nov2019", params.nov2019_height),
            Self::May2020 => RulePredicate::height("may2020", params.may2020_height),
            Self::Nov2020 => match params.nov2020_height {
                Some(height) => RulePredicate::height("nov2020", height),
                None => RulePredicate::median_time("nov2020", params.nov2020_activation_time),
            },
            Self::May2022 => match params.may2022_height {
                Some(height) => RulePredicate::height("may2022", height),
                None => RulePredicate::median_time("may2022", params.may2022_activation_time),
            },
            Self::Upgrade9 => RulePredicate::height("upgrade9", params.may2023_height),
            Self::Upgrade10 => {
                RulePredicate::median_time("upgrade10", params.may2024_activation_time)
            }
        }
    }
}

impl ActivationPredicate for Upgrade {
    fn is_active(&self, params: &ConsensusParams, index: &BlockIndex, entry: EntryId) -> bool {
        self.rule(params).holds(index, entry)
    }

    fn name(&self) -> &str {
        match self {
            Self::Uahf => "uahf",
            Self::Daa => "daa",
            Self::Nov2018 => "nov2018",
            Self::Nov2019 => "nov2019",
            Self::May2020 => "may2020",
            Self::Nov2020 => "nov2020",
            Self::May2022 => "may2022",
            Self::Upgrade9 => "upgrade9",
            Self::Upgrade10 => "upgrade10",
        }
    }
}

/// Finds and caches the first entry at which a predicate held.
#[derive(Debug)]
pub struct ActivationTracker<P> {
    predicate: P,
    cached: Mutex<Option<EntryId>>,
}

impl<P: ActivationPredicate> ActivationTracker<P> {
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            cached: Mutex::new(None),
        }
    }

    pub fn predicate(&self) -> &P {
        &self.predicate
    }

    /// Earliest ancestor of `tip` (possibly `tip` itself) for which the
    /// predicate holds.
    ///
    /// The predicate must hold at `tip`. This is not checked; if it does
    /// not, the result is `tip` or an unrelated cached entry.
    pub fn get_activation_entry(
        &self,
        params: &ConsensusParams,
        index: &BlockIndex,
        tip: EntryId,
    ) -> EntryId {
        let mut cached = self.cached.lock();
        if let Some(entry) = *cached {
            if index.try_get(entry).is_some()
                && index.is_ancestor(entry, tip)
                && self.predicate.is_active(params, index, entry)
            {
                return entry;
            }
        }

        let mut cursor = tip;
        while let Some(parent) = index.get(cursor).parent {
            if !self.predicate.is_active(params, index, parent) {
                break;
            }
            cursor = parent;
        }
        *cached = Some(cursor);
        cursor
    }

    /// Height of the activation entry, or `None` if the rule is not yet
    /// active at `tip`.
    pub fn activation_height(
        &self,
        params: &ConsensusParams,
        index: &BlockIndex,
        tip: EntryId,
    ) -> Option<u64> {
        if !self.predicate.is_active(params, index, tip) {
            return None;
        }
        let entry = self.get_activation_entry(params, index, tip);
        Some(index.get(entry).height)
    }

    /// Forget the cached entry. Required whenever the index is rebuilt.
    pub fn reset_cache(&self) {
        *self.cached.lock() = None;
    }

    pub fn cached_entry(&self) -> Option<EntryId> {
        *self.cached.lock()
    }
}

/// Script verification flags handed to the ledger oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub const NONE: Self = Self(0);
    pub const P2SH: Self = Self(1 << 0);
    pub const STRICTENC: Self = Self(1 << 1);
    pub const DERSIG: Self = Self(1 << 2);
    pub const LOW_S: Self = Self(1 << 3);
    pub const SIGPUSHONLY: Self = Self(1 << 5);
    pub const MINIMALDATA: Self = Self(1 << 6);
    pub const CLEANSTACK: Self = Self(1 << 8);
    pub const CHECKLOCKTIMEVERIFY: Self = Self(1 << 9);
    pub const CHECKSEQUENCEVERIFY: Self = Self(1 << 10);
    pub const NULLFAIL: Self = Self(1 << 14);
    pub const ENABLE_SIGHASH_FORKID: Self = Self(1 << 16);
    pub const ENABLE_SCHNORR_MULTISIG: Self = Self(1 << 21);
    pub const INPUT_SIGCHECKS: Self = Self(1 << 22);
    pub const ENABLE_64_BIT_INTEGERS: Self = Self(1 << 24);
    pub const NATIVE_INTROSPECTION: Self = Self(1 << 25);
    pub const ENABLE_P2SH_32: Self = Self(1 << 26);
    pub const ENABLE_TOKENS: Self = Self(1 << 27);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ScriptFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ScriptFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags for a block whose parent is `parent` (`None` for genesis).
pub fn block_script_flags(
    params: &ConsensusParams,
    index: &BlockIndex,
    parent: Option<EntryId>,
) -> ScriptFlags {
    let Some(parent) = parent else {
        return ScriptFlags::NONE;
    };
    let height = index.get(parent).height + 1;
    let mut flags = ScriptFlags::NONE;

    if height >= params.bip16_height {
        flags |= ScriptFlags::P2SH;
    }
    if height >= params.bip66_height {
        flags |= ScriptFlags::DERSIG;
    }
    if height >= params.bip65_height {
        flags |= ScriptFlags::CHECKLOCKTIMEVERIFY;
    }
    if height >= params.bip68_height {
        flags |= ScriptFlags::CHECKSEQUENCEVERIFY;
    }

    let active = |upgrade: Upgrade| upgrade.is_active(params, index, parent);
    if active(Upgrade::Uahf) {
        flags |= ScriptFlags::STRICTENC | ScriptFlags::ENABLE_SIGHASH_FORKID;
    }
    if active(Upgrade::Daa) {
        flags |= ScriptFlags::LOW_S | ScriptFlags::NULLFAIL;
    }
    if active(Upgrade::Nov2018) {
        flags |= ScriptFlags::SIGPUSHONLY | ScriptFlags::CLEANSTACK;
    }
    if active(Upgrade::Nov2019) {
        flags |= ScriptFlags::ENABLE_SCHNORR_MULTISIG | ScriptFlags::MINIMALDATA;
    }
    if active(Upgrade::May2020) {
        flags |= ScriptFlags::INPUT_SIGCHECKS;
    }
    if active(Upgrade::May2022) {
        flags |= ScriptFlags::ENABLE_64_BIT_INTEGERS | ScriptFlags::NATIVE_INTROSPECTION;
    }
    if active(Upgrade::Upgrade9) {
        flags |= ScriptFlags::ENABLE_TOKENS | ScriptFlags::ENABLE_P2SH_32;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{BlockHeader, Hash, ZERO_HASH};

    fn chain_with_times(index: &mut BlockIndex, times: &[u64]) -> Vec<EntryId> {
        let mut parent: Hash = ZERO_HASH;
        times
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let header = BlockHeader {
                    parent_hash: parent,
                    timestamp: *t,
                    bits: 0x207f_ffff,
                    nonce: i as u32,
                    ..BlockHeader::default()
                };
                parent = header.hash();
                index.insert(header).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_height_rule_activation_entry() {
        let params = ConsensusParams::regtest();
        let mut index = BlockIndex::new();
        let times: Vec<u64> = (0..30).map(|i| 1000 + i).collect();
        let ids = chain_with_times(&mut index, &times);

        let tracker = ActivationTracker::new(RulePredicate::height("test", 12));
        assert_eq!(tracker.activation_height(&params, &index, ids[11]), None);
        assert_eq!(
            tracker.get_activation_entry(&params, &index, ids[29]),
            ids[12]
        );
        assert_eq!(tracker.cached_entry(), Some(ids[12]));
        assert_eq!(tracker.activation_height(&params, &index, ids[20]), Some(12));
    }

    #[test]
    fn test_cache_ignored_when_not_ancestor() {
        let params = ConsensusParams::regtest();
        let mut index = BlockIndex::new();
        let times: Vec<u64> = (0..10).map(|i| 1000 + i).collect();
        let ids = chain_with_times(&mut index, &times);

        // Side branch forking at height 3 whose entries also satisfy the rule.
        let mut parent = index.get(ids[3]).hash;
        let mut side = Vec::new();
        for i in 0..6u32 {
            let header = BlockHeader {
                parent_hash: parent,
                timestamp: 5000,
                bits: 0x207f_ffff,
                nonce: 100 + i,
                ..BlockHeader::default()
            };
            parent = header.hash();
            side.push(index.insert(header).unwrap());
        }

        let tracker = ActivationTracker::new(RulePredicate::height("test", 5));
        assert_eq!(tracker.get_activation_entry(&params, &index, ids[9]), ids[5]);
        // side[1] sits at height 5 on the other branch.
        assert_eq!(tracker.get_activation_entry(&params, &index, side[5]), side[1]);
        assert_eq!(tracker.cached_entry(), Some(side[1]));

        tracker.reset_cache();
        assert_eq!(tracker.cached_entry(), None);
    }

    #[test]
    fn test_mtp_rule_notions() {
        let mut index = BlockIndex::new();
        let times: Vec<u64> = (0..20).map(|i| 100 * i).collect();
        let ids = chain_with_times(&mut index, &times);

        // MTP of height h (h >= 10) is 100 * (h - 5).
        assert!(!is_fork_active_on_next_block(&index, ids[14], 1000));
        assert!(is_fork_active_on_next_block(&index, ids[15], 1000));
        assert!(!fork_activated(&index, ids[15], 1000));
        assert!(fork_activated(&index, ids[16], 1000));
        assert!(!fork_activated(&index, ids[0], 0));

        let params = ConsensusParams::regtest();
        let tracker = ActivationTracker::new(RulePredicate::median_time("t", 1000));
        assert_eq!(tracker.activation_height(&params, &index, ids[19]), Some(15));
    }

    #[test]
    fn test_closure_predicate() {
        let params = ConsensusParams::regtest();
        let mut index = BlockIndex::new();
        let ids = chain_with_times(&mut index, &[1, 2, 3, 4, 5]);
        let tracker = ActivationTracker::new(|_: &ConsensusParams, index: &BlockIndex, id: EntryId| {
            index.get(id).header.timestamp >= 3
        });
        assert_eq!(tracker.get_activation_entry(&params, &index, ids[4]), ids[2]);
        assert_eq!(tracker.predicate().name(), "custom");
    }

    #[test]
    fn test_upgrade_rules_follow_params() {
        let mut params = ConsensusParams::mainnet();
        assert_eq!(Upgrade::Nov2020.rule(&params).mode, ComparisonMode::Height);
        assert_eq!(
            Upgrade::Upgrade10.rule(&params).mode,
            ComparisonMode::MedianTimePast
        );
        params.nov2020_height = None;
        let rule = Upgrade::Nov2020.rule(&params);
        assert_eq!(rule.mode, ComparisonMode::MedianTimePast);
        assert_eq!(rule.threshold, params.nov2020_activation_time);
    }

    #[test]
    fn test_script_flags_by_height() {
        let mut params = ConsensusParams::regtest();
        params.may2023_height = 3;
        let mut index = BlockIndex::new();
        let ids = chain_with_times(&mut index, &[1, 2, 3, 4, 5]);

        assert_eq!(block_script_flags(&params, &index, None), ScriptFlags::NONE);

        let early = block_script_flags(&params, &index, Some(ids[1]));
        assert!(early.contains(ScriptFlags::P2SH | ScriptFlags::ENABLE_SIGHASH_FORKID));
        assert!(early.contains(ScriptFlags::INPUT_SIGCHECKS));
        assert!(!early.contains(ScriptFlags::ENABLE_TOKENS));
        assert!(!early.contains(ScriptFlags::NATIVE_INTROSPECTION));

        let late = block_script_flags(&params, &index, Some(ids[3]));
        assert!(late.contains(ScriptFlags::ENABLE_TOKENS | ScriptFlags::ENABLE_P2SH_32));
    }
}
