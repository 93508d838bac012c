//! Consensus parameters and runtime configuration.
//!
//! [`ConsensusParams`] is fixed per network and never mutated after the
//! service is built. [`ChainstateConfig`] holds the operator knobs that may
//! adjust it (activation overrides, block size) before it is frozen.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use shared_types::{decode_compact, Hash};
use tracing::warn;

use super::abla::AblaConfig;
use super::error::{ChainstateError, ChainstateResult};

/// Default for the maximum reorg depth before a block is finalized.
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 10;

/// Smallest legacy block size an operator may configure.
pub const MIN_EXCESSIVE_BLOCK_SIZE: u64 = 1_000_000;

/// Legacy mainnet block size limit.
pub const DEFAULT_MAX_BLOCK_SIZE: u64 = 32_000_000;

/// Nov 15, 2020 12:00:00 UTC.
pub const NOV2020_ACTIVATION_TIME: u64 = 1_605_441_600;
/// May 15, 2022 12:00:00 UTC.
pub const MAY2022_ACTIVATION_TIME: u64 = 1_652_616_000;
/// May 15, 2024 12:00:00 UTC.
pub const MAY2024_ACTIVATION_TIME: u64 = 1_715_774_400;

/// Network selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet4,
    #[default]
    Regtest,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet4 => "testnet4",
            Self::Regtest => "regtest",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = ChainstateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet4" | "test4" => Ok(Self::Testnet4),
            "regtest" => Ok(Self::Regtest),
            other => Err(ChainstateError::InvalidConfig(format!(
                "unknown network: {other}"
            ))),
        }
    }
}

/// Per-network consensus constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub network: Network,
    /// Expected genesis hash. `None` accepts the first genesis header seen.
    pub genesis_hash: Option<Hash>,
    /// Easiest allowed target.
    pub pow_limit: U256,
    /// Target seconds between blocks.
    pub pow_target_spacing: u64,

    pub bip16_height: u64,
    pub bip65_height: u64,
    pub bip66_height: u64,
    pub bip68_height: u64,

    pub uahf_height: u64,
    pub daa_height: u64,
    pub nov2018_height: u64,
    pub nov2019_height: u64,
    pub may2020_height: u64,
    /// Height pin for Nov 2020; falls back to the MTP time when absent.
    pub nov2020_height: Option<u64>,
    pub nov2020_activation_time: u64,
    /// Height pin for May 2022; falls back to the MTP time when absent.
    pub may2022_height: Option<u64>,
    pub may2022_activation_time: u64,
    /// Upgrade 9 (May 2023) is height activated.
    pub may2023_height: u64,
    /// Upgrade 10 (May 2024, adaptive block size) is MTP activated.
    pub may2024_activation_time: u64,

    /// Block size limit before the adaptive limit activates.
    pub legacy_max_block_size: u64,
    /// Adaptive block size controller parameters.
    pub abla: AblaConfig,
}

impl ConsensusParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet4 => Self::testnet4(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            genesis_hash: None,
            pow_limit: decode_compact(0x1d00_ffff).target,
            pow_target_spacing: 600,
            bip16_height: 173_805,
            bip65_height: 388_381,
            bip66_height: 363_725,
            bip68_height: 419_328,
            uahf_height: 478_559,
            daa_height: 504_031,
            nov2018_height: 556_767,
            nov2019_height: 609_136,
            may2020_height: 635_259,
            nov2020_height: Some(661_648),
            nov2020_activation_time: NOV2020_ACTIVATION_TIME,
            may2022_height: Some(740_238),
            may2022_activation_time: MAY2022_ACTIVATION_TIME,
            may2023_height: 792_772,
            may2024_activation_time: MAY2024_ACTIVATION_TIME,
            legacy_max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            abla: AblaConfig::make_default(DEFAULT_MAX_BLOCK_SIZE, false),
        }
    }

    pub fn testnet4() -> Self {
        Self {
            network: Network::Testnet4,
            genesis_hash: None,
            pow_limit: decode_compact(0x1d00_ffff).target,
            pow_target_spacing: 600,
            bip16_height: 1,
            bip65_height: 1,
            bip66_height: 1,
            bip68_height: 1,
            uahf_height: 6,
            daa_height: 3000,
            nov2018_height: 4000,
            nov2019_height: 5000,
            may2020_height: 0,
            nov2020_height: Some(16_845),
            nov2020_activation_time: NOV2020_ACTIVATION_TIME,
            may2022_height: Some(95_465),
            may2022_activation_time: MAY2022_ACTIVATION_TIME,
            may2023_height: 148_044,
            may2024_activation_time: MAY2024_ACTIVATION_TIME,
            legacy_max_block_size: 2_000_000,
            abla: AblaConfig::make_default(2_000_000, false),
        }
    }

    /// Regression-test network: trivial proof of work, height upgrades at
    /// genesis, time upgrades on their calendar dates.
    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            genesis_hash: None,
            pow_limit: decode_compact(shared_types::pow::REGTEST_POW_LIMIT_BITS).target,
            pow_target_spacing: 600,
            bip16_height: 0,
            bip65_height: 0,
            bip66_height: 0,
            bip68_height: 0,
            uahf_height: 0,
            daa_height: 0,
            nov2018_height: 0,
            nov2019_height: 0,
            may2020_height: 0,
            nov2020_height: None,
            nov2020_activation_time: NOV2020_ACTIVATION_TIME,
            may2022_height: None,
            may2022_activation_time: MAY2022_ACTIVATION_TIME,
            may2023_height: 0,
            may2024_activation_time: MAY2024_ACTIVATION_TIME,
            legacy_max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            abla: AblaConfig::make_default(DEFAULT_MAX_BLOCK_SIZE, false),
        }
    }
}

/// Operator configuration for the chain-state service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainstateConfig {
    pub network: Network,
    /// Blocks deeper than this below the active tip become final.
    pub max_reorg_depth: u64,
    /// Whether deep blocks are finalized at all.
    pub finalization_enabled: bool,
    /// Allow adaptive limits above 2 GiB.
    pub disable_2gb_cap: bool,
    /// Override for the Upgrade 9 activation height.
    pub upgrade9_activation_height: Option<u64>,
    /// Override for the Upgrade 10 activation time (MTP).
    pub upgrade10_activation_time: Option<u64>,
    /// Override for the legacy block size. Also re-derives the adaptive
    /// limit defaults from it.
    pub excessive_block_size: Option<u64>,
    /// Replace the network's adaptive limit parameters entirely.
    pub abla_override: Option<AblaConfig>,
}

impl Default for ChainstateConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            max_reorg_depth: DEFAULT_MAX_REORG_DEPTH,
            finalization_enabled: true,
            disable_2gb_cap: false,
            upgrade9_activation_height: None,
            upgrade10_activation_time: None,
            excessive_block_size: None,
            abla_override: None,
        }
    }
}

impl ChainstateConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_NETWORK`: mainnet, testnet4 or regtest (default: regtest)
    /// - `QC_MAX_REORG_DEPTH`: finalization depth (default: 10)
    /// - `QC_FINALIZATION`: enable finalization (default: true)
    /// - `QC_UPGRADE9_HEIGHT`: Upgrade 9 activation height override
    /// - `QC_UPGRADE10_TIME`: Upgrade 10 activation time override
    /// - `QC_EXCESSIVE_BLOCK_SIZE`: legacy block size override
    /// - `QC_DISABLE_2GB_CAP`: allow adaptive limits above 2 GiB
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(network) = std::env::var("QC_NETWORK") {
            match network.parse() {
                Ok(n) => config.network = n,
                Err(e) => warn!("QC_NETWORK ignored: {e}"),
            }
        }
        if let Some(depth) = env_u64("QC_MAX_REORG_DEPTH") {
            config.max_reorg_depth = depth;
        }
        if let Ok(v) = std::env::var("QC_FINALIZATION") {
            config.finalization_enabled = v.to_lowercase() != "false" && v != "0";
        }
        if let Some(height) = env_u64("QC_UPGRADE9_HEIGHT") {
            config.upgrade9_activation_height = Some(height);
        }
        if let Some(time) = env_u64("QC_UPGRADE10_TIME") {
            config.upgrade10_activation_time = Some(time);
        }
        if let Some(size) = env_u64("QC_EXCESSIVE_BLOCK_SIZE") {
            config.excessive_block_size = Some(size);
        }
        if let Ok(v) = std::env::var("QC_DISABLE_2GB_CAP") {
            config.disable_2gb_cap = v.to_lowercase() == "true" || v == "1";
        }

        config
    }

    /// Reject inconsistent settings before any state is built.
    pub fn validate(&self) -> ChainstateResult<()> {
        if self.finalization_enabled && self.max_reorg_depth == 0 {
            return Err(ChainstateError::InvalidConfig(
                "max_reorg_depth must be positive when finalization is enabled".into(),
            ));
        }
        if let Some(size) = self.excessive_block_size {
            if size < MIN_EXCESSIVE_BLOCK_SIZE {
                return Err(ChainstateError::InvalidConfig(format!(
                    "excessive block size {size} is below the minimum {MIN_EXCESSIVE_BLOCK_SIZE}"
                )));
            }
        }
        self.effective_abla().validate()
    }

    /// Effective consensus parameters with overrides applied.
    pub fn into_params(&self) -> ChainstateResult<ConsensusParams> {
        self.validate()?;
        let mut params = ConsensusParams::for_network(self.network);
        if let Some(height) = self.upgrade9_activation_height {
            params.may2023_height = height;
        }
        if let Some(time) = self.upgrade10_activation_time {
            params.may2024_activation_time = time;
        }
        if let Some(size) = self.excessive_block_size {
            params.legacy_max_block_size = size;
        }
        params.abla = self.effective_abla();
        Ok(params)
    }

    fn effective_abla(&self) -> AblaConfig {
        if let Some(config) = self.abla_override {
            return config;
        }
        match self.excessive_block_size {
            Some(size) => AblaConfig::make_default(size, false),
            None => ConsensusParams::for_network(self.network).abla,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{key} must be an unsigned integer, got {value:?}");
            None
        }
    }
}
