//! # Adaptive Block Size Limit (ABLA)
//!
//! A per-tip controller that lets the maximum block size follow demand.
//! The limit has two additive parts:
//!
//! - the **control size** (epsilon): a slow baseline that grows when blocks
//!   use more than `1/zeta` of the limit and shrinks back toward its floor
//!   otherwise;
//! - the **elastic buffer** (beta): grows by `delta` times each control size
//!   increase and decays by `1/theta` every block.
//!
//! All arithmetic is integer fixed point with `zeta` scaled by `2^7`, and
//! every node must reproduce it bit for bit.

use serde::{Deserialize, Serialize};

use super::error::{ChainstateError, ChainstateResult};

/// Fixed-point scale of `zeta`.
pub const B7: u64 = 1 << 7;

/// Hard cap applied to the limit unless explicitly disabled.
pub const MAX_CONSENSUS_BLOCK_SIZE_2GB: u64 = (1 << 31) - 1;

pub const MIN_ZETA_XB7: u64 = 129;
pub const MAX_ZETA_XB7: u64 = 256;
pub const MIN_GAMMA_RECIPROCAL: u64 = 9484;
pub const MAX_GAMMA_RECIPROCAL: u64 = 151_744;
pub const MIN_DELTA: u64 = 0;
pub const MAX_DELTA: u64 = 32;
pub const MIN_THETA_RECIPROCAL: u64 = 9484;
pub const MAX_THETA_RECIPROCAL: u64 = 151_744;

/// `a * b / c` with a 128-bit intermediate product.
fn muldiv(a: u64, b: u64, c: u64) -> u64 {
    let r = u128::from(a) * u128::from(b) / u128::from(c);
    u64::try_from(r).unwrap_or(u64::MAX)
}

/// Network-pinned controller parameters.
///
/// Deserializes from the `{epsilon0, beta0, zeta, gammaReciprocal, delta,
/// thetaReciprocal}` shape used by the published test vectors. The maxima
/// are derived by [`AblaConfig::set_max`] and not read from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AblaConfig {
    /// Initial (and minimum) control size, epsilon0.
    #[serde(rename = "epsilon0")]
    pub initial_control_size: u64,
    /// Initial (and minimum) elastic buffer, beta0.
    #[serde(rename = "beta0")]
    pub initial_elastic_buffer: u64,
    /// Growth factor zeta, scaled by [`B7`].
    #[serde(rename = "zeta")]
    pub growth_factor_xb7: u64,
    /// Reciprocal of the control size adjustment rate, 1/gamma.
    #[serde(rename = "gammaReciprocal")]
    pub shrink_rate_reciprocal: u64,
    /// Elastic buffer gear ratio, delta.
    #[serde(rename = "delta")]
    pub decay_step: u64,
    /// Reciprocal of the elastic buffer decay rate, 1/theta.
    #[serde(rename = "thetaReciprocal")]
    pub buffer_decay_reciprocal: u64,
    /// Largest control size that cannot overflow, derived.
    #[serde(skip)]
    pub control_size_max: u64,
    /// Largest elastic buffer that cannot overflow, derived.
    #[serde(skip)]
    pub elastic_buffer_max: u64,
}

impl AblaConfig {
    /// Default parameters for a network whose legacy limit is `block_size`.
    ///
    /// With `fixed_size` the controller never moves: the limit stays at
    /// `block_size`.
    pub fn make_default(block_size: u64, fixed_size: bool) -> Self {
        let mut config = Self {
            initial_control_size: if fixed_size { block_size } else { block_size / 2 },
            initial_elastic_buffer: if fixed_size { 0 } else { block_size / 2 },
            growth_factor_xb7: 192,
            shrink_rate_reciprocal: 37938,
            decay_step: if fixed_size { 0 } else { 10 },
            buffer_decay_reciprocal: 37938,
            control_size_max: 0,
            elastic_buffer_max: 0,
        };
        config.set_max();
        if fixed_size {
            config.control_size_max = config.initial_control_size;
            config.elastic_buffer_max = 0;
        }
        config
    }

    /// Parse a test-vector style JSON object, derive maxima and validate.
    pub fn from_json(json: &str) -> ChainstateResult<Self> {
        let mut config: Self = serde_json::from_str(json)
            .map_err(|e| ChainstateError::InvalidAblaConfig(e.to_string()))?;
        config.set_max();
        config.validate()?;
        Ok(config)
    }

    /// Derive `control_size_max` and `elastic_buffer_max` so that
    /// `zeta * (epsilon + beta)` can never overflow 64 bits.
    pub fn set_max(&mut self) {
        let zeta = self.growth_factor_xb7.max(MIN_ZETA_XB7);
        let gamma_reciprocal = self.shrink_rate_reciprocal.max(1);

        let max_safe_limit = u64::MAX / zeta * B7;
        let ratio = (zeta - B7).saturating_mul(self.buffer_decay_reciprocal) / gamma_reciprocal;
        let numerator = self.decay_step.saturating_mul(ratio);
        let denominator = ratio.saturating_add(B7);

        self.control_size_max =
            max_safe_limit / numerator.saturating_add(denominator) * denominator;
        self.elastic_buffer_max = max_safe_limit - self.control_size_max;
    }

    /// Sanity-check the parameter set, describing the first failure.
    pub fn is_valid(&self) -> Result<(), &'static str> {
        if self.initial_control_size > self.control_size_max {
            return Err("initial control block size limit sanity check failed (epsilonMax)");
        }
        if self.initial_elastic_buffer > self.elastic_buffer_max {
            return Err("initial elastic buffer size sanity check failed (betaMax)");
        }
        if !(MIN_ZETA_XB7..=MAX_ZETA_XB7).contains(&self.growth_factor_xb7) {
            return Err("zeta sanity check failed");
        }
        if !(MIN_GAMMA_RECIPROCAL..=MAX_GAMMA_RECIPROCAL).contains(&self.shrink_rate_reciprocal) {
            return Err("gammaReciprocal sanity check failed");
        }
        if !(MIN_DELTA..=MAX_DELTA).contains(&self.decay_step) {
            return Err("delta sanity check failed");
        }
        if !(MIN_THETA_RECIPROCAL..=MAX_THETA_RECIPROCAL).contains(&self.buffer_decay_reciprocal)
        {
            return Err("thetaReciprocal sanity check failed");
        }
        let min_control = muldiv(
            self.shrink_rate_reciprocal,
            B7,
            self.growth_factor_xb7 - B7,
        );
        if self.initial_control_size < min_control {
            return Err("epsilon0 sanity check failed: too low relative to gamma and zeta");
        }
        Ok(())
    }

    /// [`Self::is_valid`] as a chain-state error.
    pub fn validate(&self) -> ChainstateResult<()> {
        self.is_valid()
            .map_err(|e| ChainstateError::InvalidAblaConfig(e.to_string()))
    }
}

/// Controller state attached to one block.
///
/// `control_size + elastic_buffer` is the limit that governed the block;
/// `block_size` is the size that block actually used (zero until known).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AblaState {
    pub block_size: u64,
    pub control_size: u64,
    pub elastic_buffer: u64,
}

impl AblaState {
    /// State governing the first block after activation.
    pub fn new(config: &AblaConfig) -> Self {
        Self {
            block_size: 0,
            control_size: config.initial_control_size,
            elastic_buffer: config.initial_elastic_buffer,
        }
    }

    /// Rebuild from the `(size, control, buffer)` projection.
    pub fn from_tuple((block_size, control_size, elastic_buffer): (u64, u64, u64)) -> Self {
        Self {
            block_size,
            control_size,
            elastic_buffer,
        }
    }

    pub fn to_tuple(&self) -> (u64, u64, u64) {
        (self.block_size, self.control_size, self.elastic_buffer)
    }

    /// Same control state, recording the size actually used.
    pub fn with_block_size(self, block_size: u64) -> Self {
        Self { block_size, ..self }
    }

    pub fn control_block_size(&self) -> u64 {
        self.control_size
    }

    pub fn elastic_buffer_size(&self) -> u64 {
        self.elastic_buffer
    }

    /// Limit for the block this state governs.
    pub fn block_size_limit(&self, disable_2gb_cap: bool) -> u64 {
        let limit = self.control_size.saturating_add(self.elastic_buffer);
        if disable_2gb_cap {
            limit
        } else {
            limit.min(MAX_CONSENSUS_BLOCK_SIZE_2GB)
        }
    }

    /// State bounds: control size within `[epsilon0, epsilon_max]`, elastic
    /// buffer at most `beta_max`.
    pub fn is_valid(&self, config: &AblaConfig) -> bool {
        self.control_size >= config.initial_control_size
            && self.control_size <= config.control_size_max
            && self.elastic_buffer <= config.elastic_buffer_max
    }

    /// State governing the next block, given that the block governed by
    /// `self` used `actual_block_size` bytes. The returned `block_size` is
    /// zero.
    pub fn next_block_state(&self, config: &AblaConfig, actual_block_size: u64) -> Self {
        let epsilon = self.control_size;
        let beta = self.elastic_buffer;
        let zeta = config.growth_factor_xb7;

        let clamped = actual_block_size.min(epsilon.saturating_add(beta));
        let amplified = muldiv(zeta, clamped, B7);
        let grew = amplified > epsilon;

        let mut next_epsilon = if grew {
            let bytes_to_add = amplified - epsilon;
            let amplified_limit = muldiv(zeta, epsilon + beta, B7);
            let bytes_max = amplified_limit - epsilon;
            let scaling_offset = muldiv(muldiv(zeta, beta, B7), bytes_to_add, bytes_max);
            epsilon + (bytes_to_add - scaling_offset) / config.shrink_rate_reciprocal
        } else {
            let bytes_to_remove = epsilon - amplified;
            (epsilon - bytes_to_remove / config.shrink_rate_reciprocal)
                .max(config.initial_control_size)
        };

        let buffer_decay = beta / config.buffer_decay_reciprocal;
        let mut next_beta = if grew {
            beta - buffer_decay + (next_epsilon - epsilon) * config.decay_step
        } else {
            beta - buffer_decay
        };
        next_beta = next_beta.max(config.initial_elastic_buffer);

        next_epsilon = next_epsilon.min(config.control_size_max);
        next_beta = next_beta.min(config.elastic_buffer_max);

        Self {
            block_size: 0,
            control_size: next_epsilon,
            elastic_buffer: next_beta,
        }
    }

    /// Limit the next block would get if the block governed by `self` were
    /// exactly as large as its own limit.
    pub fn get_next_block_size_limit(&self, config: &AblaConfig, disable_2gb_cap: bool) -> u64 {
        self.next_block_state(config, self.block_size_limit(disable_2gb_cap))
            .block_size_limit(disable_2gb_cap)
    }

    /// Limit after `blocks_ahead` successive blocks that each use their
    /// full limit, starting from `self`.
    pub fn calc_lookahead_block_size_limit(
        &self,
        config: &AblaConfig,
        blocks_ahead: u64,
        disable_2gb_cap: bool,
    ) -> u64 {
        let mut state = *self;
        for _ in 0..blocks_ahead {
            let full = state.block_size_limit(disable_2gb_cap);
            state = state.next_block_state(config, full);
        }
        state.block_size_limit(disable_2gb_cap)
    }
}
