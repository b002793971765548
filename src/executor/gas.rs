// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Gas strategy for transaction priority and per-attempt fee escalation.

use crate::rpc::FeeSnapshot;

/// EIP-1559 fee pair in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePair {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Gas strategy determines how aggressively we bid for transaction inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasStrategy {
    /// base_fee * 1.1 + priority
    Normal,

    /// base_fee * 1.5 + priority
    Aggressive,

    /// base_fee * 2.0 + priority
    Frontrun,
}

impl GasStrategy {
    /// Calculate the base fee pair from a snapshot.
    ///
    /// `priority_floor` is the configured minimum tip; the node's suggestion
    /// wins when it is higher.
    pub fn calculate(&self, fees: FeeSnapshot, priority_floor: u128) -> FeePair {
        let priority = fees.priority_fee.max(priority_floor);
        let scaled = match self {
            Self::Normal => fees.base_fee * 110 / 100,
            Self::Aggressive => fees.base_fee * 150 / 100,
            Self::Frontrun => fees.base_fee * 200 / 100,
        };
        FeePair {
            max_fee_per_gas: scaled + priority,
            max_priority_fee_per_gas: priority,
        }
    }

    /// Get strategy from config multiplier.
    pub fn from_multiplier(multiplier: f64) -> Self {
        if multiplier >= 2.0 {
            Self::Frontrun
        } else if multiplier >= 1.5 {
            Self::Aggressive
        } else {
            Self::Normal
        }
    }
}

impl Default for GasStrategy {
    fn default() -> Self {
        Self::Aggressive
    }
}

/// Per-attempt fee escalation.
///
/// Attempt 1 pays the base pair; every further attempt adds `step_pct`
/// percent of it. `max_multiplier_pct` caps the multiplier when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEscalation {
    pub step_pct: u64,
    pub max_multiplier_pct: Option<u64>,
}

impl Default for FeeEscalation {
    fn default() -> Self {
        Self {
            step_pct: 10,
            max_multiplier_pct: None,
        }
    }
}

impl FeeEscalation {
    /// Multiplier in percent for a 1-based attempt number.
    pub fn multiplier_pct(&self, attempt: u32) -> u64 {
        let steps = u64::from(attempt.saturating_sub(1));
        let pct = 100u64.saturating_add(self.step_pct.saturating_mul(steps));
        match self.max_multiplier_pct {
            Some(cap) => pct.min(cap.max(100)),
            None => pct,
        }
    }

    pub fn apply(&self, base: FeePair, attempt: u32) -> FeePair {
        let pct = u128::from(self.multiplier_pct(attempt));
        FeePair {
            max_fee_per_gas: base.max_fee_per_gas.saturating_mul(pct) / 100,
            max_priority_fee_per_gas: base.max_priority_fee_per_gas.saturating_mul(pct) / 100,
        }
    }
}
