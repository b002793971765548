// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Market-value gates around the broadcast.

pub mod valuation;
pub mod watchers;

pub use valuation::{MarketValuer, PriceFeed, ValueSource};
pub use watchers::{CeilingDecision, GateWatcher};

use crate::executor::SellInstruction;

/// Value thresholds in millions of the fiat unit.
#[derive(Debug, Clone, Default)]
pub struct GateThresholds {
    pub ceiling: Option<f64>,
    pub floor: Option<f64>,
    pub take_profit: Option<f64>,
    pub sell: Option<SellInstruction>,
}

impl GateThresholds {
    /// Anything to watch before broadcasting.
    pub fn pre_trade(&self) -> bool {
        self.ceiling.is_some() || self.floor.is_some()
    }

    /// Take-profit target when a non-zero sell instruction backs it.
    pub fn take_profit_target(&self) -> Option<(f64, SellInstruction)> {
        match (self.take_profit, self.sell) {
            (Some(target), Some(sell)) if !sell.is_zero() => Some((target, sell)),
            _ => None,
        }
    }
}
