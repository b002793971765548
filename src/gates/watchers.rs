// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ceiling, floor and take-profit watchers.
//!
//! A failed valuation is logged and retried on the next poll; only
//! cancellation ends a watch early.

use super::valuation::ValueSource;
use crate::error::SnipeError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CeilingDecision {
    Proceed(f64),
    Abort(f64),
}

pub struct GateWatcher<V> {
    source: V,
    interval: Duration,
    cancel: CancellationToken,
}

impl<V: ValueSource> GateWatcher<V> {
    pub fn new(source: V, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            source,
            interval,
            cancel,
        }
    }

    /// Single decision from the first successful reading.
    pub async fn check_ceiling(&self, ceiling: f64) -> Result<CeilingDecision, SnipeError> {
        let value = self.poll_until("ceiling", |_| true).await?;
        if value > ceiling {
            warn!("🛑 Value {:.3}M above ceiling {:.3}M, aborting", value, ceiling);
            Ok(CeilingDecision::Abort(value))
        } else {
            info!("✅ Value {:.3}M within ceiling {:.3}M", value, ceiling);
            Ok(CeilingDecision::Proceed(value))
        }
    }

    /// Wait until the value is at or below `floor`.
    pub async fn wait_for_floor(&self, floor: f64) -> Result<f64, SnipeError> {
        info!("📉 Waiting for value <= {:.3}M", floor);
        let value = self.poll_until("floor", |v| v <= floor).await?;
        info!("✅ Floor reached at {:.3}M", value);
        Ok(value)
    }

    /// Wait until the value is at or above `target`.
    pub async fn wait_for_take_profit(&self, target: f64) -> Result<f64, SnipeError> {
        info!("📈 Watching for take-profit at {:.3}M", target);
        let value = self.poll_until("take-profit", |v| v >= target).await?;
        info!("💰 Take-profit reached at {:.3}M", value);
        Ok(value)
    }

    async fn poll_until(
        &self,
        gate: &str,
        done: impl Fn(f64) -> bool,
    ) -> Result<f64, SnipeError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SnipeError::Cancelled);
            }

            let reading = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SnipeError::Cancelled),
                r = self.source.value_millions() => r,
            };
            match reading {
                Ok(value) if done(value) => return Ok(value),
                Ok(value) => debug!("{} gate: {:.3}M", gate, value),
                Err(e) => warn!("⚠️ {} gate valuation failed: {}", gate, e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SnipeError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
