// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Static deny-list consulted before every broadcast attempt.

use crate::error::SnipeError;
use alloy::primitives::Address;
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct SafetyFilter {
    addresses: HashSet<Address>,
    /// Lowercased.
    symbols: HashSet<String>,
}

impl SafetyFilter {
    pub fn new(addresses: Vec<Address>, symbols: Vec<String>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            symbols: symbols
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.symbols.is_empty()
    }

    /// Reject a denied token address or symbol. Symbols match case-insensitively.
    pub fn check(&self, token: Address, symbol: &str) -> Result<(), SnipeError> {
        if self.addresses.contains(&token) {
            warn!("❌ REJECT [DENY-LIST]: address {:?}", token);
            return Err(SnipeError::Denied(format!("address {:?} is deny-listed", token)));
        }

        let symbol_lower = symbol.trim().to_lowercase();
        if !symbol_lower.is_empty() && self.symbols.contains(&symbol_lower) {
            warn!("❌ REJECT [DENY-LIST]: symbol {} ({:?})", symbol, token);
            return Err(SnipeError::Denied(format!("symbol {} is deny-listed", symbol)));
        }

        Ok(())
    }
}
