// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error taxonomy for a sniping session.

use alloy::primitives::{Address, B256};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SnipeError {
    /// A single read, subscribe or transmit against one endpoint failed.
    #[error("endpoint {endpoint}: {message}")]
    Endpoint { endpoint: String, message: String },

    /// A push channel could not be opened or closed under us.
    #[error("subscription on {endpoint} failed: {message}")]
    Subscription { endpoint: String, message: String },

    #[error("deployment race exhausted, last channel error: {last_error}")]
    RaceExhausted { last_error: String },

    #[error("cancelled by operator")]
    Cancelled,

    #[error("wallet {wallet:?} setup failed: {message}")]
    WalletSetup { wallet: Address, message: String },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("transaction {0:?} reverted")]
    Reverted(B256),

    #[error("receipt for {0:?} not seen before timeout")]
    ReceiptTimeout(B256),

    #[error("safety filter rejected {0}")]
    Denied(String),

    #[error("value computation failed: {0}")]
    Gate(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no usable endpoints")]
    NoEndpoints,

    #[error("no usable wallets")]
    NoWallets,
}

impl SnipeError {
    pub fn endpoint(endpoint: &str, message: impl std::fmt::Display) -> Self {
        Self::Endpoint {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }

    /// Errors that end the whole session rather than one attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RaceExhausted { .. }
                | Self::Cancelled
                | Self::Denied(_)
                | Self::NoEndpoints
                | Self::NoWallets
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_terminal_split() {
        assert!(SnipeError::Denied("0xdead".into()).is_terminal());
        assert!(SnipeError::RaceExhausted { last_error: "closed".into() }.is_terminal());
        assert!(!SnipeError::endpoint("alpha", "timeout").is_terminal());
        assert!(!SnipeError::Reverted(B256::ZERO).is_terminal());
        assert!(!SnipeError::Gate("no pair".into()).is_terminal());
    }
}
