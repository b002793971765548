// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wallet context prefetching ahead of detection.

use crate::error::SnipeError;
use crate::rpc::{Endpoint, EndpointClient, FeeSnapshot};
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use futures_util::future::join_all;
use std::fmt;
use std::time::Instant;
use tracing::{error, info};

/// A wallet that can sign.
#[derive(Clone)]
pub struct WalletIdentity {
    pub label: String,
    pub address: Address,
    pub signer: EthereumWallet,
}

impl WalletIdentity {
    pub fn from_signer(label: impl Into<String>, signer: PrivateKeySigner) -> Self {
        Self {
            label: label.into(),
            address: signer.address(),
            signer: EthereumWallet::from(signer),
        }
    }
}

impl fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletIdentity")
            .field("label", &self.label)
            .field("address", &self.address)
            .finish()
    }
}

/// Per-wallet chain state captured before detection.
///
/// Stale as soon as the wallet sends anything.
#[derive(Debug, Clone)]
pub struct WalletContext {
    pub wallet: WalletIdentity,
    pub nonce: u64,
    pub chain_id: u64,
    pub fees: FeeSnapshot,
}

/// Fetch nonce, chain id and fees in one concurrent round trip.
pub async fn prefetch<C: EndpointClient>(
    client: &C,
    wallet: WalletIdentity,
) -> Result<WalletContext, SnipeError> {
    let (nonce, chain_id, fees) = tokio::try_join!(
        client.transaction_count(wallet.address),
        client.chain_id(),
        client.fee_snapshot(),
    )
    .map_err(|e| SnipeError::WalletSetup {
        wallet: wallet.address,
        message: e.to_string(),
    })?;

    Ok(WalletContext {
        wallet,
        nonce,
        chain_id,
        fees,
    })
}

/// Prefetch every wallet concurrently; failed wallets are dropped from the session.
pub async fn prefetch_all<C: EndpointClient>(
    endpoint: &Endpoint<C>,
    wallets: Vec<WalletIdentity>,
) -> Vec<WalletContext> {
    let started = Instant::now();
    let total = wallets.len();

    let results = join_all(
        wallets
            .into_iter()
            .map(|wallet| prefetch(endpoint.client.as_ref(), wallet)),
    )
    .await;

    let mut contexts = Vec::with_capacity(total);
    for result in results {
        match result {
            Ok(ctx) => {
                info!(
                    "👛 {} {:?}: nonce {} chain {} base fee {} wei",
                    ctx.wallet.label, ctx.wallet.address, ctx.nonce, ctx.chain_id, ctx.fees.base_fee
                );
                contexts.push(ctx);
            }
            Err(e) => error!("❌ Excluding wallet via {}: {}", endpoint.id, e),
        }
    }

    info!(
        "✅ Prefetched {}/{} wallets in {:?}",
        contexts.len(),
        total,
        started.elapsed()
    );
    contexts
}
