// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Broadcast racer: fire a wallet's transaction until it lands.
//!
//! There is no attempt ceiling. Each attempt picks a random endpoint,
//! refreshes the nonce there, escalates fees by attempt number, restamps an
//! expired router deadline, signs, transmits and waits for the receipt.
//! Wallets race independently.

use super::context::WalletIdentity;
use super::gas::{FeeEscalation, FeePair};
use super::swap::{sign_request, unix_now, SignedPackage};
use crate::error::SnipeError;
use crate::rpc::{Endpoint, EndpointClient, EndpointPool};
use crate::validators::SafetyFilter;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RacerSettings {
    /// Pause between attempts of one wallet.
    pub retry_pause: Duration,
    pub receipt_timeout: Duration,
    pub escalation: FeeEscalation,
}

/// What is being traded, for the safety filter.
#[derive(Debug, Clone)]
pub struct Subject {
    pub token: Address,
    pub symbol: String,
}

/// A landed transaction.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub wallet: String,
    pub address: Address,
    pub attempt: u32,
    pub endpoint: String,
    pub nonce: u64,
    pub tx_hash: B256,
    pub fees: FeePair,
    pub landed_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Nonce for the next attempt: never below the last one we transmitted + 1.
pub fn next_nonce(fetched: u64, last_sent: Option<u64>) -> u64 {
    match last_sent {
        Some(last) => fetched.max(last + 1),
        None => fetched,
    }
}

pub struct BroadcastRacer<C> {
    pool: Arc<EndpointPool<C>>,
    safety: Arc<SafetyFilter>,
    settings: RacerSettings,
    cancel: CancellationToken,
}

impl<C: EndpointClient> BroadcastRacer<C> {
    pub fn new(
        pool: Arc<EndpointPool<C>>,
        safety: Arc<SafetyFilter>,
        settings: RacerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            safety,
            settings,
            cancel,
        }
    }

    /// Retry one wallet's package until it is included with success status.
    ///
    /// Returns early only on cancellation or a safety-filter rejection.
    pub async fn fire(
        &self,
        wallet: &WalletIdentity,
        package: &SignedPackage,
        subject: &Subject,
    ) -> Result<BroadcastOutcome, SnipeError> {
        let started = Instant::now();
        let mut last_sent: Option<u64> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if self.cancel.is_cancelled() {
                return Err(SnipeError::Cancelled);
            }
            self.safety.check(subject.token, &subject.symbol)?;

            let endpoint = self.pool.pick_random();
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SnipeError::Cancelled),
                r = self.attempt(wallet, package, attempt, endpoint, &mut last_sent) => r,
            };

            match result {
                Ok((tx_hash, nonce, fees)) => {
                    let outcome = BroadcastOutcome {
                        wallet: wallet.label.clone(),
                        address: wallet.address,
                        attempt,
                        endpoint: endpoint.id.clone(),
                        nonce,
                        tx_hash,
                        fees,
                        landed_at: Utc::now(),
                        elapsed: started.elapsed(),
                    };
                    info!(
                        "✅ {} landed on attempt {} via {} in {:?}: {:?}",
                        wallet.label, attempt, endpoint.id, outcome.elapsed, tx_hash
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(
                        "🔁 {} attempt {} via {} failed: {}",
                        wallet.label, attempt, endpoint.id, e
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SnipeError::Cancelled),
                _ = tokio::time::sleep(self.settings.retry_pause) => {}
            }
        }
    }

    async fn attempt(
        &self,
        wallet: &WalletIdentity,
        package: &SignedPackage,
        attempt: u32,
        endpoint: &Endpoint<C>,
        last_sent: &mut Option<u64>,
    ) -> Result<(B256, u64, FeePair), SnipeError> {
        let fetched = endpoint.client.transaction_count(wallet.address).await?;
        let nonce = next_nonce(fetched, *last_sent);
        let fees = self.settings.escalation.apply(package.fees, attempt);

        let now = unix_now();
        let (raw, signed_hash) = if nonce == package.nonce && fees == package.fees && package.is_fresh(now) {
            (package.raw.clone(), package.tx_hash)
        } else {
            let (mut request, deadline) = package.renewed_request(now)?;
            if let Some(d) = deadline {
                debug!("{} deadline {}", wallet.label, d.at);
            }
            request.set_nonce(nonce);
            request.set_max_fee_per_gas(fees.max_fee_per_gas);
            request.set_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);
            sign_request(&wallet.signer, request).await?
        };

        let tx_hash = endpoint.client.send_raw(raw).await?;
        *last_sent = Some(nonce);
        if tx_hash != signed_hash {
            debug!("{}: node reported {:?}, signed {:?}", endpoint.id, tx_hash, signed_hash);
        }
        info!(
            "📤 {} attempt {} nonce {} via {} (max fee {} wei): {:?}",
            wallet.label, attempt, nonce, endpoint.id, fees.max_fee_per_gas, tx_hash
        );

        if endpoint
            .client
            .wait_for_receipt(tx_hash, self.settings.receipt_timeout)
            .await?
        {
            Ok((tx_hash, nonce, fees))
        } else {
            Err(SnipeError::Reverted(tx_hash))
        }
    }
}

impl<C: EndpointClient> BroadcastRacer<C> {
    /// Fire every wallet concurrently; results come back in input order.
    pub async fn fire_all(
        self: &Arc<Self>,
        jobs: Vec<(WalletIdentity, SignedPackage)>,
        subject: &Subject,
    ) -> Vec<(WalletIdentity, Result<BroadcastOutcome, SnipeError>)> {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|(wallet, package)| {
                let racer = Arc::clone(self);
                let subject = subject.clone();
                tokio::spawn(async move {
                    let result = racer.fire(&wallet, &package, &subject).await;
                    (wallet, result)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in futures_util::future::join_all(handles).await {
            match handle {
                Ok(pair) => results.push(pair),
                Err(e) => warn!("⚠️ Broadcast task aborted: {}", e),
            }
        }
        results
    }
}
