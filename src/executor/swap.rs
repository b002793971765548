// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Swap pre-signing for buying tokens.
//!
//! Calldata is encoded before the token exists, with a placeholder in the
//! swap path and a zero deadline. Finalizing patches both words in place and
//! signs, so nothing but transmission is left after detection.

use super::context::WalletContext;
use super::gas::{FeePair, GasStrategy};
use crate::error::SnipeError;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Stands in for the token address until detection.
pub const PLACEHOLDER_TOKEN: Address = address!("0x000000000000000000000000000000000000dEaD");

/// Byte offset of the deadline word: selector, amountOutMin, path offset, to.
pub(crate) const BUY_DEADLINE_OFFSET: usize = 4 + 32 * 3;

// Router interface for swaps
sol! {
    interface IRouter {
        function swapExactETHForTokens(
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external payable returns (uint256[] memory amounts);
    }
}

/// Fixed parameters of the buy, shared by every wallet.
#[derive(Debug, Clone)]
pub struct SwapParams {
    pub router: Address,
    pub wrapped_native: Address,
    /// Native amount spent per wallet.
    pub amount_in: U256,
    /// Minimum tokens out. Zero trades slippage protection for speed.
    pub min_out: U256,
    pub gas_limit: u64,
    pub deadline_secs: u64,
}

/// Router deadline embedded in a package's calldata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Byte offset of the 32-byte deadline word.
    pub offset: usize,
    /// Seconds ahead of signing time.
    pub window_secs: u64,
    /// Unix time written into the signed bytes.
    pub at: u64,
}

impl Deadline {
    pub fn new(offset: usize, window_secs: u64) -> Self {
        Self {
            offset,
            window_secs,
            at: unix_now() + window_secs,
        }
    }

    /// Same word, restamped from `now`.
    pub fn renewed(&self, now: u64) -> Self {
        Self {
            at: now + self.window_secs,
            ..*self
        }
    }
}

/// A signed, broadcastable transaction and the request it came from.
#[derive(Debug, Clone)]
pub struct SignedPackage {
    pub raw: Bytes,
    pub request: TransactionRequest,
    pub nonce: u64,
    pub fees: FeePair,
    pub tx_hash: B256,
    pub sign_time: Duration,
    /// `None` for calls without a deadline, such as approvals.
    pub deadline: Option<Deadline>,
}

impl SignedPackage {
    /// Whether the signed bytes can still be executed at `now`.
    pub fn is_fresh(&self, now: u64) -> bool {
        self.deadline.map_or(true, |d| d.at > now)
    }

    /// Copy of the request with the deadline word restamped from `now`.
    pub fn renewed_request(&self, now: u64) -> Result<(TransactionRequest, Option<Deadline>), SnipeError> {
        let mut request = self.request.clone();
        let Some(deadline) = self.deadline else {
            return Ok((request, None));
        };
        let deadline = deadline.renewed(now);
        let input = self
            .request
            .input
            .input()
            .ok_or_else(|| SnipeError::Signing("package has no calldata".into()))?;
        request.set_input(write_deadline(input, deadline.offset, deadline.at)?);
        Ok((request, Some(deadline)))
    }
}

/// Unsigned buy for one wallet, waiting for its token.
#[derive(Debug, Clone)]
pub struct PreparedSwap {
    pub ctx: WalletContext,
    pub request: TransactionRequest,
}

/// Builds and signs buy transactions without touching the network.
#[derive(Debug, Clone)]
pub struct PreSigner {
    params: SwapParams,
    gas_strategy: GasStrategy,
    priority_floor: u128,
    #[cfg(test)]
    sign_delay: Duration,
}

impl PreSigner {
    pub fn new(params: SwapParams, gas_strategy: GasStrategy, priority_floor: u128) -> Self {
        Self {
            params,
            gas_strategy,
            priority_floor,
            #[cfg(test)]
            sign_delay: Duration::ZERO,
        }
    }

    /// Fee pair for a wallet's snapshot before escalation.
    pub fn base_fees(&self, ctx: &WalletContext) -> FeePair {
        self.gas_strategy.calculate(ctx.fees, self.priority_floor)
    }

    /// Encode the buy with the placeholder token.
    pub fn prepare(&self, ctx: WalletContext) -> PreparedSwap {
        let call = IRouter::swapExactETHForTokensCall {
            amountOutMin: self.params.min_out,
            path: vec![self.params.wrapped_native, PLACEHOLDER_TOKEN],
            to: ctx.wallet.address,
            deadline: U256::ZERO,
        };

        let request = unsigned_request(
            &ctx,
            self.params.router,
            self.params.amount_in,
            Bytes::from(call.abi_encode()),
            self.params.gas_limit,
            self.base_fees(&ctx),
            ctx.nonce,
        );

        PreparedSwap { ctx, request }
    }

    /// Patch the token and deadline in, then sign.
    pub async fn finalize(
        &self,
        prepared: &PreparedSwap,
        token: Address,
    ) -> Result<SignedPackage, SnipeError> {
        let started = Instant::now();
        let input = prepared
            .request
            .input
            .input()
            .ok_or_else(|| SnipeError::Signing("prepared swap has no calldata".into()))?;

        let deadline = Deadline::new(BUY_DEADLINE_OFFSET, self.params.deadline_secs);
        let patched = patch_calldata(input, token, deadline.at)?;

        let mut request = prepared.request.clone();
        request.set_input(patched);

        let fees = FeePair {
            max_fee_per_gas: request.max_fee_per_gas.unwrap_or_default(),
            max_priority_fee_per_gas: request.max_priority_fee_per_gas.unwrap_or_default(),
        };
        #[cfg(test)]
        tokio::time::sleep(self.sign_delay).await;
        let (raw, tx_hash) = sign_request(&prepared.ctx.wallet.signer, request.clone()).await?;

        Ok(SignedPackage {
            raw,
            request,
            nonce: prepared.ctx.nonce,
            fees,
            tx_hash,
            sign_time: started.elapsed(),
            deadline: Some(deadline),
        })
    }

    /// Finalize every wallet in parallel. Wallets that fail to sign are dropped.
    pub async fn finalize_all(
        &self,
        prepared: Vec<PreparedSwap>,
        token: Address,
    ) -> Vec<(WalletContext, SignedPackage)> {
        let started = Instant::now();
        let handles: Vec<_> = prepared
            .into_iter()
            .map(|p| {
                let signer = self.clone();
                tokio::spawn(async move {
                    let result = signer.finalize(&p, token).await;
                    (p.ctx, result)
                })
            })
            .collect();

        let mut packages = Vec::with_capacity(handles.len());
        for handle in futures_util::future::join_all(handles).await {
            match handle {
                Ok((ctx, Ok(package))) => {
                    info!(
                        "✍️ {} signed nonce {} in {:?} ({:?})",
                        ctx.wallet.label, package.nonce, package.sign_time, package.tx_hash
                    );
                    packages.push((ctx, package));
                }
                Ok((ctx, Err(e))) => {
                    error!("❌ Excluding {} {:?}: {}", ctx.wallet.label, ctx.wallet.address, e)
                }
                Err(e) => error!("❌ Signing task failed: {}", e),
            }
        }

        info!(
            "✍️ {} packages ready in {:?}",
            packages.len(),
            started.elapsed()
        );
        packages
    }
}

/// EIP-1559 request with every field the signer needs.
pub fn unsigned_request(
    ctx: &WalletContext,
    to: Address,
    value: U256,
    input: Bytes,
    gas_limit: u64,
    fees: FeePair,
    nonce: u64,
) -> TransactionRequest {
    TransactionRequest::default()
        .from(ctx.wallet.address)
        .to(to)
        .value(value)
        .input(input.into())
        .nonce(nonce)
        .gas_limit(gas_limit)
        .max_fee_per_gas(fees.max_fee_per_gas)
        .max_priority_fee_per_gas(fees.max_priority_fee_per_gas)
        .with_chain_id(ctx.chain_id)
}

/// Sign locally and return the EIP-2718 bytes with their hash.
pub async fn sign_request(
    wallet: &EthereumWallet,
    request: TransactionRequest,
) -> Result<(Bytes, B256), SnipeError> {
    let envelope = request
        .build(wallet)
        .await
        .map_err(|e| SnipeError::Signing(e.to_string()))?;
    let tx_hash = *envelope.tx_hash();
    Ok((Bytes::from(envelope.encoded_2718()), tx_hash))
}

pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Replace the placeholder token and the deadline word.
pub fn patch_calldata(input: &[u8], token: Address, deadline: u64) -> Result<Bytes, SnipeError> {
    let needle = PLACEHOLDER_TOKEN.as_slice();
    let at = input
        .windows(needle.len())
        .position(|w| w == needle)
        .ok_or_else(|| SnipeError::Signing("placeholder not found in calldata".into()))?;

    let mut out = write_deadline(input, BUY_DEADLINE_OFFSET, deadline)?.to_vec();
    out[at..at + 20].copy_from_slice(token.as_slice());
    Ok(Bytes::from(out))
}

/// Overwrite the 32-byte deadline word at `offset`.
pub fn write_deadline(input: &[u8], offset: usize, deadline: u64) -> Result<Bytes, SnipeError> {
    if input.len() < offset + 32 {
        return Err(SnipeError::Signing("calldata too short".into()));
    }
    let mut out = input.to_vec();
    out[offset..offset + 32].copy_from_slice(&U256::from(deadline).to_be_bytes::<32>());
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::tests::test_wallets;
    use crate::rpc::FeeSnapshot;
    use alloy::consensus::{Transaction as _, TxEnvelope};
    use alloy::eips::eip2718::Decodable2718;

    const TOKEN: Address = address!("0x1111111111111111111111111111111111111111");
    const ROUTER: Address = address!("0x2222222222222222222222222222222222222222");
    const WNATIVE: Address = address!("0x3333333333333333333333333333333333333333");

    fn ctx(index: usize, nonce: u64) -> WalletContext {
        WalletContext {
            wallet: test_wallets()[index].clone(),
            nonce,
            chain_id: 31337,
            fees: FeeSnapshot {
                base_fee: 1_000_000_000,
                priority_fee: 2_000_000_000,
            },
        }
    }

    fn signer() -> PreSigner {
        PreSigner::new(
            SwapParams {
                router: ROUTER,
                wrapped_native: WNATIVE,
                amount_in: U256::from(10u64).pow(U256::from(17u64)),
                min_out: U256::ZERO,
                gas_limit: 300_000,
                deadline_secs: 300,
            },
            GasStrategy::Aggressive,
            0,
        )
    }

    #[test]
    fn patching_replaces_placeholder_and_deadline() {
        let prepared = signer().prepare(ctx(0, 0));
        let input = prepared.request.input.input().unwrap().clone();
        let patched = patch_calldata(&input, TOKEN, 1_700_000_000).unwrap();

        let call = IRouter::swapExactETHForTokensCall::abi_decode(&patched).unwrap();
        assert_eq!(call.path, vec![WNATIVE, TOKEN]);
        assert_eq!(call.deadline, U256::from(1_700_000_000u64));
        assert_eq!(call.amountOutMin, U256::ZERO);
    }

    #[test]
    fn patching_rejects_foreign_calldata() {
        assert!(patch_calldata(&[0u8; 200], TOKEN, 1).is_err());
        assert!(patch_calldata(&[0u8; 8], TOKEN, 1).is_err());
    }

    #[tokio::test]
    async fn finalize_signs_for_the_detected_token() {
        let presigner = signer();
        let prepared = presigner.prepare(ctx(0, 7));
        let package = presigner.finalize(&prepared, TOKEN).await.unwrap();

        let envelope = TxEnvelope::decode_2718(&mut package.raw.as_ref()).unwrap();
        assert_eq!(envelope.nonce(), 7);
        assert_eq!(envelope.to(), Some(ROUTER));
        assert_eq!(*envelope.tx_hash(), package.tx_hash);

        let call = IRouter::swapExactETHForTokensCall::abi_decode(envelope.input()).unwrap();
        assert_eq!(call.path[1], TOKEN);
        assert_eq!(call.to, prepared.ctx.wallet.address);
    }

    #[tokio::test]
    async fn finalize_all_covers_every_wallet() {
        let presigner = signer();
        let prepared = (0..3).map(|i| presigner.prepare(ctx(i, i as u64))).collect();
        let packages = presigner.finalize_all(prepared, TOKEN).await;

        assert_eq!(packages.len(), 3);
        for (ctx, package) in &packages {
            assert_eq!(ctx.nonce, package.nonce);
        }
    }

    #[tokio::test]
    async fn finalize_all_signs_wallets_concurrently() {
        let mut presigner = signer();
        presigner.sign_delay = Duration::from_millis(150);
        let prepared = (0..3).map(|i| presigner.prepare(ctx(i, 0))).collect();

        let started = Instant::now();
        let packages = presigner.finalize_all(prepared, TOKEN).await;

        assert_eq!(packages.len(), 3);
        // Sequential would be at least 3 * 150ms.
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn renewed_request_restamps_only_the_deadline() {
        let presigner = signer();
        let mut package = presigner.finalize(&presigner.prepare(ctx(0, 0)), TOKEN).await.unwrap();
        package.deadline = package.deadline.map(|d| Deadline { at: 10, ..d });
        assert!(!package.is_fresh(unix_now()));

        let now = unix_now();
        let (request, deadline) = package.renewed_request(now).unwrap();

        assert_eq!(deadline.unwrap().at, now + 300);
        let call = IRouter::swapExactETHForTokensCall::abi_decode(request.input.input().unwrap()).unwrap();
        assert_eq!(call.deadline, U256::from(now + 300));
        assert_eq!(call.path, vec![WNATIVE, TOKEN]);
    }
}
