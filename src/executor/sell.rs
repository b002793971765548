// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sell execution for closing the sniped position.

use super::broadcast::{BroadcastOutcome, BroadcastRacer, Subject};
use super::context::{prefetch, WalletContext, WalletIdentity};
use super::gas::GasStrategy;
use super::swap::{sign_request, unsigned_request, Deadline, SignedPackage};
use crate::error::SnipeError;
use crate::rpc::{EndpointClient, EndpointPool};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Gas limit for ERC20 approvals.
const APPROVE_GAS_LIMIT: u64 = 100_000;

/// Byte offset of the deadline word: selector, amountIn, amountOutMin, path offset, to.
pub(crate) const SELL_DEADLINE_OFFSET: usize = 4 + 32 * 4;

// Router interface for swaps
sol! {
    interface IRouter {
        function swapExactTokensForETHSupportingFeeOnTransferTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external;
    }
}

// ERC20 for approval
sol! {
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// How much of the bought balance to sell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SellInstruction {
    /// Percentage of the current balance, 0-100.
    Percent(f64),
    /// Fixed quantity in the token's base units.
    Amount(U256),
}

impl SellInstruction {
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Percent(pct) => *pct <= 0.0,
            Self::Amount(amount) => amount.is_zero(),
        }
    }

    /// Amount to sell given the wallet's balance; never more than the balance.
    pub fn amount_for(&self, balance: U256) -> U256 {
        match self {
            Self::Percent(pct) => {
                let bps = (pct.clamp(0.0, 100.0) * 100.0).round() as u64;
                balance * U256::from(bps) / U256::from(10_000u64)
            }
            Self::Amount(amount) => (*amount).min(balance),
        }
    }
}

impl FromStr for SellInstruction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let pct: f64 = pct
                .trim()
                .parse()
                .map_err(|e| format!("Invalid percentage {}: {}", s, e))?;
            if !(0.0..=100.0).contains(&pct) {
                return Err(format!("Percentage out of range: {}", s));
            }
            Ok(Self::Percent(pct))
        } else {
            U256::from_str(s)
                .map(Self::Amount)
                .map_err(|e| format!("Invalid amount {}: {}", s, e))
        }
    }
}

/// Sells through the broadcast racer, approving the router first when needed.
pub struct SellExecutor<C> {
    pool: Arc<EndpointPool<C>>,
    racer: Arc<BroadcastRacer<C>>,
    router: Address,
    wrapped_native: Address,
    gas_limit: u64,
    gas_strategy: GasStrategy,
    priority_floor: u128,
    deadline_secs: u64,
}

impl<C: EndpointClient> SellExecutor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<EndpointPool<C>>,
        racer: Arc<BroadcastRacer<C>>,
        router: Address,
        wrapped_native: Address,
        gas_limit: u64,
        gas_strategy: GasStrategy,
        priority_floor: u128,
        deadline_secs: u64,
    ) -> Self {
        Self {
            pool,
            racer,
            router,
            wrapped_native,
            gas_limit,
            gas_strategy,
            priority_floor,
            deadline_secs,
        }
    }

    /// Approve the router for `token` if the allowance is below `needed`.
    ///
    /// Returns the approval outcome, or `None` when nothing had to be sent.
    pub async fn ensure_approval(
        &self,
        wallet: &WalletIdentity,
        token: Address,
        needed: U256,
        subject: &Subject,
    ) -> Result<Option<BroadcastOutcome>, SnipeError> {
        let client = &self.pool.primary().client;
        let allowance = client.allowance(token, wallet.address, self.router).await?;
        if allowance >= needed && !needed.is_zero() {
            info!("✅ {} allowance {} already covers {}", wallet.label, allowance, needed);
            return Ok(None);
        }

        info!("🔓 {} approving router for {:?}", wallet.label, token);
        let call = IERC20::approveCall {
            spender: self.router,
            amount: U256::MAX,
        };
        let ctx = prefetch(client.as_ref(), wallet.clone()).await?;
        let package = self
            .package(&ctx, token, Bytes::from(call.abi_encode()), APPROVE_GAS_LIMIT, None)
            .await?;
        self.racer.fire(wallet, &package, subject).await.map(Some)
    }

    /// Sell part of the wallet's balance according to the instruction.
    pub async fn sell(
        &self,
        wallet: &WalletIdentity,
        token: Address,
        instruction: SellInstruction,
        subject: &Subject,
    ) -> Result<BroadcastOutcome, SnipeError> {
        let client = &self.pool.primary().client;
        let balance = client.token_balance(token, wallet.address).await?;
        let amount = instruction.amount_for(balance);
        if amount.is_zero() {
            return Err(SnipeError::WalletSetup {
                wallet: wallet.address,
                message: format!("nothing to sell (balance {})", balance),
            });
        }

        info!(
            "🔴 {} selling {} of {} {}",
            wallet.label, amount, balance, subject.symbol
        );

        self.ensure_approval(wallet, token, amount, subject).await?;

        let ctx = prefetch(client.as_ref(), wallet.clone()).await?;
        let deadline = Deadline::new(SELL_DEADLINE_OFFSET, self.deadline_secs);
        let call = IRouter::swapExactTokensForETHSupportingFeeOnTransferTokensCall {
            amountIn: amount,
            amountOutMin: U256::ZERO,
            path: vec![token, self.wrapped_native],
            to: wallet.address,
            deadline: U256::from(deadline.at),
        };
        let package = self
            .package(&ctx, self.router, Bytes::from(call.abi_encode()), self.gas_limit, Some(deadline))
            .await?;

        self.racer.fire(wallet, &package, subject).await
    }

    /// Sell for every wallet in parallel.
    pub async fn sell_all(
        self: &Arc<Self>,
        wallets: Vec<WalletIdentity>,
        token: Address,
        instruction: SellInstruction,
        subject: &Subject,
    ) -> Vec<(WalletIdentity, Result<BroadcastOutcome, SnipeError>)> {
        let handles: Vec<_> = wallets
            .into_iter()
            .map(|wallet| {
                let executor = Arc::clone(self);
                let subject = subject.clone();
                tokio::spawn(async move {
                    let result = executor.sell(&wallet, token, instruction, &subject).await;
                    if let Err(e) = &result {
                        error!("❌ Sell for {} failed: {}", wallet.label, e);
                    }
                    (wallet, result)
                })
            })
            .collect();

        futures_util::future::join_all(handles)
            .await
            .into_iter()
            .filter_map(|h| h.ok())
            .collect()
    }

    async fn package(
        &self,
        ctx: &WalletContext,
        to: Address,
        input: Bytes,
        gas_limit: u64,
        deadline: Option<Deadline>,
    ) -> Result<SignedPackage, SnipeError> {
        let started = Instant::now();
        let fees = self.gas_strategy.calculate(ctx.fees, self.priority_floor);
        let request = unsigned_request(ctx, to, U256::ZERO, input, gas_limit, fees, ctx.nonce);
        let (raw, tx_hash) = sign_request(&ctx.wallet.signer, request.clone()).await?;
        Ok(SignedPackage {
            raw,
            request,
            nonce: ctx.nonce,
            fees,
            tx_hash,
            sign_time: started.elapsed(),
            deadline,
        })
    }
}
