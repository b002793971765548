// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fully-diluted market value of the target, in millions of the fiat unit.
//!
//! supply x (native per token in the target pair) x (stable per native in
//! the reference pair) x stable fiat quote.

use crate::error::SnipeError;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Decimals of the native asset.
const NATIVE_DECIMALS: u8 = 18;

/// Quote used when the price API is unset or unreachable.
const STABLE_PEG: f64 = 1.0;

sol! {
    #[sol(rpc)]
    interface IFactory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }
}

sol! {
    #[sol(rpc)]
    interface IPair {
        function token0() external view returns (address);
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }
}

sol! {
    #[sol(rpc)]
    interface IERC20Meta {
        function totalSupply() external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// Anything that can produce the current value in millions.
pub trait ValueSource: Send + Sync {
    fn value_millions(&self) -> impl Future<Output = Result<f64, SnipeError>> + Send;
}

fn scaled(amount: U256, decimals: u8) -> f64 {
    let raw: f64 = amount.to_string().parse().unwrap_or(0.0);
    raw / 10f64.powi(i32::from(decimals))
}

/// Reserves of a pair ordered as (native, other).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairReserves {
    pub native: U256,
    pub other: U256,
}

/// Value in millions from raw on-chain quantities.
pub fn market_value_millions(
    supply: U256,
    token_decimals: u8,
    target: PairReserves,
    reference: PairReserves,
    stable_decimals: u8,
    stable_quote: f64,
) -> Result<f64, SnipeError> {
    if target.other.is_zero() || target.native.is_zero() {
        return Err(SnipeError::Gate("target pair has no liquidity".into()));
    }
    if reference.native.is_zero() || reference.other.is_zero() {
        return Err(SnipeError::Gate("reference pair has no liquidity".into()));
    }

    let native_per_token =
        scaled(target.native, NATIVE_DECIMALS) / scaled(target.other, token_decimals);
    let stable_per_native =
        scaled(reference.other, stable_decimals) / scaled(reference.native, NATIVE_DECIMALS);
    let value = scaled(supply, token_decimals) * native_per_token * stable_per_native * stable_quote;

    Ok(value / 1_000_000.0)
}

#[derive(Deserialize, Debug)]
struct PriceTicker {
    price: String,
}

/// Stable-to-fiat quote from an HTTP ticker endpoint returning `{"price": "..."}`.
#[derive(Clone)]
pub struct PriceFeed {
    client: Client,
    url: Option<String>,
}

impl PriceFeed {
    pub fn new(url: Option<String>) -> Result<Self, SnipeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SnipeError::Config(format!("http client: {e}")))?;
        Ok(Self { client, url })
    }

    /// Current quote, falling back to the 1.0 peg.
    pub async fn stable_quote(&self) -> f64 {
        let Some(url) = &self.url else {
            return STABLE_PEG;
        };
        match self.fetch(url).await {
            Ok(price) => price,
            Err(e) => {
                warn!("⚠️ Price API failed ({}), using {} peg", e, STABLE_PEG);
                STABLE_PEG
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<f64, SnipeError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SnipeError::Gate(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SnipeError::Gate(format!("price API status {}", resp.status())));
        }
        let ticker: PriceTicker = resp
            .json()
            .await
            .map_err(|e| SnipeError::Gate(e.to_string()))?;
        ticker
            .price
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| SnipeError::Gate(format!("bad price {}", ticker.price)))
    }
}

/// On-chain valuation of one token against a V2-style factory.
pub struct MarketValuer<P> {
    provider: P,
    token: Address,
    factory: Address,
    wrapped_native: Address,
    reference_pair: Address,
    stable_decimals: u8,
    feed: PriceFeed,
    /// Resolved lazily; the pair may not exist before launch.
    pair: OnceCell<Address>,
    token_decimals: OnceCell<u8>,
}

impl<P: Provider + Clone + Send + Sync + 'static> MarketValuer<P> {
    pub fn new(
        provider: P,
        token: Address,
        factory: Address,
        wrapped_native: Address,
        reference_pair: Address,
        stable_decimals: u8,
        feed: PriceFeed,
    ) -> Self {
        Self {
            provider,
            token,
            factory,
            wrapped_native,
            reference_pair,
            stable_decimals,
            feed,
            pair: OnceCell::new(),
            token_decimals: OnceCell::new(),
        }
    }

    async fn pair(&self) -> Result<Address, SnipeError> {
        self.pair
            .get_or_try_init(|| async {
                let pair = IFactory::new(self.factory, &self.provider)
                    .getPair(self.token, self.wrapped_native)
                    .call()
                    .await
                    .map_err(|e| SnipeError::Gate(format!("getPair: {e}")))?;
                if pair.is_zero() {
                    return Err(SnipeError::Gate("pair not created yet".into()));
                }
                debug!("Pair for {:?}: {:?}", self.token, pair);
                Ok(pair)
            })
            .await
            .copied()
    }

    async fn token_decimals(&self) -> Result<u8, SnipeError> {
        self.token_decimals
            .get_or_try_init(|| async {
                IERC20Meta::new(self.token, &self.provider)
                    .decimals()
                    .call()
                    .await
                    .map_err(|e| SnipeError::Gate(format!("decimals: {e}")))
            })
            .await
            .copied()
    }

    /// Reserves of `pair` with the wrapped native side first.
    async fn reserves(&self, pair: Address) -> Result<PairReserves, SnipeError> {
        let contract = IPair::new(pair, &self.provider);
        let (token0, reserves) = tokio::try_join!(
            async {
                contract
                    .token0()
                    .call()
                    .await
                    .map_err(|e| SnipeError::Gate(format!("token0: {e}")))
            },
            async {
                contract
                    .getReserves()
                    .call()
                    .await
                    .map_err(|e| SnipeError::Gate(format!("getReserves: {e}")))
            },
        )?;

        let r0 = U256::from(reserves.reserve0.to::<u128>());
        let r1 = U256::from(reserves.reserve1.to::<u128>());
        Ok(if token0 == self.wrapped_native {
            PairReserves { native: r0, other: r1 }
        } else {
            PairReserves { native: r1, other: r0 }
        })
    }
}

impl<P: Provider + Clone + Send + Sync + 'static> ValueSource for MarketValuer<P> {
    async fn value_millions(&self) -> Result<f64, SnipeError> {
        let pair = self.pair().await?;
        let meta = IERC20Meta::new(self.token, &self.provider);
        let (supply, decimals, target, reference, quote) = tokio::try_join!(
            async {
                meta.totalSupply()
                    .call()
                    .await
                    .map_err(|e| SnipeError::Gate(format!("totalSupply: {e}")))
            },
            self.token_decimals(),
            self.reserves(pair),
            self.reserves(self.reference_pair),
            async { Ok(self.feed.stable_quote().await) },
        )?;

        market_value_millions(supply, decimals, target, reference, self.stable_decimals, quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(amount: u64, decimals: u8) -> U256 {
        U256::from(amount) * U256::from(10u64).pow(U256::from(decimals))
    }

    #[test]
    fn value_follows_both_pairs_and_the_quote() {
        // 1000 native for 100M tokens, 1B supply => 10_000 native cap.
        let target = PairReserves {
            native: units(1_000, 18),
            other: units(100_000_000, 18),
        };
        // 2000 stable per native.
        let reference = PairReserves {
            native: units(10, 18),
            other: units(20_000, 6),
        };

        let value =
            market_value_millions(units(1_000_000_000, 18), 18, target, reference, 6, 1.0).unwrap();
        assert!((value - 20.0).abs() < 1e-9);

        let discounted =
            market_value_millions(units(1_000_000_000, 18), 18, target, reference, 6, 0.5).unwrap();
        assert!((discounted - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_pairs_are_gate_errors() {
        let empty = PairReserves {
            native: U256::ZERO,
            other: U256::ZERO,
        };
        let ok = PairReserves {
            native: U256::from(1u64),
            other: U256::from(1u64),
        };
        assert!(matches!(
            market_value_millions(U256::from(1u64), 18, empty, ok, 6, 1.0),
            Err(SnipeError::Gate(_))
        ));
        assert!(matches!(
            market_value_millions(U256::from(1u64), 18, ok, empty, 6, 1.0),
            Err(SnipeError::Gate(_))
        ));
    }

    #[tokio::test]
    async fn missing_price_api_uses_the_peg() {
        let feed = PriceFeed::new(None).unwrap();
        assert_eq!(feed.stable_quote().await, 1.0);
    }
}
