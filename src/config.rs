// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration module - loads settings from environment variables and the CLI.

use crate::error::SnipeError;
use crate::executor::{FeeEscalation, SellInstruction, WalletIdentity};
use crate::gates::GateThresholds;
use crate::rpc::EndpointSpec;
use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Buy a token the moment it is deployed, from several wallets at once.
#[derive(Parser, Debug)]
#[command(name = "launch-sniper", version)]
pub struct Cli {
    /// Wallets to use: `all`, labels (`w2`), 1-based indexes or addresses.
    #[arg(long, value_delimiter = ',', default_value = "all")]
    pub wallets: Vec<String>,

    /// Token address, when already deployed or known in advance.
    #[arg(long, conflicts_with = "source", required_unless_present = "source")]
    pub token: Option<Address>,

    /// Deployment source whose `token()` exposes the new token.
    #[arg(long)]
    pub source: Option<Address>,

    /// Native amount to spend per wallet, e.g. `0.5`.
    #[arg(long, value_parser = parse_amount)]
    pub amount: U256,

    /// Minimum tokens out per wallet, in base units.
    #[arg(long, default_value = "0")]
    pub min_out: U256,

    /// Abort if the value is above this many millions.
    #[arg(long)]
    pub ceiling: Option<f64>,

    /// Wait until the value is at or below this many millions.
    #[arg(long)]
    pub floor: Option<f64>,

    /// Sell once the value reaches this many millions.
    #[arg(long)]
    pub take_profit: Option<f64>,

    /// How much to sell at take-profit: `50%` or a quantity in base units.
    #[arg(long)]
    pub sell: Option<SellInstruction>,
}

impl Cli {
    pub fn gates(&self) -> GateThresholds {
        GateThresholds {
            ceiling: self.ceiling,
            floor: self.floor,
            take_profit: self.take_profit,
            sell: self.sell,
        }
    }
}

fn parse_amount(s: &str) -> Result<U256, String> {
    parse_ether(s).map_err(|e| format!("Invalid amount {}: {}", s, e))
}

/// Main configuration for the sniper.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints_file: PathBuf,
    pub wallets: Vec<WalletIdentity>,

    // Contracts
    pub router_address: Address,
    pub wrapped_native_address: Address,
    pub factory_address: Option<Address>,
    pub reference_pair_address: Option<Address>,
    pub stable_decimals: u8,
    pub price_api_url: Option<String>,

    // Safety
    pub deny_addresses: Vec<Address>,
    pub deny_symbols: Vec<String>,

    // Gas
    pub gas_limit: u64,
    pub priority_fee: u128,
    pub gas_multiplier: f64,
    pub fee_step_pct: u64,
    pub fee_max_multiplier_pct: Option<u64>,

    // Timings
    pub status_tick_ms: u64,
    pub poll_fallback_ms: u64,
    pub gate_poll_ms: u64,
    pub retry_pause_ms: u64,
    pub receipt_timeout_secs: u64,
    pub deadline_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, SnipeError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            endpoints_file: PathBuf::from(env_var_or("ENDPOINTS_FILE", "endpoints.json")),
            wallets: parse_wallets(&env_var("PRIVATE_KEYS")?)?,

            // Contracts
            router_address: parse_address(&env_var_or(
                "ROUTER_ADDRESS",
                "0x6F6B8F1a20703309951a5127c45B49b1CD981A22",
            ))?,
            wrapped_native_address: parse_address(&env_var_or(
                "WRAPPED_NATIVE_ADDRESS",
                "0x760AfE86e5de5fa0Ee542fc7B7B713e1c5425701",
            ))?,
            factory_address: optional_address("FACTORY_ADDRESS")?,
            reference_pair_address: optional_address("REFERENCE_PAIR_ADDRESS")?,
            stable_decimals: env_var_or("STABLE_DECIMALS", "6").parse().unwrap_or(6),
            price_api_url: std::env::var("PRICE_API_URL").ok().filter(|s| !s.is_empty()),

            // Safety
            deny_addresses: list(&env_var_or("DENY_ADDRESSES", ""))
                .iter()
                .map(|s| parse_address(s))
                .collect::<Result<_, _>>()?,
            deny_symbols: list(&env_var_or("DENY_SYMBOLS", "WMON,USDC,USDT")),

            // Gas
            gas_limit: env_var_or("GAS_LIMIT", "300000").parse().unwrap_or(300_000),
            priority_fee: env_var_or("PRIORITY_FEE", "2000000000")
                .parse()
                .unwrap_or(2_000_000_000),
            gas_multiplier: env_var_or("GAS_MULTIPLIER", "1.5").parse().unwrap_or(1.5),
            fee_step_pct: env_var_or("FEE_STEP_PCT", "10").parse().unwrap_or(10),
            fee_max_multiplier_pct: std::env::var("FEE_MAX_MULTIPLIER_PCT")
                .ok()
                .and_then(|v| v.parse().ok()),

            // Timings
            status_tick_ms: env_var_or("STATUS_TICK_MS", "5000").parse().unwrap_or(5000),
            poll_fallback_ms: env_var_or("POLL_FALLBACK_MS", "1000").parse().unwrap_or(1000),
            gate_poll_ms: env_var_or("GATE_POLL_MS", "3000").parse().unwrap_or(3000),
            retry_pause_ms: env_var_or("RETRY_PAUSE_MS", "250").parse().unwrap_or(250),
            receipt_timeout_secs: env_var_or("RECEIPT_TIMEOUT_SECS", "60")
                .parse()
                .unwrap_or(60),
            deadline_secs: env_var_or("DEADLINE_SECS", "300").parse().unwrap_or(300),
        })
    }

    /// Endpoint list from the endpoints file.
    pub fn load_endpoints(&self) -> Result<Vec<EndpointSpec>, SnipeError> {
        let raw = std::fs::read_to_string(&self.endpoints_file).map_err(|e| {
            SnipeError::Config(format!("{}: {}", self.endpoints_file.display(), e))
        })?;
        parse_endpoints(&raw)
    }

    pub fn escalation(&self) -> FeeEscalation {
        FeeEscalation {
            step_pct: self.fee_step_pct,
            max_multiplier_pct: self.fee_max_multiplier_pct,
        }
    }

    pub fn status_tick(&self) -> Duration {
        Duration::from_millis(self.status_tick_ms.max(1))
    }

    pub fn poll_fallback(&self) -> Duration {
        Duration::from_millis(self.poll_fallback_ms.max(1))
    }

    pub fn gate_poll(&self) -> Duration {
        Duration::from_millis(self.gate_poll_ms.max(1))
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

/// Picks session wallets out of the loaded list.
pub struct WalletSelector<'a> {
    wallets: &'a [WalletIdentity],
}

impl<'a> WalletSelector<'a> {
    pub fn new(wallets: &'a [WalletIdentity]) -> Self {
        Self { wallets }
    }

    /// Resolve selectors in order, without duplicates.
    pub fn select(&self, selectors: &[String]) -> Result<Vec<WalletIdentity>, SnipeError> {
        let mut chosen: Vec<WalletIdentity> = Vec::new();
        for selector in selectors.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let matched: Vec<&WalletIdentity> = if selector.eq_ignore_ascii_case("all") {
                self.wallets.iter().collect()
            } else {
                vec![self.find(selector)?]
            };
            for wallet in matched {
                if !chosen.iter().any(|w| w.address == wallet.address) {
                    chosen.push(wallet.clone());
                }
            }
        }
        if chosen.is_empty() {
            return Err(SnipeError::NoWallets);
        }
        Ok(chosen)
    }

    fn find(&self, selector: &str) -> Result<&'a WalletIdentity, SnipeError> {
        let found = if let Ok(address) = Address::from_str(selector) {
            self.wallets.iter().find(|w| w.address == address)
        } else if let Ok(index) = selector.parse::<usize>() {
            index.checked_sub(1).and_then(|i| self.wallets.get(i))
        } else {
            self.wallets.iter().find(|w| w.label.eq_ignore_ascii_case(selector))
        };
        found.ok_or_else(|| SnipeError::Config(format!("Unknown wallet {}", selector)))
    }
}

fn parse_wallets(keys: &str) -> Result<Vec<WalletIdentity>, SnipeError> {
    list(keys)
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let signer = PrivateKeySigner::from_str(key)
                .map_err(|e| SnipeError::Config(format!("Invalid private key #{}: {}", i + 1, e)))?;
            Ok(WalletIdentity::from_signer(format!("w{}", i + 1), signer))
        })
        .collect()
}

fn parse_endpoints(raw: &str) -> Result<Vec<EndpointSpec>, SnipeError> {
    let specs: Vec<EndpointSpec> = serde_json::from_str(raw)
        .map_err(|e| SnipeError::Config(format!("Invalid endpoints file: {}", e)))?;
    if specs.is_empty() {
        return Err(SnipeError::NoEndpoints);
    }
    Ok(specs)
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_var(name: &str) -> Result<String, SnipeError> {
    std::env::var(name).map_err(|_| SnipeError::Config(format!("{} not set", name)))
}

fn env_var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_address(name: &str) -> Result<Option<Address>, SnipeError> {
    match std::env::var(name) {
        Ok(s) if !s.trim().is_empty() => parse_address(&s).map(Some),
        _ => Ok(None),
    }
}

fn parse_address(s: &str) -> Result<Address, SnipeError> {
    Address::from_str(s.trim())
        .map_err(|e| SnipeError::Config(format!("Invalid address {}: {}", s, e)))
}
