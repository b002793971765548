// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Launch Sniper - buy a token the moment it becomes tradable.

mod config;
mod error;
mod executor;
mod gates;
mod listeners;
mod rpc;
mod strategies;
mod validators;

use clap::Parser;
use config::{Cli, Config, WalletSelector};
use error::SnipeError;
use executor::{GasStrategy, RacerSettings, SwapParams};
use gates::{MarketValuer, PriceFeed};
use listeners::DetectorSettings;
use rpc::connect_pool;
use std::process::ExitCode;
use std::sync::Arc;
use strategies::{SessionOutcome, SessionPlan, SessionSettings, SnipeSession, Target};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use validators::SafetyFilter;

fn init_logging() {
    let level = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "info".to_string());
    let spec = if level.contains('=') || level.contains(',') {
        level
    } else {
        format!("{},hyper=warn,hyper_util=warn,reqwest=warn,alloy_transport_http=warn", level)
    };
    let filter = EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Exit status for a session error.
fn exit_code(e: &SnipeError) -> u8 {
    match e {
        SnipeError::RaceExhausted { .. } => 2,
        SnipeError::Denied(_) => 3,
        SnipeError::NoEndpoints => 4,
        SnipeError::NoWallets => 5,
        _ => 1,
    }
}

/// Run `fut` unless the operator aborts first.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, SnipeError>>,
) -> Result<T, SnipeError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SnipeError::Cancelled),
        r = fut => r,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {:#}", e);
            match e.downcast_ref::<SnipeError>() {
                Some(snipe) => ExitCode::from(exit_code(snipe)),
                None => ExitCode::FAILURE,
            }
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!("🚀 Launch Sniper starting...");

    let wallets = WalletSelector::new(&config.wallets).select(&cli.wallets)?;
    info!("👛 {} wallets selected", wallets.len());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let specs = config.load_endpoints()?;
    let pool = match until_cancelled(&cancel, connect_pool(&specs)).await {
        Err(SnipeError::Cancelled) => {
            info!("🛑 Stopped by operator while connecting");
            return Ok(ExitCode::SUCCESS);
        }
        connected => Arc::new(connected?),
    };

    let gates = cli.gates();
    let needs_valuation = gates.pre_trade() || gates.take_profit_target().is_some();
    if gates.take_profit.is_some() && gates.take_profit_target().is_none() {
        warn!("⚠️ --take-profit ignored without a non-zero --sell");
    }
    let (factory, reference_pair) = match (config.factory_address, config.reference_pair_address) {
        (Some(f), Some(r)) => (f, r),
        _ if needs_valuation => {
            return Err(SnipeError::Config(
                "FACTORY_ADDRESS and REFERENCE_PAIR_ADDRESS are required for value gates".into(),
            )
            .into());
        }
        (f, r) => (f.unwrap_or_default(), r.unwrap_or_default()),
    };

    let feed = PriceFeed::new(config.price_api_url.clone())?;
    let provider = pool.primary().client.http().clone();
    let wrapped_native = config.wrapped_native_address;
    let stable_decimals = config.stable_decimals;
    let valuer = move |token| {
        MarketValuer::new(
            provider.clone(),
            token,
            factory,
            wrapped_native,
            reference_pair,
            stable_decimals,
            feed.clone(),
        )
    };

    let settings = SessionSettings {
        swap: SwapParams {
            router: config.router_address,
            wrapped_native,
            amount_in: cli.amount,
            min_out: cli.min_out,
            gas_limit: config.gas_limit,
            deadline_secs: config.deadline_secs,
        },
        gas_strategy: GasStrategy::from_multiplier(config.gas_multiplier),
        priority_floor: config.priority_fee,
        detector: DetectorSettings {
            status_tick: config.status_tick(),
            poll_interval: config.poll_fallback(),
            receipt_timeout: config.receipt_timeout(),
        },
        racer: RacerSettings {
            retry_pause: config.retry_pause(),
            receipt_timeout: config.receipt_timeout(),
            escalation: config.escalation(),
        },
        gate_poll: config.gate_poll(),
    };

    let safety = SafetyFilter::new(config.deny_addresses.clone(), config.deny_symbols.clone());
    if safety.is_empty() {
        warn!("⚠️ Deny-list is empty");
    }
    let session = SnipeSession::new(pool, safety, settings, valuer, cancel);

    let target = match (cli.token, cli.source) {
        (Some(token), _) => Target::Token(token),
        (None, Some(source)) => Target::Source(source),
        (None, None) => return Err(SnipeError::Config("--token or --source required".into()).into()),
    };

    let outcome = session
        .run(SessionPlan {
            target,
            wallets,
            gates,
        })
        .await?;

    match outcome {
        SessionOutcome::Completed(report) => {
            let landed = report.buys.iter().filter(|(_, r)| r.is_ok()).count();
            let sold = report.sells.iter().filter(|(_, r)| r.is_ok()).count();
            info!(
                "✅ Done: {}/{} buys landed, {}/{} sells",
                landed,
                report.buys.len(),
                sold,
                report.sells.len()
            );
        }
        SessionOutcome::CeilingAbort(value) => {
            info!("🛑 Aborted at {:.3}M above ceiling, nothing sent", value);
        }
        SessionOutcome::Cancelled => info!("🛑 Stopped by operator"),
    }
    Ok(ExitCode::SUCCESS)
}
