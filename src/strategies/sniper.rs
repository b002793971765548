// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sniping session: detect, gate, broadcast and optionally take profit.
//!
//! Prefetch and approvals happen before the token exists. Once the token is
//! known the only work left before transmission is patching and signing,
//! then the safety filter and the value gates decide whether to fire.

use crate::error::SnipeError;
use crate::executor::{
    prefetch_all, BroadcastOutcome, BroadcastRacer, GasStrategy, PreSigner, RacerSettings,
    SellExecutor, SellInstruction, Subject, SwapParams, WalletIdentity,
};
use crate::gates::{CeilingDecision, GateThresholds, GateWatcher, ValueSource};
use crate::listeners::{DeploymentDetector, DetectionResult, DetectorSettings};
use crate::rpc::{EndpointClient, EndpointPool};
use crate::validators::SafetyFilter;
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Allowance below which a startup approval is sent.
const APPROVAL_THRESHOLD: U256 = U256::from_limbs([0, 0, 0, 1 << 63]);

/// What to buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Token address already known; detection is skipped.
    Token(Address),
    /// Deployment source whose `token()` will expose the address.
    Source(Address),
}

#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub target: Target,
    pub wallets: Vec<WalletIdentity>,
    pub gates: GateThresholds,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub swap: SwapParams,
    pub gas_strategy: GasStrategy,
    pub priority_floor: u128,
    pub detector: DetectorSettings,
    pub racer: RacerSettings,
    pub gate_poll: Duration,
}

#[derive(Debug)]
pub struct SessionReport {
    pub token: Address,
    pub symbol: String,
    pub detection: Option<DetectionResult>,
    pub buys: Vec<(String, Result<BroadcastOutcome, SnipeError>)>,
    pub sells: Vec<(String, Result<BroadcastOutcome, SnipeError>)>,
}

#[derive(Debug)]
pub enum SessionOutcome {
    Completed(SessionReport),
    /// Value was above the ceiling; nothing was sent.
    CeilingAbort(f64),
    Cancelled,
}

pub struct SnipeSession<C, V> {
    pool: Arc<EndpointPool<C>>,
    presigner: PreSigner,
    detector: DeploymentDetector<C>,
    racer: Arc<BroadcastRacer<C>>,
    seller: Arc<SellExecutor<C>>,
    safety: Arc<SafetyFilter>,
    valuer: Box<dyn Fn(Address) -> V + Send + Sync>,
    gate_poll: Duration,
    cancel: CancellationToken,
}

impl<C: EndpointClient, V: ValueSource> SnipeSession<C, V> {
    pub fn new(
        pool: Arc<EndpointPool<C>>,
        safety: SafetyFilter,
        settings: SessionSettings,
        valuer: impl Fn(Address) -> V + Send + Sync + 'static,
        cancel: CancellationToken,
    ) -> Self {
        let safety = Arc::new(safety);
        let racer = Arc::new(BroadcastRacer::new(
            pool.clone(),
            safety.clone(),
            settings.racer,
            cancel.clone(),
        ));
        let seller = Arc::new(SellExecutor::new(
            pool.clone(),
            racer.clone(),
            settings.swap.router,
            settings.swap.wrapped_native,
            settings.swap.gas_limit,
            settings.gas_strategy,
            settings.priority_floor,
            settings.swap.deadline_secs,
        ));

        Self {
            detector: DeploymentDetector::new(pool.clone(), settings.detector, cancel.clone()),
            presigner: PreSigner::new(settings.swap, settings.gas_strategy, settings.priority_floor),
            pool,
            racer,
            seller,
            safety,
            valuer: Box::new(valuer),
            gate_poll: settings.gate_poll,
            cancel,
        }
    }

    pub async fn run(&self, plan: SessionPlan) -> Result<SessionOutcome, SnipeError> {
        match self.execute(plan).await {
            Err(SnipeError::Cancelled) => {
                info!("🛑 Session cancelled");
                Ok(SessionOutcome::Cancelled)
            }
            other => other,
        }
    }

    async fn execute(&self, plan: SessionPlan) -> Result<SessionOutcome, SnipeError> {
        if plan.wallets.is_empty() {
            return Err(SnipeError::NoWallets);
        }

        if let (Target::Token(token), Some(_)) = (plan.target, plan.gates.take_profit_target()) {
            self.approve_at_startup(&plan.wallets, token).await;
        }

        let contexts = prefetch_all(self.pool.primary(), plan.wallets).await;
        if contexts.is_empty() {
            return Err(SnipeError::NoWallets);
        }
        let prepared: Vec<_> = contexts.into_iter().map(|c| self.presigner.prepare(c)).collect();

        let (token, detection) = match plan.target {
            Target::Token(token) => {
                info!("🎯 Known token {:?}, skipping detection", token);
                (token, None)
            }
            Target::Source(source) => {
                let detection = self.detector.detect(source).await?;
                info!(
                    "🆕 Token {:?} via {} ({}) after {:?}",
                    detection.token, detection.endpoint, detection.channel, detection.elapsed
                );
                (detection.token, Some(detection))
            }
        };

        let mut packages = self.presigner.finalize_all(prepared.clone(), token).await;
        if packages.is_empty() {
            return Err(SnipeError::NoWallets);
        }

        let symbol = match self.pool.primary().client.token_symbol(token).await {
            Ok(symbol) => symbol,
            Err(e) => {
                warn!("⚠️ Symbol lookup for {:?} failed: {}", token, e);
                String::new()
            }
        };
        self.safety.check(token, &symbol)?;
        let subject = Subject { token, symbol };

        let watcher = GateWatcher::new((self.valuer)(token), self.gate_poll, self.cancel.clone());
        if let Some(ceiling) = plan.gates.ceiling {
            if let CeilingDecision::Abort(value) = watcher.check_ceiling(ceiling).await? {
                return Ok(SessionOutcome::CeilingAbort(value));
            }
        }
        if let Some(floor) = plan.gates.floor {
            watcher.wait_for_floor(floor).await?;
            // The wait can outlast the signed deadline.
            let signed: Vec<Address> = packages.iter().map(|(c, _)| c.wallet.address).collect();
            let prepared = prepared
                .into_iter()
                .filter(|p| signed.contains(&p.ctx.wallet.address))
                .collect();
            packages = self.presigner.finalize_all(prepared, token).await;
            if packages.is_empty() {
                return Err(SnipeError::NoWallets);
            }
        }

        let fired_at = Instant::now();
        let jobs = packages.into_iter().map(|(ctx, p)| (ctx.wallet, p)).collect();
        let buys = self.racer.fire_all(jobs, &subject).await;
        settle(&buys)?;

        let mut report = SessionReport {
            token,
            symbol: subject.symbol.clone(),
            detection,
            buys: buys
                .iter()
                .map(|(w, r)| (w.label.clone(), r.clone()))
                .collect(),
            sells: Vec::new(),
        };
        log_summary(&report, fired_at);

        if let Some((target, instruction)) = plan.gates.take_profit_target() {
            let bought: Vec<WalletIdentity> = buys
                .into_iter()
                .filter(|(_, r)| r.is_ok())
                .map(|(w, _)| w)
                .collect();
            report.sells = self.take_profit(bought, target, instruction, &watcher, &subject).await?;
        }

        Ok(SessionOutcome::Completed(report))
    }

    async fn approve_at_startup(&self, wallets: &[WalletIdentity], token: Address) {
        let subject = Subject {
            token,
            symbol: String::new(),
        };
        let results = futures_util::future::join_all(wallets.iter().map(|w| {
            self.seller
                .ensure_approval(w, token, APPROVAL_THRESHOLD, &subject)
        }))
        .await;

        for (wallet, result) in wallets.iter().zip(results) {
            if let Err(e) = result {
                warn!("⚠️ Startup approval for {} failed: {}", wallet.label, e);
            }
        }
    }

    async fn take_profit(
        &self,
        wallets: Vec<WalletIdentity>,
        target: f64,
        instruction: SellInstruction,
        watcher: &GateWatcher<V>,
        subject: &Subject,
    ) -> Result<Vec<(String, Result<BroadcastOutcome, SnipeError>)>, SnipeError> {
        if wallets.is_empty() {
            return Ok(Vec::new());
        }
        watcher.wait_for_take_profit(target).await?;

        let sells = self.seller.sell_all(wallets, subject.token, instruction, subject).await;
        for (wallet, result) in &sells {
            match result {
                Ok(o) => info!("💸 {} sold via {} on attempt {}: {:?}", wallet.label, o.endpoint, o.attempt, o.tx_hash),
                Err(e) => error!("❌ {} sell failed: {}", wallet.label, e),
            }
        }
        Ok(sells
            .into_iter()
            .map(|(w, r)| (w.label, r))
            .collect())
    }
}

/// Surface a terminal error from any wallet's race.
fn settle(results: &[(WalletIdentity, Result<BroadcastOutcome, SnipeError>)]) -> Result<(), SnipeError> {
    let terminal = results
        .iter()
        .filter_map(|(_, r)| r.as_ref().err())
        .find(|e| e.is_terminal());
    match terminal {
        Some(e) => Err(e.clone()),
        None => Ok(()),
    }
}

fn log_summary(report: &SessionReport, fired_at: Instant) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📊 {} ({:?})", report.symbol, report.token);
    if let Some(d) = &report.detection {
        info!(
            "📊 Detected at {} by {} via {} in {:?}",
            d.detected_wall.format("%H:%M:%S%.3f"),
            d.endpoint,
            d.channel,
            d.elapsed
        );
        for s in &d.stats {
            info!("📊   {}: {}/{} checks ok", s.endpoint, s.successes, s.checks);
        }
        info!("📊 Detection to broadcast start: {:?}", fired_at.saturating_duration_since(d.detected_at));
    }
    for (wallet, result) in &report.buys {
        match result {
            Ok(o) => info!(
                "📊 {} {:?} attempt {} via {} nonce {} max fee {} wei at {}: {:?}",
                o.wallet,
                o.address,
                o.attempt,
                o.endpoint,
                o.nonce,
                o.fees.max_fee_per_gas,
                o.landed_at.format("%H:%M:%S%.3f"),
                o.tx_hash
            ),
            Err(e) => info!("📊 {} failed: {}", wallet, e),
        }
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
