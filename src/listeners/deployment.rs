// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Deployment race detector.
//!
//! Every endpoint in the pool races to be first to read a non-zero token
//! address from the deployment source. Pending-capable endpoints follow
//! transactions sent to the source, block-capable endpoints re-read on every
//! new head and request-only endpoints poll. The first hit resolves the race
//! exactly once and tears every other listener down.

use crate::error::SnipeError;
use crate::rpc::{EndpointClient, EndpointPool};
use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a detection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    PreCheck,
    Pending,
    Blocks,
    Polling,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreCheck => "pre-check",
            Self::Pending => "pending",
            Self::Blocks => "blocks",
            Self::Polling => "polling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    /// Liveness log cadence while unresolved.
    pub status_tick: Duration,
    /// Read cadence for request-only endpoints.
    pub poll_interval: Duration,
    /// Bound on waiting for a pending deployment transaction to land.
    pub receipt_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStats {
    pub endpoint: String,
    pub checks: u64,
    pub successes: u64,
}

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub token: Address,
    pub detected_at: Instant,
    pub detected_wall: DateTime<Utc>,
    pub endpoint: String,
    pub channel: Channel,
    pub stats: Vec<EndpointStats>,
    /// Time from the start of `detect` to the winning read.
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Win {
    token: Address,
    endpoint: String,
    channel: Channel,
    at: Instant,
    wall: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    checks: AtomicU64,
    successes: AtomicU64,
}

/// Exactly-once resolution: atomic flag guarding a one-shot completion.
struct Resolution {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Win>>>,
    teardown: CancellationToken,
}

impl Resolution {
    fn new(tx: oneshot::Sender<Win>, teardown: CancellationToken) -> Self {
        Self {
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            teardown,
        }
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Returns `true` only for the single winning caller.
    fn resolve(&self, win: Win) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.teardown.cancel();
        if let Ok(mut slot) = self.tx.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(win);
            }
        }
        true
    }
}

/// State shared by every listener of one race.
struct Race {
    source: Address,
    resolution: Resolution,
    receipt_timeout: Duration,
    errors: mpsc::UnboundedSender<String>,
}

impl Race {
    fn teardown(&self) -> &CancellationToken {
        &self.resolution.teardown
    }

    async fn check<C: EndpointClient>(
        &self,
        client: &C,
        endpoint: &str,
        counters: &Counters,
        channel: Channel,
    ) {
        if self.resolution.is_resolved() || self.teardown().is_cancelled() {
            return;
        }
        counters.checks.fetch_add(1, Ordering::Relaxed);

        match client.deployed_token(self.source).await {
            Ok(found) => {
                counters.successes.fetch_add(1, Ordering::Relaxed);
                if let Some(token) = found.filter(|t| !t.is_zero()) {
                    let won = self.resolution.resolve(Win {
                        token,
                        endpoint: endpoint.to_string(),
                        channel,
                        at: Instant::now(),
                        wall: Utc::now(),
                    });
                    if won {
                        info!("🎯 {} ({}) saw token {:?} first", endpoint, channel, token);
                    }
                }
            }
            Err(e) => debug!("{} ({}) check failed: {}", endpoint, channel, e),
        }
    }

    fn report(&self, endpoint: &str, channel: Channel, error: SnipeError) {
        if self.resolution.is_resolved() || self.teardown().is_cancelled() {
            return;
        }
        warn!("⚠️ {} {} channel down: {}", endpoint, channel, error);
        let _ = self.errors.send(error.to_string());
    }
}

async fn watch_blocks<C: EndpointClient>(
    race: Arc<Race>,
    client: Arc<C>,
    endpoint: String,
    counters: Arc<Counters>,
) {
    let mut stream = match client.subscribe_blocks().await {
        Ok(stream) => stream,
        Err(e) => return race.report(&endpoint, Channel::Blocks, e),
    };
    info!("📡 {} listening for blocks", endpoint);

    loop {
        tokio::select! {
            _ = race.teardown().cancelled() => return,
            next = stream.next() => match next {
                Some(number) => {
                    debug!("{} block {}", endpoint, number);
                    race.check(client.as_ref(), &endpoint, &counters, Channel::Blocks).await;
                }
                None => {
                    let error = SnipeError::Subscription {
                        endpoint: endpoint.clone(),
                        message: "block stream closed".to_string(),
                    };
                    return race.report(&endpoint, Channel::Blocks, error);
                }
            },
        }
    }
}

async fn watch_pending<C: EndpointClient>(
    race: Arc<Race>,
    client: Arc<C>,
    endpoint: String,
    counters: Arc<Counters>,
) {
    let mut stream = match client.subscribe_pending().await {
        Ok(stream) => stream,
        Err(e) => return race.report(&endpoint, Channel::Pending, e),
    };
    info!("📡 {} listening for pending transactions", endpoint);

    // One task per hash; dropped with this listener.
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            _ = race.teardown().cancelled() => {
                inflight.shutdown().await;
                return;
            }
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
            next = stream.next() => match next {
                Some(hash) => {
                    if race.resolution.is_resolved() {
                        return;
                    }
                    inflight.spawn(follow_pending(
                        race.clone(),
                        client.clone(),
                        endpoint.clone(),
                        counters.clone(),
                        hash,
                    ));
                }
                None => {
                    let error = SnipeError::Subscription {
                        endpoint: endpoint.clone(),
                        message: "pending stream closed".to_string(),
                    };
                    return race.report(&endpoint, Channel::Pending, error);
                }
            },
        }
    }
}

/// Keep only transactions sent to the source; re-read once they land.
async fn follow_pending<C: EndpointClient>(
    race: Arc<Race>,
    client: Arc<C>,
    endpoint: String,
    counters: Arc<Counters>,
    hash: B256,
) {
    match client.transaction_target(hash).await {
        Ok(Some(to)) if to == race.source => {}
        Ok(_) => return,
        Err(e) => {
            debug!("{} lookup of {:?} failed: {}", endpoint, hash, e);
            return;
        }
    }
    if race.resolution.is_resolved() {
        return;
    }

    info!("👀 {} saw pending transaction to source: {:?}", endpoint, hash);
    if let Err(e) = client.wait_for_receipt(hash, race.receipt_timeout).await {
        debug!("{} receipt wait for {:?} failed: {}", endpoint, hash, e);
    }
    race.check(client.as_ref(), &endpoint, &counters, Channel::Pending).await;
}

async fn poll<C: EndpointClient>(
    race: Arc<Race>,
    client: Arc<C>,
    endpoint: String,
    counters: Arc<Counters>,
    interval: Duration,
) {
    info!("🔁 {} polling every {:?}", endpoint, interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = race.teardown().cancelled() => return,
            _ = ticker.tick() => {
                race.check(client.as_ref(), &endpoint, &counters, Channel::Polling).await;
            }
        }
    }
}

pub struct DeploymentDetector<C> {
    pool: Arc<EndpointPool<C>>,
    settings: DetectorSettings,
    cancel: CancellationToken,
}

impl<C: EndpointClient> DeploymentDetector<C> {
    pub fn new(
        pool: Arc<EndpointPool<C>>,
        settings: DetectorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            settings,
            cancel,
        }
    }

    /// Resolve the token deployed by `source`.
    ///
    /// No listener does any work once this returns.
    pub async fn detect(&self, source: Address) -> Result<DetectionResult, SnipeError> {
        let started = Instant::now();
        let (win_tx, mut win_rx) = oneshot::channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let race = Arc::new(Race {
            source,
            resolution: Resolution::new(win_tx, self.cancel.child_token()),
            receipt_timeout: self.settings.receipt_timeout,
            errors: err_tx,
        });

        let counters: Vec<(String, Arc<Counters>)> = self
            .pool
            .list_endpoints()
            .iter()
            .map(|e| (e.id.clone(), Arc::new(Counters::default())))
            .collect();

        let primary = self.pool.primary();
        race.check(primary.client.as_ref(), &primary.id, &counters[0].1, Channel::PreCheck)
            .await;
        if let Ok(win) = win_rx.try_recv() {
            info!("⚡ Token already deployed: {:?}", win.token);
            return Ok(Self::result(win, &counters, started));
        }

        info!(
            "🏁 Racing {} endpoints for deployment by {:?}",
            self.pool.len(),
            source
        );

        let push_channels: usize = self
            .pool
            .push_capable()
            .map(|e| usize::from(e.capabilities.pending_events) + usize::from(e.capabilities.block_events))
            .sum();
        let pollers = self.pool.request_only().count();

        let mut listeners = JoinSet::new();
        for (endpoint, (id, c)) in self.pool.list_endpoints().iter().zip(&counters) {
            let caps = endpoint.capabilities;
            if caps.pending_events {
                listeners.spawn(watch_pending(race.clone(), endpoint.client.clone(), id.clone(), c.clone()));
            }
            if caps.block_events {
                listeners.spawn(watch_blocks(race.clone(), endpoint.client.clone(), id.clone(), c.clone()));
            }
            if !caps.any_push() {
                listeners.spawn(poll(
                    race.clone(),
                    endpoint.client.clone(),
                    id.clone(),
                    c.clone(),
                    self.settings.poll_interval,
                ));
            }
        }

        let mut status = tokio::time::interval(self.settings.status_tick);
        status.tick().await;
        let mut failed = 0usize;

        let outcome = loop {
            tokio::select! {
                biased;
                win = &mut win_rx => match win {
                    Ok(win) => break Ok(win),
                    Err(_) => break Err(SnipeError::Cancelled),
                },
                _ = self.cancel.cancelled() => {
                    info!("🛑 Detection cancelled");
                    break Err(SnipeError::Cancelled);
                }
                Some(last_error) = err_rx.recv() => {
                    failed += 1;
                    if failed >= push_channels && pollers == 0 {
                        break Err(SnipeError::RaceExhausted { last_error });
                    }
                }
                _ = status.tick() => {
                    let summary: Vec<String> = counters
                        .iter()
                        .map(|(id, c)| {
                            format!(
                                "{}={}/{}",
                                id,
                                c.successes.load(Ordering::Relaxed),
                                c.checks.load(Ordering::Relaxed)
                            )
                        })
                        .collect();
                    info!(
                        "⏳ Still waiting after {:?} ({} channels down): {}",
                        started.elapsed(),
                        failed,
                        summary.join(" ")
                    );
                }
            }
        };

        race.teardown().cancel();
        listeners.shutdown().await;

        outcome.map(|win| Self::result(win, &counters, started))
    }

    fn result(win: Win, counters: &[(String, Arc<Counters>)], started: Instant) -> DetectionResult {
        DetectionResult {
            token: win.token,
            elapsed: win.at.saturating_duration_since(started),
            detected_at: win.at,
            detected_wall: win.wall,
            endpoint: win.endpoint,
            channel: win.channel,
            stats: counters
                .iter()
                .map(|(id, c)| EndpointStats {
                    endpoint: id.clone(),
                    checks: c.checks.load(Ordering::Relaxed),
                    successes: c.successes.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockClient;
    use crate::rpc::endpoint::Capabilities;
    use crate::rpc::Endpoint;
    use alloy::primitives::address;

    const SOURCE: Address = address!("0x5555555555555555555555555555555555555555");
    const TOKEN: Address = address!("0x1111111111111111111111111111111111111111");

    fn settings() -> DetectorSettings {
        DetectorSettings {
            status_tick: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            receipt_timeout: Duration::from_secs(1),
        }
    }

    fn caps(pending: bool, blocks: bool) -> Capabilities {
        Capabilities {
            pending_events: pending,
            block_events: blocks,
        }
    }

    fn detector(endpoints: Vec<Endpoint<MockClient>>) -> DeploymentDetector<MockClient> {
        let pool = Arc::new(EndpointPool::new(endpoints).unwrap());
        DeploymentDetector::new(pool, settings(), CancellationToken::new())
    }

    fn clients(detector: &DeploymentDetector<MockClient>) -> Vec<Arc<MockClient>> {
        detector
            .pool
            .list_endpoints()
            .iter()
            .map(|e| e.client.clone())
            .collect()
    }

    #[test]
    fn resolution_has_a_single_winner() {
        let (tx, mut rx) = oneshot::channel();
        let teardown = CancellationToken::new();
        let resolution = Arc::new(Resolution::new(tx, teardown.clone()));

        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let resolution = resolution.clone();
                    s.spawn(move || {
                        resolution.resolve(Win {
                            token: Address::repeat_byte(i as u8 + 1),
                            endpoint: format!("e{}", i),
                            channel: Channel::Blocks,
                            at: Instant::now(),
                            wall: Utc::now(),
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });

        assert_eq!(winners, 1);
        assert!(teardown.is_cancelled());
        assert!(rx.try_recv().is_ok());
        // Teardown is idempotent.
        teardown.cancel();
        assert!(teardown.is_cancelled());
    }

    #[tokio::test]
    async fn pre_check_skips_the_race() {
        let client = MockClient::new();
        client.deploy(TOKEN);
        let detector = detector(vec![Endpoint::new("a", 0, caps(true, true), client)]);

        let result = detector.detect(SOURCE).await.unwrap();

        assert_eq!(result.token, TOKEN);
        assert_eq!(result.channel, Channel::PreCheck);
        assert_eq!(clients(&detector)[0].live(), 0);
        assert_eq!(result.stats[0].checks, 1);
    }

    #[tokio::test]
    async fn simultaneous_block_observers_resolve_once() {
        let detector = detector(vec![
            Endpoint::new("a", 0, caps(false, true), MockClient::new()),
            Endpoint::new("b", 1, caps(false, true), MockClient::new()),
        ]);
        let clients = clients(&detector);

        let pusher = {
            let clients = clients.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                for c in &clients {
                    c.deploy(TOKEN);
                }
                for number in 1..=40 {
                    for c in &clients {
                        c.push_block(number);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let result = detector.detect(SOURCE).await.unwrap();
        assert_eq!(result.token, TOKEN);
        assert_eq!(result.channel, Channel::Blocks);
        assert!(result.endpoint == "a" || result.endpoint == "b");

        // Every subscription is gone and nothing reads after return.
        assert!(clients.iter().all(|c| c.live() == 0));
        let reads: Vec<u64> = clients.iter().map(|c| c.read_count()).collect();
        pusher.await.unwrap();
        let after: Vec<u64> = clients.iter().map(|c| c.read_count()).collect();
        assert_eq!(reads, after);
    }

    #[tokio::test]
    async fn pending_transaction_to_source_triggers_a_read() {
        let detector = detector(vec![Endpoint::new("p", 0, caps(true, false), MockClient::new())]);
        let client = clients(&detector).remove(0);

        let pusher = {
            let client = client.clone();
            tokio::spawn(async move {
                for i in 0..40u8 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if i == 6 {
                        client.deploy(TOKEN);
                    }
                    let target = if i >= 6 { SOURCE } else { Address::repeat_byte(9) };
                    client.push_pending(B256::repeat_byte(i + 1), target);
                }
            })
        };

        let result = detector.detect(SOURCE).await.unwrap();
        pusher.abort();

        assert_eq!(result.channel, Channel::Pending);
        assert_eq!(result.endpoint, "p");
        assert_eq!(result.token, TOKEN);
    }

    #[tokio::test]
    async fn request_only_endpoints_poll() {
        let detector = detector(vec![Endpoint::new("plain", 0, caps(false, false), MockClient::new())]);
        let client = clients(&detector).remove(0);
        client.failing_reads.store(2, Ordering::SeqCst);

        tokio::spawn({
            let client = client.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                client.deploy(TOKEN);
            }
        });

        let result = detector.detect(SOURCE).await.unwrap();
        assert_eq!(result.channel, Channel::Polling);
        let stats = &result.stats[0];
        assert!(stats.checks > stats.successes);
    }

    #[tokio::test]
    async fn all_push_channels_down_exhausts_the_race() {
        let refused = MockClient::new();
        refused.fail_subscribe.store(true, Ordering::SeqCst);
        let closed = MockClient::new();
        closed.end_streams();
        let detector = detector(vec![
            Endpoint::new("refused", 0, caps(false, true), refused),
            Endpoint::new("closed", 1, caps(true, true), closed),
        ]);

        let err = detector.detect(SOURCE).await.unwrap_err();
        assert!(matches!(err, SnipeError::RaceExhausted { .. }));
    }

    #[tokio::test]
    async fn stream_ending_mid_race_exhausts() {
        let detector = detector(vec![Endpoint::new("a", 0, caps(false, true), MockClient::new())]);
        let client = clients(&detector).remove(0);

        tokio::spawn({
            let client = client.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                client.end_streams();
            }
        });

        let err = detector.detect(SOURCE).await.unwrap_err();
        assert!(matches!(err, SnipeError::RaceExhausted { .. }));
        assert_eq!(client.live(), 0);
    }

    #[tokio::test]
    async fn cancellation_releases_every_listener() {
        let detector = detector(vec![
            Endpoint::new("a", 0, caps(true, true), MockClient::new()),
            Endpoint::new("b", 1, caps(false, false), MockClient::new()),
        ]);
        let clients = clients(&detector);

        let cancel = detector.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            cancel.cancel();
        });

        let err = detector.detect(SOURCE).await.unwrap_err();
        assert!(matches!(err, SnipeError::Cancelled));
        assert!(clients.iter().all(|c| c.live() == 0));

        let reads: Vec<u64> = clients.iter().map(|c| c.read_count()).collect();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let after: Vec<u64> = clients.iter().map(|c| c.read_count()).collect();
        assert_eq!(reads, after);
    }
}
