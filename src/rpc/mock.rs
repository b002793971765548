// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-process endpoint used by unit tests.

use super::endpoint::{EndpointClient, FeeSnapshot};
use crate::error::SnipeError;
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const MOCK_CHAIN_ID: u64 = 31337;

/// Decrements the live subscription count when a stream is dropped.
struct SubscriptionGuard(Arc<AtomicUsize>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn guarded_stream<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
    guard: SubscriptionGuard,
) -> BoxStream<'static, T> {
    futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, (rx, guard))),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

pub struct MockClient {
    pub deployed: Mutex<Option<Address>>,
    pub reads: AtomicU64,
    pub failing_reads: AtomicU32,
    pub fail_subscribe: AtomicBool,
    pub live_subscriptions: Arc<AtomicUsize>,
    blocks: Mutex<Option<broadcast::Sender<u64>>>,
    pending: Mutex<Option<broadcast::Sender<B256>>>,
    pub targets: Mutex<HashMap<B256, Address>>,
    pub nonces: Mutex<HashMap<Address, u64>>,
    pub nonce_failures: Mutex<HashMap<Address, u32>>,
    pub prefetch_delay: Mutex<Duration>,
    pub failing_wallets: Mutex<Vec<Address>>,
    pub receipts: Mutex<VecDeque<bool>>,
    pub sent: Mutex<Vec<Bytes>>,
    pub fees: FeeSnapshot,
    pub balances: Mutex<HashMap<Address, U256>>,
    pub allowances: Mutex<HashMap<Address, U256>>,
    pub symbol: Mutex<String>,
}

impl MockClient {
    pub fn new() -> Self {
        let (blocks, _) = broadcast::channel(64);
        let (pending, _) = broadcast::channel(64);
        Self {
            deployed: Mutex::new(None),
            reads: AtomicU64::new(0),
            failing_reads: AtomicU32::new(0),
            fail_subscribe: AtomicBool::new(false),
            live_subscriptions: Arc::new(AtomicUsize::new(0)),
            blocks: Mutex::new(Some(blocks)),
            pending: Mutex::new(Some(pending)),
            targets: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            nonce_failures: Mutex::new(HashMap::new()),
            prefetch_delay: Mutex::new(Duration::ZERO),
            failing_wallets: Mutex::new(Vec::new()),
            receipts: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            fees: FeeSnapshot {
                base_fee: 1_000_000_000,
                priority_fee: 1_000_000_000,
            },
            balances: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            symbol: Mutex::new("TKN".to_string()),
        }
    }

    pub fn deploy(&self, token: Address) {
        *self.deployed.lock().unwrap() = Some(token);
    }

    pub fn push_block(&self, number: u64) {
        if let Some(tx) = self.blocks.lock().unwrap().as_ref() {
            let _ = tx.send(number);
        }
    }

    pub fn push_pending(&self, hash: B256, to: Address) {
        self.targets.lock().unwrap().insert(hash, to);
        if let Some(tx) = self.pending.lock().unwrap().as_ref() {
            let _ = tx.send(hash);
        }
    }

    /// Closes every push stream, as a dropped websocket would.
    pub fn end_streams(&self) {
        self.blocks.lock().unwrap().take();
        self.pending.lock().unwrap().take();
    }

    pub fn live(&self) -> usize {
        self.live_subscriptions.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_nonce_reads(&self, wallet: Address, times: u32) {
        self.nonce_failures.lock().unwrap().insert(wallet, times);
    }

    pub fn script_receipts(&self, statuses: &[bool]) {
        self.receipts.lock().unwrap().extend(statuses.iter().copied());
    }

    /// Nonces of every transmitted transaction, in send order.
    pub fn sent_nonces(&self) -> Vec<u64> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| {
                TxEnvelope::decode_2718(&mut raw.as_ref())
                    .expect("valid envelope")
                    .nonce()
            })
            .collect()
    }

    fn subscribe<T: Clone + Send + 'static>(
        &self,
        sender: &Mutex<Option<broadcast::Sender<T>>>,
    ) -> Result<BoxStream<'static, T>, SnipeError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(SnipeError::Subscription {
                endpoint: "mock".into(),
                message: "refused".into(),
            });
        }
        let rx = sender
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or_else(|| SnipeError::Subscription {
                endpoint: "mock".into(),
                message: "closed".into(),
            })?;
        self.live_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(guarded_stream(rx, SubscriptionGuard(self.live_subscriptions.clone())))
    }

    async fn prefetch_step(&self, owner: Option<Address>) -> Result<(), SnipeError> {
        let delay = *self.prefetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(owner) = owner {
            if self.failing_wallets.lock().unwrap().contains(&owner) {
                return Err(SnipeError::endpoint("mock", "wallet read refused"));
            }
        }
        Ok(())
    }
}

impl EndpointClient for MockClient {
    async fn deployed_token(&self, _source: Address) -> Result<Option<Address>, SnipeError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reads.store(failing - 1, Ordering::SeqCst);
            return Err(SnipeError::endpoint("mock", "read failed"));
        }
        Ok(*self.deployed.lock().unwrap())
    }

    async fn subscribe_pending(&self) -> Result<BoxStream<'static, B256>, SnipeError> {
        self.subscribe(&self.pending)
    }

    async fn subscribe_blocks(&self) -> Result<BoxStream<'static, u64>, SnipeError> {
        self.subscribe(&self.blocks)
    }

    async fn transaction_target(&self, hash: B256) -> Result<Option<Address>, SnipeError> {
        Ok(self.targets.lock().unwrap().get(&hash).copied())
    }

    async fn wait_for_receipt(&self, _hash: B256, _timeout: Duration) -> Result<bool, SnipeError> {
        Ok(self.receipts.lock().unwrap().pop_front().unwrap_or(true))
    }

    async fn transaction_count(&self, owner: Address) -> Result<u64, SnipeError> {
        self.prefetch_step(Some(owner)).await?;
        {
            let mut failures = self.nonce_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&owner) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SnipeError::endpoint("mock", "nonce read failed"));
                }
            }
        }
        Ok(self.nonces.lock().unwrap().get(&owner).copied().unwrap_or(0))
    }

    async fn chain_id(&self) -> Result<u64, SnipeError> {
        self.prefetch_step(None).await?;
        Ok(MOCK_CHAIN_ID)
    }

    async fn fee_snapshot(&self) -> Result<FeeSnapshot, SnipeError> {
        self.prefetch_step(None).await?;
        Ok(self.fees)
    }

    async fn send_raw(&self, raw: Bytes) -> Result<B256, SnipeError> {
        let hash = keccak256(&raw);
        self.sent.lock().unwrap().push(raw);
        Ok(hash)
    }

    async fn token_symbol(&self, _token: Address) -> Result<String, SnipeError> {
        Ok(self.symbol.lock().unwrap().clone())
    }

    async fn token_balance(&self, _token: Address, owner: Address) -> Result<U256, SnipeError> {
        Ok(self.balances.lock().unwrap().get(&owner).copied().unwrap_or_default())
    }

    async fn allowance(
        &self,
        _token: Address,
        owner: Address,
        _spender: Address,
    ) -> Result<U256, SnipeError> {
        Ok(self.allowances.lock().unwrap().get(&owner).copied().unwrap_or_default())
    }
}
