// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Alloy-backed endpoint client: HTTP for requests, websocket for push.

use super::endpoint::{Capabilities, Endpoint, EndpointClient, EndpointSpec, FeeSnapshot};
use super::pool::EndpointPool;
use crate::error::SnipeError;
use alloy::{
    consensus::Transaction as _,
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider, RootProvider},
    sol,
    transports::http::reqwest::Url,
};
use futures_util::stream::{BoxStream, StreamExt};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Receipt polling cadence while waiting for inclusion.
const RECEIPT_POLL: Duration = Duration::from_millis(200);

sol! {
    #[sol(rpc)]
    interface IDeploymentSource {
        function token() external view returns (address);
    }
}

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function symbol() external view returns (string);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }
}

/// Client for one node.
pub struct AlloyClient {
    id: String,
    http: RootProvider,
    ws: Option<RootProvider>,
}

impl AlloyClient {
    /// Connect the request channel and, when configured, the push channel.
    ///
    /// A websocket that fails to connect downgrades the endpoint to
    /// request-only instead of failing it.
    pub async fn connect(spec: &EndpointSpec) -> Result<(Self, Capabilities), SnipeError> {
        let url: Url = spec
            .http_url
            .parse()
            .map_err(|e| SnipeError::Config(format!("Invalid RPC URL for {}: {e}", spec.id)))?;
        let http = RootProvider::new_http(url);

        let mut capabilities = spec.capabilities();
        let ws = match (&spec.ws_url, capabilities.any_push()) {
            (Some(ws_url), true) => match RootProvider::connect(ws_url).await {
                Ok(ws) => Some(ws),
                Err(e) => {
                    warn!("⚠️ {}: websocket connect failed ({}), request-only", spec.id, e);
                    capabilities = Capabilities::default();
                    None
                }
            },
            _ => None,
        };

        Ok((
            Self {
                id: spec.id.clone(),
                http,
                ws,
            },
            capabilities,
        ))
    }

    /// Request channel, for contract reads outside the endpoint surface.
    pub fn http(&self) -> &RootProvider {
        &self.http
    }

    fn push(&self) -> Result<&RootProvider, SnipeError> {
        self.ws.as_ref().ok_or_else(|| SnipeError::Subscription {
            endpoint: self.id.clone(),
            message: "no push channel".to_string(),
        })
    }

    fn fault(&self, e: impl std::fmt::Display) -> SnipeError {
        SnipeError::endpoint(&self.id, e)
    }
}

impl EndpointClient for AlloyClient {
    async fn deployed_token(&self, source: Address) -> Result<Option<Address>, SnipeError> {
        let contract = IDeploymentSource::new(source, &self.http);
        let token = contract.token().call().await.map_err(|e| self.fault(e))?;
        Ok((token != Address::ZERO).then_some(token))
    }

    async fn subscribe_pending(&self) -> Result<BoxStream<'static, B256>, SnipeError> {
        let sub = self
            .push()?
            .subscribe_pending_transactions()
            .await
            .map_err(|e| SnipeError::Subscription {
                endpoint: self.id.clone(),
                message: e.to_string(),
            })?;
        Ok(sub.into_stream().boxed())
    }

    async fn subscribe_blocks(&self) -> Result<BoxStream<'static, u64>, SnipeError> {
        let sub = self
            .push()?
            .subscribe_blocks()
            .await
            .map_err(|e| SnipeError::Subscription {
                endpoint: self.id.clone(),
                message: e.to_string(),
            })?;
        Ok(sub.into_stream().map(|header| header.inner.number).boxed())
    }

    async fn transaction_target(&self, hash: B256) -> Result<Option<Address>, SnipeError> {
        let tx = self
            .http
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| self.fault(e))?;
        Ok(tx.and_then(|tx| tx.to()))
    }

    async fn wait_for_receipt(&self, hash: B256, timeout: Duration) -> Result<bool, SnipeError> {
        let started = Instant::now();
        loop {
            match self.http.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt.status()),
                Ok(None) => {}
                Err(e) => debug!("{}: receipt poll for {:?} failed: {}", self.id, hash, e),
            }
            if started.elapsed() >= timeout {
                return Err(SnipeError::ReceiptTimeout(hash));
            }
            tokio::time::sleep(RECEIPT_POLL).await;
        }
    }

    async fn transaction_count(&self, owner: Address) -> Result<u64, SnipeError> {
        self.http
            .get_transaction_count(owner)
            .pending()
            .await
            .map_err(|e| self.fault(e))
    }

    async fn chain_id(&self) -> Result<u64, SnipeError> {
        self.http.get_chain_id().await.map_err(|e| self.fault(e))
    }

    async fn fee_snapshot(&self) -> Result<FeeSnapshot, SnipeError> {
        let (block, priority_fee) = tokio::try_join!(
            async {
                self.http
                    .get_block_by_number(BlockNumberOrTag::Latest)
                    .await
                    .map_err(|e| self.fault(e))
            },
            async {
                self.http
                    .get_max_priority_fee_per_gas()
                    .await
                    .map_err(|e| self.fault(e))
            },
        )?;

        let base_fee = block
            .ok_or_else(|| self.fault("no latest block"))?
            .header
            .base_fee_per_gas
            .ok_or_else(|| self.fault("no base fee"))?;

        Ok(FeeSnapshot {
            base_fee: base_fee as u128,
            priority_fee,
        })
    }

    async fn send_raw(&self, raw: Bytes) -> Result<B256, SnipeError> {
        let pending = self
            .http
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| self.fault(e))?;
        Ok(*pending.tx_hash())
    }

    async fn token_symbol(&self, token: Address) -> Result<String, SnipeError> {
        IERC20::new(token, &self.http)
            .symbol()
            .call()
            .await
            .map_err(|e| self.fault(e))
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, SnipeError> {
        IERC20::new(token, &self.http)
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| self.fault(e))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, SnipeError> {
        IERC20::new(token, &self.http)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| self.fault(e))
    }
}

/// Connect every configured endpoint concurrently and rank them.
pub async fn connect_pool(specs: &[EndpointSpec]) -> Result<EndpointPool<AlloyClient>, SnipeError> {
    let connected = futures_util::future::join_all(specs.iter().map(|spec| async move {
        AlloyClient::connect(spec)
            .await
            .map(|(client, caps)| Endpoint::new(spec.id.clone(), spec.rank, caps, client))
    }))
    .await;

    let mut endpoints = Vec::with_capacity(connected.len());
    for result in connected {
        match result {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => error!("❌ Skipping endpoint: {}", e),
        }
    }

    info!("✅ {} of {} endpoints usable", endpoints.len(), specs.len());
    EndpointPool::new(endpoints)
}
