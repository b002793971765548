// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Endpoint model and the request/push surface every endpoint exposes.

use crate::error::SnipeError;
use alloy::primitives::{Address, Bytes, B256, U256};
use futures_util::stream::BoxStream;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Push capabilities of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub pending_events: bool,
    pub block_events: bool,
}

impl Capabilities {
    pub fn any_push(&self) -> bool {
        self.pending_events || self.block_events
    }

    /// Lower sorts first: pending push, then block push, then request-only.
    pub fn tier(&self) -> u8 {
        if self.pending_events {
            0
        } else if self.block_events {
            1
        } else {
            2
        }
    }
}

/// Fee levels seen on an endpoint at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSnapshot {
    pub base_fee: u128,
    pub priority_fee: u128,
}

/// Endpoint entry as it appears in the endpoints file.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSpec {
    pub id: String,
    #[serde(default)]
    pub rank: u32,
    pub http_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub pending_events: bool,
    #[serde(default)]
    pub block_events: bool,
}

impl EndpointSpec {
    /// Declared capabilities, cleared when there is no push transport at all.
    pub fn capabilities(&self) -> Capabilities {
        if self.ws_url.is_none() {
            return Capabilities::default();
        }
        Capabilities {
            pending_events: self.pending_events,
            block_events: self.block_events,
        }
    }
}

/// Request and push channel of a single network endpoint.
///
/// Implemented over alloy providers for real nodes and by an in-process mock
/// in tests. Every read is a single round trip; none of them retry.
pub trait EndpointClient: Send + Sync + 'static {
    /// Deployed token exposed by the deployment source, `None` while unset.
    fn deployed_token(
        &self,
        source: Address,
    ) -> impl Future<Output = Result<Option<Address>, SnipeError>> + Send;

    /// Stream of pending transaction hashes.
    fn subscribe_pending(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, B256>, SnipeError>> + Send;

    /// Stream of new block numbers.
    fn subscribe_blocks(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, u64>, SnipeError>> + Send;

    /// Recipient of a transaction, `None` when unknown or a contract creation.
    fn transaction_target(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<Address>, SnipeError>> + Send;

    /// Receipt status once the transaction is included (`true` = success).
    fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, SnipeError>> + Send;

    fn transaction_count(
        &self,
        owner: Address,
    ) -> impl Future<Output = Result<u64, SnipeError>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64, SnipeError>> + Send;

    fn fee_snapshot(&self) -> impl Future<Output = Result<FeeSnapshot, SnipeError>> + Send;

    fn send_raw(&self, raw: Bytes) -> impl Future<Output = Result<B256, SnipeError>> + Send;

    fn token_symbol(&self, token: Address)
        -> impl Future<Output = Result<String, SnipeError>> + Send;

    fn token_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> impl Future<Output = Result<U256, SnipeError>> + Send;

    fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<U256, SnipeError>> + Send;
}

/// A ranked endpoint owned by the pool.
#[derive(Debug)]
pub struct Endpoint<C> {
    pub id: String,
    pub rank: u32,
    pub capabilities: Capabilities,
    pub client: Arc<C>,
}

impl<C> Endpoint<C> {
    pub fn new(id: impl Into<String>, rank: u32, capabilities: Capabilities, client: C) -> Self {
        Self {
            id: id.into(),
            rank,
            capabilities,
            client: Arc::new(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_flags_cleared_without_ws() {
        let spec: EndpointSpec = serde_json::from_str(
            r#"{"id":"a","rank":1,"http_url":"http://a","pending_events":true,"block_events":true}"#,
        )
        .unwrap();
        assert_eq!(spec.capabilities(), Capabilities::default());

        let spec: EndpointSpec = serde_json::from_str(
            r#"{"id":"b","http_url":"http://b","ws_url":"ws://b","block_events":true}"#,
        )
        .unwrap();
        assert!(spec.capabilities().block_events);
        assert!(!spec.capabilities().pending_events);
        assert_eq!(spec.capabilities().tier(), 1);
    }
}
