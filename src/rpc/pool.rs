// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ranked endpoint pool.

use super::endpoint::{Endpoint, EndpointClient};
use crate::error::SnipeError;
use rand::seq::SliceRandom;
use tracing::info;

pub struct EndpointPool<C> {
    endpoints: Vec<Endpoint<C>>,
}

impl<C: EndpointClient> EndpointPool<C> {
    /// Build the pool, ordering by capability tier and then by rank.
    pub fn new(mut endpoints: Vec<Endpoint<C>>) -> Result<Self, SnipeError> {
        if endpoints.is_empty() {
            return Err(SnipeError::NoEndpoints);
        }
        endpoints.sort_by_key(|e| (e.capabilities.tier(), e.rank));

        for e in &endpoints {
            info!(
                "📡 Endpoint {} (rank {}) pending={} blocks={}",
                e.id, e.rank, e.capabilities.pending_events, e.capabilities.block_events
            );
        }

        Ok(Self { endpoints })
    }

    pub fn list_endpoints(&self) -> &[Endpoint<C>] {
        &self.endpoints
    }

    /// Highest priority endpoint.
    pub fn primary(&self) -> &Endpoint<C> {
        &self.endpoints[0]
    }

    pub fn pick_random(&self) -> &Endpoint<C> {
        self.endpoints
            .choose(&mut rand::thread_rng())
            .unwrap_or(&self.endpoints[0])
    }

    pub fn push_capable(&self) -> impl Iterator<Item = &Endpoint<C>> {
        self.endpoints.iter().filter(|e| e.capabilities.any_push())
    }

    pub fn request_only(&self) -> impl Iterator<Item = &Endpoint<C>> {
        self.endpoints.iter().filter(|e| !e.capabilities.any_push())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::endpoint::Capabilities;
    use crate::rpc::mock::MockClient;

    fn caps(pending: bool, blocks: bool) -> Capabilities {
        Capabilities {
            pending_events: pending,
            block_events: blocks,
        }
    }

    #[test]
    fn pending_capable_ranks_above_block_only() {
        let pool = EndpointPool::new(vec![
            Endpoint::new("plain", 0, caps(false, false), MockClient::new()),
            Endpoint::new("blocks", 0, caps(false, true), MockClient::new()),
            Endpoint::new("pending-slow", 5, caps(true, true), MockClient::new()),
            Endpoint::new("pending-fast", 1, caps(true, false), MockClient::new()),
        ])
        .unwrap();

        let ids: Vec<&str> = pool.list_endpoints().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["pending-fast", "pending-slow", "blocks", "plain"]);
        assert_eq!(pool.primary().id, "pending-fast");
        assert_eq!(pool.push_capable().count(), 3);
        assert_eq!(pool.request_only().count(), 1);
    }

    #[test]
    fn empty_pool_is_rejected() {
        let res = EndpointPool::<MockClient>::new(Vec::new());
        assert!(matches!(res, Err(SnipeError::NoEndpoints)));
    }

    #[test]
    fn random_pick_stays_in_pool() {
        let pool = EndpointPool::new(vec![
            Endpoint::new("a", 0, caps(false, true), MockClient::new()),
            Endpoint::new("b", 1, caps(false, true), MockClient::new()),
        ])
        .unwrap();
        for _ in 0..32 {
            let id = &pool.pick_random().id;
            assert!(id == "a" || id == "b");
        }
    }
}
