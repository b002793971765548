// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Endpoints: model, pool and alloy transport.

pub mod endpoint;
#[cfg(test)]
pub mod mock;
pub mod pool;
mod provider;

pub use endpoint::{Endpoint, EndpointClient, EndpointSpec, FeeSnapshot};
pub use pool::EndpointPool;
pub use provider::connect_pool;
