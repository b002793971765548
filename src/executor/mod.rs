// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transaction execution module.

pub mod broadcast;
pub mod context;
pub mod gas;
pub mod sell;
pub mod swap;

pub use broadcast::{BroadcastOutcome, BroadcastRacer, RacerSettings, Subject};
pub use context::{prefetch_all, WalletIdentity};
pub use gas::{FeeEscalation, GasStrategy};
pub use sell::{SellExecutor, SellInstruction};
pub use swap::{PreSigner, SwapParams};
