// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pre-broadcast safety checks.

pub mod safety;

pub use safety::SafetyFilter;
