// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event listeners for detecting new tokens.

pub mod deployment;

pub use deployment::{DeploymentDetector, DetectionResult, DetectorSettings};
