// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plexd-daemon: the node agent.
//!
//! Four long-running subsystems share one state cache: the signed event
//! stream, the reconcile loop, the heartbeat, and the local API server.
//! The lifecycle module wires them together and owns shutdown.

pub mod api;
pub mod env;
pub mod events;
pub mod heartbeat;
pub mod lifecycle;
pub mod reconciler;
pub mod registrar;
pub mod syncer;
pub mod token;
pub mod verifier;

pub use lifecycle::{run, Config, LifecycleError};
