// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plexd-storage: on-disk persistence for the node agent.
//!
//! Everything written here follows one discipline: create a `.tmp-` sibling
//! with the final permissions, write, fsync, rename over the target. The
//! in-memory state is authoritative; a failed write is retried implicitly
//! by the next update.

pub mod cache;
pub mod fsio;
pub mod identity;

pub use cache::{CacheError, CacheSummary, StateCache};
pub use identity::{IdentityError, IdentityStore};
