// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Rate Limiter
//!
//! Fixed-window request limits per operation category, counted per IP,
//! session and user.
//!
//! | Type | Limit | Window | Block |
//! |------|-------|--------|-------|
//! | auth | 5 | 15 min | 1 h |
//! | wallet | 10 | 60 s | 5 min |
//! | reset | 3 | 1 h | 24 h |
//! | create | 3 | 1 h | 24 h |
//! | backup | 5 | 1 h | 6 h |
//! | sign | 20 | 60 s | 15 min |

pub mod clock;
pub mod config;
pub mod limiter;
pub mod middleware;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{limit_type_for_path, limit_type_for_request, LimitConfig, LimitType};
pub use limiter::{FailurePolicy, IdentitySource, RateLimitResult, RateLimiter, RequestIdentity};
pub use middleware::{rate_limiter_middleware, request_id, REQUEST_ID_HEADER};
pub use store::{BlockRecord, CounterStore, CounterStoreError, InMemoryCounterStore};
