// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LYNX Vault - Key Custody Service for the LYNX Index Token
//!
//! Stores each user's password-encrypted signing key in two redundant local
//! stores, caches the wallet password per session with lockout, and rate
//! limits every API route.
//!
//! ## Modules
//!
//! - `crypto` - PBKDF2 + AES-256-GCM encryption primitive
//! - `storage` - dual-store key storage manager with versioned records
//! - `session` - session password cache and registry
//! - `rate_limit` - fixed-window rate limiter and its Axum middleware
//! - `auth` - Supabase session token authentication
//! - `api` - HTTP API handlers (Axum)

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod monitoring;
pub mod rate_limit;
pub mod session;
pub mod signing;
pub mod state;
pub mod storage;
pub mod tls;
