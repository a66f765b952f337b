// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Password Manager
//!
//! - `password` - sealed, expiring password cache with lockout
//! - `registry` - one cache per session, plus the idle-session reaper

pub mod password;
pub mod registry;

pub use password::{
    lockout_duration, PasswordPolicy, PasswordRule, SessionError, SessionPassword, SessionStatus,
    DEFAULT_EXPIRY_MINUTES, MAX_ATTEMPTS, MAX_LOCKOUT, SPECIAL_CHARACTERS,
};
pub use registry::{SessionReaper, SessionRegistry};
