// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Supabase session tokens for the LYNX vault API.
//!
//! ## Auth Flow
//!
//! 1. Frontend signs the user in with Supabase
//! 2. Frontend sends `Authorization: Bearer <access token>`
//! 3. Vault server:
//!    - Verifies the HS256 signature with the project JWT secret
//!    - Checks expiry (60 s leeway) and, if configured, the issuer
//!    - Extracts `sub` as the canonical `user_id` and `session_id`
//!
//! Without `SUPABASE_JWT_SECRET` the server runs in development mode and
//! skips signature verification.

pub mod claims;
pub mod error;
pub mod extractor;

pub use claims::AuthenticatedUser;
pub use error::AuthError;
pub use extractor::{bearer_token, client_ip, identity_from_parts, verify_token, Auth, SESSION_COOKIE};
