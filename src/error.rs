// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Error Taxonomy
//!
//! Authentication failures keep their precise cause for the server log but
//! collapse to one of three client-facing strings, so the wire never reveals
//! which verification step rejected a token.

use thiserror::Error;

/// Everything that can go wrong between a socket opening and an identity
/// being registered in a room.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No well-formed `auth` frame (or no verification result) within the
    /// allowed window.
    #[error("no auth frame within the allowed window")]
    Timeout,

    /// Token signature did not verify against the key set.
    #[error("token signature rejected")]
    InvalidSignature,

    /// Token is past its expiry claim.
    #[error("token expired")]
    Expired,

    /// Token was issued by a different issuer than the configured one.
    #[error("token issuer mismatch")]
    IssuerMismatch,

    /// The remote signing key set could not be fetched.
    #[error("signing key fetch failed: {0}")]
    KeyFetch(String),

    /// The profile service has no tenant for the authenticated identity.
    #[error("no profile for the authenticated identity")]
    ProfileNotFound,

    /// The profile service could not be reached or answered garbage. No
    /// partial authentication state is retained for such attempts.
    #[error("profile service unavailable: {0}")]
    ProfileUnavailable(String),

    /// The peer went away while authentication was in flight. Any pending
    /// verification result is discarded.
    #[error("connection closed during authentication")]
    ConnectionClosed,
}

impl AuthError {
    /// The message sent in the `auth_error` frame. Verification internals
    /// are merged into a single "Invalid token" answer.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::Timeout => "Authentication timeout",
            AuthError::ProfileNotFound => "User profile not found",
            _ => "Invalid token",
        }
    }
}

/// Failures while loading or generating the TLS certificate. These disable
/// the TLS listener only; the plaintext listener is unaffected.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate io: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate generation failed: {0}")]
    Generate(String),

    #[error("invalid certificate material: {0}")]
    Invalid(String),
}
