//! Request authentication for the ingest endpoint.
//!
//! Monitors identify themselves with a project key and sign the exact bytes
//! of the compressed request body with HMAC-SHA256 keyed by the shared secret:
//!
//! - `X-Project-Key` header: must equal the configured key
//! - `X-Signature` header: lower-case hex of the body's HMAC-SHA256
//!
//! Both comparisons are constant-time.

use aiko_monitor::signing::verify;
use aiko_monitor::SecretKey;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Errors that can occur while authenticating an ingest request.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The `X-Project-Key` header was absent or empty.
    #[error("missing project key")]
    MissingProjectKey,

    /// The project key does not match the configured one.
    #[error("unknown project key")]
    UnknownProjectKey,

    /// The `X-Signature` header was absent or empty.
    #[error("missing signature")]
    MissingSignature,

    /// The signature did not match the body.
    #[error("invalid signature")]
    InvalidSignature,
}

impl AuthError {
    /// Machine-readable code used in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingProjectKey => "missing_project_key",
            Self::UnknownProjectKey => "unknown_project_key",
            Self::MissingSignature => "missing_signature",
            Self::InvalidSignature => "invalid_signature",
        }
    }

    /// Returns `true` for failures of the project key check.
    pub fn is_project_key_error(&self) -> bool {
        matches!(self, Self::MissingProjectKey | Self::UnknownProjectKey)
    }
}

/// Checks a presented project key against the expected one.
///
/// # Errors
///
/// Returns [`AuthError::MissingProjectKey`] for an absent or empty key and
/// [`AuthError::UnknownProjectKey`] on mismatch.
pub fn check_project_key(provided: Option<&str>, expected: &str) -> Result<(), AuthError> {
    let provided = match provided {
        Some(key) if !key.is_empty() => key,
        _ => return Err(AuthError::MissingProjectKey),
    };

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::UnknownProjectKey)
    }
}

/// Verifies the hex signature of a request body.
///
/// # Errors
///
/// Returns [`AuthError::MissingSignature`] for an absent or empty header and
/// [`AuthError::InvalidSignature`] when the MAC does not match.
pub fn verify_signature(
    signature_hex: Option<&str>,
    body: &[u8],
    secret: &SecretKey,
) -> Result<(), AuthError> {
    let signature_hex = match signature_hex {
        Some(sig) if !sig.is_empty() => sig,
        _ => return Err(AuthError::MissingSignature),
    };

    if verify(secret.as_bytes(), body, signature_hex) {
        Ok(())
    } else {
        Err(AuthError::InvalidSignature)
    }
}
