//! Payload packaging and request signing.
//!
//! Every delivery body is the gzip-compressed JSON of a redacted [`Event`],
//! terminated by a newline inside the compressed stream. The body is signed
//! with HMAC-SHA256 keyed by the project's raw secret, and the signature is
//! sent hex-encoded in `X-Signature`.
//!
//! # Example
//!
//! ```
//! use aiko_monitor::signing::{gzip_event, sign, verify, SecretKey};
//! use aiko_monitor::types::Event;
//!
//! let secret = SecretKey::decode(&"B".repeat(43)).unwrap();
//! let body = gzip_event(&Event::new("GET", "/health", 200)).unwrap();
//! let signature = sign(secret.as_bytes(), &body);
//! assert!(verify(secret.as_bytes(), &body, &signature));
//! ```

use std::fmt;
use std::io::Write;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::config::ConfigError;
use crate::types::Event;

type HmacSha256 = Hmac<Sha256>;

/// Length of an encoded secret key.
pub const SECRET_KEY_LEN: usize = 43;

/// Unpadded URL-safe base64 that tolerates non-zero trailing bits.
///
/// A 43-character key carries two spare bits; keys issued by the dashboard
/// do not always zero them.
const SECRET_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// Raw secret bytes used to key the request signature.
///
/// The bytes are wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    /// Decodes a 43-character base64url secret into its 32 raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSecretKey`] if the input has the wrong
    /// length, contains characters outside the URL-safe alphabet, or does not
    /// decode.
    pub fn decode(encoded: &str) -> Result<Self, ConfigError> {
        let well_formed = encoded.len() == SECRET_KEY_LEN
            && encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !well_formed {
            return Err(ConfigError::InvalidSecretKey);
        }

        let bytes = SECRET_ENGINE
            .decode(encoded)
            .map_err(|_| ConfigError::InvalidSecretKey)?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Serializes an event to JSON and gzip-compresses it.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn gzip_event(event: &Event) -> Result<Vec<u8>, PackagingError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, event)?;
    encoder.write_all(b"\n")?;
    Ok(encoder.finish()?)
}

/// Computes the hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex signature against `body` in constant time.
///
/// Malformed hex is treated as a mismatch.
#[must_use]
pub fn verify(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = new_mac(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn new_mac(secret: &[u8]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts keys of any length")
}

/// Errors raised while building a delivery body.
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Io(#[from] std::io::Error),
}
