//! Webhook authenticity: `X-Shopify-Hmac-Sha256` is the base64 HMAC-SHA256 of
//! the raw request body keyed with the app secret.

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const HMAC_HEADER: &str = "x-shopify-hmac-sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing X-Shopify-Hmac-Sha256 header")]
    MissingHeader,
    #[error("malformed X-Shopify-Hmac-Sha256 header")]
    MalformedHeader,
    #[error("webhook signature mismatch")]
    Mismatch,
    #[error("webhook secret is not a usable HMAC key")]
    InvalidKey,
}

fn keyed(secret: &str, body: &[u8]) -> Result<Hmac<Sha256>, SignatureError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(mac)
}

/// Base64 signature of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = keyed(secret, body)?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check the request's signature header against `body`. Comparison is constant-time.
pub fn verify(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), SignatureError> {
    let header = headers
        .get(HMAC_HEADER)
        .ok_or(SignatureError::MissingHeader)?
        .to_str()
        .map_err(|_| SignatureError::MalformedHeader)?;
    let expected = STANDARD
        .decode(header.trim())
        .map_err(|_| SignatureError::MalformedHeader)?;

    keyed(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
