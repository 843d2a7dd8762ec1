//! `X-Hub-Signature` computation and verification.
//!
//! GitHub signs webhook bodies with HMAC-SHA1 keyed by the shared secret and
//! sends the result as `sha1=<hex>`.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Header carrying GitHub's per-delivery identifier.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

const SIGNATURE_PREFIX: &str = "sha1=";

/// Compute the header value (`sha1=<hex>`) for a payload.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())?;
    mac.update(payload);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check a header value against the payload.
///
/// Fails closed: a missing prefix, bad hex or wrong digest all return false.
/// The digest comparison is constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    mac.verify_slice(&signature_bytes).is_ok()
}
