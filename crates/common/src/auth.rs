//! Static Basic-Auth credential check
//!
//! Verifies `Authorization: Basic ...` headers against credentials fixed at
//! startup. Username and password comparisons are constant-time so the
//! check does not leak how much of a candidate credential matched.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use subtle::ConstantTimeEq;

const BASIC_PREFIX: &str = "Basic ";

/// Verify an Authorization header value against the configured credentials.
///
/// Returns true only for a well-formed `Basic` header whose base64 payload
/// decodes to `user:password` with both halves matching. Malformed headers
/// of any kind are a plain rejection.
pub fn verify_basic(header: &str, username: &str, password: &str) -> bool {
    let Some(encoded) = header.strip_prefix(BASIC_PREFIX) else {
        return false;
    };
    let Ok(payload) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Some(split) = payload.iter().position(|&b| b == b':') else {
        return false;
    };
    let (user, pass) = (&payload[..split], &payload[split + 1..]);

    // Evaluate both comparisons before combining so a username mismatch
    // does not short-circuit the password check.
    let user_ok = user.ct_eq(username.as_bytes());
    let pass_ok = pass.ct_eq(password.as_bytes());
    bool::from(user_ok & pass_ok)
}
