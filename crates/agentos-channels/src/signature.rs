//! Webhook signature verification.
//!
//! Slack-style: `v0=hex(hmac_sha256(secret, "v0:" + timestamp + ":" + body))`
//! with a ±5 minute timestamp window to stop replays. Comparison is
//! constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signature version prefix.
const VERSION: &str = "v0";

/// Maximum accepted clock skew, seconds.
pub const MAX_SKEW_SECS: i64 = 5 * 60;

/// Compute the expected signature for a request.
pub fn compute_signature(signing_secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(format!("{VERSION}:{timestamp}:").as_bytes());
    mac.update(body);
    format!("{VERSION}={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a request signature against the signing secret.
///
/// `now_epoch` is injected so tests control the clock. Rejects stale or
/// future timestamps beyond [`MAX_SKEW_SECS`].
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    provided: &str,
    now_epoch: i64,
) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now_epoch - ts).abs() > MAX_SKEW_SECS {
        return false;
    }
    let expected = compute_signature(signing_secret, ts, body);
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyzz0&team_id=T1DC2JH3J&command=%2Fweather";

    #[test]
    fn test_valid_signature_accepted() {
        let now = 1_700_000_000;
        let sig = compute_signature(SECRET, now, BODY);
        assert!(verify_signature(SECRET, &now.to_string(), BODY, &sig, now));
    }

    #[test]
    fn test_altered_body_rejected() {
        let now = 1_700_000_000;
        let sig = compute_signature(SECRET, now, BODY);
        assert!(!verify_signature(
            SECRET,
            &now.to_string(),
            b"token=tampered",
            &sig,
            now
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = 1_700_000_000;
        let sig = compute_signature("other-secret", now, BODY);
        assert!(!verify_signature(SECRET, &now.to_string(), BODY, &sig, now));
    }

    #[test]
    fn test_timestamp_within_window_accepted() {
        let now = 1_700_000_000;
        let ts = now - MAX_SKEW_SECS + 1;
        let sig = compute_signature(SECRET, ts, BODY);
        assert!(verify_signature(SECRET, &ts.to_string(), BODY, &sig, now));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let now = 1_700_000_000;
        let ts = now - MAX_SKEW_SECS - 1;
        let sig = compute_signature(SECRET, ts, BODY);
        assert!(!verify_signature(SECRET, &ts.to_string(), BODY, &sig, now));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let now = 1_700_000_000;
        let ts = now + MAX_SKEW_SECS + 10;
        let sig = compute_signature(SECRET, ts, BODY);
        assert!(!verify_signature(SECRET, &ts.to_string(), BODY, &sig, now));
    }

    #[test]
    fn test_garbage_timestamp_rejected() {
        assert!(!verify_signature(SECRET, "not-a-number", BODY, "v0=00", 0));
    }

    #[test]
    fn test_signature_format() {
        let sig = compute_signature(SECRET, 1, BODY);
        assert!(sig.starts_with("v0="));
        assert_eq!(sig.len(), 3 + 64);
    }
}
