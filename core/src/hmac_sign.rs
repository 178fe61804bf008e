use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs `body` with `secret` the same way webhook callbacks are signed:
/// `HMAC-SHA256("{timestamp}.{body}")`, hex-encoded. Used to produce the
/// signed oracle result envelope and to sign outbound callback payloads.
pub fn sign(secret: &[u8], timestamp: u64, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts key of any length");
    let signing_input = format!("{timestamp}.{body}");
    mac.update(signing_input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a signature produced by [`sign`], with a timestamp window to
/// reject stale or replayed envelopes.
pub fn verify(secret: &[u8], timestamp: u64, body: &str, signature: &str, now: u64, max_age_secs: u64) -> bool {
    if now.saturating_sub(timestamp) > max_age_secs {
        return false;
    }
    let expected = sign(secret, timestamp, body);
    constant_time_compare(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic() {
        let secret = b"top-secret";
        let a = sign(secret, 1_700_000_000, "{\"price\":1}");
        let b = sign(secret, 1_700_000_000, "{\"price\":1}");
        assert_eq!(a, b);
    }

    #[test]
    fn verify_accepts_fresh_signature() {
        let secret = b"top-secret";
        let body = "{\"price\":1}";
        let sig = sign(secret, 1_700_000_000, body);
        assert!(verify(secret, 1_700_000_000, body, &sig, 1_700_000_100, 300));
    }

    #[test]
    fn verify_rejects_stale_signature() {
        let secret = b"top-secret";
        let body = "{\"price\":1}";
        let sig = sign(secret, 1_700_000_000, body);
        assert!(!verify(secret, 1_700_000_000, body, &sig, 1_700_001_000, 300));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = b"top-secret";
        let sig = sign(secret, 1_700_000_000, "{\"price\":1}");
        assert!(!verify(secret, 1_700_000_000, "{\"price\":2}", &sig, 1_700_000_100, 300));
    }
}
