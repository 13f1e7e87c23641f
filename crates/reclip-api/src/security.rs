//! Shared-secret verification and input validation.

use std::net::IpAddr;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::{Host, Url};
use uuid::Uuid;
use validator::ValidationError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum source URL length.
pub const MAX_URL_LENGTH: usize = 2048;

/// Checks presented bearer secrets without leaking timing.
///
/// Both the configured secret and the presented value are MACed under a
/// per-process key and the tags are compared with `verify_slice`, so the
/// comparison time depends on neither value.
pub struct SecretVerifier {
    key: [u8; 16],
    expected: Vec<u8>,
}

impl SecretVerifier {
    /// `None` when the secret is empty.
    pub fn new(secret: &str) -> Option<Self> {
        if secret.is_empty() {
            return None;
        }
        let key = *Uuid::new_v4().as_bytes();
        let mut mac = HmacSha256::new_from_slice(&key).ok()?;
        mac.update(secret.as_bytes());
        Some(Self {
            key,
            expected: mac.finalize().into_bytes().to_vec(),
        })
    }

    pub fn verify(&self, presented: &str) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(presented.as_bytes());
        mac.verify_slice(&self.expected).is_ok()
    }
}

/// Validate a source media URL.
///
/// Only absolute http(s) URLs with a public host are accepted: the vendor
/// fetches the URL, and internal addresses must not be handed to it.
pub fn validate_media_url(url: &str) -> Result<(), ValidationError> {
    if url.len() > MAX_URL_LENGTH {
        return Err(invalid("url_too_long", "URL is too long"));
    }

    let parsed = Url::parse(url.trim()).map_err(|_| invalid("url", "Invalid URL format"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("url_scheme", "Only HTTP and HTTPS URLs are allowed"));
    }

    let blocked = match parsed.host() {
        None => return Err(invalid("url_host", "URL must have a host")),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".internal")
                || domain.starts_with("metadata.")
        }
        Some(Host::Ipv4(ip)) => is_internal_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_internal_ip(IpAddr::V6(ip)),
    };
    if blocked {
        return Err(invalid(
            "url_blocked",
            "URL targets an internal or restricted endpoint",
        ));
    }
    Ok(())
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().map(|v4| is_internal_ip(IpAddr::V4(v4))).unwrap_or(false)
        }
    }
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_verifier() {
        let verifier = SecretVerifier::new("s3cret").unwrap();
        assert!(verifier.verify("s3cret"));
        assert!(!verifier.verify("s3cre"));
        assert!(!verifier.verify("s3cret "));
        assert!(!verifier.verify(""));
        assert!(SecretVerifier::new("").is_none());
    }

    #[test]
    fn test_media_url_validation() {
        assert!(validate_media_url("https://cdn.example.com/uploads/talk.mp4").is_ok());
        assert!(validate_media_url("http://storage.googleapis.com/b/v.mov").is_ok());

        assert!(validate_media_url("ftp://cdn.example.com/talk.mp4").is_err());
        assert!(validate_media_url("not a url").is_err());
        assert!(validate_media_url("http://localhost:9000/v.mp4").is_err());
        assert!(validate_media_url("http://127.0.0.1/v.mp4").is_err());
        assert!(validate_media_url("http://10.0.0.8/v.mp4").is_err());
        assert!(validate_media_url("http://169.254.169.254/latest/meta-data").is_err());
        assert!(validate_media_url("http://metadata.google.internal/").is_err());
        assert!(validate_media_url("http://[::1]/v.mp4").is_err());
        assert!(validate_media_url(&format!("https://a.com/{}", "x".repeat(MAX_URL_LENGTH))).is_err());
    }
}
