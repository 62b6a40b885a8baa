//! Time-limited streaming URLs verified by the CDN edge.
//!
//! The token is `base64url(md5(secret || path || expires))` without padding. The
//! edge recomputes the same digest with no shared state, so the format here must
//! stay byte-for-byte identical to the edge verifier. MD5 is dictated by that
//! verifier.

use base64::Engine;
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("CDN token secret is not configured")]
    MissingSecret,
}

/// A signed URL together with the values it was minted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub path: String,
    pub token: String,
    pub expires: i64,
}

#[derive(Clone)]
pub struct UrlSigner {
    secret: Option<String>,
    default_ttl_seconds: i64,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("default_ttl_seconds", &self.default_ttl_seconds)
            .finish()
    }
}

impl UrlSigner {
    pub fn new(secret: Option<String>, default_ttl_seconds: i64) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            default_ttl_seconds,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn default_ttl(&self) -> i64 {
        self.default_ttl_seconds
    }

    /// Sign `path` for `ttl_seconds` from now.
    pub fn sign(&self, base_url: &str, path: &str, ttl_seconds: i64) -> Result<SignedUrl, SigningError> {
        self.sign_at(base_url, path, ttl_seconds, chrono::Utc::now().timestamp())
    }

    /// Sign `path` with an explicit issue time (epoch seconds).
    pub fn sign_at(
        &self,
        base_url: &str,
        path: &str,
        ttl_seconds: i64,
        now: i64,
    ) -> Result<SignedUrl, SigningError> {
        let path = normalize_path(path);
        let expires = now + ttl_seconds;
        let token = self.token(&path, expires)?;
        let url = format!(
            "{}{path}?token={token}&expires={expires}",
            base_url.trim_end_matches('/')
        );

        Ok(SignedUrl {
            url,
            path,
            token,
            expires,
        })
    }

    /// Compute the token for an already-normalized path and expiry.
    pub fn token(&self, path: &str, expires: i64) -> Result<String, SigningError> {
        let secret = self.secret.as_deref().ok_or(SigningError::MissingSecret)?;

        let mut input = Vec::with_capacity(secret.len() + path.len() + 20);
        input.extend_from_slice(secret.as_bytes());
        input.extend_from_slice(path.as_bytes());
        input.extend_from_slice(expires.to_string().as_bytes());

        let digest = md5::compute(&input);
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.0))
    }

    /// Accepts iff `now < expires` and the token matches `path` exactly. The
    /// token comparison runs in constant time.
    pub fn verify(&self, path: &str, token: &str, expires: i64, now: i64) -> bool {
        if now >= expires {
            return false;
        }
        match self.token(path, expires) {
            Ok(expected) => expected.as_bytes().ct_eq(token.as_bytes()).into(),
            Err(_) => false,
        }
    }

    /// Verify a full URL the way the edge does: split off the base URL, then
    /// check the `token` and `expires` query parameters against the path.
    pub fn verify_url(&self, base_url: &str, url: &str, now: i64) -> bool {
        let Some(rest) = url.strip_prefix(base_url.trim_end_matches('/')) else {
            return false;
        };
        let Some((path, query)) = rest.split_once('?') else {
            return false;
        };

        let mut token = None;
        let mut expires = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("token", value)) => token = Some(value),
                Some(("expires", value)) => expires = value.parse::<i64>().ok(),
                _ => {}
            }
        }

        match (token, expires) {
            (Some(token), Some(expires)) => self.verify(path, token, expires, now),
            _ => false,
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
