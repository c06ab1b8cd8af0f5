//! # Signed URL Generation
//!
//! A signed URL carries a capability for one path: the query string holds the
//! signed payload fields, `expires` (unix seconds) and `signature`, an
//! HMAC-SHA256 over `path \n expires \n canonical(payload)` in lowercase hex.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use url::{form_urlencoded, Url};

use super::errors::{StorageError, StorageResult};
use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter holding the expiry timestamp
pub const EXPIRES_PARAM: &str = "expires";
/// Query parameter holding the hex signature
pub const SIGNATURE_PARAM: &str = "signature";

/// Signed fields besides path and expiry, kept sorted for a canonical encoding
pub type Payload = BTreeMap<String, String>;

/// Signed URL generator and verifier
#[derive(Debug, Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl UrlSigner {
    /// Create a new signer
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.to_vec(),
            clock,
        }
    }

    /// Compute the signature for a token
    pub fn sign(&self, path: &str, expires_at: i64, payload: &Payload) -> String {
        hex::encode(self.mac(path, expires_at, payload).finalize().into_bytes())
    }

    /// Issue a token for `path` valid for `ttl` from now.
    ///
    /// `ttl` must be positive and must not push the expiry past the range
    /// of representable timestamps.
    pub fn generate(&self, path: &str, ttl: Duration, payload: Payload) -> StorageResult<SignedUrl> {
        if ttl <= Duration::zero() {
            return Err(StorageError::InvalidTtl(format!("{}s is not positive", ttl.num_seconds())));
        }
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .ok_or_else(|| StorageError::InvalidTtl(format!("{}s is out of range", ttl.num_seconds())))?
            .timestamp();
        let signature = self.sign(path, expires_at, &payload);

        Ok(SignedUrl {
            path: path.to_string(),
            expires_at,
            payload,
            signature,
        })
    }

    /// Issue a token and render it as a URL under `base_url`
    pub fn presign(
        &self,
        base_url: &Url,
        path: &str,
        ttl: Duration,
        payload: Payload,
    ) -> StorageResult<Url> {
        self.generate(path, ttl, payload)?.to_url(base_url)
    }

    /// Verify a token. Both the signature and the expiry must hold.
    pub fn verify(&self, token: &SignedUrl) -> StorageResult<()> {
        let provided =
            hex::decode(&token.signature).map_err(|_| StorageError::InvalidSignature)?;
        let expected = self
            .mac(&token.path, token.expires_at, &token.payload)
            .finalize()
            .into_bytes();

        if !bool::from(expected.as_slice().ct_eq(&provided)) {
            return Err(StorageError::InvalidSignature);
        }

        if self.clock.now().timestamp() > token.expires_at {
            return Err(StorageError::UrlExpired);
        }

        Ok(())
    }

    fn mac(&self, path: &str, expires_at: i64, payload: &Payload) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(canonical_payload(payload).as_bytes());
        mac
    }
}

/// `k=v` pairs in key order, form-urlencoded and joined by `&`
pub fn canonical_payload(payload: &Payload) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in payload {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Append the segments of `path` to `base_url`, percent-encoding each one
pub fn url_for_path(base_url: &Url, path: &str) -> StorageResult<Url> {
    let mut url = base_url.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            StorageError::ConfigError(format!("{} cannot be used as a base URL", base_url))
        })?;
        segments.pop_if_empty();
        segments.extend(path.trim_start_matches('/').split('/'));
    }
    url.set_query(None);
    Ok(url)
}

/// Raw signed-URL query parameters of an incoming request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignedQuery {
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub expires: Option<String>,
    pub signature: Option<String>,
}

/// A signed URL token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub path: String,
    pub expires_at: i64,
    pub payload: Payload,
    pub signature: String,
}

impl SignedUrl {
    /// Rebuild a token from the raw query values of an incoming request.
    ///
    /// A missing or malformed `expires`/`signature` can never verify, so it
    /// is reported as an invalid signature.
    pub fn from_request(
        path: &str,
        expires: Option<&str>,
        signature: Option<&str>,
        payload: Payload,
    ) -> StorageResult<Self> {
        let expires_at = expires
            .and_then(|e| e.parse::<i64>().ok())
            .ok_or(StorageError::InvalidSignature)?;
        let signature = signature.ok_or(StorageError::InvalidSignature)?;

        Ok(Self {
            path: path.to_string(),
            expires_at,
            payload,
            signature: signature.to_string(),
        })
    }

    /// Generate the URL: `base_url` + path, payload fields, expires, signature
    pub fn to_url(&self, base_url: &Url) -> StorageResult<Url> {
        let mut url = url_for_path(base_url, &self.path)?;
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, value) in &self.payload {
                query.append_pair(key, value);
            }
            query.append_pair(EXPIRES_PARAM, &self.expires_at.to_string());
            query.append_pair(SIGNATURE_PARAM, &self.signature);
        }

        Ok(url)
    }
}
