//! Request signing and reply verification.
//!
//! The shuffle service only answers requests that prove knowledge of the
//! per-job secret: the fetcher sends a keyed hash of the URL, and the
//! service hashes that hash back into its reply headers. Secret generation
//! and distribution happen elsewhere; fetchers receive the manager ready
//! made.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Request header carrying the keyed hash of the fetch URL.
pub const HTTP_HEADER_URL_HASH: &str = "UrlHash";
/// Reply header proving the service saw the request hash.
pub const HTTP_HEADER_REPLY_URL_HASH: &str = "ReplyHash";
/// Service name header, present on both request and reply.
pub const HTTP_HEADER_NAME: &str = "name";
/// Protocol version header, present on both request and reply.
pub const HTTP_HEADER_VERSION: &str = "version";

pub const SHUFFLE_SERVICE_NAME: &str = "shuffle";
pub const SHUFFLE_VERSION: &str = "1.0.0";

/// Holds the per-job shuffle secret and derives request/reply hashes.
pub struct JobTokenManager {
    secret: Vec<u8>,
}

impl JobTokenManager {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn keyed_hash(&self, message: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(message);
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Hash sent with the request, computed over the full fetch URL.
    pub fn sign_url(&self, url: &str) -> String {
        self.keyed_hash(url.as_bytes())
    }

    /// The reply hash a trustworthy service produces for `url_hash`.
    pub fn expected_reply_hash(&self, url_hash: &str) -> String {
        self.keyed_hash(url_hash.as_bytes())
    }

    /// Checks the reply hash the service sent back.
    pub fn verify_reply(&self, url_hash: &str, reply_hash: &str) -> bool {
        self.expected_reply_hash(url_hash) == reply_hash
    }
}
