//! Keyed-MAC signing for webhook payloads and inbound commands
//!
//! HMAC-SHA-256 with hex-encoded tags. Verification is constant-time
//! via `Mac::verify_slice`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signer holding the configured key
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Hex-encoded HMAC-SHA-256 tag over `input`
    pub fn sign(&self, input: &[u8]) -> String {
        let mut mac = self.new_hmac();
        mac.update(input);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a hex-encoded tag; malformed hex fails closed
    pub fn verify(&self, input: &[u8], tag_hex: &str) -> bool {
        let Ok(tag) = hex::decode(tag_hex.trim()) else {
            return false;
        };
        let mut mac = self.new_hmac();
        mac.update(input);
        mac.verify_slice(&tag).is_ok()
    }

    fn new_hmac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any size")
    }
}
