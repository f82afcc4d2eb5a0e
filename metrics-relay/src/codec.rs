//! Body compression and signing.
//!
//! Payloads travel gzip-compressed. When a shared key is configured, the sender attaches the
//! hex-encoded HMAC-SHA256 of the *uncompressed* payload in the [`HASH_HEADER`] header, and the
//! receiver recomputes it after decompression.
use std::io::{self, Read as _, Write as _};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub use hmac::digest::InvalidLength;

/// Header carrying the payload signature.
pub const HASH_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Gzip-compresses `data`.
///
/// # Errors
///
/// Returns an error if the encoder fails to write or finish the stream.
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses a gzip stream, refusing to produce more than `limit` bytes.
///
/// # Errors
///
/// Returns an error if the stream is not valid gzip, or if the decompressed size exceeds `limit`.
pub fn decompress(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    // Read one byte past the limit so an oversized stream is detectable.
    GzDecoder::new(data).take((limit as u64).saturating_add(1)).read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decompressed payload exceeds {limit} bytes"),
        ));
    }
    Ok(out)
}

/// Computes and checks payload signatures with a shared key.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    /// Creates a `Signer` for the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key length is rejected by the MAC implementation.
    pub fn new(key: &[u8]) -> Result<Self, InvalidLength> {
        Ok(Self { mac: HmacSha256::new_from_slice(key)? })
    }

    /// Returns the hex-encoded signature of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a hex-encoded signature against `payload` in constant time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}
