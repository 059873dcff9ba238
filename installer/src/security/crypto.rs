// Cryptographic utilities
//
// Thin layer over ring (CSPRNG, PBKDF2) and aes-gcm (sealing). Randomness is taken
// through `EntropySource` so a host without a working random source fails loudly
// instead of producing weak secrets.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use thiserror::Error;

pub const KEY_BYTES: usize = 32;
pub const SALT_BYTES: usize = 16;
const NONCE_BYTES: usize = 12;

pub static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

pub const LOWER_ALNUM: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// Password alphabet. No quote or backslash characters, so generated secrets can be
/// embedded in SQL string literals and config files without escaping surprises.
pub const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#%+-.:=?@^_";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("secure random source is unavailable")]
    RandomUnavailable,
    #[error("cipher failure: {0}")]
    Cipher(&'static str),
    #[error("malformed key material: {0}")]
    Malformed(String),
}

/// Source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError>;
}

/// Production entropy backed by the operating system CSPRNG.
#[derive(Debug)]
pub struct SystemEntropy {
    rng: SystemRandom,
}

impl SystemEntropy {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for SystemEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        self.rng
            .fill(dest)
            .map_err(|_| CryptoError::RandomUnavailable)
    }
}

pub fn random_bytes<const N: usize>(entropy: &dyn EntropySource) -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    entropy.fill(&mut out)?;
    Ok(out)
}

/// Random string over `alphabet`, sampled by rejection so every symbol is equally likely.
pub fn random_string(
    entropy: &dyn EntropySource,
    len: usize,
    alphabet: &[u8],
) -> Result<String, CryptoError> {
    if alphabet.is_empty() || alphabet.len() > 256 {
        return Err(CryptoError::Malformed(format!(
            "alphabet size {} out of range",
            alphabet.len()
        )));
    }

    let limit = 256 - (256 % alphabet.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];
    while out.len() < len {
        entropy.fill(&mut buf)?;
        for &b in buf.iter() {
            if (b as usize) < limit {
                out.push(alphabet[b as usize % alphabet.len()] as char);
                if out.len() == len {
                    break;
                }
            }
        }
    }
    Ok(out)
}

pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    iterations: NonZeroU32,
) -> [u8; KEY_BYTES] {
    let mut out = [0u8; KEY_BYTES];
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, secret, &mut out);
    out
}

/// Constant-time check of `secret` against a previously derived value.
pub fn verify_key(secret: &[u8], salt: &[u8], iterations: NonZeroU32, derived: &[u8]) -> bool {
    pbkdf2::verify(PBKDF2_ALG, iterations, salt, secret, derived).is_ok()
}

/// AES-256-GCM seal. Output is `nonce || ciphertext` (the tag is part of the ciphertext).
pub fn seal(
    entropy: &dyn EntropySource,
    key: &[u8; KEY_BYTES],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::Cipher("invalid AES-256 key length"))?;

    let nonce_bytes = random_bytes::<NONCE_BYTES>(entropy)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Cipher("encryption failed"))?;

    let mut blob = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

pub fn open(key: &[u8; KEY_BYTES], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_BYTES {
        return Err(CryptoError::Malformed("sealed blob is too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::Cipher("invalid AES-256 key length"))?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Cipher("decryption failed"))
}

pub fn b64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn b64_decode(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::Malformed(format!("invalid base64: {}", e)))
}

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compute a safe fingerprint for a secret (hash only; never log the raw secret).
pub fn secret_fingerprint(input: &str) -> String {
    sha256_hex(input.as_bytes())[..12].to_string()
}

/// Self-describing password hash: `pbkdf2-sha256$<iterations>$<salt b64>$<hash b64>`.
pub fn hash_password(
    entropy: &dyn EntropySource,
    password: &str,
    iterations: NonZeroU32,
) -> Result<String, CryptoError> {
    let salt = random_bytes::<SALT_BYTES>(entropy)?;
    let hash = derive_key(password.as_bytes(), &salt, iterations);
    Ok(format!(
        "pbkdf2-sha256${}${}${}",
        iterations,
        b64_encode(&salt),
        b64_encode(&hash)
    ))
}

pub fn check_password_hash(password: &str, encoded: &str) -> bool {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [scheme, iterations, salt, hash] = parts.as_slice() else {
        return false;
    };
    if *scheme != "pbkdf2-sha256" {
        return false;
    }
    let Some(iterations) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    match (b64_decode(salt), b64_decode(hash)) {
        (Ok(salt), Ok(hash)) => verify_key(password.as_bytes(), &salt, iterations, &hash),
        _ => false,
    }
}
