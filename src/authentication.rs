//! Keypair generation, verify-token handling, the Mojang server hash and offline UUID
//! derivation, and the AES-128/CFB8 cipher pair used once encryption is negotiated.

use num_bigint::BigInt;
use rand::rngs::OsRng;
use rand::{RngCore, TryRngCore};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::sync::LazyLock;
use uuid::Uuid;

/// The proxy's RSA keypair, generated once and reused for every login handshake.
pub static KEY_PAIR: LazyLock<(RsaPrivateKey, RsaPublicKey)> =
    LazyLock::new(|| generate_keypair().expect("failed to generate RSA keypair"));

/// The DER-encoded public half of [`KEY_PAIR`], sent verbatim in every `EncryptionRequest`.
pub static ENCODED_PUB: LazyLock<Vec<u8>> =
    LazyLock::new(|| encode_public_key(&KEY_PAIR.1).expect("failed to encode public key"));

/// Errors from key generation, token verification and the Mojang round trip.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rsa operation failed: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("could not encode the public key: {0}")]
    Encoding(#[from] rsa::pkcs8::spki::Error),
    #[error("failed to retrieve randomness: {0}")]
    UnavailableRandom(#[from] rand::rand_core::OsError),
    #[error("authentication request failed: {0}")]
    AuthRequest(#[from] reqwest::Error),
    #[error("failed to construct the session cipher: {0}")]
    InvalidCipherLength(#[from] cfb8::cipher::InvalidLength),
    #[error("invalid verification token received: {actual:?} (expected: {expected:?})")]
    InvalidVerifyToken {
        expected: VerifyToken,
        actual: Vec<u8>,
    },
}

pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey), Error> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 1024)?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>, Error> {
    Ok(key.to_public_key_der()?.to_vec())
}

pub fn decrypt(key: &RsaPrivateKey, value: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(key.decrypt(Pkcs1v15Encrypt, value)?)
}

pub type VerifyToken = [u8; 16];

pub fn generate_verify_token() -> Result<VerifyToken, Error> {
    let mut data = [0u8; 16];
    OsRng.try_fill_bytes(&mut data)?;
    Ok(data)
}

pub fn verify_token(expected: VerifyToken, actual: &[u8]) -> Result<(), Error> {
    if expected.as_slice() != actual {
        return Err(Error::InvalidVerifyToken {
            expected,
            actual: actual.to_vec(),
        });
    }

    Ok(())
}

/// Generates a random printable ASCII `server_id` for a single login attempt.
pub fn generate_server_id() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| CHARSET[*b as usize % CHARSET.len()] as char)
        .collect()
}

/// Computes `SHA1(server_id || shared_secret || encoded_public)`, rendered as Minecraft expects:
/// a signed big-endian integer in lowercase hex, with a leading `-` when negative and no
/// zero-padding.
pub fn minecraft_hash(server_id: &str, shared_secret: &[u8], encoded_public: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(encoded_public);

    BigInt::from_signed_bytes_be(&hasher.finalize()).to_str_radix(16)
}

/// Derives the offline-mode UUID vanilla uses for unauthenticated clients: `MD5("OfflinePlayer:
/// <name>")` with the version/variant nibbles overwritten. This is distinct from namespaced
/// `Uuid::new_v3`, which prepends namespace bytes before hashing and therefore produces a
/// different UUID for the same name.
pub fn offline_uuid(username: &str) -> Uuid {
    let digest = md5::compute(format!("OfflinePlayer:{username}"));
    let mut bytes = digest.0;
    bytes[6] = (bytes[6] & 0x0F) | 0x30;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    Uuid::from_bytes(bytes)
}

pub type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
pub type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Builds the AES-128/CFB8 encrypt/decrypt pair from the shared secret, used as both key and IV.
pub fn create_ciphers(shared_secret: &[u8]) -> Result<(Aes128Cfb8Enc, Aes128Cfb8Dec), Error> {
    use cfb8::cipher::KeyIvInit;

    let encryptor = Aes128Cfb8Enc::new_from_slices(shared_secret, shared_secret)?;
    let decryptor = Aes128Cfb8Dec::new_from_slices(shared_secret, shared_secret)?;
    Ok((encryptor, decryptor))
}
