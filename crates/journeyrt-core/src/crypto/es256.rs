//! ECDSA P-256 (ES256) signing and verification primitives.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use thiserror::Error;

/// Size of a raw ES256 signature (r || s).
pub const SIGNATURE_SIZE: usize = 64;

/// Errors from ES256 operations.
#[derive(Debug, Error)]
pub enum Es256Error {
    /// Signature bytes are not a valid r||s pair.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Public key bytes are not a valid SEC1 encoding.
    #[error("malformed public key: {0}")]
    MalformedPublicKey(String),

    /// The signature does not verify against the key and message.
    #[error("signature verification failed")]
    VerificationFailed,
}

/// An ES256 keypair.
///
/// Bridge signers generate a fresh ephemeral keypair per process; manifest
/// verification only ever sees the public half, resolved through the trust
/// store.
#[derive(Clone)]
pub struct Es256KeyPair {
    signing_key: SigningKey,
}

impl Es256KeyPair {
    /// Generates a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::random(&mut rng),
        }
    }

    /// Returns the signing key.
    #[must_use]
    pub const fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Returns the verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// Returns the public key as an uncompressed SEC1 point.
    #[must_use]
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }
}

/// Signs a message, returning the raw r||s signature bytes.
#[must_use]
pub fn sign_bytes(key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
    let signature: Signature = key.sign(message);
    signature.to_bytes().into()
}

/// Verifies a raw r||s signature over a message.
///
/// # Errors
///
/// Returns [`Es256Error::MalformedSignature`] for byte-level problems and
/// [`Es256Error::VerificationFailed`] for a genuine mismatch.
pub fn verify_bytes(
    key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), Es256Error> {
    let signature = Signature::from_slice(signature)
        .map_err(|err| Es256Error::MalformedSignature(err.to_string()))?;
    key.verify(message, &signature)
        .map_err(|_| Es256Error::VerificationFailed)
}

/// Parses an uncompressed SEC1 point into a verifying key.
///
/// # Errors
///
/// Returns [`Es256Error::MalformedPublicKey`] if the bytes are not a valid
/// P-256 point.
pub fn parse_public_key_sec1(bytes: &[u8]) -> Result<VerifyingKey, Es256Error> {
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|err| Es256Error::MalformedPublicKey(err.to_string()))
}
