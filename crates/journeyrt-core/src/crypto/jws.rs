//! Compact and detached JWS serialization.
//!
//! The manifest carries a detached compact JWS (`header..signature`) whose
//! payload is reconstructed from canonical JSON of the document. Bridge
//! envelopes and session proofs use the ordinary three-segment compact
//! form. Only ES256 is admitted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::ecdsa::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::es256::{self, Es256Error};

/// The only signature algorithm the runtime accepts.
pub const ALG_ES256: &str = "ES256";

/// Errors from JWS encoding and verification.
#[derive(Debug, Error)]
pub enum JwsError {
    /// The compact serialization does not have the expected segments.
    #[error("malformed compact serialization: {0}")]
    MalformedSerialization(String),

    /// A segment is not valid base64url.
    #[error("invalid base64url segment")]
    InvalidSegment(#[from] base64::DecodeError),

    /// The protected header is not valid JSON.
    #[error("invalid protected header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    /// The protected header names an algorithm other than ES256.
    #[error("unsupported algorithm: {alg}")]
    UnsupportedAlgorithm {
        /// The algorithm the header declared.
        alg: String,
    },

    /// The signature does not verify.
    #[error(transparent)]
    Signature(#[from] Es256Error),
}

/// JWS protected header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// Signature algorithm identifier.
    pub alg: String,
    /// Key identifier resolved through the trust store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl ProtectedHeader {
    /// Creates an ES256 header with the given key identifier.
    #[must_use]
    pub fn es256(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_ES256.to_string(),
            kid: Some(kid.into()),
        }
    }

    /// Rejects headers naming any algorithm other than ES256.
    ///
    /// # Errors
    ///
    /// Returns [`JwsError::UnsupportedAlgorithm`] on mismatch.
    pub fn require_es256(&self) -> Result<(), JwsError> {
        if self.alg == ALG_ES256 {
            Ok(())
        } else {
            Err(JwsError::UnsupportedAlgorithm {
                alg: self.alg.clone(),
            })
        }
    }
}

/// Encodes bytes as a base64url segment without padding.
#[must_use]
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a base64url segment.
///
/// # Errors
///
/// Returns [`JwsError::InvalidSegment`] if the input is not base64url.
pub fn decode_segment(segment: &str) -> Result<Vec<u8>, JwsError> {
    Ok(URL_SAFE_NO_PAD.decode(segment)?)
}

/// Signs a payload, producing the three-segment compact serialization.
///
/// # Errors
///
/// Returns [`JwsError::InvalidHeader`] if the header fails to serialize.
pub fn sign_compact(
    header: &ProtectedHeader,
    payload: &[u8],
    key: &SigningKey,
) -> Result<String, JwsError> {
    let header_b64 = encode_segment(&serde_json::to_vec(header)?);
    let payload_b64 = encode_segment(payload);
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = es256::sign_bytes(key, signing_input.as_bytes());
    Ok(format!("{signing_input}.{}", encode_segment(&signature)))
}

/// Signs a payload, producing the detached form `header..signature`.
///
/// The signature still covers `header.payload`; only the serialization
/// omits the payload segment.
///
/// # Errors
///
/// Returns [`JwsError::InvalidHeader`] if the header fails to serialize.
pub fn sign_detached(
    header: &ProtectedHeader,
    payload: &[u8],
    key: &SigningKey,
) -> Result<String, JwsError> {
    let compact = sign_compact(header, payload, key)?;
    let mut parts = compact.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(header_b64), Some(_), Some(signature_b64)) => {
            Ok(format!("{header_b64}..{signature_b64}"))
        },
        _ => Err(JwsError::MalformedSerialization(
            "compact form did not have three segments".to_string(),
        )),
    }
}

/// Splits a detached serialization into header and signature segments.
///
/// # Errors
///
/// Returns [`JwsError::MalformedSerialization`] unless the input is
/// exactly `header..signature` with an empty payload segment.
pub fn split_detached(detached: &str) -> Result<(ProtectedHeader, String, String), JwsError> {
    let segments: Vec<&str> = detached.split('.').collect();
    let [header_b64, payload, signature_b64] = segments.as_slice() else {
        return Err(JwsError::MalformedSerialization(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };
    if !payload.is_empty() {
        return Err(JwsError::MalformedSerialization(
            "payload segment must be empty in detached form".to_string(),
        ));
    }
    let header_bytes = decode_segment(header_b64)?;
    let header: ProtectedHeader = serde_json::from_slice(&header_bytes)?;
    Ok((header, (*header_b64).to_string(), (*signature_b64).to_string()))
}

/// Verifies a signature over the JWS signing input `header.payload`.
///
/// # Errors
///
/// Returns [`JwsError::Signature`] when the signature is malformed or does
/// not verify.
pub fn verify_signature_input(
    header_b64: &str,
    payload_b64: &str,
    signature_b64: &str,
    key: &VerifyingKey,
) -> Result<(), JwsError> {
    let signature = decode_segment(signature_b64)?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    es256::verify_bytes(key, signing_input.as_bytes(), &signature)?;
    Ok(())
}
