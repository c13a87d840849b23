//! Envelope signing and session proofs.
//!
//! The signer holds a fresh ephemeral ES256 key per process. Distribution
//! of the corresponding public key to the page is out of band; receivers
//! that cannot verify must either reject unsigned envelopes or document
//! accepting them.

use chrono::{SecondsFormat, Utc};
use p256::ecdsa::VerifyingKey;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::crypto::{Es256KeyPair, JwsError, ProtectedHeader, sign_compact, to_canonical_string};

/// Signs outbound envelopes and session proofs with an ephemeral key.
pub struct BridgeSigner {
    pair: Es256KeyPair,
    kid: String,
}

impl BridgeSigner {
    /// Generates a signer with a fresh ephemeral keypair.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pair: Es256KeyPair::generate(),
            kid: format!("bridge-{}", Uuid::new_v4().simple()),
        }
    }

    /// Key identifier stamped into signed envelopes.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Verifying key for the ephemeral keypair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.pair.verifying_key()
    }

    /// Signs the canonical JSON form of a value as a compact JWS.
    ///
    /// # Errors
    ///
    /// Returns [`JwsError`] if the protected header fails to serialize.
    pub fn sign_canonical(&self, value: &Value) -> Result<String, JwsError> {
        let payload = to_canonical_string(value);
        sign_compact(
            &ProtectedHeader::es256(&self.kid),
            payload.as_bytes(),
            self.pair.signing_key(),
        )
    }

    /// Produces the handshake session proof binding the session to the
    /// page's origin and nonce.
    ///
    /// # Errors
    ///
    /// Returns [`JwsError`] if signing fails.
    pub fn session_proof(
        &self,
        correlation_id: &str,
        origin: &str,
        page_nonce: &str,
    ) -> Result<String, JwsError> {
        self.sign_canonical(&json!({
            "correlationId": correlation_id,
            "origin": origin,
            "pageNonce": page_nonce,
            "ts": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
    }
}

impl Default for BridgeSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::{decode_segment, verify_signature_input};

    use super::*;

    fn verify_compact(jws: &str, signer: &BridgeSigner) -> Value {
        let segments: Vec<&str> = jws.split('.').collect();
        assert_eq!(segments.len(), 3);
        verify_signature_input(segments[0], segments[1], segments[2], &signer.verifying_key())
            .unwrap();
        serde_json::from_slice(&decode_segment(segments[1]).unwrap()).unwrap()
    }

    #[test]
    fn signed_envelope_verifies_and_is_canonical() {
        let signer = BridgeSigner::new();
        let value = json!({"name": "bridge_ready", "payload": {"b": 1, "a": 2}});

        let jws = signer.sign_canonical(&value).unwrap();
        let payload = verify_compact(&jws, &signer);
        assert_eq!(payload["payload"]["a"], 2);
    }

    #[test]
    fn session_proof_binds_origin_and_nonce() {
        let signer = BridgeSigner::new();
        let jws = signer
            .session_proof("corr-1", "https://flows.example.com", "p-nonce")
            .unwrap();

        let claims = verify_compact(&jws, &signer);
        assert_eq!(claims["correlationId"], "corr-1");
        assert_eq!(claims["origin"], "https://flows.example.com");
        assert_eq!(claims["pageNonce"], "p-nonce");
        assert!(claims["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn each_process_key_is_distinct() {
        let a = BridgeSigner::new();
        let b = BridgeSigner::new();
        assert_ne!(a.verifying_key(), b.verifying_key());
        assert_ne!(a.kid(), b.kid());
    }
}
