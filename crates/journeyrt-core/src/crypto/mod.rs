//! Cryptographic primitives for manifest and bridge signing.
//!
//! This module provides the signature machinery the runtime depends on:
//!
//! - **ES256 signatures**: ECDSA over P-256 with SHA-256, the only
//!   algorithm the manifest contract admits
//! - **Canonical JSON**: deterministic serialization with sorted keys, the
//!   payload representation both signing parties must reproduce exactly
//! - **JWS**: compact and detached serializations built from the above
//! - **Trust store**: resolution of `kid` values to verifying keys
//!
//! # Detached payloads
//!
//! The manifest's signature is a compact JWS whose payload segment is
//! empty. Verification reconstructs the payload from the manifest document
//! itself (minus the signature field) via canonical JSON. Any deviation
//! from the signer's canonicalization produces a false-negative
//! verification failure, so the canonical form is pinned: keys sorted
//! lexicographically at every nesting level, compact separators, forward
//! slashes unescaped.

mod canonical;
mod es256;
mod jws;
mod keys;

pub use canonical::to_canonical_string;
pub use es256::{
    Es256Error, Es256KeyPair, SIGNATURE_SIZE, parse_public_key_sec1, sign_bytes, verify_bytes,
};
pub use jws::{
    JwsError, ProtectedHeader, decode_segment, encode_segment, sign_compact, sign_detached,
    split_detached, verify_signature_input,
};
pub use keys::{KeyStoreError, TrustStore};
