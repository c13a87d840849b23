//! Manifest fetching, signature verification, and validation.
//!
//! The loader resolves a journey identifier to a manifest URL, fetches the
//! document (network or file), verifies its detached JWS signature against
//! the trust store, decodes it, and validates the structural invariants a
//! journey depends on. Every failure is fatal before the journey begins.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Manifest, SUPPORTED_VERSION_PREFIX};
use crate::config::{self, DEFAULT_MANIFEST_BASE, RuntimeConfig};
use crate::crypto::{self, KeyStoreError, TrustStore};

/// Errors surfaced by manifest loading.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Transport-level failure reaching the manifest host.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// File-based manifest could not be read.
    #[error("manifest file error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest host answered with a non-200 status.
    #[error("invalid response: HTTP {status}")]
    InvalidResponse {
        /// The status the host returned.
        status: u16,
    },

    /// The document is not valid JSON or does not match the schema.
    #[error("decoding error: {0}")]
    Decoding(#[from] serde_json::Error),

    /// The signature's key identifier is not in the trust store.
    #[error("key not found: {kid}")]
    KeyNotFound {
        /// The unresolvable key identifier.
        kid: String,
    },

    /// The detached JWS did not verify.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// A structural invariant does not hold.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl From<KeyStoreError> for ManifestError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::KeyNotFound { kid } => Self::KeyNotFound { kid },
            KeyStoreError::MalformedKey(_) => Self::SignatureVerificationFailed,
        }
    }
}

/// Fetches and validates signed journey manifests.
pub struct ManifestLoader {
    config: Arc<RuntimeConfig>,
    trust: Arc<TrustStore>,
    http: reqwest::Client,
}

impl ManifestLoader {
    /// Creates a loader bound to a configuration and trust store.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Network`] if the HTTP client cannot be
    /// constructed.
    pub fn new(config: Arc<RuntimeConfig>, trust: Arc<TrustStore>) -> Result<Self, ManifestError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(ManifestError::Network)?;
        Ok(Self {
            config,
            trust,
            http,
        })
    }

    /// Resolves the manifest URL for a journey.
    ///
    /// A `remote_config_url` ending in `.json` is used verbatim; any other
    /// override is treated as a base and extended with
    /// `/<journeyId>/manifest.json`. Without an override the built-in
    /// production base applies.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::ValidationFailed`] if the resolved text is
    /// not a URL.
    pub fn manifest_url(&self, journey_id: &str) -> Result<Url, ManifestError> {
        let resolved = match &self.config.remote_config_url {
            Some(url) if url.path().ends_with(".json") => url.to_string(),
            Some(url) => format!(
                "{}/{journey_id}/manifest.json",
                url.as_str().trim_end_matches('/')
            ),
            None => format!("{DEFAULT_MANIFEST_BASE}/{journey_id}/manifest.json"),
        };
        Url::parse(&resolved)
            .map_err(|err| ManifestError::ValidationFailed(format!("manifest URL: {err}")))
    }

    /// Loads, verifies, and validates the manifest for a journey.
    ///
    /// # Errors
    ///
    /// Propagates fetch, decoding, signature, and validation failures; all
    /// are fatal for the journey.
    #[instrument(skip(self, context_token))]
    pub async fn load(
        &self,
        journey_id: &str,
        context_token: &str,
    ) -> Result<Manifest, ManifestError> {
        let url = self.manifest_url(journey_id)?;
        let bytes = self.fetch(&url, context_token).await?;
        let document: Value = serde_json::from_slice(&bytes)?;

        let skip_verification = self
            .config
            .feature_flags
            .disable_manifest_signature_verification;
        if skip_verification {
            warn!(journey_id, "manifest signature verification disabled");
        } else {
            self.verify_signature(&document)?;
        }

        let mut manifest: Manifest = serde_json::from_value(document)?;

        if url.scheme() == "file" && skip_verification {
            rewrite_local_refs(&mut manifest, &url);
        }

        validate(&manifest)?;
        debug!(
            journey_id,
            steps = manifest.steps.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    /// Fetches the OpenAPI bundle referenced by a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::ValidationFailed`] for an unparsable
    /// bundle reference, and fetch errors otherwise.
    pub async fn fetch_bundle(
        &self,
        manifest: &Manifest,
        context_token: &str,
    ) -> Result<Vec<u8>, ManifestError> {
        let url = Url::parse(&manifest.oapi_bundle).map_err(|err| {
            ManifestError::ValidationFailed(format!("oapiBundle is not an absolute URL: {err}"))
        })?;
        self.fetch(&url, context_token).await
    }

    async fn fetch(&self, url: &Url, context_token: &str) -> Result<Vec<u8>, ManifestError> {
        if url.scheme() == "file" {
            let path = url.to_file_path().map_err(|()| {
                ManifestError::ValidationFailed(format!("not a readable file URL: {url}"))
            })?;
            return Ok(tokio::fs::read(path).await?);
        }

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(context_token)
            .send()
            .await
            .map_err(ManifestError::Network)?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ManifestError::InvalidResponse { status });
        }
        let body = response.bytes().await.map_err(ManifestError::Network)?;
        Ok(body.to_vec())
    }

    /// Verifies the document's detached JWS signature.
    ///
    /// The signed payload is the document itself minus the top-level
    /// `signature` field, in canonical JSON.
    fn verify_signature(&self, document: &Value) -> Result<(), ManifestError> {
        let Some(signature) = document.get("signature").and_then(Value::as_str) else {
            return Err(ManifestError::SignatureVerificationFailed);
        };

        let (header, header_b64, signature_b64) = crypto::split_detached(signature)
            .map_err(|_| ManifestError::SignatureVerificationFailed)?;
        header
            .require_es256()
            .map_err(|_| ManifestError::SignatureVerificationFailed)?;
        let kid = header
            .kid
            .ok_or(ManifestError::SignatureVerificationFailed)?;
        let key = self.trust.resolve(&kid)?;

        let mut unsigned = document.clone();
        if let Value::Object(map) = &mut unsigned {
            map.remove("signature");
        }
        let payload = crypto::to_canonical_string(&unsigned);
        let payload_b64 = crypto::encode_segment(payload.as_bytes());

        crypto::verify_signature_input(&header_b64, &payload_b64, &signature_b64, &key)
            .map_err(|_| ManifestError::SignatureVerificationFailed)
    }
}

/// Validates the structural invariants of a decoded manifest.
///
/// # Errors
///
/// Returns [`ManifestError::ValidationFailed`] naming the offending field.
pub fn validate(manifest: &Manifest) -> Result<(), ManifestError> {
    if !manifest.manifest_version.starts_with(SUPPORTED_VERSION_PREFIX) {
        return Err(ManifestError::ValidationFailed(format!(
            "Unsupported manifestVersion {}",
            manifest.manifest_version
        )));
    }
    if !config::min_sdk_satisfied(&manifest.min_sdk) {
        return Err(ManifestError::ValidationFailed(format!(
            "minSdk {} exceeds runtime version {}",
            manifest.min_sdk,
            config::SDK_VERSION
        )));
    }
    if manifest.security.allowed_origins.is_empty() {
        return Err(ManifestError::ValidationFailed(
            "allowedOrigins must not be empty".to_string(),
        ));
    }
    if !manifest.steps.contains_key(&manifest.start_step) {
        return Err(ManifestError::ValidationFailed(format!(
            "startStep {} is not a declared step",
            manifest.start_step
        )));
    }
    Ok(())
}

/// Rewrites relative bundle and page references against the manifest's
/// directory. Applied only to file-based manifests loaded with signature
/// verification disabled; production manifests are never rewritten.
fn rewrite_local_refs(manifest: &mut Manifest, manifest_url: &Url) {
    let Ok(base) = manifest_url.join(".") else {
        return;
    };

    if Url::parse(&manifest.oapi_bundle).is_err() {
        if let Ok(absolute) = base.join(&manifest.oapi_bundle) {
            manifest.oapi_bundle = absolute.to_string();
        }
    }

    for step in manifest.steps.values_mut() {
        if let Some(url) = &step.url {
            if Url::parse(url).is_err() {
                if let Ok(absolute) = base.join(url) {
                    step.url = Some(absolute.to_string());
                }
            }
        }
    }
}
