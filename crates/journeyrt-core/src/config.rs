//! Caller-supplied runtime configuration.
//!
//! Partner applications hand the runtime one [`RuntimeConfig`] per process.
//! The configuration selects the environment, identifies the partner and
//! client, and carries the feature flags that gate development-only
//! behavior (file origins, signature bypass).

use serde::{Deserialize, Serialize};
use url::Url;

/// Version of this runtime, compared against the manifest's `minSdk`.
pub const SDK_VERSION: &str = "1.1.0";

/// Built-in production base for manifest resolution when no
/// `remote_config_url` override is supplied.
pub const DEFAULT_MANIFEST_BASE: &str = "https://cdn.journeyrt.dev/journeys";

/// Deployment environment the runtime talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Live partner traffic.
    Production,
    /// Hosted sandbox with synthetic data.
    Sandbox,
    /// Local development against file-based fixtures.
    Development,
}

/// Feature flags gating development-only behavior.
///
/// All flags default to off; production builds are expected to leave them
/// that way.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    /// Accept `file://` page origins at the bridge boundary.
    pub allow_file_origins: bool,
    /// Let the demo application auto-complete journeys.
    pub demo_auto_complete: bool,
    /// Skip detached-JWS verification of the manifest.
    pub disable_manifest_signature_verification: bool,
}

/// Configuration consumed from the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Partner identifier issued at onboarding.
    pub partner_id: String,
    /// OAuth client identifier for the sign-in surface.
    pub client_id: String,
    /// Custom URL scheme the sign-in surface redirects back to.
    pub redirect_scheme: String,
    /// BCP 47 locale tag passed through to hosted pages.
    pub locale: String,
    /// Optional override for manifest resolution.
    #[serde(default)]
    pub remote_config_url: Option<Url>,
    /// Development feature flags.
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    /// Whether telemetry events leave the process.
    #[serde(default)]
    pub telemetry_opt_in: bool,
}

impl RuntimeConfig {
    /// Creates a configuration with defaults suitable for most callers.
    #[must_use]
    pub fn new(
        environment: Environment,
        partner_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            partner_id: partner_id.into(),
            client_id: client_id.into(),
            redirect_scheme: "journeyrt".to_string(),
            locale: "en-US".to_string(),
            remote_config_url: None,
            feature_flags: FeatureFlags::default(),
            telemetry_opt_in: false,
        }
    }

    /// Sets the manifest resolution override.
    #[must_use]
    pub fn with_remote_config_url(mut self, url: Url) -> Self {
        self.remote_config_url = Some(url);
        self
    }

    /// Sets the feature flags.
    #[must_use]
    pub const fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }
}

/// Compares two dotted numeric version strings component by component.
///
/// Missing components count as zero; non-numeric components count as zero.
/// `"1.2" < "1.10"` under this ordering, which is what the manifest's
/// `minSdk` gate needs.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let left = parse(a);
    let right = parse(b);
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            std::cmp::Ordering::Equal => {},
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Whether a manifest requiring `min_sdk` can run on this runtime.
#[must_use]
pub fn min_sdk_satisfied(min_sdk: &str) -> bool {
    compare_versions(min_sdk, SDK_VERSION) != std::cmp::Ordering::Greater
}
