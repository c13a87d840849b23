//! Manifest data model.
//!
//! A manifest is the signed configuration document describing one journey:
//! which steps exist, how events move between them, which API operations
//! bindings invoke, and what the bridge security posture is. It is
//! deserialized once per journey and immutable thereafter.

mod loader;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use loader::{ManifestError, ManifestLoader};

/// Manifest version prefix this runtime understands.
pub const SUPPORTED_VERSION_PREFIX: &str = "1.1";

/// The signed, versioned configuration document describing a journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Document version; must begin with `"1.1"`.
    pub manifest_version: String,
    /// Minimum runtime version able to interpret this manifest.
    pub min_sdk: String,
    /// Journey identifier.
    pub journey_id: String,
    /// Location of the OpenAPI document (URL or file reference).
    pub oapi_bundle: String,
    /// Key into [`Manifest::steps`] naming the first step.
    pub start_step: String,
    /// Default headers applied to every API call.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Bridge and transport security posture.
    pub security: SecurityPolicy,
    /// Which steps write resume snapshots.
    #[serde(default)]
    pub resume_policy: Option<ResumePolicy>,
    /// Steps keyed by identifier.
    pub steps: BTreeMap<String, Step>,
    /// Detached JWS compact serialization (`header..signature`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Manifest {
    /// Returns a step by identifier.
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.get(step_id)
    }
}

/// Security posture declared by the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// Ordered page origins the bridge accepts; must be non-empty.
    pub allowed_origins: Vec<String>,
    /// Whether certificate pinning is requested for API calls.
    #[serde(default)]
    pub pinning: bool,
    /// Opaque attestation material, carried through unmodified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<BTreeMap<String, Value>>,
    /// Whether journey start is gated on the sign-in surface.
    #[serde(default)]
    pub require_handshake: bool,
}

/// Resume snapshot policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePolicy {
    /// Step identifiers that write a snapshot on entry.
    #[serde(default)]
    pub snapshot_on: Vec<String>,
}

/// Kind of a journey step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Hosted web page presented in the embedded web view.
    Web,
    /// Native plugin invocation.
    Native,
    /// Server-side only; driven purely by bindings and transitions.
    Server,
    /// Absorbing final step producing the journey result.
    Terminal,
}

/// One node of the journey state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step kind.
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Initial page URL for `web` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Plugin method name for `native` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Arbitrary step parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Milliseconds after step entry at which a synthetic `"timeout"`
    /// event fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Declarative API bindings evaluated against inbound events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    /// Transitions keyed by event name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on: BTreeMap<String, Transition>,
    /// Payload returned to the caller for `terminal` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Bridge method names accepted while this step is current.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bridge_allow: Vec<String>,
    /// Idempotency key applied to this step's bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Declarative rule attaching an API operation to an inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Event name that triggers this binding.
    pub on_event: String,
    /// The operation to invoke.
    pub call: BindingCall,
    /// Event emitted to the page on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success_emit: Option<String>,
    /// Event emitted to the page on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error_emit: Option<String>,
}

/// Operation reference inside a binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingCall {
    /// OpenAPI operation identifier.
    pub operation_id: String,
    /// Dotted path into the event payload supplying the request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_from: Option<String>,
    /// Extra headers merged onto the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

/// Rule moving the state machine between steps, possibly guarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// Destination step identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Event emitted to the page when the transition fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emit: Option<String>,
    /// Guard expression; a false guard drops the transition silently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_expr: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_manifest_json() -> Value {
        json!({
            "manifestVersion": "1.1.0",
            "minSdk": "1.0",
            "journeyId": "account-opening",
            "oapiBundle": "https://cdn.journeyrt.dev/bundles/account-opening.json",
            "startStep": "intro",
            "headers": {"X-Partner": "p-1"},
            "security": {
                "allowedOrigins": ["https://flows.example.com"],
                "pinning": true,
                "requireHandshake": false
            },
            "resumePolicy": {"snapshotOn": ["review"]},
            "steps": {
                "intro": {
                    "type": "web",
                    "url": "https://flows.example.com/intro",
                    "bridgeAllow": ["form.submit"],
                    "timeoutMs": 30000,
                    "bindings": [{
                        "onEvent": "submit",
                        "call": {"operationId": "createApplication", "argsFrom": "form"},
                        "onSuccessEmit": "application_created"
                    }],
                    "on": {
                        "application_created": {"to": "review"},
                        "timeout": {"to": "done", "guardExpr": "payload.retries >= 3"}
                    }
                },
                "review": {"type": "server", "on": {"approved": {"to": "done"}}},
                "done": {"type": "terminal", "result": {"status": "completed"}}
            },
            "signature": "eyJhbGciOiJFUzI1NiJ9..c2ln"
        })
    }

    #[test]
    fn deserializes_full_document() {
        let manifest: Manifest = serde_json::from_value(sample_manifest_json()).unwrap();

        assert_eq!(manifest.journey_id, "account-opening");
        assert_eq!(manifest.start_step, "intro");
        assert!(manifest.security.pinning);

        let intro = manifest.step("intro").unwrap();
        assert_eq!(intro.kind, StepKind::Web);
        assert_eq!(intro.timeout_ms, Some(30_000));
        assert_eq!(intro.bindings.len(), 1);
        assert_eq!(intro.bindings[0].call.operation_id, "createApplication");
        assert_eq!(
            intro.on["timeout"].guard_expr.as_deref(),
            Some("payload.retries >= 3")
        );

        let done = manifest.step("done").unwrap();
        assert_eq!(done.kind, StepKind::Terminal);
        assert_eq!(done.result, Some(json!({"status": "completed"})));
    }

    #[test]
    fn optional_fields_default() {
        let manifest: Manifest = serde_json::from_value(json!({
            "manifestVersion": "1.1",
            "minSdk": "1.0",
            "journeyId": "j",
            "oapiBundle": "bundle.json",
            "startStep": "s",
            "security": {"allowedOrigins": ["https://a.example"]},
            "steps": {"s": {"type": "terminal"}}
        }))
        .unwrap();

        assert!(manifest.headers.is_empty());
        assert!(manifest.resume_policy.is_none());
        assert!(manifest.signature.is_none());
        assert!(!manifest.security.require_handshake);
        let step = manifest.step("s").unwrap();
        assert!(step.bindings.is_empty());
        assert!(step.bridge_allow.is_empty());
    }

    #[test]
    fn step_kind_labels_are_lowercase() {
        assert_eq!(
            serde_json::to_value(StepKind::Terminal).unwrap(),
            json!("terminal")
        );
        let kind: StepKind = serde_json::from_value(json!("native")).unwrap();
        assert_eq!(kind, StepKind::Native);
    }

    #[test]
    fn round_trip_preserves_structure() {
        let manifest: Manifest = serde_json::from_value(sample_manifest_json()).unwrap();
        let value = serde_json::to_value(&manifest).unwrap();
        let back: Manifest = serde_json::from_value(value).unwrap();
        assert_eq!(back.steps.len(), manifest.steps.len());
        assert_eq!(back.signature, manifest.signature);
    }
}
