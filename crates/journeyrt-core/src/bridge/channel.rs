//! The bridge channel: handshake, dispatch, and outbound delivery.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::envelope::{InboundMessage, MessageKind, MessageMeta, OutboundMessage};
use super::origin;
use super::plugin::PluginRegistry;
use super::signer::BridgeSigner;
use crate::error::ErrorCode;
use crate::machine::{JourneyUpdate, PageSink};
use crate::session::SessionManager;
use crate::webview::WebViewHost;

/// Name of the window object outbound envelopes are delivered through.
pub const BRIDGE_OBJECT: &str = "JourneyRuntimeBridge";

/// Capability labels advertised in `bridge_ready`.
pub const SDK_CAPABILITIES: [&str; 2] = ["bridge.v1", "attestation.stub"];

enum BridgeState {
    NotReady,
    Ready {
        origin: String,
        #[allow(dead_code)]
        page_nonce: String,
    },
}

/// Origin-gated message channel between the hosted page and native code.
///
/// Inbound messages may arrive on any thread; events are handed to the
/// state machine's queue through a write-only sender. Outbound delivery
/// goes through the attached web-view host, which owns marshaling onto
/// its platform thread.
pub struct Bridge {
    allowed_origins: Vec<String>,
    allow_file_origins: bool,
    state: RwLock<BridgeState>,
    allowed_methods: RwLock<HashSet<String>>,
    plugins: Arc<PluginRegistry>,
    signer: Option<BridgeSigner>,
    session: Arc<SessionManager>,
    host: RwLock<Option<Arc<dyn WebViewHost>>>,
    incoming_events: mpsc::UnboundedSender<(String, Value)>,
    updates: mpsc::UnboundedSender<JourneyUpdate>,
}

impl Bridge {
    /// Creates a bridge in `notReady` state.
    ///
    /// `initial_methods` is the first step's allow-list; the orchestrator
    /// replaces it on every step entry.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        allowed_origins: Vec<String>,
        allow_file_origins: bool,
        initial_methods: &[String],
        plugins: Arc<PluginRegistry>,
        signer: Option<BridgeSigner>,
        session: Arc<SessionManager>,
        incoming_events: mpsc::UnboundedSender<(String, Value)>,
        updates: mpsc::UnboundedSender<JourneyUpdate>,
    ) -> Self {
        Self {
            allowed_origins,
            allow_file_origins,
            state: RwLock::new(BridgeState::NotReady),
            allowed_methods: RwLock::new(initial_methods.iter().cloned().collect()),
            plugins,
            signer,
            session,
            host: RwLock::new(None),
            incoming_events,
            updates,
        }
    }

    /// Attaches the web-view host outbound envelopes are delivered to.
    pub fn attach_host(&self, host: Arc<dyn WebViewHost>) {
        if let Ok(mut slot) = self.host.write() {
            *slot = Some(host);
        }
    }

    /// Atomically replaces the request method allow-list.
    pub fn update_allowed_methods(&self, methods: &[String]) {
        if let Ok(mut allowed) = self.allowed_methods.write() {
            *allowed = methods.iter().cloned().collect();
        }
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state
            .read()
            .map_or(false, |state| matches!(*state, BridgeState::Ready { .. }))
    }

    /// Processes one raw message from the page.
    ///
    /// Never fails outward: malformed or disallowed traffic is answered
    /// on the bridge itself.
    pub async fn process_inbound(&self, raw: &str) {
        let message: InboundMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!(%err, "unparsable bridge message");
                if self.is_ready() {
                    self.emit_event("BRIDGE_ERROR", json!({"reason": "malformed message"}));
                } else {
                    self.emit_event(ErrorCode::OriginBlocked.as_str(), json!({}));
                }
                return;
            },
        };

        if !self.is_ready() {
            if message.kind == MessageKind::Event && message.name == "bridge_hello" {
                self.handshake(&message.payload);
            } else {
                // Pre-handshake traffic gets exactly one ORIGIN_BLOCKED.
                self.emit_event(ErrorCode::OriginBlocked.as_str(), json!({}));
            }
            return;
        }

        match message.kind {
            MessageKind::Event => {
                let _ = self.incoming_events.send((message.name, message.payload));
            },
            MessageKind::Request => self.handle_request(message).await,
            MessageKind::Response => {
                debug!(name = %message.name, "ignoring response-kind inbound");
            },
        }
    }

    /// Two-party handshake: validate the page origin, transition to
    /// `ready`, and answer with capabilities and the session proof.
    fn handshake(&self, payload: &Value) {
        let origin_value = payload.get("origin").and_then(Value::as_str);
        let page_nonce = payload.get("pageNonce").and_then(Value::as_str);
        let (Some(origin_value), Some(page_nonce)) = (origin_value, page_nonce) else {
            self.block_origin("handshake payload missing origin or pageNonce");
            return;
        };

        if !origin::is_allowed(origin_value, &self.allowed_origins, self.allow_file_origins) {
            self.block_origin(origin_value);
            return;
        }

        if let Ok(mut state) = self.state.write() {
            *state = BridgeState::Ready {
                origin: origin_value.to_string(),
                page_nonce: page_nonce.to_string(),
            };
        }
        info!(origin = origin_value, "bridge handshake completed");

        let mut ready = json!({
            "sdkCapabilities": SDK_CAPABILITIES,
        });
        if let Some(signer) = &self.signer {
            match signer.session_proof(&self.session.correlation_id(), origin_value, page_nonce) {
                Ok(proof) => {
                    ready["sessionProofJws"] = Value::String(proof);
                },
                Err(err) => warn!(%err, "session proof signing failed"),
            }
        }
        self.emit_event("bridge_ready", ready);
    }

    fn block_origin(&self, origin_value: &str) {
        warn!(origin = origin_value, "bridge origin blocked");
        self.emit_event(ErrorCode::OriginBlocked.as_str(), json!({}));
        let _ = self.updates.send(JourneyUpdate::Error {
            code: ErrorCode::OriginBlocked,
            recoverable: false,
            message: format!("origin not allowed: {origin_value}"),
        });
    }

    async fn handle_request(&self, message: InboundMessage) {
        let allowed = self
            .allowed_methods
            .read()
            .map_or(false, |methods| methods.contains(&message.name));
        if !allowed {
            self.emit_event(
                "BRIDGE_FORBIDDEN",
                json!({"method": message.name}),
            );
            return;
        }

        if let Some(plugin) = self.plugins.resolve(&message.name) {
            match plugin.handle(&message.name, &message.payload).await {
                Ok(result) => self.respond(&message.name, message.id, result),
                Err(err) => {
                    self.emit_event("BRIDGE_ERROR", json!({"reason": err.reason}));
                },
            }
            return;
        }

        let _ = self
            .incoming_events
            .send((message.name.clone(), message.payload));
        self.respond(&message.name, message.id, json!({"ack": true}));
    }

    /// Emits an event envelope to the page.
    pub fn emit_event(&self, name: &str, payload: Value) {
        self.send(MessageKind::Event, name, None, payload);
    }

    fn respond(&self, name: &str, id: Option<Value>, payload: Value) {
        self.send(MessageKind::Response, name, id, payload);
    }

    fn send(&self, kind: MessageKind, name: &str, id: Option<Value>, payload: Value) {
        let meta = MessageMeta::new();
        let sig = self.signer.as_ref().and_then(|signer| {
            let meta_value = match serde_json::to_value(&meta) {
                Ok(value) => value,
                Err(_) => return None,
            };
            signer
                .sign_canonical(&json!({
                    "name": name,
                    "payload": payload,
                    "meta": meta_value,
                }))
                .map_err(|err| warn!(%err, "envelope signing failed"))
                .ok()
        });

        let outbound = OutboundMessage {
            kind,
            name: name.to_string(),
            id,
            payload,
            meta,
            sig,
        };
        let Ok(encoded) = serde_json::to_string(&outbound) else {
            warn!(name, "outbound envelope failed to serialize");
            return;
        };

        let host = self.host.read().ok().and_then(|slot| slot.clone());
        if let Some(host) = host {
            let script =
                format!("window.{BRIDGE_OBJECT} && window.{BRIDGE_OBJECT}.receive({encoded})");
            host.dispatch_to_page(&script);
        } else {
            debug!(name, "no web-view host attached; outbound dropped");
        }
    }
}

impl PageSink for Bridge {
    fn emit_to_page(&self, name: &str, payload: Value) {
        self.emit_event(name, payload);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use url::Url;

    use super::super::plugin::{Plugin, PluginError};
    use super::*;
    use crate::session::InMemoryStore;

    #[derive(Default)]
    struct RecordingHost {
        scripts: Mutex<Vec<String>>,
    }

    impl WebViewHost for RecordingHost {
        fn present(
            &self,
            _url: &Url,
            _bridge: Arc<Bridge>,
            _allowed_origins: &[String],
            _allow_file_origins: bool,
        ) {
        }

        fn dispatch_to_page(&self, script: &str) {
            self.scripts.lock().unwrap().push(script.to_string());
        }
    }

    impl RecordingHost {
        fn outbound(&self) -> Vec<Value> {
            self.scripts
                .lock()
                .unwrap()
                .iter()
                .map(|script| {
                    let start = script.find(".receive(").unwrap() + ".receive(".len();
                    let json = &script[start..script.len() - 1];
                    serde_json::from_str(json).unwrap()
                })
                .collect()
        }
    }

    struct Fixture {
        bridge: Arc<Bridge>,
        host: Arc<RecordingHost>,
        plugins: Arc<PluginRegistry>,
        events: mpsc::UnboundedReceiver<(String, Value)>,
        updates: mpsc::UnboundedReceiver<JourneyUpdate>,
    }

    fn fixture(signer: Option<BridgeSigner>, initial_methods: &[&str]) -> Fixture {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let session = Arc::new(SessionManager::new(Arc::new(InMemoryStore::new())));
        session.start_session("ctx", None);

        let plugins = Arc::new(PluginRegistry::new());
        let methods: Vec<String> = initial_methods.iter().map(ToString::to_string).collect();
        let bridge = Arc::new(Bridge::new(
            vec!["https://example.com".to_string()],
            false,
            &methods,
            plugins.clone(),
            signer,
            session,
            events_tx,
            updates_tx,
        ));
        let host = Arc::new(RecordingHost::default());
        bridge.attach_host(host.clone());
        Fixture {
            bridge,
            host,
            plugins,
            events,
            updates,
        }
    }

    fn hello(origin: &str) -> String {
        json!({
            "kind": "event",
            "name": "bridge_hello",
            "payload": {"origin": origin, "pageNonce": "p1"}
        })
        .to_string()
    }

    #[tokio::test]
    async fn handshake_success_emits_signed_bridge_ready() {
        let mut fx = fixture(Some(BridgeSigner::new()), &[]);

        fx.bridge.process_inbound(&hello("https://example.com")).await;

        assert!(fx.bridge.is_ready());
        let outbound = fx.host.outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0]["name"], "bridge_ready");
        assert!(outbound[0]["payload"]["sessionProofJws"].is_string());
        assert!(outbound[0]["sig"].is_string());
        assert_eq!(
            outbound[0]["payload"]["sdkCapabilities"],
            json!(["bridge.v1", "attestation.stub"])
        );
        assert_eq!(outbound[0]["meta"]["bridgeVersion"], "1.1");
        assert!(fx.updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn handshake_from_unknown_origin_blocks() {
        let mut fx = fixture(Some(BridgeSigner::new()), &[]);

        fx.bridge.process_inbound(&hello("https://evil.test")).await;

        assert!(!fx.bridge.is_ready());
        let outbound = fx.host.outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0]["name"], "ORIGIN_BLOCKED");

        match fx.updates.try_recv() {
            Ok(JourneyUpdate::Error { code, recoverable, .. }) => {
                assert_eq!(code, ErrorCode::OriginBlocked);
                assert!(!recoverable);
            },
            other => panic!("expected origin-blocked update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_ready_rejects_everything_but_hello() {
        let fx = fixture(None, &["pay.confirm"]);

        fx.bridge
            .process_inbound(&json!({"kind": "event", "name": "submit", "payload": {}}).to_string())
            .await;
        fx.bridge
            .process_inbound(
                &json!({"kind": "request", "name": "pay.confirm", "id": 1, "payload": {}})
                    .to_string(),
            )
            .await;
        fx.bridge.process_inbound("not json at all").await;

        let outbound = fx.host.outbound();
        assert_eq!(outbound.len(), 3);
        for message in outbound {
            assert_eq!(message["name"], "ORIGIN_BLOCKED");
        }
    }

    #[tokio::test]
    async fn post_handshake_events_forward_to_sink() {
        let mut fx = fixture(None, &[]);
        fx.bridge.process_inbound(&hello("https://example.com")).await;

        fx.bridge
            .process_inbound(
                &json!({"kind": "event", "name": "submit", "payload": {"v": 1}}).to_string(),
            )
            .await;

        let (name, payload) = fx.events.recv().await.unwrap();
        assert_eq!(name, "submit");
        assert_eq!(payload, json!({"v": 1}));
    }

    #[tokio::test]
    async fn disallowed_request_gets_exactly_one_forbidden() {
        let mut fx = fixture(None, &["allowed.method"]);
        fx.bridge.process_inbound(&hello("https://example.com")).await;

        fx.bridge
            .process_inbound(
                &json!({"kind": "request", "name": "secret.method", "id": 7, "payload": {}})
                    .to_string(),
            )
            .await;

        let outbound = fx.host.outbound();
        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[1]["name"], "BRIDGE_FORBIDDEN");
        assert_eq!(outbound[1]["payload"]["method"], "secret.method");
        assert!(fx.bridge.is_ready());
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn allowed_request_without_plugin_acks_and_forwards() {
        let mut fx = fixture(None, &["form.submit"]);
        fx.bridge.process_inbound(&hello("https://example.com")).await;

        fx.bridge
            .process_inbound(
                &json!({"kind": "request", "name": "form.submit", "id": 3, "payload": {"f": 1}})
                    .to_string(),
            )
            .await;

        let (name, _) = fx.events.recv().await.unwrap();
        assert_eq!(name, "form.submit");

        let outbound = fx.host.outbound();
        assert_eq!(outbound[1]["kind"], "response");
        assert_eq!(outbound[1]["id"], 3);
        assert_eq!(outbound[1]["payload"], json!({"ack": true}));
    }

    struct BiometricStub {
        fail: bool,
    }

    #[async_trait]
    impl Plugin for BiometricStub {
        fn name(&self) -> &str {
            "biometric"
        }

        fn can_handle(&self, method: &str) -> bool {
            method == "biometric.prompt"
        }

        async fn handle(&self, _method: &str, _params: &Value) -> Result<Value, PluginError> {
            if self.fail {
                Err(PluginError::new("sensor unavailable"))
            } else {
                Ok(json!({"verified": true}))
            }
        }
    }

    fn fixture_with_plugin(fail: bool) -> Fixture {
        let fx = fixture(None, &["biometric.prompt"]);
        fx.plugins.register(Arc::new(BiometricStub { fail }));
        fx
    }

    #[tokio::test]
    async fn plugin_request_responds_with_result() {
        let fx = fixture_with_plugin(false);
        fx.bridge.process_inbound(&hello("https://example.com")).await;

        fx.bridge
            .process_inbound(
                &json!({"kind": "request", "name": "biometric.prompt", "id": "r1", "payload": {}})
                    .to_string(),
            )
            .await;

        let outbound = fx.host.outbound();
        assert_eq!(outbound[1]["kind"], "response");
        assert_eq!(outbound[1]["id"], "r1");
        assert_eq!(outbound[1]["payload"], json!({"verified": true}));
    }

    #[tokio::test]
    async fn plugin_failure_surfaces_bridge_error() {
        let fx = fixture_with_plugin(true);
        fx.bridge.process_inbound(&hello("https://example.com")).await;

        fx.bridge
            .process_inbound(
                &json!({"kind": "request", "name": "biometric.prompt", "payload": {}}).to_string(),
            )
            .await;

        let outbound = fx.host.outbound();
        assert_eq!(outbound[1]["name"], "BRIDGE_ERROR");
        assert_eq!(outbound[1]["payload"]["reason"], "sensor unavailable");
    }

    #[tokio::test]
    async fn allowed_methods_replaced_atomically() {
        let fx = fixture(None, &["old.method"]);
        fx.bridge.process_inbound(&hello("https://example.com")).await;
        fx.bridge.update_allowed_methods(&["new.method".to_string()]);

        fx.bridge
            .process_inbound(
                &json!({"kind": "request", "name": "old.method", "payload": {}}).to_string(),
            )
            .await;

        let outbound = fx.host.outbound();
        assert_eq!(outbound[1]["name"], "BRIDGE_FORBIDDEN");
    }

    #[tokio::test]
    async fn unsigned_bridge_omits_sig() {
        let fx = fixture(None, &[]);
        fx.bridge.process_inbound(&hello("https://example.com")).await;

        let outbound = fx.host.outbound();
        assert_eq!(outbound[0]["name"], "bridge_ready");
        assert!(outbound[0].get("sig").is_none());
        assert!(outbound[0]["payload"].get("sessionProofJws").is_none());
    }
}
