//! End-to-end journey interpretation: signed manifest, bridge handshake,
//! page-driven events, API bindings, terminal result.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::{Value, json};
use url::Url;

use journeyrt_core::bridge::Bridge;
use journeyrt_core::config::{Environment, FeatureFlags, RuntimeConfig};
use journeyrt_core::crypto::{Es256KeyPair, ProtectedHeader, TrustStore, sign_detached, to_canonical_string};
use journeyrt_core::runtime::{JourneyOutcome, JourneyRuntime};
use journeyrt_core::session::InMemoryStore;
use journeyrt_core::webview::WebViewHost;

const PAGE_ORIGIN: &str = "https://flows.example.com";

#[derive(Default)]
struct TestHost {
    bridge: Mutex<Option<Arc<Bridge>>>,
    presented: Mutex<Vec<String>>,
    scripts: Mutex<Vec<String>>,
}

impl WebViewHost for TestHost {
    fn present(
        &self,
        url: &Url,
        bridge: Arc<Bridge>,
        _allowed_origins: &[String],
        _allow_file_origins: bool,
    ) {
        self.presented.lock().unwrap().push(url.to_string());
        *self.bridge.lock().unwrap() = Some(bridge);
    }

    fn dispatch_to_page(&self, script: &str) {
        self.scripts.lock().unwrap().push(script.to_string());
    }
}

impl TestHost {
    async fn wait_for_bridge(&self) -> Arc<Bridge> {
        for _ in 0..100 {
            if let Some(bridge) = self.bridge.lock().unwrap().clone() {
                return bridge;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("web view was never presented");
    }

    fn outbound(&self) -> Vec<Value> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .map(|script| {
                let start = script.find(".receive(").unwrap() + ".receive(".len();
                serde_json::from_str(&script[start..script.len() - 1]).unwrap()
            })
            .collect()
    }

    async fn wait_for_outbound(&self, name: &str) -> Value {
        for _ in 0..100 {
            if let Some(message) = self
                .outbound()
                .into_iter()
                .find(|message| message["name"] == name)
            {
                return message;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no outbound message named {name}");
    }
}

#[derive(Clone)]
struct ApiState {
    responses: Arc<Mutex<VecDeque<(u16, String)>>>,
    requests: Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>,
}

async fn api_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> (axum::http::StatusCode, String) {
    state.requests.lock().unwrap().push((headers, body.to_vec()));
    let (status, body) = state
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((200, String::new()));
    (axum::http::StatusCode::from_u16(status).unwrap(), body)
}

async fn start_api(responses: Vec<(u16, String)>) -> (Url, ApiState) {
    let state = ApiState {
        responses: Arc::new(Mutex::new(responses.into_iter().collect())),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new().fallback(api_handler).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (Url::parse(&format!("http://{addr}")).unwrap(), state)
}

struct Fixture {
    runtime: JourneyRuntime,
    host: Arc<TestHost>,
    api: ApiState,
    _dir: tempfile::TempDir,
}

/// Writes a signed manifest plus bundle to disk and builds a runtime
/// whose trust store knows the signing key.
async fn fixture(steps: Value) -> Fixture {
    let (api_base, api_state) = start_api(vec![(200, "ok".to_string())]).await;

    let dir = tempfile::tempdir().unwrap();
    let bundle_path = dir.path().join("bundle.json");
    std::fs::write(
        &bundle_path,
        serde_json::to_vec(&json!({
            "openapi": "3.0.0",
            "servers": [{"url": api_base.as_str()}],
            "paths": {"/widgets": {"post": {"operationId": "createWidget"}}}
        }))
        .unwrap(),
    )
    .unwrap();

    let mut manifest = json!({
        "manifestVersion": "1.1.0",
        "minSdk": "1.0",
        "journeyId": "onboarding",
        "oapiBundle": Url::from_file_path(&bundle_path).unwrap().to_string(),
        "startStep": "form",
        "headers": {"X-Partner": "p-1"},
        "security": {"allowedOrigins": [PAGE_ORIGIN]},
        "steps": steps
    });

    let pair = Es256KeyPair::generate();
    let payload = to_canonical_string(&manifest);
    let signature = sign_detached(
        &ProtectedHeader::es256("itest-key"),
        payload.as_bytes(),
        pair.signing_key(),
    )
    .unwrap();
    manifest["signature"] = json!(signature);

    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

    let trust = Arc::new(TrustStore::new());
    trust.register("itest-key", pair.verifying_key());

    let config = RuntimeConfig::new(Environment::Development, "p-1", "c-1")
        .with_remote_config_url(Url::from_file_path(&manifest_path).unwrap())
        .with_feature_flags(FeatureFlags::default());

    let host = Arc::new(TestHost::default());
    let runtime = JourneyRuntime::builder(config)
        .trust_store(trust)
        .snapshot_store(Arc::new(InMemoryStore::new()))
        .web_view_host(host.clone())
        .build();

    Fixture {
        runtime,
        host,
        api: api_state,
        _dir: dir,
    }
}

fn inbound_event(name: &str, payload: Value) -> String {
    json!({"kind": "event", "name": name, "payload": payload}).to_string()
}

#[tokio::test]
async fn signed_manifest_journey_runs_to_completion() {
    let fx = fixture(json!({
        "form": {
            "type": "web",
            "url": format!("{PAGE_ORIGIN}/form"),
            "bridgeAllow": ["journey.info"],
            "bindings": [{
                "onEvent": "submit",
                "call": {"operationId": "createWidget", "argsFrom": "form"},
                "onSuccessEmit": "widget_created"
            }],
            "on": {"continue": {"to": "done"}}
        },
        "done": {"type": "terminal", "result": {"status": "completed", "ref": "app-1"}}
    }))
    .await;

    let handle = fx.runtime.start_journey("onboarding", "ctx-token", None);
    let bridge = fx.host.wait_for_bridge().await;

    assert_eq!(fx.host.presented.lock().unwrap().len(), 1);
    assert_eq!(
        fx.host.presented.lock().unwrap()[0],
        format!("{PAGE_ORIGIN}/form")
    );

    // Handshake.
    bridge
        .process_inbound(&inbound_event(
            "bridge_hello",
            json!({"origin": PAGE_ORIGIN, "pageNonce": "n-1"}),
        ))
        .await;
    let ready = fx.host.wait_for_outbound("bridge_ready").await;
    assert!(ready["payload"]["sessionProofJws"].is_string());
    assert!(ready["sig"].is_string());

    // Page submits the form; the binding calls the API and reports back.
    bridge
        .process_inbound(&inbound_event("submit", json!({"form": {"name": "Ada"}})))
        .await;
    let created = fx.host.wait_for_outbound("widget_created").await;
    assert_eq!(created["payload"], json!({"status": 200}));

    let requests = fx.api.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].1,
        serde_json::to_vec(&json!({"name": "Ada"})).unwrap()
    );
    assert_eq!(requests[0].0.get("x-partner").unwrap(), "p-1");
    assert!(requests[0].0.contains_key("traceparent"));
    drop(requests);

    // Page signals completion.
    bridge
        .process_inbound(&inbound_event("continue", json!({})))
        .await;

    match handle.outcome().await {
        JourneyOutcome::Completed(payload) => {
            assert_eq!(payload["ref"], "app-1");
        },
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn blocked_origin_ends_journey_fatally() {
    let fx = fixture(json!({
        "form": {
            "type": "web",
            "url": format!("{PAGE_ORIGIN}/form"),
            "on": {"continue": {"to": "done"}}
        },
        "done": {"type": "terminal"}
    }))
    .await;

    let handle = fx.runtime.start_journey("onboarding", "ctx-token", None);
    let bridge = fx.host.wait_for_bridge().await;

    bridge
        .process_inbound(&inbound_event(
            "bridge_hello",
            json!({"origin": "https://evil.test", "pageNonce": "n-1"}),
        ))
        .await;
    fx.host.wait_for_outbound("ORIGIN_BLOCKED").await;

    match handle.outcome().await {
        JourneyOutcome::Failed {
            code, recoverable, ..
        } => {
            assert_eq!(code.as_str(), "ORIGIN_BLOCKED");
            assert!(!recoverable);
        },
        other => panic!("expected fatal origin block, got {other:?}"),
    }
}

#[tokio::test]
async fn guarded_transition_gates_completion() {
    let fx = fixture(json!({
        "form": {
            "type": "web",
            "url": format!("{PAGE_ORIGIN}/form"),
            "on": {"decide": {"to": "done", "guardExpr": "payload.approved == 1 && payload.score >= 0.5"}}
        },
        "done": {"type": "terminal", "result": {"status": "completed"}}
    }))
    .await;

    let handle = fx.runtime.start_journey("onboarding", "ctx-token", None);
    let bridge = fx.host.wait_for_bridge().await;

    bridge
        .process_inbound(&inbound_event(
            "bridge_hello",
            json!({"origin": PAGE_ORIGIN, "pageNonce": "n-1"}),
        ))
        .await;
    fx.host.wait_for_outbound("bridge_ready").await;

    // Guard rejects this payload; the journey must still be running.
    bridge
        .process_inbound(&inbound_event(
            "decide",
            json!({"approved": 1, "score": 0.2}),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    // Guard passes; the journey completes.
    bridge
        .process_inbound(&inbound_event(
            "decide",
            json!({"approved": 1, "score": 0.9}),
        ))
        .await;

    assert!(matches!(
        handle.outcome().await,
        JourneyOutcome::Completed(_)
    ));
}
