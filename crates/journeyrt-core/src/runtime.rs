//! Journey orchestration.
//!
//! `start_journey` wires a manifest-load into a running journey: loader,
//! OpenAPI resolver, API client, session, bridge, and state machine are
//! created once per call and live until the terminal result is delivered
//! or the caller cancels. The orchestrator consumes the tagged update
//! channel the machine and bridge write to; it owns no journey logic of
//! its own beyond composition and outcome mapping.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use url::Url;

use crate::api::ApiClient;
use crate::bridge::{Bridge, BridgeSigner, PluginRegistry};
use crate::config::{Environment, RuntimeConfig};
use crate::crypto::TrustStore;
use crate::error::ErrorCode;
use crate::events::{EventAttributes, EventSink, TelemetryBus};
use crate::machine::{JourneyUpdate, MachineSeed, StateMachine};
use crate::manifest::{Manifest, ManifestError, ManifestLoader, StepKind};
use crate::openapi::OpenApiResolver;
use crate::session::{SessionManager, SnapshotStore};
use crate::webview::WebViewHost;

/// Result of one `start_journey` call; exactly one per call.
#[derive(Debug, Clone)]
pub enum JourneyOutcome {
    /// The journey reached a terminal step.
    Completed(Value),
    /// The journey reached a terminal step whose result is pending
    /// server-side processing.
    Pending(Value),
    /// The caller cancelled the journey.
    Cancelled,
    /// The journey failed.
    Failed {
        /// Taxonomy code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
        /// Whether retrying the journey may succeed.
        recoverable: bool,
    },
}

impl JourneyOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Pending(_) => "pending",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Error surfaced by the sign-in collaborator.
#[derive(Debug, Error)]
#[error("sign-in failed: {reason}")]
pub struct SignInError {
    /// Human-readable failure reason.
    pub reason: String,
}

/// OIDC sign-in surface collaborator.
///
/// Only invoked when the manifest's security posture requires a
/// handshake before the journey starts.
#[async_trait]
pub trait SignIn: Send + Sync {
    /// Runs the sign-in flow if the session needs one, resolving to the
    /// redirect callback URL.
    async fn sign_in_if_needed(
        &self,
        auth_url: &Url,
        redirect_scheme: &str,
    ) -> Result<Url, SignInError>;
}

/// Builder for [`JourneyRuntime`].
pub struct JourneyRuntimeBuilder {
    config: RuntimeConfig,
    trust: Arc<TrustStore>,
    store: Option<Arc<dyn SnapshotStore>>,
    plugins: Arc<PluginRegistry>,
    event_sink: Option<Arc<dyn EventSink>>,
    host: Option<Arc<dyn WebViewHost>>,
    sign_in: Option<Arc<dyn SignIn>>,
}

impl JourneyRuntimeBuilder {
    /// Sets the manifest trust store.
    #[must_use]
    pub fn trust_store(mut self, trust: Arc<TrustStore>) -> Self {
        self.trust = trust;
        self
    }

    /// Sets the snapshot store.
    #[must_use]
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the plugin registry.
    #[must_use]
    pub fn plugin_registry(mut self, plugins: Arc<PluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Installs the telemetry sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Sets the web-view host journeys present pages through.
    #[must_use]
    pub fn web_view_host(mut self, host: Arc<dyn WebViewHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the sign-in collaborator.
    #[must_use]
    pub fn sign_in(mut self, sign_in: Arc<dyn SignIn>) -> Self {
        self.sign_in = Some(sign_in);
        self
    }

    /// Finishes construction.
    #[must_use]
    pub fn build(self) -> JourneyRuntime {
        let telemetry = Arc::new(TelemetryBus::new(self.config.telemetry_opt_in));
        if let Some(sink) = self.event_sink {
            telemetry.install_sink(sink);
        }
        let store: Arc<dyn SnapshotStore> = self
            .store
            .unwrap_or_else(|| Arc::new(crate::session::InMemoryStore::new()));

        JourneyRuntime {
            config: Arc::new(self.config),
            trust: self.trust,
            session: Arc::new(SessionManager::new(store)),
            plugins: self.plugins,
            telemetry,
            host: self.host,
            sign_in: self.sign_in,
        }
    }
}

/// Handle to a running journey.
pub struct JourneyHandle {
    updates: mpsc::UnboundedSender<JourneyUpdate>,
    task: tokio::task::JoinHandle<JourneyOutcome>,
}

impl JourneyHandle {
    /// Cancels the journey; the outcome resolves to
    /// [`JourneyOutcome::Cancelled`].
    pub fn cancel(&self) {
        let _ = self.updates.send(JourneyUpdate::Cancelled);
    }

    /// Awaits the journey's single outcome.
    pub async fn outcome(self) -> JourneyOutcome {
        self.task.await.unwrap_or_else(|err| JourneyOutcome::Failed {
            code: ErrorCode::Unknown,
            message: format!("journey task failed: {err}"),
            recoverable: false,
        })
    }
}

/// The runtime a partner application embeds.
///
/// All collaborators are explicit constructor inputs; the runtime holds
/// no hidden global state.
pub struct JourneyRuntime {
    config: Arc<RuntimeConfig>,
    trust: Arc<TrustStore>,
    session: Arc<SessionManager>,
    plugins: Arc<PluginRegistry>,
    telemetry: Arc<TelemetryBus>,
    host: Option<Arc<dyn WebViewHost>>,
    sign_in: Option<Arc<dyn SignIn>>,
}

impl JourneyRuntime {
    /// Starts building a runtime from a configuration.
    #[must_use]
    pub fn builder(config: RuntimeConfig) -> JourneyRuntimeBuilder {
        JourneyRuntimeBuilder {
            config,
            trust: Arc::new(TrustStore::new()),
            store: None,
            plugins: Arc::new(PluginRegistry::new()),
            event_sink: None,
            host: None,
            sign_in: None,
        }
    }

    /// The session manager shared across this runtime's journeys.
    #[must_use]
    pub fn session(&self) -> Arc<SessionManager> {
        Arc::clone(&self.session)
    }

    /// Starts interpreting a journey.
    ///
    /// Returns immediately with a handle; the outcome resolves when a
    /// terminal step delivers a result, a fatal error occurs, or the
    /// caller cancels.
    #[must_use]
    pub fn start_journey(
        &self,
        journey_id: &str,
        context_token: &str,
        resume_token: Option<&str>,
    ) -> JourneyHandle {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let driver = JourneyDriver {
            config: Arc::clone(&self.config),
            trust: Arc::clone(&self.trust),
            session: Arc::clone(&self.session),
            plugins: Arc::clone(&self.plugins),
            telemetry: Arc::clone(&self.telemetry),
            host: self.host.clone(),
            sign_in: self.sign_in.clone(),
            updates: updates_tx.clone(),
        };
        let journey_id = journey_id.to_string();
        let context_token = context_token.to_string();
        let resume_token = resume_token.map(ToString::to_string);

        let task = tokio::spawn(async move {
            driver
                .run(&journey_id, &context_token, resume_token.as_deref(), updates_rx)
                .await
        });
        JourneyHandle {
            updates: updates_tx,
            task,
        }
    }
}

struct JourneyDriver {
    config: Arc<RuntimeConfig>,
    trust: Arc<TrustStore>,
    session: Arc<SessionManager>,
    plugins: Arc<PluginRegistry>,
    telemetry: Arc<TelemetryBus>,
    host: Option<Arc<dyn WebViewHost>>,
    sign_in: Option<Arc<dyn SignIn>>,
    updates: mpsc::UnboundedSender<JourneyUpdate>,
}

impl JourneyDriver {
    #[instrument(skip(self, context_token, resume_token, updates_rx))]
    async fn run(
        &self,
        journey_id: &str,
        context_token: &str,
        resume_token: Option<&str>,
        updates_rx: mpsc::UnboundedReceiver<JourneyUpdate>,
    ) -> JourneyOutcome {
        self.session.start_session(context_token, resume_token);
        let resumed = resume_token.and_then(|token| self.session.load_snapshot(token));

        self.telemetry
            .bind_correlation(&self.session.correlation_id());
        self.telemetry.emit(
            "journey_start",
            attrs(&[("journeyId", Value::String(journey_id.to_string()))]),
        );

        let outcome = match self
            .interpret(journey_id, context_token, resumed, updates_rx)
            .await
        {
            Ok(outcome) => outcome,
            Err(outcome) => outcome,
        };

        self.telemetry.emit(
            "journey_end",
            attrs(&[
                ("journeyId", Value::String(journey_id.to_string())),
                ("outcome", Value::String(outcome.label().to_string())),
            ]),
        );
        outcome
    }

    async fn interpret(
        &self,
        journey_id: &str,
        context_token: &str,
        resumed: Option<crate::session::Snapshot>,
        mut updates_rx: mpsc::UnboundedReceiver<JourneyUpdate>,
    ) -> Result<JourneyOutcome, JourneyOutcome> {
        let loader = ManifestLoader::new(Arc::clone(&self.config), Arc::clone(&self.trust))
            .map_err(|err| fail_from_manifest(&err))?;
        let manifest = loader
            .load(journey_id, context_token)
            .await
            .map_err(|err| fail_from_manifest(&err))?;

        let bundle = loader
            .fetch_bundle(&manifest, context_token)
            .await
            .map_err(|err| fail_from_manifest(&err))?;
        let resolver = OpenApiResolver::from_slice(&bundle).map_err(|err| fail_validation(&err))?;
        resolver
            .validate_operation_ids(&manifest)
            .map_err(|err| fail_validation(&err))?;

        let base_url = resolver.server_url().cloned().ok_or_else(|| {
            fail(
                ErrorCode::ValidationFail,
                "OpenAPI bundle declares no server URL",
            )
        })?;
        let resolver = Arc::new(resolver);
        let api = Arc::new(
            ApiClient::new(
                Arc::clone(&resolver),
                base_url,
                manifest.headers.clone(),
                manifest.security.pinning,
            )
            .map_err(|err| fail(ErrorCode::Unknown, &err.to_string()))?,
        );

        if manifest.security.require_handshake {
            self.run_sign_in().await?;
        }

        let start_step = resumed
            .filter(|snapshot| {
                snapshot.journey_id == manifest.journey_id
                    && manifest.steps.contains_key(&snapshot.step_pointer)
            })
            .map_or_else(|| manifest.start_step.clone(), |snapshot| snapshot.step_pointer);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let initial_methods = manifest
            .step(&start_step)
            .map(|step| step.bridge_allow.clone())
            .unwrap_or_default();
        let bridge = Arc::new(Bridge::new(
            manifest.security.allowed_origins.clone(),
            self.config.feature_flags.allow_file_origins,
            &initial_methods,
            Arc::clone(&self.plugins),
            Some(BridgeSigner::new()),
            Arc::clone(&self.session),
            events_tx,
            self.updates.clone(),
        ));
        if let Some(host) = &self.host {
            bridge.attach_host(Arc::clone(host));
        }

        let machine = StateMachine::spawn(MachineSeed {
            journey_id: manifest.journey_id.clone(),
            steps: manifest.steps.clone(),
            start_step: start_step.clone(),
            resume_policy: manifest.resume_policy.clone(),
            api,
            session: Arc::clone(&self.session),
            telemetry: Arc::clone(&self.telemetry),
            page: Arc::clone(&bridge) as _,
            updates: self.updates.clone(),
        });

        let forward = machine.clone();
        tokio::spawn(async move {
            while let Some((name, payload)) = events_rx.recv().await {
                forward.handle_event(&name, payload);
            }
        });

        self.present_start_page(&manifest, &start_step, &bridge);

        info!(journey_id, %start_step, "journey running");
        loop {
            let Some(update) = updates_rx.recv().await else {
                return Err(fail(ErrorCode::Unknown, "update channel closed"));
            };
            match update {
                JourneyUpdate::StepEntered { step_id } => {
                    let methods = manifest
                        .step(&step_id)
                        .map(|step| step.bridge_allow.clone())
                        .unwrap_or_default();
                    bridge.update_allowed_methods(&methods);
                },
                JourneyUpdate::StepExited { .. } => {},
                JourneyUpdate::Terminal { result } => {
                    return Ok(outcome_from_result(result));
                },
                JourneyUpdate::Error {
                    code: ErrorCode::OriginBlocked,
                    message,
                    ..
                } => {
                    return Err(JourneyOutcome::Failed {
                        code: ErrorCode::OriginBlocked,
                        message,
                        recoverable: false,
                    });
                },
                JourneyUpdate::Error {
                    code,
                    recoverable,
                    message,
                } => {
                    warn!(%code, recoverable, %message, "journey error");
                    self.telemetry.emit(
                        "journey_error",
                        attrs(&[
                            ("code", Value::String(code.as_str().to_string())),
                            ("recoverable", Value::Bool(recoverable)),
                        ]),
                    );
                },
                JourneyUpdate::Cancelled => return Ok(JourneyOutcome::Cancelled),
            }
        }
    }

    async fn run_sign_in(&self) -> Result<(), JourneyOutcome> {
        let Some(sign_in) = &self.sign_in else {
            return Ok(());
        };
        let auth_url = auth_url(&self.config).map_err(|message| fail(ErrorCode::Unknown, &message))?;
        sign_in
            .sign_in_if_needed(&auth_url, &self.config.redirect_scheme)
            .await
            .map(|_| ())
            .map_err(|err| JourneyOutcome::Failed {
                code: ErrorCode::AuthExpired,
                message: err.to_string(),
                recoverable: false,
            })
    }

    fn present_start_page(&self, manifest: &Manifest, start_step: &str, bridge: &Arc<Bridge>) {
        let Some(host) = &self.host else {
            return;
        };
        let Some(step) = manifest.step(start_step) else {
            return;
        };
        if step.kind != StepKind::Web {
            return;
        }
        let Some(raw) = &step.url else {
            warn!(start_step, "web step has no url to present");
            return;
        };
        match Url::parse(raw) {
            Ok(url) => host.present(
                &url,
                Arc::clone(bridge),
                &manifest.security.allowed_origins,
                self.config.feature_flags.allow_file_origins,
            ),
            Err(err) => warn!(%err, %raw, "web step url is not parseable"),
        }
    }
}

fn attrs(entries: &[(&str, Value)]) -> EventAttributes {
    entries
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

fn fail(code: ErrorCode, message: &str) -> JourneyOutcome {
    JourneyOutcome::Failed {
        code,
        message: message.to_string(),
        recoverable: false,
    }
}

fn fail_from_manifest(err: &ManifestError) -> JourneyOutcome {
    let code = match err {
        ManifestError::ValidationFailed(_) => ErrorCode::ValidationFail,
        _ => ErrorCode::Unknown,
    };
    fail(code, &err.to_string())
}

fn fail_validation(err: &crate::openapi::OpenApiError) -> JourneyOutcome {
    fail(ErrorCode::ValidationFail, &err.to_string())
}

fn outcome_from_result(result: Option<Value>) -> JourneyOutcome {
    let payload = result.unwrap_or(Value::Null);
    let pending = payload.get("status").and_then(Value::as_str) == Some("pending");
    if pending {
        JourneyOutcome::Pending(payload)
    } else {
        JourneyOutcome::Completed(payload)
    }
}

/// Builds the sign-in authorization URL for the configured environment.
fn auth_url(config: &RuntimeConfig) -> Result<Url, String> {
    let base = match config.environment {
        Environment::Production => "https://auth.journeyrt.dev/authorize",
        Environment::Sandbox | Environment::Development => {
            "https://auth.sandbox.journeyrt.dev/authorize"
        },
    };
    Url::parse_with_params(
        base,
        &[
            ("client_id", config.client_id.as_str()),
            ("partner_id", config.partner_id.as_str()),
        ],
    )
    .map_err(|err| format!("auth URL: {err}"))
}
