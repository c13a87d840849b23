//! Journey state machine.
//!
//! Interprets manifest-declared steps on a single logical queue: inbound
//! events enqueue without blocking, and each queued event is processed to
//! completion before the next. API bindings dispatched from event
//! processing run as independent tasks and never block the queue, so a
//! binding's completion may interleave arbitrarily with the transition of
//! the event that dispatched it.
//!
//! # Step lifecycle
//!
//! ```text
//! enter ──► (bindings + transitions per event) ──► exit ──► enter next
//!   │
//!   └──► terminal: absorbing, result delivered once, queue drains no more
//! ```
//!
//! Entry cancels any pending per-step timer, emits `step_enter`, writes a
//! resume snapshot, and arms a new timer when the step declares
//! `timeoutMs`. The timer enqueues a synthetic `"timeout"` event through
//! the same queue as page events, so ordering guarantees hold for it too.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::error::ErrorCode;
use crate::events::TelemetryBus;
use crate::expr;
use crate::manifest::{Binding, ResumePolicy, Step, StepKind};
use crate::session::SessionManager;

/// Synthetic event enqueued when a step's timeout elapses.
pub const TIMEOUT_EVENT: &str = "timeout";

/// Write-only channel for emitting events to the hosted page.
///
/// The bridge implements this; handing the machine a trait object keeps
/// the bridge/machine wiring acyclic.
pub trait PageSink: Send + Sync {
    /// Emits an event envelope to the page.
    fn emit_to_page(&self, name: &str, payload: Value);
}

/// Tagged updates consumed by the orchestrator.
///
/// The machine (and the bridge, for origin failures) report lifecycle
/// changes through this channel instead of mutable callback slots.
#[derive(Debug, Clone)]
pub enum JourneyUpdate {
    /// A step was entered.
    StepEntered {
        /// The entered step.
        step_id: String,
    },
    /// A step was exited via a transition.
    StepExited {
        /// The exited step.
        step_id: String,
    },
    /// A terminal step was reached; fires exactly once per journey.
    Terminal {
        /// The terminal step's declared result payload.
        result: Option<Value>,
    },
    /// A recoverable or fatal error was observed.
    Error {
        /// Taxonomy code.
        code: ErrorCode,
        /// Whether the caller may retry.
        recoverable: bool,
        /// Human-readable description.
        message: String,
    },
    /// The caller cancelled the journey.
    Cancelled,
}

/// Everything the machine needs at construction.
pub struct MachineSeed {
    /// Journey identifier, stamped into snapshots.
    pub journey_id: String,
    /// Steps from the manifest.
    pub steps: BTreeMap<String, Step>,
    /// Step to enter first (start step, or the resume pointer).
    pub start_step: String,
    /// Snapshot policy from the manifest.
    pub resume_policy: Option<ResumePolicy>,
    /// Client for binding dispatch.
    pub api: Arc<ApiClient>,
    /// Session for snapshots and guard context.
    pub session: Arc<SessionManager>,
    /// Telemetry bus for lifecycle events.
    pub telemetry: Arc<TelemetryBus>,
    /// Write-only page channel.
    pub page: Arc<dyn PageSink>,
    /// Update channel consumed by the orchestrator.
    pub updates: mpsc::UnboundedSender<JourneyUpdate>,
}

enum Command {
    Event { name: String, payload: Value },
}

/// Handle to a running state machine.
///
/// Cloneable and cheap; dropping every handle while the journey is still
/// in flight lets the worker drain and park.
#[derive(Clone)]
pub struct StateMachine {
    commands: mpsc::UnboundedSender<Command>,
}

impl StateMachine {
    /// Spawns the machine's worker task and enters the start step.
    #[must_use]
    pub fn spawn(seed: MachineSeed) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            journey_id: seed.journey_id,
            steps: seed.steps,
            current: seed.start_step,
            resume_policy: seed.resume_policy,
            api: seed.api,
            session: seed.session,
            telemetry: seed.telemetry,
            page: seed.page,
            updates: seed.updates,
            commands: commands.clone(),
            timer: None,
        };
        tokio::spawn(worker.run(receiver));
        Self { commands }
    }

    /// Enqueues an event; never blocks.
    ///
    /// Events are processed in FIFO order. Events enqueued after the
    /// terminal step are dropped.
    pub fn handle_event(&self, name: &str, payload: Value) {
        let _ = self.commands.send(Command::Event {
            name: name.to_string(),
            payload,
        });
    }
}

struct Worker {
    journey_id: String,
    steps: BTreeMap<String, Step>,
    current: String,
    resume_policy: Option<ResumePolicy>,
    api: Arc<ApiClient>,
    session: Arc<SessionManager>,
    telemetry: Arc<TelemetryBus>,
    page: Arc<dyn PageSink>,
    updates: mpsc::UnboundedSender<JourneyUpdate>,
    commands: mpsc::UnboundedSender<Command>,
    timer: Option<JoinHandle<()>>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        if self.enter(self.current.clone()) {
            return;
        }
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Event { name, payload } => {
                    if self.handle_event(&name, payload) {
                        break;
                    }
                },
            }
        }
        self.cancel_timer();
    }

    /// Enters a step. Returns `true` when the step is terminal and the
    /// machine must halt.
    fn enter(&mut self, step_id: String) -> bool {
        self.cancel_timer();

        let Some(step) = self.steps.get(&step_id).cloned() else {
            warn!(%step_id, "transition into unknown step ignored");
            return false;
        };
        self.current = step_id.clone();

        self.telemetry.emit(
            "step_enter",
            [("stepId".to_string(), Value::String(step_id.clone()))]
                .into_iter()
                .collect(),
        );
        if self.should_snapshot(&step_id) {
            if let Err(err) = self.session.save_snapshot(&self.journey_id, &step_id) {
                warn!(%err, %step_id, "snapshot on step entry failed");
            }
        }
        let _ = self.updates.send(JourneyUpdate::StepEntered {
            step_id: step_id.clone(),
        });

        if step.kind == StepKind::Terminal {
            debug!(%step_id, "terminal step reached");
            let _ = self.updates.send(JourneyUpdate::Terminal {
                result: step.result.clone(),
            });
            return true;
        }

        if let Some(timeout_ms) = step.timeout_ms {
            let commands = self.commands.clone();
            self.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(timeout_ms)).await;
                let _ = commands.send(Command::Event {
                    name: TIMEOUT_EVENT.to_string(),
                    payload: json!({}),
                });
            }));
        }
        false
    }

    /// Processes one event. Returns `true` when a terminal step was
    /// entered.
    fn handle_event(&mut self, name: &str, payload: Value) -> bool {
        let Some(step) = self.steps.get(&self.current).cloned() else {
            return false;
        };

        for binding in &step.bindings {
            if binding.on_event == name {
                self.dispatch_binding(binding.clone(), &payload, &step);
            }
        }

        let Some(transition) = step.on.get(name) else {
            return false;
        };

        if let Some(guard) = &transition.guard_expr {
            let context = self.guard_context(&payload);
            if !expr::evaluate(guard, &context) {
                debug!(event = name, %guard, "guard dropped transition");
                return false;
            }
        }

        if let Some(emit) = &transition.emit {
            self.page.emit_to_page(emit, json!({}));
        }

        if let Some(to) = &transition.to {
            let previous = std::mem::replace(&mut self.current, to.clone());
            self.telemetry.emit(
                "step_exit",
                [("stepId".to_string(), Value::String(previous.clone()))]
                    .into_iter()
                    .collect(),
            );
            let _ = self.updates.send(JourneyUpdate::StepExited { step_id: previous });
            return self.enter(to.clone());
        }
        false
    }

    /// Dispatches one binding as an independent task.
    fn dispatch_binding(&self, binding: Binding, payload: &Value, step: &Step) {
        let body = binding
            .call
            .args_from
            .as_deref()
            .and_then(|path| expr::lookup_path(payload, path))
            .cloned();
        let headers = binding.call.headers.clone().unwrap_or_default();
        let idempotency_key = step.idempotency_key.clone();

        let api = Arc::clone(&self.api);
        let session = Arc::clone(&self.session);
        let page = Arc::clone(&self.page);
        let updates = self.updates.clone();
        let journey_id = self.journey_id.clone();
        let step_id = self.current.clone();

        tokio::spawn(async move {
            let result = api
                .call(
                    &binding.call.operation_id,
                    body.as_ref(),
                    &headers,
                    idempotency_key.as_deref(),
                )
                .await;

            match result {
                Ok(response) => {
                    if let Some(emit) = &binding.on_success_emit {
                        page.emit_to_page(emit, json!({"status": response.status}));
                        if let Err(err) = session.save_snapshot(&journey_id, &step_id) {
                            warn!(%err, "snapshot after binding success failed");
                        }
                    }
                },
                Err(err) => {
                    if let Some(emit) = &binding.on_error_emit {
                        page.emit_to_page(emit, json!({"error": err.to_string()}));
                    }
                    let _ = updates.send(JourneyUpdate::Error {
                        code: err.code(),
                        recoverable: err.is_recoverable(),
                        message: err.to_string(),
                    });
                },
            }
        });
    }

    fn guard_context(&self, payload: &Value) -> Value {
        let session = self.session.session();
        json!({
            "payload": payload,
            "session": {
                "resumeToken": session.resume_token,
                "idempotencyKey": session.idempotency_key,
            },
        })
    }

    /// Steps named by the resume policy snapshot on entry; without a
    /// policy every step does.
    fn should_snapshot(&self, step_id: &str) -> bool {
        self.resume_policy
            .as_ref()
            .map_or(true, |policy| {
                policy.snapshot_on.iter().any(|id| id == step_id)
            })
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
