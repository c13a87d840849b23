//! Origin-gated, signed message channel between the hosted page and
//! native code.
//!
//! The bridge starts `notReady` and accepts only a `bridge_hello`
//! handshake carrying the page's origin and nonce. Once the origin passes
//! the manifest allow-list the bridge becomes `ready` and dispatches:
//!
//! - **events** to the state machine's queue
//! - **requests** against the current step's method allow-list, either to
//!   a registered plugin or back to the state machine with an `ack`
//!
//! Every outbound envelope carries metadata (timestamp, nonce, versions,
//! traceparent) and, when a signer is configured, an ES256 JWS over the
//! canonical form of `{name, payload, meta}`.

mod channel;
mod envelope;
mod origin;
mod plugin;
mod signer;

pub use channel::{BRIDGE_OBJECT, Bridge, SDK_CAPABILITIES};
pub use envelope::{BRIDGE_VERSION, InboundMessage, MessageKind, MessageMeta, OutboundMessage};
pub use origin::is_allowed;
pub use plugin::{Plugin, PluginError, PluginRegistry};
pub use signer::BridgeSigner;
