//! Web-view host collaborator interface.
//!
//! The runtime never touches platform web-view APIs directly. The
//! embedding application supplies a host that can present a URL with a
//! bridge attached and evaluate script on the hosted page. Delivery of
//! outbound bridge envelopes happens through [`WebViewHost::dispatch_to_page`];
//! marshaling onto the platform's web-view thread is the host's
//! responsibility.

use std::sync::Arc;

use url::Url;

use crate::bridge::Bridge;

/// Host widget presenting journey pages.
pub trait WebViewHost: Send + Sync {
    /// Presents a page with the bridge attached.
    ///
    /// The host must deliver every page-originated bridge message to
    /// [`Bridge::process_inbound`] and keep the origin restrictions it is
    /// given.
    fn present(
        &self,
        url: &Url,
        bridge: Arc<Bridge>,
        allowed_origins: &[String],
        allow_file_origins: bool,
    );

    /// Evaluates a script on the currently hosted page.
    fn dispatch_to_page(&self, script: &str);
}
