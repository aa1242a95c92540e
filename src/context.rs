//! Per-request context, propagated from C5 through the envelope (C4) and
//! into C7/C8 so cancellation and identity are available everywhere a
//! handler or the pipeline orchestrator needs them.

use crate::auth::IdentityContext;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub identity: IdentityContext,
    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, identity: IdentityContext) -> Self {
        Self {
            request_id: request_id.into(),
            identity,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// A context derived from this one for a recursively-invoked tool (e.g.
    /// from the pipeline orchestrator re-entering the envelope). Shares the
    /// identity and cancellation token but gets a fresh request id so audit
    /// entries can be correlated back to the originating call.
    pub fn nested(&self, suffix: &str) -> Self {
        Self {
            request_id: format!("{}:{}", self.request_id, suffix),
            identity: self.identity.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}
