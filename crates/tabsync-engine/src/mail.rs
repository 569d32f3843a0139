//! Outbound mail seam.
//!
//! The engine composes messages; delivery belongs to the caller. Sends are
//! fire-and-forget: implementations log failures and never propagate them
//! into the reconciliation result.

use async_trait::async_trait;

/// A rendered outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub subject: String,
    pub text_body: String,
    /// HTML alternative, when the message is templated.
    pub html_body: Option<String>,
}

/// Mail delivery collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver to the configured recipients. Must not fail the caller.
    async fn send(&self, mail: &OutboundMail);
}
