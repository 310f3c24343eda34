//! Remote localization tickets
//!
//! A ticket tracks a localization session this side requested but the peer
//! executes. At most one live ticket exists per connection; a newer request
//! supersedes an older one, and the superseded ticket resolves as
//! cancelled rather than as a boolean result.

use tokio::sync::oneshot;

use align_core::{AlignError, AlignResult};

/// Resolver half, held by the coordinator. Dropping it unresolved cancels
/// the ticket.
#[derive(Debug)]
pub struct TicketResolver {
    tx: oneshot::Sender<bool>,
}

impl TicketResolver {
    /// Resolve the ticket with the peer-reported outcome.
    pub fn resolve(self, succeeded: bool) {
        let _ = self.tx.send(succeeded);
    }
}

/// Awaitable half, returned to whoever requested the remote localization.
#[derive(Debug)]
pub struct RemoteLocalizationTicket {
    rx: oneshot::Receiver<bool>,
}

impl RemoteLocalizationTicket {
    pub fn new() -> (TicketResolver, RemoteLocalizationTicket) {
        let (tx, rx) = oneshot::channel();
        (TicketResolver { tx }, RemoteLocalizationTicket { rx })
    }

    /// Wait for the peer to report completion. `Ok(bool)` carries the
    /// peer's result; `Err(SessionCancelled)` means the ticket was
    /// superseded or otherwise abandoned without a result.
    pub async fn wait(self) -> AlignResult<bool> {
        self.rx.await.map_err(|_| AlignError::SessionCancelled)
    }
}
