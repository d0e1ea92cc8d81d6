use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::notification::{DispatchEvent, Notification};
use crate::state::SharedClock;

/// Delivery seam for rider and driver notifications.
///
/// Implementations must not block: `notify` is called from inside an order's
/// exclusive section.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: Uuid, event: DispatchEvent);
}

/// Fans notifications out to every `/ws` subscriber.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
    clock: SharedClock,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<Notification>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { tx, clock })
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, recipient: Uuid, event: DispatchEvent) {
        let notification = Notification {
            recipient,
            event,
            sent_at: self.clock.utc(),
        };

        // No subscribers is not an error; push delivery is best-effort here.
        if self.tx.send(notification).is_err() {
            trace!(recipient = %recipient, "notification dropped: no subscribers");
        }
    }
}
