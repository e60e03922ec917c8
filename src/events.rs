//! Change notification for limit-state consumers.
//!
//! DESIGN
//! ======
//! Consumers subscribe for a bounded channel of [`ChangeEvent`]s instead of
//! handing us callbacks. Delivery is best-effort `try_send`: a slow consumer
//! drops events rather than blocking a registration, mirroring how outgoing
//! frames are enqueued elsewhere in the stack. Dropping the receiver is
//! equivalent to unsubscribing — closed channels are pruned on the next
//! notification.

use tokio::sync::mpsc;

/// What changed. Carries just enough for a consumer to decide whether to
/// re-evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Registered { card_id: String },
    Unregistered { card_id: String },
    /// The global scan cache was refreshed; a re-evaluation may see modules
    /// from views that never registered locally.
    ScanRefreshed,
    /// Explicitly requested notification with no state change behind it.
    Touched,
}

/// Subscription handle: the listener id (for explicit unsubscribe) and the
/// event stream.
pub struct ChangeListener {
    pub id: u64,
    pub rx: mpsc::Receiver<ChangeEvent>,
}
