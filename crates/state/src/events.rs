//! Single-consumer state-change stream.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use strata_primitives::NodeStateChange;
use tokio::sync::mpsc;

/// Receiving half of the state-change stream.
pub type StateChangeStream = mpsc::UnboundedReceiver<NodeStateChange>;

/// Emitter for the process-wide state-change stream.
///
/// The stream has at most one consumer for the lifetime of the emitter.
/// Sending never blocks; once the consumer drops its receiver, items are
/// discarded.
#[derive(Debug, Default)]
pub(crate) struct StateChangeEmitter {
    tx: RwLock<Option<mpsc::UnboundedSender<NodeStateChange>>>,
    subscribed: AtomicBool,
}

impl StateChangeEmitter {
    /// Claim the single subscription. Returns false if it was already claimed.
    pub(crate) fn claim(&self) -> bool {
        !self.subscribed.swap(true, Ordering::AcqRel)
    }

    /// Install the sender of a claimed subscription.
    pub(crate) fn install(&self, tx: mpsc::UnboundedSender<NodeStateChange>) {
        *self.tx.write() = Some(tx);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.tx.read().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub(crate) fn emit(&self, change: NodeStateChange) {
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send(change);
        }
    }

    pub(crate) fn emit_all(&self, changes: impl IntoIterator<Item = NodeStateChange>) {
        if let Some(tx) = self.tx.read().as_ref() {
            for change in changes {
                let _ = tx.send(change);
            }
        }
    }

    /// Drop the sender, ending the consumer's stream.
    pub(crate) fn close(&self) {
        self.tx.write().take();
    }
}

#[cfg(test)]
mod tests {
    use strata_primitives::NodeState;

    use super::*;

    fn change(node: &str) -> NodeStateChange {
        NodeStateChange {
            timestamp_ms: 0,
            node_id: node.into(),
            node_state: NodeState::Online,
            service: None,
            service_state: None,
            snapshot: false,
        }
    }

    #[tokio::test]
    async fn test_single_claim_and_close() {
        let emitter = StateChangeEmitter::default();
        assert!(emitter.claim());
        assert!(!emitter.claim());

        let (tx, mut rx) = mpsc::unbounded_channel();
        emitter.install(tx);
        assert!(emitter.is_active());

        emitter.emit(change("n1"));
        assert_eq!(rx.recv().await.unwrap().node_id, "n1");

        emitter.close();
        assert!(rx.recv().await.is_none());
        assert!(!emitter.is_active());
    }

    #[test]
    fn test_emit_without_consumer() {
        let emitter = StateChangeEmitter::default();
        emitter.emit(change("n1"));

        let (tx, rx) = mpsc::unbounded_channel();
        emitter.install(tx);
        drop(rx);
        emitter.emit_all([change("n1"), change("n2")]);
        assert!(!emitter.is_active());
    }
}
