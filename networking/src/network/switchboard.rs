use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// In-process stand-in for the wire: one inbox of framed envelopes per node.
///
/// Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct LocalSwitchboard {
    inboxes: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl LocalSwitchboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Re-registering an id replaces its inbox.
    pub fn register(&self, node_id: &str) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inboxes.write().insert(node_id.to_string(), sender);
        receiver
    }

    pub fn unregister(&self, node_id: &str) {
        self.inboxes.write().remove(node_id);
    }

    /// Hand `data` to `node_id`. False if the node is gone.
    pub fn deliver(&self, node_id: &str, data: Vec<u8>) -> bool {
        let inboxes = self.inboxes.read();
        match inboxes.get(node_id) {
            Some(inbox) => inbox.send(data).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.inboxes.read().contains_key(node_id)
    }

    /// Registered node ids in sorted order.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inboxes.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_reaches_registered_inbox() {
        let switchboard = LocalSwitchboard::new();
        let mut inbox = switchboard.register("node-b");

        assert!(switchboard.deliver("node-b", vec![1, 2, 3]));
        assert_eq!(inbox.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_deliver_to_unknown_or_dropped_node_fails() {
        let switchboard = LocalSwitchboard::new();
        assert!(!switchboard.deliver("ghost", vec![0]));

        let inbox = switchboard.register("node-c");
        drop(inbox);
        assert!(!switchboard.deliver("node-c", vec![0]));

        switchboard.unregister("node-c");
        assert!(!switchboard.contains("node-c"));
    }

    #[test]
    fn test_node_ids_sorted() {
        let switchboard = LocalSwitchboard::new();
        let _c = switchboard.register("c");
        let _a = switchboard.register("a");
        let _b = switchboard.register("b");

        assert_eq!(switchboard.node_ids(), vec!["a", "b", "c"]);
    }
}
