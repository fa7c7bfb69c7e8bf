//! In-memory transport for the RA engine.
//!
//! Uses crossbeam channels to connect node endpoints. Broadcast is "send to
//! every known peer", not a network-level multicast. Connection flags let
//! tests partition nodes; the real wire transport is the host's concern and
//! only needs to honor the `send_to`/`broadcast`/`try_recv` contract.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::message::{NodeId, RaMessage};

/// A transport endpoint for a single node.
pub struct NetworkEndpoint {
    /// This node's id.
    pub node_id: NodeId,
    /// Receiver for incoming messages.
    rx: Receiver<(NodeId, RaMessage)>,
    /// Senders to other nodes, keyed by node id.
    tx_map: HashMap<NodeId, Sender<(NodeId, RaMessage)>>,
    /// Connection status to each node (true = connected).
    connected: HashMap<NodeId, Arc<AtomicBool>>,
}

impl NetworkEndpoint {
    /// Send a message to a specific node.
    ///
    /// Returns true if the message was sent (connection is up).
    pub fn send_to(&self, target: &NodeId, msg: RaMessage) -> bool {
        if let Some(connected) = self.connected.get(target) {
            if !connected.load(Ordering::SeqCst) {
                return false;
            }
        }

        if let Some(tx) = self.tx_map.get(target) {
            tx.send((self.node_id.clone(), msg)).is_ok()
        } else {
            false
        }
    }

    /// Broadcast a message to all other nodes.
    ///
    /// Returns the number of nodes the message was sent to.
    pub fn broadcast(&self, msg: RaMessage) -> usize {
        let mut count = 0;
        for (target, tx) in &self.tx_map {
            if let Some(connected) = self.connected.get(target) {
                if !connected.load(Ordering::SeqCst) {
                    continue;
                }
            }

            if tx.send((self.node_id.clone(), msg.clone())).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> Option<(NodeId, RaMessage)> {
        self.rx.try_recv().ok()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<(NodeId, RaMessage)> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// In-memory network connecting multiple node endpoints via channels.
pub struct RaNetwork {
    /// Connection status between node pairs.
    /// Key: (from, to), Value: connected flag.
    connections: HashMap<(NodeId, NodeId), Arc<AtomicBool>>,
    /// Senders for each node's inbox.
    node_senders: HashMap<NodeId, Sender<(NodeId, RaMessage)>>,
    /// Receivers for each node's inbox (taken when the endpoint is created).
    node_receivers: HashMap<NodeId, Receiver<(NodeId, RaMessage)>>,
}

impl RaNetwork {
    /// Create a network for the given node ids.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let ids: Vec<NodeId> = ids.into_iter().map(Into::into).collect();
        let mut node_senders = HashMap::new();
        let mut node_receivers = HashMap::new();
        let mut connections = HashMap::new();

        for id in &ids {
            let (tx, rx) = unbounded();
            node_senders.insert(id.clone(), tx);
            node_receivers.insert(id.clone(), rx);
        }

        for from in &ids {
            for to in &ids {
                if from != to {
                    connections.insert(
                        (from.clone(), to.clone()),
                        Arc::new(AtomicBool::new(true)),
                    );
                }
            }
        }

        RaNetwork {
            connections,
            node_senders,
            node_receivers,
        }
    }

    /// Create the endpoint for a node.
    ///
    /// Consumes the node's receiver, so can only be called once per node.
    pub fn endpoint(&mut self, node_id: &str) -> Option<NetworkEndpoint> {
        let node_id: NodeId = node_id.to_string();
        let rx = self.node_receivers.remove(&node_id)?;

        let mut tx_map = HashMap::new();
        for (id, tx) in &self.node_senders {
            if *id != node_id {
                tx_map.insert(id.clone(), tx.clone());
            }
        }

        let mut connected = HashMap::new();
        for ((from, to), flag) in &self.connections {
            if *from == node_id {
                connected.insert(to.clone(), flag.clone());
            }
        }

        Some(NetworkEndpoint {
            node_id,
            rx,
            tx_map,
            connected,
        })
    }

    /// Disconnect a node; messages to and from it are dropped.
    pub fn disconnect(&self, node_id: &str) {
        for ((from, to), flag) in &self.connections {
            if from == node_id || to == node_id {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Reconnect a node.
    pub fn reconnect(&self, node_id: &str) {
        for ((from, to), flag) in &self.connections {
            if from == node_id || to == node_id {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Check if messages flow from one node to another.
    pub fn is_connected(&self, from: &str, to: &str) -> bool {
        self.connections
            .get(&(from.to_string(), to.to_string()))
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::message::RequestId;
    use std::time::Duration;

    fn request(sender: &str) -> RaMessage {
        RaMessage::Request {
            timestamp: 1,
            sender: sender.to_string(),
            request_id: RequestId::from_raw(1),
        }
    }

    #[test]
    fn test_send_and_receive() {
        let mut network = RaNetwork::new(["a", "b", "c"]);
        let ep_a = network.endpoint("a").unwrap();
        let ep_b = network.endpoint("b").unwrap();

        assert!(ep_a.send_to(&"b".to_string(), request("a")));

        let (from, msg) = ep_b.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(from, "a");
        assert!(matches!(msg, RaMessage::Request { .. }));
    }

    #[test]
    fn test_broadcast_skips_disconnected() {
        let mut network = RaNetwork::new(["a", "b", "c"]);
        let ep_a = network.endpoint("a").unwrap();
        let _ep_b = network.endpoint("b").unwrap();
        let ep_c = network.endpoint("c").unwrap();

        network.disconnect("c");
        assert_eq!(ep_a.broadcast(request("a")), 1);

        network.reconnect("c");
        assert_eq!(ep_a.broadcast(request("a")), 2);
        assert!(ep_c
            .recv_timeout(Duration::from_millis(100))
            .is_some());
    }

    #[test]
    fn test_endpoint_taken_once() {
        let mut network = RaNetwork::new(["a"]);
        assert!(network.endpoint("a").is_some());
        assert!(network.endpoint("a").is_none());
    }
}
