//! Request/response correlation over the single frame stream.
//!
//! Every iq carries a fresh 16-hex-char id. The waiter is registered
//! before the frame is written, so a reply cannot race the registration;
//! it is completed exactly once, by the matching reply, a timeout, or
//! session close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::debug;
use tokio::sync::oneshot;

use crate::binary::Node;
use crate::error::{Error, Result};
use crate::socket::NoiseWriter;

/// Pending-request table keyed by iq id.
#[derive(Default)]
pub struct RequestRouter {
    pending: RwLock<HashMap<String, oneshot::Sender<Node>>>,
    closed: RwLock<bool>,
}

impl RequestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh 16-hex-char request id.
    pub fn next_id() -> String {
        format!("{:016x}", rand::random::<u64>())
    }

    /// Register a waiter. Fails once the session has closed.
    pub fn register(&self, id: &str) -> Result<oneshot::Receiver<Node>> {
        if *self.closed.read().unwrap() {
            return Err(Error::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.pending.write().unwrap().insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Complete the waiter for `id`, if any. Returns whether a waiter
    /// consumed the node.
    pub fn complete(&self, id: &str, response: Node) -> bool {
        match self.pending.write().unwrap().remove(id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop a waiter that timed out or was abandoned.
    pub fn cancel(&self, id: &str) {
        self.pending.write().unwrap().remove(id);
    }

    /// Fail every pending waiter with session-closed and refuse new ones.
    pub fn close_all(&self) {
        *self.closed.write().unwrap() = true;
        let drained: Vec<_> = self.pending.write().unwrap().drain().collect();
        debug!("cancelling {} pending requests on close", drained.len());
        // Dropping the senders fails the receivers.
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().unwrap().len()
    }
}

/// The sending half a request needs: writer mutex plus the router. Cheap
/// to clone and hand to subsystems that issue their own queries.
#[derive(Clone)]
pub struct IqSender {
    pub writer: Arc<tokio::sync::Mutex<NoiseWriter>>,
    pub router: Arc<RequestRouter>,
    pub timeout: Duration,
}

impl IqSender {
    /// Send an iq and await its reply. An `id` attribute is stamped on if
    /// missing. Times out with the node's id in the error.
    pub async fn send_iq(&self, mut node: Node) -> Result<Node> {
        let id = match node.attr_str("id") {
            Some(id) => id.to_string(),
            None => {
                let id = RequestRouter::next_id();
                node.set_attr("id", id.clone());
                id
            }
        };

        let rx = self.router.register(&id)?;
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send_node(&node).await {
                self.router.cancel(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.router.cancel(&id);
                Err(Error::RequestTimeout(id))
            }
        }
    }

    /// Fire a node without awaiting any reply (acks, receipts).
    pub async fn send(&self, node: &Node) -> Result<()> {
        self.writer.lock().await.send_node(node).await
    }
}

/// Standard iq construction.
pub fn iq(query_type: &str, xmlns: &str, to: Option<&crate::types::Jid>) -> Node {
    let mut node = Node::new("iq")
        .attr("id", RequestRouter::next_id())
        .attr("type", query_type)
        .attr("xmlns", xmlns);
    if let Some(to) = to {
        node.set_attr("to", to.clone());
    }
    node
}

/// Session-scoped guard against stale callbacks: each connect gets its own
/// uuid, and completions from an older connect are discarded by comparing
/// identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.0
    }
}

/// Holder comparing the current session id against callers' copies.
#[derive(Default)]
pub struct SessionGuard {
    current: Mutex<Option<SessionId>>,
}

impl SessionGuard {
    pub fn begin(&self) -> SessionId {
        let id = SessionId::fresh();
        *self.current.lock().unwrap() = Some(id);
        id
    }

    pub fn end(&self) {
        *self.current.lock().unwrap() = None;
    }

    /// Whether a callback tagged with `id` belongs to the live session.
    pub fn is_current(&self, id: SessionId) -> bool {
        *self.current.lock().unwrap() == Some(id)
    }
}
