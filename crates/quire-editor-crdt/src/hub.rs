//! In-process sync network.
//!
//! A [`SyncHub`] connects repos the way a relay would: a repo joins under a
//! peer name, broadcasts CRDT updates, and fetches snapshots of documents it
//! doesn't have. Broadcasts are queued and only delivered on
//! [`SyncHub::flush`], so tests decide exactly when peers see each other.
//!
//! Peers can be marked unreachable to simulate a lost network. An
//! unreachable peer can't join, sends nothing and receives nothing.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use smol_str::SmolStr;

use crate::error::CrdtError;
use crate::repo::DocumentId;

/// A repo's side of the hub.
pub(crate) trait Endpoint {
    /// Merge an update broadcast by another peer.
    fn receive(&self, id: &DocumentId, update: &[u8]);

    /// Full snapshot of a locally held document, for a peer that asked.
    fn snapshot(&self, id: &DocumentId) -> Option<Vec<u8>>;
}

struct Peer {
    name: SmolStr,
    reachable: bool,
    endpoint: Option<Weak<dyn Endpoint>>,
}

impl Peer {
    fn live_endpoint(&self) -> Option<Rc<dyn Endpoint>> {
        if !self.reachable {
            return None;
        }
        self.endpoint.as_ref().and_then(Weak::upgrade)
    }
}

struct Envelope {
    from: SmolStr,
    doc: DocumentId,
    data: Vec<u8>,
}

#[derive(Default)]
struct HubState {
    peers: Vec<Peer>,
    queue: VecDeque<Envelope>,
}

impl HubState {
    fn peer_mut(&mut self, name: &str) -> &mut Peer {
        let index = match self.peers.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                self.peers.push(Peer {
                    name: SmolStr::new(name),
                    reachable: true,
                    endpoint: None,
                });
                self.peers.len() - 1
            }
        };
        &mut self.peers[index]
    }

    fn peer(&self, name: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.name == name)
    }
}

/// Shared in-process network. Clones refer to the same hub.
#[derive(Clone, Default)]
pub struct SyncHub {
    state: Rc<RefCell<HubState>>,
}

impl SyncHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a peer's network as up or down. Unknown peers start reachable.
    pub fn set_reachable(&self, peer: &str, reachable: bool) {
        tracing::debug!(peer, reachable, "hub: reachability changed");
        self.state.borrow_mut().peer_mut(peer).reachable = reachable;
    }

    /// Whether `peer`'s network is up.
    pub fn is_reachable(&self, peer: &str) -> bool {
        self.state
            .borrow()
            .peer(peer)
            .map(|p| p.reachable)
            .unwrap_or(true)
    }

    /// Whether `peer` is joined and reachable.
    pub fn is_online(&self, peer: &str) -> bool {
        self.state
            .borrow()
            .peer(peer)
            .is_some_and(|p| p.live_endpoint().is_some())
    }

    /// Number of broadcasts waiting for [`flush`](Self::flush).
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Deliver queued broadcasts, including ones sent while delivering,
    /// until the queue is empty. Returns how many envelopes were delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            let (envelope, targets) = {
                let mut state = self.state.borrow_mut();
                let Some(envelope) = state.queue.pop_front() else {
                    break;
                };
                let targets: Vec<Rc<dyn Endpoint>> = state
                    .peers
                    .iter()
                    .filter(|p| p.name != envelope.from)
                    .filter_map(Peer::live_endpoint)
                    .collect();
                (envelope, targets)
            };

            tracing::trace!(
                from = %envelope.from,
                doc = %envelope.doc,
                bytes = envelope.data.len(),
                peers = targets.len(),
                "hub: delivering update"
            );
            for target in targets {
                target.receive(&envelope.doc, &envelope.data);
            }
            delivered += 1;
        }
        delivered
    }

    pub(crate) fn join(&self, peer: &str, endpoint: Weak<dyn Endpoint>) -> Result<(), CrdtError> {
        let mut state = self.state.borrow_mut();
        let entry = state.peer_mut(peer);
        if !entry.reachable {
            return Err(CrdtError::Network(format!("peer {peer} cannot reach the hub")));
        }
        entry.endpoint = Some(endpoint);
        tracing::info!(peer, "hub: peer joined");
        Ok(())
    }

    pub(crate) fn leave(&self, peer: &str) {
        if let Some(entry) = self
            .state
            .borrow_mut()
            .peers
            .iter_mut()
            .find(|p| p.name == peer)
        {
            entry.endpoint = None;
            tracing::info!(peer, "hub: peer left");
        }
    }

    /// Queue an update for every other online peer.
    pub(crate) fn broadcast(&self, from: &str, doc: &DocumentId, data: Vec<u8>) {
        self.state.borrow_mut().queue.push_back(Envelope {
            from: SmolStr::new(from),
            doc: doc.clone(),
            data,
        });
    }

    /// Ask online peers other than `requester` for a snapshot of `doc`.
    pub(crate) fn fetch(&self, requester: &str, doc: &DocumentId) -> Option<Vec<u8>> {
        let peers: Vec<Rc<dyn Endpoint>> = self
            .state
            .borrow()
            .peers
            .iter()
            .filter(|p| p.name != requester)
            .filter_map(Peer::live_endpoint)
            .collect();
        peers.iter().find_map(|peer| peer.snapshot(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        received: RefCell<Vec<(DocumentId, Vec<u8>)>>,
    }

    impl Endpoint for Recorder {
        fn receive(&self, id: &DocumentId, update: &[u8]) {
            self.received.borrow_mut().push((id.clone(), update.to_vec()));
        }

        fn snapshot(&self, id: &DocumentId) -> Option<Vec<u8>> {
            (id.as_str() == "known").then(|| b"snap".to_vec())
        }
    }

    fn joined(hub: &SyncHub, name: &str) -> Rc<Recorder> {
        let recorder = Rc::new(Recorder::default());
        let endpoint: Rc<dyn Endpoint> = recorder.clone();
        hub.join(name, Rc::downgrade(&endpoint)).unwrap();
        recorder
    }

    #[test]
    fn test_broadcast_waits_for_flush() {
        let hub = SyncHub::new();
        let a = joined(&hub, "a");
        let b = joined(&hub, "b");
        let doc = DocumentId::from("doc");

        hub.broadcast("a", &doc, vec![1, 2, 3]);
        assert_eq!(hub.pending(), 1);
        assert!(b.received.borrow().is_empty());

        assert_eq!(hub.flush(), 1);
        assert_eq!(*b.received.borrow(), vec![(doc, vec![1, 2, 3])]);
        assert!(a.received.borrow().is_empty());
    }

    #[test]
    fn test_unreachable_peer_cannot_join_or_receive() {
        let hub = SyncHub::new();
        let _a = joined(&hub, "a");
        let b = joined(&hub, "b");

        hub.set_reachable("b", false);
        assert!(!hub.is_online("b"));
        hub.broadcast("a", &DocumentId::from("doc"), vec![9]);
        hub.flush();
        assert!(b.received.borrow().is_empty());

        let c: Rc<dyn Endpoint> = Rc::new(Recorder::default());
        hub.set_reachable("c", false);
        assert!(matches!(
            hub.join("c", Rc::downgrade(&c)),
            Err(CrdtError::Network(_))
        ));
    }

    #[test]
    fn test_fetch_skips_requester() {
        let hub = SyncHub::new();
        let _a = joined(&hub, "a");
        assert_eq!(hub.fetch("a", &DocumentId::from("known")), None);

        let _b = joined(&hub, "b");
        assert_eq!(
            hub.fetch("a", &DocumentId::from("known")),
            Some(b"snap".to_vec())
        );
        assert_eq!(hub.fetch("a", &DocumentId::from("unknown")), None);
    }
}
