//! Correlates inbound replies with the requests waiting for them.

use lodr_api::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

pub(crate) type ReplyResult = LodrResult<Reply>;

#[derive(Debug)]
struct Slot {
    peer: PeerId,
    kind: RequestKind,
    reply: oneshot::Sender<ReplyResult>,
}

#[derive(Debug, Default)]
pub(crate) struct ReplyRouter {
    slots: Mutex<HashMap<RequestId, Slot>>,
    next_id: AtomicU64,
}

impl ReplyRouter {
    /// Reserve a fresh request id for a request to `peer`.
    pub fn register(
        &self,
        peer: PeerId,
        kind: RequestKind,
    ) -> (RequestId, oneshot::Receiver<ReplyResult>) {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, recv) = oneshot::channel();
        self.slots
            .lock()
            .unwrap()
            .insert(id, Slot { peer, kind, reply });
        (id, recv)
    }

    /// Stop waiting for a reply. A reply arriving later is dropped.
    pub fn forget(&self, id: RequestId) {
        self.slots.lock().unwrap().remove(&id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

impl TxHandler for ReplyRouter {
    fn recv_reply(
        &self,
        peer: PeerId,
        request_id: RequestId,
        kind: RequestKind,
        reply: Reply,
    ) {
        let slot = {
            let mut lock = self.slots.lock().unwrap();
            match lock.get(&request_id) {
                None => {
                    tracing::debug!(
                        ?peer,
                        %request_id,
                        "dropping reply nobody is waiting for"
                    );
                    return;
                }
                Some(slot) if slot.peer != peer || slot.kind != kind => {
                    tracing::warn!(
                        ?peer,
                        %request_id,
                        ?kind,
                        expected_peer = ?slot.peer,
                        expected_kind = ?slot.kind,
                        "dropping mismatched reply"
                    );
                    return;
                }
                Some(_) => lock.remove(&request_id),
            }
        };

        if let Some(slot) = slot {
            // the receiver is gone if the request was abandoned meanwhile
            let _ = slot.reply.send(Ok(reply));
        }
    }
}

impl PeerEventHandler for ReplyRouter {
    fn peer_removed(&self, info: &PeerInfo, _reason: RemoveReason) {
        let gone: Vec<Slot> = {
            let mut lock = self.slots.lock().unwrap();
            let ids: Vec<RequestId> = lock
                .iter()
                .filter(|(_, s)| s.peer == info.id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| lock.remove(&id)).collect()
        };

        for slot in gone {
            let _ = slot.reply.send(Err(LodrError::PeerGone {
                peer: info.id.clone(),
            }));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    fn peer(name: &'static str) -> PeerId {
        PeerId(Bytes::from_static(name.as_bytes()))
    }

    fn info(name: &'static str) -> PeerInfo {
        PeerInfo {
            id: peer(name),
            addr: None,
            protocol_version: 1,
            serves: Default::default(),
            head: Default::default(),
        }
    }

    fn data() -> Reply {
        Reply::Data(Bytes::from_static(b"data"))
    }

    #[tokio::test]
    async fn routes_reply_to_waiter() {
        let r = ReplyRouter::default();
        let (id, recv) = r.register(peer("a"), RequestKind::Code);
        r.recv_reply(peer("a"), id, RequestKind::Code, data());
        assert_eq!(data(), recv.await.unwrap().unwrap());
        assert_eq!(0, r.len());
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let r = ReplyRouter::default();
        let (a, _ra) = r.register(peer("a"), RequestKind::Code);
        let (b, _rb) = r.register(peer("a"), RequestKind::Code);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn drops_reply_from_wrong_peer_or_kind() {
        let r = ReplyRouter::default();
        let (id, mut recv) = r.register(peer("a"), RequestKind::Code);

        r.recv_reply(peer("b"), id, RequestKind::Code, data());
        r.recv_reply(peer("a"), id, RequestKind::Body, data());
        assert!(recv.try_recv().is_err());
        assert_eq!(1, r.len());

        // the right reply still gets through
        r.recv_reply(peer("a"), id, RequestKind::Code, Reply::CannotServe);
        assert_eq!(Reply::CannotServe, recv.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn forgotten_slot_drops_late_reply() {
        let r = ReplyRouter::default();
        let (id, mut recv) = r.register(peer("a"), RequestKind::Code);
        r.forget(id);
        r.recv_reply(peer("a"), id, RequestKind::Code, data());
        assert!(recv.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_removal_fails_its_slots() {
        let r = ReplyRouter::default();
        let (_, ra) = r.register(peer("a"), RequestKind::Code);
        let (id_b, mut rb) = r.register(peer("b"), RequestKind::Code);

        r.peer_removed(&info("a"), RemoveReason::Disconnected);

        match ra.await.unwrap() {
            Err(LodrError::PeerGone { peer: p }) => assert_eq!(peer("a"), p),
            oth => panic!("unexpected {oth:?}"),
        }
        assert!(rb.try_recv().is_err());

        r.recv_reply(peer("b"), id_b, RequestKind::Code, data());
        assert_eq!(data(), rb.await.unwrap().unwrap());
    }
}
