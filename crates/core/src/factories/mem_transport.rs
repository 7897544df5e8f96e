//! An in-process transport serving replies from [MemChain]s.

use super::MemChain;
use lodr_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a [MemTransport] server treats the requests it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemBehavior {
    /// Answer from its chain, decline what the chain does not have.
    Honest,
    /// Answer every request with an undecodable payload.
    Corrupt,
    /// Accept requests and never answer.
    Silent,
    /// Decline every request.
    CannotServe,
    /// Like [MemBehavior::Honest], but only after the given delay.
    Delayed(Duration),
    /// Refuse to accept requests at all.
    Fail,
}

#[derive(Debug)]
struct MemServer {
    chain: Arc<MemChain>,
    behavior: MemBehavior,
}

/// The core stub transport implementation.
/// This is NOT a production module. It is for testing only.
/// Each registered server is a peer id backed by a [MemChain].
#[derive(Debug, Default)]
pub struct MemTransport {
    handler: Mutex<Option<DynTxHandler>>,
    servers: Mutex<HashMap<PeerId, MemServer>>,
    sent: Mutex<Vec<(PeerId, RequestKind)>>,
    task_list: Mutex<tokio::task::JoinSet<()>>,
}

impl Drop for MemTransport {
    fn drop(&mut self) {
        self.task_list.lock().unwrap().abort_all();
    }
}

impl MemTransport {
    /// Construct a new MemTransport with no servers.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve requests sent to `peer` from `chain`.
    pub fn add_server(
        &self,
        peer: PeerId,
        chain: Arc<MemChain>,
        behavior: MemBehavior,
    ) {
        self.servers
            .lock()
            .unwrap()
            .insert(peer, MemServer { chain, behavior });
    }

    /// Change how `peer` treats future requests.
    pub fn set_behavior(&self, peer: &PeerId, behavior: MemBehavior) {
        if let Some(s) = self.servers.lock().unwrap().get_mut(peer) {
            s.behavior = behavior;
        }
    }

    /// Stop serving `peer`. Sends to it will fail.
    pub fn remove_server(&self, peer: &PeerId) {
        self.servers.lock().unwrap().remove(peer);
    }

    /// Every request handed off so far, in order.
    pub fn sent(&self) -> Vec<(PeerId, RequestKind)> {
        self.sent.lock().unwrap().clone()
    }

    /// How many requests were handed off to `peer`.
    pub fn sent_to(&self, peer: &PeerId) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == peer)
            .count()
    }
}

impl Transport for MemTransport {
    fn register_handler(&self, handler: DynTxHandler) {
        let mut lock = self.handler.lock().unwrap();
        if lock.is_some() {
            panic!("MemTransport handler already registered");
        }
        *lock = Some(handler);
    }

    fn send(
        &self,
        peer: PeerId,
        request_id: RequestId,
        kind: RequestKind,
        data: bytes::Bytes,
    ) -> BoxFut<'_, LodrResult<()>> {
        Box::pin(async move {
            let handler = self
                .handler
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| LodrError::other("no handler registered"))?;

            let (reply, delay) = {
                let lock = self.servers.lock().unwrap();
                let server = lock.get(&peer).ok_or_else(|| {
                    LodrError::other(format!("not connected to {peer}"))
                })?;
                let honest = || match server.chain.answer(kind, &data) {
                    Some(b) => Reply::Data(b),
                    None => Reply::CannotServe,
                };
                match server.behavior {
                    MemBehavior::Honest => (Some(honest()), None),
                    MemBehavior::Delayed(d) => (Some(honest()), Some(d)),
                    MemBehavior::Corrupt => (
                        Some(Reply::Data(bytes::Bytes::from_static(&[
                            0x0a, 0xff,
                        ]))),
                        None,
                    ),
                    MemBehavior::Silent => (None, None),
                    MemBehavior::CannotServe => {
                        (Some(Reply::CannotServe), None)
                    }
                    MemBehavior::Fail => {
                        return Err(LodrError::other(format!(
                            "{peer} refused the request"
                        )))
                    }
                }
            };

            self.sent.lock().unwrap().push((peer.clone(), kind));
            tracing::trace!(?peer, %request_id, ?kind, "mem send");

            if let Some(reply) = reply {
                self.task_list.lock().unwrap().spawn(async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    handler.recv_reply(peer, request_id, kind, reply);
                });
            }

            Ok(())
        })
    }
}
