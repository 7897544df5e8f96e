//! Single-flight retrieval with failover.
//!
//! Every distinct [RequestKey] has at most one pending entry. The first
//! caller creates it and spawns the entry's driver task; later callers only
//! add themselves as waiters. The driver asks one peer at a time, verifies
//! the reply, and moves on to the next untried peer on any failure. The
//! final outcome is cloned to every waiter.
//!
//! A caller that stops waiting (its token fires, or its future is dropped)
//! only removes itself. When the last waiter leaves, the entry is aborted.
//!
//! Verified items go into the item store before their entry leaves the
//! pending table, and new callers consult the store under the same lock, so
//! a request is never sent again once its answer is known.

use super::distributor::Distributor;
use bytes::Bytes;
use lodr_api::*;
use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Checks a reply payload from a peer against the request's trusted root.
pub(crate) type VerifyFn = fn(&Request, &PeerId, Bytes) -> LodrResult<Verified>;

type Outcome = LodrResult<Verified>;

#[derive(Debug)]
struct PendingEntry {
    id: u64,
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
    next_waiter: u64,
    abort: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct RetrieveManager {
    dist: Arc<Distributor>,
    item_store: DynItemStore,
    pending: Mutex<HashMap<RequestKey, PendingEntry>>,
    next_entry: AtomicU64,
    peer_wait_grace: Duration,
}

/// Removes its waiter from the entry unless disarmed.
struct WaiterGuard<'a> {
    mgr: &'a RetrieveManager,
    key: RequestKey,
    entry_id: u64,
    waiter_id: u64,
    armed: bool,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.mgr.leave(self.key, self.entry_id, self.waiter_id);
        }
    }
}

impl RetrieveManager {
    pub fn new(
        dist: Arc<Distributor>,
        item_store: DynItemStore,
        peer_wait_grace: Duration,
    ) -> Self {
        Self {
            dist,
            item_store,
            pending: Mutex::new(HashMap::new()),
            next_entry: AtomicU64::new(1),
            peer_wait_grace,
        }
    }

    /// Retrieve and verify `request`, sharing the work with concurrent
    /// callers of the same request.
    pub async fn retrieve(
        self: &Arc<Self>,
        cancel: CancellationToken,
        request: Request,
        verify: VerifyFn,
    ) -> LodrResult<Verified> {
        if cancel.is_cancelled() {
            return Err(LodrError::Canceled);
        }

        let key = request.key();
        let (tx, rx) = oneshot::channel();

        let (entry_id, waiter_id) = {
            let mut lock = self.pending.lock().unwrap();
            if !lock.contains_key(&key) {
                if let Some(item) = self.item_store.get(&key) {
                    tracing::trace!(%key, "answered from item store");
                    return Ok(item);
                }
            }
            match lock.entry(key) {
                Entry::Occupied(mut o) => {
                    let e = o.get_mut();
                    let waiter_id = e.next_waiter;
                    e.next_waiter += 1;
                    e.waiters.insert(waiter_id, tx);
                    tracing::trace!(%key, "joined pending request");
                    (e.id, waiter_id)
                }
                Entry::Vacant(v) => {
                    let id = self.next_entry.fetch_add(1, Ordering::Relaxed);
                    let abort = CancellationToken::new();
                    v.insert(PendingEntry {
                        id,
                        waiters: HashMap::from([(0, tx)]),
                        next_waiter: 1,
                        abort: abort.clone(),
                    });
                    tracing::debug!(%key, entry = id, "new pending request");
                    tokio::task::spawn(self.clone().drive(
                        key, id, request, verify, abort,
                    ));
                    (id, 0)
                }
            }
        };

        let mut guard = WaiterGuard {
            mgr: self,
            key,
            entry_id,
            waiter_id,
            armed: true,
        };

        tokio::select! {
            res = rx => {
                // resolve already removed us
                guard.armed = false;
                res.unwrap_or_else(|_| {
                    Err(LodrError::other("retrieval ended without an outcome"))
                })
            }
            _ = cancel.cancelled() => {
                tracing::debug!(%key, "caller canceled");
                drop(guard);
                Err(LodrError::Canceled)
            }
        }
    }

    fn leave(&self, key: RequestKey, entry_id: u64, waiter_id: u64) {
        let mut lock = self.pending.lock().unwrap();
        let Some(e) = lock.get_mut(&key) else {
            return;
        };
        if e.id != entry_id {
            return;
        }
        e.waiters.remove(&waiter_id);
        if e.waiters.is_empty() {
            if let Some(e) = lock.remove(&key) {
                tracing::debug!(%key, entry = entry_id, "last waiter left, aborting");
                e.abort.cancel();
            }
        }
    }

    fn resolve(&self, key: RequestKey, entry_id: u64, outcome: Outcome) {
        let entry = {
            let mut lock = self.pending.lock().unwrap();
            match lock.get(&key) {
                Some(e) if e.id == entry_id => {
                    if let Ok(item) = &outcome {
                        self.item_store.put(key, item.clone());
                    }
                    lock.remove(&key)
                }
                _ => None,
            }
        };

        let Some(entry) = entry else {
            return;
        };

        match &outcome {
            Ok(_) => tracing::debug!(%key, entry = entry_id, "resolved"),
            Err(err) => {
                tracing::debug!(%key, entry = entry_id, %err, "failed")
            }
        }

        for (_, waiter) in entry.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn drive(
        self: Arc<Self>,
        key: RequestKey,
        entry_id: u64,
        request: Request,
        verify: VerifyFn,
        abort: CancellationToken,
    ) {
        let outcome = tokio::select! {
            outcome = self.run(&request, verify, &abort) => outcome,
            _ = abort.cancelled() => return,
        };
        self.resolve(key, entry_id, outcome);
    }

    async fn run(
        &self,
        request: &Request,
        verify: VerifyFn,
        abort: &CancellationToken,
    ) -> Outcome {
        let data = request.encode();
        let mut tried: HashSet<PeerId> = HashSet::new();
        let mut attempts = 0;

        loop {
            let mut assignment =
                match self.dist.assign(request, &tried, abort).await {
                    Ok(a) => a,
                    Err(LodrError::NoPeerAvailable) => {
                        if self
                            .dist
                            .wait_for_peer(
                                request,
                                &tried,
                                self.peer_wait_grace,
                                abort,
                            )
                            .await
                        {
                            continue;
                        }
                        return Err(if attempts == 0 {
                            LodrError::NoPeerAvailable
                        } else {
                            LodrError::AllPeersFailed { attempts }
                        });
                    }
                    Err(err) => return Err(err),
                };

            attempts += 1;
            let peer = assignment.peer().clone();
            tried.insert(peer.clone());

            match assignment.send(data.clone()).await {
                Ok((reply, latency)) => match verify(request, &peer, reply) {
                    Ok(verified) => {
                        assignment.complete(PeerOutcome::Success { latency });
                        return Ok(verified);
                    }
                    Err(err) if err.is_peer_local() => {
                        tracing::warn!(?peer, %err, "reply failed verification");
                        assignment.complete(PeerOutcome::InvalidProof);
                    }
                    // not the peer's fault, the slot is released unscored
                    Err(err) => return Err(err),
                },
                Err(failure) => {
                    let outcome = failure.outcome();
                    let err = failure.into_error(peer.clone());
                    tracing::debug!(?peer, %err, "attempt failed");
                    assignment.complete(outcome);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
