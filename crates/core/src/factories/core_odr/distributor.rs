//! Assigns requests to peers and dispatches them.

use super::router::ReplyRouter;
use bytes::Bytes;
use lodr_api::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Bumps a generation counter on every registry change, so assignments
/// waiting for capacity or for a new peer re-check their options.
#[derive(Debug)]
pub(crate) struct WakeOnChange(watch::Sender<u64>);

impl WakeOnChange {
    pub fn new() -> (Self, watch::Receiver<u64>) {
        let (send, recv) = watch::channel(0);
        (Self(send), recv)
    }

    fn bump(&self) {
        self.0.send_modify(|g| *g = g.wrapping_add(1));
    }
}

impl PeerEventHandler for WakeOnChange {
    fn peer_registered(&self, _info: &PeerInfo) {
        self.bump();
    }

    fn peer_removed(&self, _info: &PeerInfo, _reason: RemoveReason) {
        self.bump();
    }

    fn peer_updated(&self, _peer: &PeerId) {
        self.bump();
    }
}

/// Why a dispatched request produced no usable reply.
#[derive(Debug)]
pub(crate) enum SendFailure {
    /// The transport could not hand off the request.
    Failed(LodrError),
    /// The peer declined.
    CannotServe,
    /// No reply before the deadline.
    Timeout,
    /// The peer went away while we waited.
    PeerGone,
}

impl SendFailure {
    pub fn outcome(&self) -> PeerOutcome {
        match self {
            Self::Failed(_) => PeerOutcome::Failed,
            Self::CannotServe => PeerOutcome::CannotServe,
            Self::Timeout => PeerOutcome::Timeout,
            // the registry no longer knows the peer, this only
            // releases the slot if it was somehow re-registered
            Self::PeerGone => PeerOutcome::Abandoned,
        }
    }

    /// The error this failure reports for `peer`.
    pub fn into_error(self, peer: PeerId) -> LodrError {
        match self {
            Self::Failed(err) => err,
            Self::CannotServe => {
                LodrError::other(format!("peer {peer} cannot serve the request"))
            }
            Self::Timeout => LodrError::Timeout { peer },
            Self::PeerGone => LodrError::PeerGone { peer },
        }
    }
}

enum Pick {
    Assigned(PeerId),
    Busy,
    NoneEligible,
}

#[derive(Debug)]
pub(crate) struct Distributor {
    registry: DynPeerRegistry,
    transport: DynTransport,
    router: Arc<ReplyRouter>,
    wake: watch::Receiver<u64>,
    max_in_flight: usize,
    request_timeout: Duration,
}

impl Distributor {
    pub fn new(
        registry: DynPeerRegistry,
        transport: DynTransport,
        router: Arc<ReplyRouter>,
        wake: watch::Receiver<u64>,
        max_in_flight: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            router,
            wake,
            max_in_flight,
            request_timeout,
        }
    }

    fn eligible(
        &self,
        request: &Request,
        tried: &HashSet<PeerId>,
    ) -> Vec<PeerSnapshot> {
        self.registry.best_peers(
            &|info| info.can_serve(request) && !tried.contains(&info.id),
            usize::MAX,
        )
    }

    fn pick(&self, request: &Request, tried: &HashSet<PeerId>) -> Pick {
        let candidates = self.eligible(request, tried);
        if candidates.is_empty() {
            return Pick::NoneEligible;
        }
        for c in candidates {
            if self
                .registry
                .try_begin_request(&c.info.id, self.max_in_flight)
            {
                return Pick::Assigned(c.info.id);
            }
        }
        Pick::Busy
    }

    /// Reserve a slot at the best eligible peer not in `tried`.
    ///
    /// Fails with [LodrError::NoPeerAvailable] right away if there is no
    /// such peer. If there are some but they are all at capacity, waits
    /// until one frees up or `cancel` fires.
    pub async fn assign(
        self: &Arc<Self>,
        request: &Request,
        tried: &HashSet<PeerId>,
        cancel: &CancellationToken,
    ) -> LodrResult<Assignment> {
        let mut wake = self.wake.clone();
        loop {
            // mark the current generation seen before looking, so a change
            // racing with the pick still wakes us below
            wake.borrow_and_update();

            match self.pick(request, tried) {
                Pick::Assigned(peer) => {
                    tracing::trace!(?peer, kind = ?request.kind(), "assigned");
                    return Ok(Assignment {
                        dist: self.clone(),
                        peer,
                        kind: request.kind(),
                        pending: None,
                        done: false,
                    });
                }
                Pick::NoneEligible => return Err(LodrError::NoPeerAvailable),
                Pick::Busy => {
                    tracing::trace!(kind = ?request.kind(), "all eligible peers busy");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LodrError::Canceled),
                        r = wake.changed() => if r.is_err() {
                            return Err(LodrError::other("peer registry closed"));
                        },
                    }
                }
            }
        }
    }

    /// Wait up to `grace` for an eligible peer not in `tried` to show up.
    pub async fn wait_for_peer(
        &self,
        request: &Request,
        tried: &HashSet<PeerId>,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        let mut wake = self.wake.clone();
        loop {
            wake.borrow_and_update();

            if !self.eligible(request, tried).is_empty() {
                return true;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                _ = cancel.cancelled() => return false,
                r = wake.changed() => if r.is_err() {
                    return false;
                },
            }
        }
    }
}

/// A reserved in-flight slot at a peer.
///
/// Call [Assignment::complete] with the outcome once the request is done.
/// Dropping an uncompleted assignment releases the slot without affecting
/// the peer's score.
#[derive(Debug)]
pub(crate) struct Assignment {
    dist: Arc<Distributor>,
    peer: PeerId,
    kind: RequestKind,
    pending: Option<RequestId>,
    done: bool,
}

impl Assignment {
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Send the encoded request and wait for the reply payload.
    pub async fn send(
        &mut self,
        data: Bytes,
    ) -> Result<(Bytes, Duration), SendFailure> {
        let dist = self.dist.clone();
        let (id, recv) = dist.router.register(self.peer.clone(), self.kind);
        self.pending = Some(id);

        // the registry drops a peer before notifying the router, so a peer
        // removed since assign is either gone here or fails the slot later
        if dist.registry.get(&self.peer).is_none() {
            dist.router.forget(id);
            self.pending = None;
            return Err(SendFailure::PeerGone);
        }

        let start = Instant::now();
        tracing::debug!(peer = ?self.peer, request_id = %id, kind = ?self.kind, "dispatch");

        if let Err(err) = dist
            .transport
            .send(self.peer.clone(), id, self.kind, data)
            .await
        {
            dist.router.forget(id);
            self.pending = None;
            return Err(SendFailure::Failed(err));
        }

        let timeout = dist.request_timeout * self.kind.timeout_factor();
        let res = tokio::time::timeout(timeout, recv).await;

        // on every path below the router no longer holds the slot
        dist.router.forget(id);
        self.pending = None;

        match res {
            Err(_) => {
                tracing::debug!(peer = ?self.peer, request_id = %id, "request timed out");
                Err(SendFailure::Timeout)
            }
            Ok(Err(_)) | Ok(Ok(Err(_))) => Err(SendFailure::PeerGone),
            Ok(Ok(Ok(Reply::CannotServe))) => Err(SendFailure::CannotServe),
            Ok(Ok(Ok(Reply::Data(data)))) => Ok((data, start.elapsed())),
        }
    }

    /// Release the slot and report the outcome to the registry.
    pub fn complete(mut self, outcome: PeerOutcome) {
        self.done = true;
        self.dist.registry.record_outcome(&self.peer, outcome);
    }
}

impl Drop for Assignment {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(id) = self.pending.take() {
            self.dist.router.forget(id);
        }
        tracing::trace!(peer = ?self.peer, "assignment abandoned");
        self.dist
            .registry
            .record_outcome(&self.peer, PeerOutcome::Abandoned);
    }
}
