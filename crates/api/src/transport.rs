//! Transport related types.
//!
//! The transport owns connections, framing and the handshake. The retrieval
//! core only hands it opaque request bytes and receives opaque replies.

use crate::*;
#[cfg(feature = "mockall")]
use mockall::automock;
use std::sync::Arc;

/// A reply received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The encoded reply payload.
    Data(bytes::Bytes),

    /// The peer explicitly declined to serve the request.
    CannotServe,
}

/// Handler for inbound transport events.
pub trait TxHandler: 'static + Send + Sync + std::fmt::Debug {
    /// A peer replied to a request we sent it.
    fn recv_reply(
        &self,
        peer: PeerId,
        request_id: RequestId,
        kind: RequestKind,
        reply: Reply,
    ) {
        drop((peer, request_id, kind, reply));
    }
}

/// Trait-object [TxHandler].
pub type DynTxHandler = Arc<dyn TxHandler>;

/// Sends requests to connected peers.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait Transport: 'static + Send + Sync + std::fmt::Debug {
    /// Register the handler for inbound replies.
    ///
    /// Panics if a handler has already been registered.
    fn register_handler(&self, handler: DynTxHandler);

    /// Send a request to a connected peer. The future resolves once the
    /// request has been handed off, not when the reply arrives. The reply,
    /// if any, comes back through [TxHandler::recv_reply] tagged with the
    /// same `request_id`.
    fn send(
        &self,
        peer: PeerId,
        request_id: RequestId,
        kind: RequestKind,
        data: bytes::Bytes,
    ) -> BoxFut<'_, LodrResult<()>>;
}

/// Trait-object [Transport].
pub type DynTransport = Arc<dyn Transport>;
