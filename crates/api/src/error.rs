//! LODR error types.

use crate::{HelperTrieKind, PeerId};
use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The core lodr error type. This type is used in all external
/// lodr apis as well as internally in the retrieval modules.
///
/// This type is required to implement `Clone` because a single retrieval
/// outcome is delivered to every caller waiting on the same request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LodrError {
    /// No eligible peer is available right now. This may be transient.
    #[error("no peer available to serve the request")]
    NoPeerAvailable,

    /// A peer accepted the request but did not answer within the deadline.
    #[error("request to peer {peer} timed out")]
    Timeout {
        /// The peer that failed to answer.
        peer: PeerId,
    },

    /// A response was received but failed cryptographic verification.
    #[error("invalid proof from peer {peer}: {ctx}")]
    InvalidProof {
        /// The peer that sent the invalid response.
        peer: PeerId,

        /// What exactly failed to verify.
        ctx: Arc<str>,
    },

    /// The peer disconnected while the request was in flight.
    #[error("peer {peer} went away while serving the request")]
    PeerGone {
        /// The peer that went away.
        peer: PeerId,
    },

    /// Every eligible peer was tried for this request and failed.
    #[error("all peers failed after {attempts} attempts")]
    AllPeersFailed {
        /// The number of peers that were tried.
        attempts: usize,
    },

    /// The caller canceled the request.
    #[error("request canceled")]
    Canceled,

    /// The chain indexer has no confirmed root for the requested section.
    #[error("no trusted {kind:?} root for section {section}")]
    NoTrustedRoot {
        /// The helper trie the root was requested for.
        kind: HelperTrieKind,

        /// The requested section index.
        section: u64,
    },

    /// Generic lodr internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

impl LodrError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct an invalid proof error.
    pub fn invalid_proof<C: std::fmt::Display>(peer: PeerId, ctx: C) -> Self {
        Self::InvalidProof {
            peer,
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// True for errors that only concern the peer that produced them.
    ///
    /// These are consumed by the retry loop and never reach a caller.
    pub fn is_peer_local(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::InvalidProof { .. }
                | Self::PeerGone { .. }
        )
    }
}

/// The core lodr result type.
pub type LodrResult<T> = Result<T, LodrError>;
