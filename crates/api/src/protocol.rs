//! Protobuf messages for request parameters and reply payloads.
//!
//! The transport frames and delivers these as opaque bytes. Only the
//! retrieval core and the serving full node ever look inside.

use bytes::Bytes;

/// A block header.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HeaderMsg {
    /// Hash of the parent header.
    #[prost(bytes = "bytes", tag = "1")]
    pub parent_hash: Bytes,
    /// Block number.
    #[prost(uint64, tag = "2")]
    pub number: u64,
    /// Root of the state trie after this block.
    #[prost(bytes = "bytes", tag = "3")]
    pub state_root: Bytes,
    /// Ordered root of the block's transactions.
    #[prost(bytes = "bytes", tag = "4")]
    pub transactions_root: Bytes,
    /// Ordered root of the block's receipts.
    #[prost(bytes = "bytes", tag = "5")]
    pub receipts_root: Bytes,
    /// Ordered root of the block's ommer headers.
    #[prost(bytes = "bytes", tag = "6")]
    pub ommers_hash: Bytes,
    /// Opaque consensus data.
    #[prost(bytes = "bytes", tag = "7")]
    pub extra: Bytes,
}

/// Reply to a header range request, headers in ascending order.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HeadersMsg {
    /// The headers.
    #[prost(message, repeated, tag = "1")]
    pub headers: Vec<HeaderMsg>,
}

/// Reply to a body request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BodyMsg {
    /// Encoded transactions.
    #[prost(bytes = "bytes", repeated, tag = "1")]
    pub transactions: Vec<Bytes>,
    /// Encoded ommer headers.
    #[prost(bytes = "bytes", repeated, tag = "2")]
    pub ommers: Vec<Bytes>,
}

/// Reply to a receipts request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReceiptsMsg {
    /// Encoded receipts, in transaction order.
    #[prost(bytes = "bytes", repeated, tag = "1")]
    pub receipts: Vec<Bytes>,
}

/// Reply to a state or helper trie proof request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProofMsg {
    /// Encoded trie nodes, in any order.
    #[prost(bytes = "bytes", repeated, tag = "1")]
    pub nodes: Vec<Bytes>,
    /// The header proven by a canonical hash trie proof.
    #[prost(message, optional, tag = "2")]
    pub header: Option<HeaderMsg>,
}

/// Reply to a code request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CodeMsg {
    /// The contract code.
    #[prost(bytes = "bytes", tag = "1")]
    pub code: Bytes,
}

/// Trie node type.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration,
)]
#[repr(i32)]
pub enum NodeType {
    /// Invalid.
    Unspecified = 0,
    /// Terminal node holding the remaining key nibbles and the value.
    Leaf = 1,
    /// Shared key nibbles followed by exactly one child.
    Extension = 2,
    /// Sixteen children, one per nibble, plus an optional value.
    Branch = 3,
}

/// An encoded trie node. The hash of these bytes is the node reference.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TrieNodeMsg {
    /// The node type.
    #[prost(enumeration = "NodeType", tag = "1")]
    pub ty: i32,
    /// Key nibbles (one nibble per byte) for leaves and extensions.
    #[prost(bytes = "bytes", tag = "2")]
    pub path: Bytes,
    /// Child hashes. Exactly 16 for branches (empty for none), one for
    /// extensions.
    #[prost(bytes = "bytes", repeated, tag = "3")]
    pub children: Vec<Bytes>,
    /// The value. Empty on a branch means no value.
    #[prost(bytes = "bytes", tag = "4")]
    pub value: Bytes,
}

/// Request parameters for a header range.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HeaderRangeReq {
    /// Hash of the last header of the range.
    #[prost(bytes = "bytes", tag = "1")]
    pub anchor: Bytes,
    /// Number of the last header of the range.
    #[prost(uint64, tag = "2")]
    pub anchor_number: u64,
    /// How many headers, ending at the anchor.
    #[prost(uint64, tag = "3")]
    pub count: u64,
}

/// Request parameters for block-scoped data (bodies, receipts).
#[derive(Clone, PartialEq, prost::Message)]
pub struct BlockReq {
    /// The block hash.
    #[prost(bytes = "bytes", tag = "1")]
    pub block_hash: Bytes,
    /// The block number.
    #[prost(uint64, tag = "2")]
    pub block_number: u64,
}

/// Request parameters for a state trie proof.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StateReq {
    /// The block the state is read at.
    #[prost(message, optional, tag = "1")]
    pub block: Option<BlockReq>,
    /// The state or storage trie root.
    #[prost(bytes = "bytes", tag = "2")]
    pub root: Bytes,
    /// The trie key.
    #[prost(bytes = "bytes", tag = "3")]
    pub key: Bytes,
}

/// Request parameters for contract code.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CodeReq {
    /// The block the code is read at.
    #[prost(message, optional, tag = "1")]
    pub block: Option<BlockReq>,
    /// Hash of the code.
    #[prost(bytes = "bytes", tag = "2")]
    pub code_hash: Bytes,
}

/// Request parameters for a helper trie proof.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HelperTrieReq {
    /// 1 for the canonical hash trie, 2 for the bloom trie.
    #[prost(uint32, tag = "1")]
    pub kind: u32,
    /// The section index.
    #[prost(uint64, tag = "2")]
    pub section: u64,
    /// The trie key.
    #[prost(bytes = "bytes", tag = "3")]
    pub key: Bytes,
}
