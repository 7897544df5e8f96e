//! Retrieval requests and their verified results.

use crate::{protocol::*, Body, Hash, Header};
use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;

/// The kind of a [Request], i.e. its variant tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    /// A contiguous range of headers ending at a trusted hash.
    HeaderRange,
    /// A block body.
    Body,
    /// The receipts of a block.
    Receipts,
    /// A state or storage trie proof.
    StateProof,
    /// Contract code.
    Code,
    /// A canonical hash trie or bloom trie proof.
    HelperTrieProof,
}

impl RequestKind {
    /// All request kinds.
    pub const ALL: [RequestKind; 6] = [
        Self::HeaderRange,
        Self::Body,
        Self::Receipts,
        Self::StateProof,
        Self::Code,
        Self::HelperTrieProof,
    ];

    /// The minimum protocol version a peer must speak to serve this kind.
    pub fn min_protocol_version(&self) -> u32 {
        match self {
            Self::HelperTrieProof => 2,
            _ => 1,
        }
    }

    /// How many base request timeouts a peer gets to answer this kind.
    pub fn timeout_factor(&self) -> u32 {
        match self {
            Self::StateProof | Self::HelperTrieProof => 2,
            _ => 1,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::HeaderRange => 1,
            Self::Body => 2,
            Self::Receipts => 3,
            Self::StateProof => 4,
            Self::Code => 5,
            Self::HelperTrieProof => 6,
        }
    }
}

/// The helper tries a chain indexer maintains per section.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum HelperTrieKind {
    /// Canonical hash trie: block number to block hash and total difficulty.
    Cht,
    /// Bloom trie: bloom bit index and section to compressed bloom bits.
    BloomTrie,
}

impl HelperTrieKind {
    /// The wire tag.
    pub fn to_wire(&self) -> u32 {
        match self {
            Self::Cht => 1,
            Self::BloomTrie => 2,
        }
    }

    /// Parse the wire tag.
    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Cht),
            2 => Some(Self::BloomTrie),
            _ => None,
        }
    }
}

/// The canonical hash trie key of a block number.
pub fn cht_key(number: u64) -> Bytes {
    Bytes::copy_from_slice(&number.to_be_bytes())
}

/// The canonical hash trie value: the block hash followed by the 16 byte
/// big-endian total difficulty.
pub fn cht_value(hash: &Hash, total_difficulty: u128) -> Bytes {
    let mut out = BytesMut::with_capacity(48);
    out.put_slice(&hash[..]);
    out.put_u128(total_difficulty);
    out.freeze()
}

/// Split a canonical hash trie value into block hash and total difficulty.
pub fn parse_cht_value(value: &[u8]) -> Option<(Hash, u128)> {
    if value.len() != 48 {
        return None;
    }
    let hash = Hash::from_slice(&value[..32])?;
    let td: [u8; 16] = value[32..].try_into().ok()?;
    Some((hash, u128::from_be_bytes(td)))
}

/// The bloom trie key of one bloom bit index in one section.
pub fn bloom_trie_key(bit: u16, section: u64) -> Bytes {
    let mut out = BytesMut::with_capacity(10);
    out.put_u16(bit);
    out.put_u64(section);
    out.freeze()
}

/// An immutable description of data to retrieve, carrying the trusted
/// root it must be verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `count` headers ending at the trusted `anchor` hash.
    HeaderRange {
        /// Hash of the last header.
        anchor: Hash,
        /// Number of the last header.
        anchor_number: u64,
        /// How many headers.
        count: u64,
    },

    /// A block body.
    Body {
        /// The block hash.
        block_hash: Hash,
        /// The block number.
        block_number: u64,
        /// The trusted transactions root.
        transactions_root: Hash,
        /// The trusted ommers root.
        ommers_hash: Hash,
    },

    /// The receipts of a block.
    Receipts {
        /// The block hash.
        block_hash: Hash,
        /// The block number.
        block_number: u64,
        /// The trusted receipts root.
        receipts_root: Hash,
    },

    /// A proof for one key of a state or storage trie.
    StateProof {
        /// The block the state is read at.
        block_hash: Hash,
        /// The block number.
        block_number: u64,
        /// The trusted trie root.
        root: Hash,
        /// The trie key.
        key: Bytes,
    },

    /// Contract code.
    Code {
        /// The block the code is read at.
        block_hash: Hash,
        /// The block number.
        block_number: u64,
        /// The trusted code hash.
        code_hash: Hash,
    },

    /// A proof for one key of a helper trie section.
    HelperTrieProof {
        /// Which helper trie.
        kind: HelperTrieKind,
        /// The section index.
        section: u64,
        /// The trusted section root, from the chain indexer.
        root: Hash,
        /// The trie key.
        key: Bytes,
        /// The lowest head a peer must have announced to know the section.
        min_head: u64,
    },
}

impl Request {
    /// The variant tag.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::HeaderRange { .. } => RequestKind::HeaderRange,
            Self::Body { .. } => RequestKind::Body,
            Self::Receipts { .. } => RequestKind::Receipts,
            Self::StateProof { .. } => RequestKind::StateProof,
            Self::Code { .. } => RequestKind::Code,
            Self::HelperTrieProof { .. } => RequestKind::HelperTrieProof,
        }
    }

    /// The lowest chain head a peer must have announced to serve this.
    pub fn min_head(&self) -> u64 {
        match self {
            Self::HeaderRange { anchor_number, .. } => *anchor_number,
            Self::Body { block_number, .. }
            | Self::Receipts { block_number, .. }
            | Self::StateProof { block_number, .. }
            | Self::Code { block_number, .. } => *block_number,
            Self::HelperTrieProof { min_head, .. } => *min_head,
        }
    }

    /// The wire encoding of the request parameters.
    pub fn encode(&self) -> Bytes {
        fn block(hash: &Hash, number: u64) -> BlockReq {
            BlockReq {
                block_hash: hash.to_bytes(),
                block_number: number,
            }
        }

        match self {
            Self::HeaderRange {
                anchor,
                anchor_number,
                count,
            } => HeaderRangeReq {
                anchor: anchor.to_bytes(),
                anchor_number: *anchor_number,
                count: *count,
            }
            .encode_to_vec(),
            Self::Body {
                block_hash,
                block_number,
                ..
            }
            | Self::Receipts {
                block_hash,
                block_number,
                ..
            } => block(block_hash, *block_number).encode_to_vec(),
            Self::StateProof {
                block_hash,
                block_number,
                root,
                key,
            } => StateReq {
                block: Some(block(block_hash, *block_number)),
                root: root.to_bytes(),
                key: key.clone(),
            }
            .encode_to_vec(),
            Self::Code {
                block_hash,
                block_number,
                code_hash,
            } => CodeReq {
                block: Some(block(block_hash, *block_number)),
                code_hash: code_hash.to_bytes(),
            }
            .encode_to_vec(),
            Self::HelperTrieProof {
                kind, section, key, ..
            } => HelperTrieReq {
                kind: kind.to_wire(),
                section: *section,
                key: key.clone(),
            }
            .encode_to_vec(),
        }
        .into()
    }

    /// The canonical deduplication key.
    ///
    /// Two requests share a key exactly when they ask for the same data
    /// verified against the same root.
    pub fn key(&self) -> RequestKey {
        let mut buf = BytesMut::new();
        buf.put_u8(self.kind().tag());

        let put_bytes = |buf: &mut BytesMut, b: &[u8]| {
            buf.put_u32(b.len() as u32);
            buf.put_slice(b);
        };

        match self {
            Self::HeaderRange {
                anchor,
                anchor_number,
                count,
            } => {
                buf.put_slice(&anchor[..]);
                buf.put_u64(*anchor_number);
                buf.put_u64(*count);
            }
            Self::Body {
                block_hash,
                block_number,
                transactions_root,
                ommers_hash,
            } => {
                buf.put_slice(&block_hash[..]);
                buf.put_u64(*block_number);
                buf.put_slice(&transactions_root[..]);
                buf.put_slice(&ommers_hash[..]);
            }
            Self::Receipts {
                block_hash,
                block_number,
                receipts_root,
            } => {
                buf.put_slice(&block_hash[..]);
                buf.put_u64(*block_number);
                buf.put_slice(&receipts_root[..]);
            }
            Self::StateProof {
                block_hash,
                block_number,
                root,
                key,
            } => {
                buf.put_slice(&block_hash[..]);
                buf.put_u64(*block_number);
                buf.put_slice(&root[..]);
                put_bytes(&mut buf, key);
            }
            Self::Code {
                block_hash,
                block_number,
                code_hash,
            } => {
                buf.put_slice(&block_hash[..]);
                buf.put_u64(*block_number);
                buf.put_slice(&code_hash[..]);
            }
            Self::HelperTrieProof {
                kind,
                section,
                root,
                key,
                min_head,
            } => {
                buf.put_u32(kind.to_wire());
                buf.put_u64(*section);
                buf.put_slice(&root[..]);
                put_bytes(&mut buf, key);
                buf.put_u64(*min_head);
            }
        }

        RequestKey {
            kind: self.kind(),
            digest: Hash::digest(&buf),
        }
    }
}

/// Canonical single-flight key of a [Request].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    /// The request kind.
    pub kind: RequestKind,
    /// Digest over the kind and all request parameters.
    pub digest: Hash,
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{:?}", self.kind, self.digest)
    }
}

/// Data that passed verification against a trusted root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verified {
    /// Headers in ascending order.
    Headers(Vec<Header>),
    /// A block body.
    Body(Body),
    /// Encoded receipts in transaction order.
    Receipts(Vec<Bytes>),
    /// A state trie value, `None` if the key is proven absent.
    State(Option<Bytes>),
    /// Contract code.
    Code(Bytes),
    /// A header proven canonical by a canonical hash trie.
    CanonicalHeader {
        /// The header.
        header: Header,
        /// Total difficulty at this header.
        total_difficulty: u128,
    },
    /// Compressed bloom bits of one bit index for one section.
    BloomBits(Bytes),
}
