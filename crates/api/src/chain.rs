//! Chain data types: headers, bodies and announced heads.

use crate::{protocol::HeaderMsg, Hash, LodrError, LodrResult};
use bytes::Bytes;
use prost::Message;

/// A block header.
///
/// Headers reach the retrieval core already trusted (through the header
/// chain or a canonical hash trie proof). The roots they carry are what
/// body, receipt and state replies are verified against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Hash of the parent header.
    pub parent_hash: Hash,
    /// Block number.
    pub number: u64,
    /// Root of the state trie after this block.
    pub state_root: Hash,
    /// Ordered root of the block's transactions.
    pub transactions_root: Hash,
    /// Ordered root of the block's receipts.
    pub receipts_root: Hash,
    /// Ordered root of the block's ommer headers.
    pub ommers_hash: Hash,
    /// Opaque consensus data.
    pub extra: Bytes,
}

impl Header {
    /// The canonical encoding. The header hash commits to these bytes.
    pub fn encode(&self) -> Bytes {
        HeaderMsg::from(self).encode_to_vec().into()
    }

    /// Decode a header from its canonical encoding.
    pub fn decode(data: &[u8]) -> LodrResult<Self> {
        let msg = HeaderMsg::decode(data)
            .map_err(|e| LodrError::other_src("could not decode header", e))?;
        Self::try_from(msg)
    }

    /// The header hash.
    pub fn hash(&self) -> Hash {
        Hash::digest(self.encode())
    }
}

impl From<&Header> for HeaderMsg {
    fn from(h: &Header) -> Self {
        Self {
            parent_hash: h.parent_hash.to_bytes(),
            number: h.number,
            state_root: h.state_root.to_bytes(),
            transactions_root: h.transactions_root.to_bytes(),
            receipts_root: h.receipts_root.to_bytes(),
            ommers_hash: h.ommers_hash.to_bytes(),
            extra: h.extra.clone(),
        }
    }
}

impl TryFrom<HeaderMsg> for Header {
    type Error = LodrError;

    fn try_from(m: HeaderMsg) -> LodrResult<Self> {
        fn h(name: &str, b: &[u8]) -> LodrResult<Hash> {
            Hash::from_slice(b).ok_or_else(|| {
                LodrError::other(format!("header field {name} is not a hash"))
            })
        }

        Ok(Self {
            parent_hash: h("parent_hash", &m.parent_hash)?,
            number: m.number,
            state_root: h("state_root", &m.state_root)?,
            transactions_root: h("transactions_root", &m.transactions_root)?,
            receipts_root: h("receipts_root", &m.receipts_root)?,
            ommers_hash: h("ommers_hash", &m.ommers_hash)?,
            extra: m.extra,
        })
    }
}

/// A block body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    /// Encoded transactions.
    pub transactions: Vec<Bytes>,
    /// Encoded ommer headers.
    pub ommers: Vec<Bytes>,
}

/// The chain head a peer announced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadInfo {
    /// Head block number.
    pub number: u64,
    /// Head block hash.
    pub hash: Hash,
}
