//! Merkle trie proofs.
//!
//! Keys are split into nibbles and walked from the root through branch
//! (16-way), extension (shared nibbles) and leaf nodes. Every node is
//! referenced by the sha2-256 hash of its protobuf encoding, so a proof is
//! simply the set of encoded nodes on the path from a trusted root to the
//! key. Verification recomputes that hash chain locally; any break in it is
//! a [ProofError], never a panic.

use crate::{
    protocol::{NodeType, TrieNodeMsg},
    Hash,
};
use bytes::Bytes;
use prost::Message;
use std::collections::{BTreeMap, HashMap};

/// Errors produced while walking a trie proof.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// A node referenced on the key's path is not part of the proof.
    #[error("missing trie node {0}")]
    MissingNode(Hash),

    /// A node could not be decoded.
    #[error("undecodable trie node {0}")]
    Undecodable(Hash),

    /// A node decoded but violates the node layout rules.
    #[error("malformed trie node {hash}: {reason}")]
    Malformed {
        /// The offending node.
        hash: Hash,
        /// Which rule it violates.
        reason: &'static str,
    },
}

/// The root of a trie without any entries.
pub fn empty_root() -> Hash {
    Hash::digest(b"")
}

/// Split a key into nibbles, high nibble first.
pub fn nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for b in key {
        out.push(b >> 4);
        out.push(b & 0x0f);
    }
    out
}

/// A decoded trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    /// Terminal node.
    Leaf {
        /// The remaining key nibbles.
        path: Vec<u8>,
        /// The value stored under the key.
        value: Bytes,
    },

    /// Shared key nibbles followed by a single child.
    Extension {
        /// The shared nibbles, never empty.
        path: Vec<u8>,
        /// The child node.
        child: Hash,
    },

    /// One child per nibble plus an optional value for a key ending here.
    Branch {
        /// The children, indexed by nibble.
        children: Box<[Option<Hash>; 16]>,
        /// The value stored under the key ending at this node.
        value: Option<Bytes>,
    },
}

impl TrieNode {
    /// Encode this node. The node hash is the digest of these bytes.
    pub fn encode(&self) -> Bytes {
        let msg = match self {
            Self::Leaf { path, value } => TrieNodeMsg {
                ty: NodeType::Leaf.into(),
                path: Bytes::copy_from_slice(path),
                children: Vec::new(),
                value: value.clone(),
            },
            Self::Extension { path, child } => TrieNodeMsg {
                ty: NodeType::Extension.into(),
                path: Bytes::copy_from_slice(path),
                children: vec![child.to_bytes()],
                value: Bytes::new(),
            },
            Self::Branch { children, value } => TrieNodeMsg {
                ty: NodeType::Branch.into(),
                path: Bytes::new(),
                children: children
                    .iter()
                    .map(|c| c.map(|c| c.to_bytes()).unwrap_or_default())
                    .collect(),
                value: value.clone().unwrap_or_default(),
            },
        };
        msg.encode_to_vec().into()
    }

    /// Decode and validate a node whose hash is already known.
    pub fn decode(hash: Hash, data: &[u8]) -> Result<Self, ProofError> {
        let malformed = |reason| ProofError::Malformed { hash, reason };

        let msg = TrieNodeMsg::decode(data)
            .map_err(|_| ProofError::Undecodable(hash))?;

        if msg.path.iter().any(|n| *n > 0x0f) {
            return Err(malformed("path contains a non-nibble"));
        }

        match msg.ty() {
            NodeType::Unspecified => Err(malformed("unknown node type")),
            NodeType::Leaf => {
                if !msg.children.is_empty() {
                    return Err(malformed("leaf with children"));
                }
                if msg.value.is_empty() {
                    return Err(malformed("leaf without value"));
                }
                Ok(Self::Leaf {
                    path: msg.path.to_vec(),
                    value: msg.value,
                })
            }
            NodeType::Extension => {
                if msg.path.is_empty() {
                    return Err(malformed("extension without path"));
                }
                let [child] = msg.children.as_slice() else {
                    return Err(malformed("extension needs exactly one child"));
                };
                let child = Hash::from_slice(child)
                    .ok_or_else(|| malformed("child is not a hash"))?;
                Ok(Self::Extension {
                    path: msg.path.to_vec(),
                    child,
                })
            }
            NodeType::Branch => {
                if !msg.path.is_empty() {
                    return Err(malformed("branch with path"));
                }
                if msg.children.len() != 16 {
                    return Err(malformed("branch needs 16 children"));
                }
                let mut children = Box::new([None; 16]);
                for (slot, child) in children.iter_mut().zip(&msg.children) {
                    if child.is_empty() {
                        continue;
                    }
                    *slot = Some(
                        Hash::from_slice(child)
                            .ok_or_else(|| malformed("child is not a hash"))?,
                    );
                }
                let value = if msg.value.is_empty() {
                    None
                } else {
                    Some(msg.value)
                };
                Ok(Self::Branch { children, value })
            }
        }
    }
}

/// Walk the key's path from `root`, resolving nodes through `lookup`.
///
/// `visit` sees the encoded bytes of every node on the path, in order.
fn walk<'a>(
    root: &Hash,
    key: &[u8],
    lookup: impl Fn(&Hash) -> Option<&'a Bytes>,
    mut visit: impl FnMut(&'a Bytes),
) -> Result<Option<Bytes>, ProofError> {
    if *root == empty_root() {
        return Ok(None);
    }

    let key = nibbles(key);
    let mut pos = 0;
    let mut expected = *root;

    loop {
        let raw =
            lookup(&expected).ok_or(ProofError::MissingNode(expected))?;
        visit(raw);

        match TrieNode::decode(expected, raw)? {
            TrieNode::Leaf { path, value } => {
                return Ok(if key[pos..] == path[..] {
                    Some(value)
                } else {
                    None
                });
            }
            TrieNode::Extension { path, child } => {
                if !key[pos..].starts_with(&path) {
                    return Ok(None);
                }
                pos += path.len();
                expected = child;
            }
            TrieNode::Branch { children, value } => {
                if pos == key.len() {
                    return Ok(value);
                }
                match children[key[pos] as usize] {
                    None => return Ok(None),
                    Some(child) => {
                        pos += 1;
                        expected = child;
                    }
                }
            }
        }
    }
}

/// Verify a proof for `key` against a trusted `root`.
///
/// Returns `Some(value)` if the proof shows the key is in the trie and
/// `None` if it shows the key is absent.
pub fn verify_proof(
    root: &Hash,
    key: &[u8],
    nodes: &[Bytes],
) -> Result<Option<Bytes>, ProofError> {
    let index: HashMap<Hash, &Bytes> =
        nodes.iter().map(|n| (Hash::digest(n), n)).collect();
    walk(root, key, |h| index.get(h).copied(), |_| ())
}

/// An in-memory trie, built in one go from a set of entries.
///
/// Full nodes use this to answer proof requests. The light client itself
/// only needs it to recompute ordered list roots.
#[derive(Debug, Clone)]
pub struct Trie {
    root: Hash,
    nodes: HashMap<Hash, Bytes>,
}

impl Trie {
    /// Build a trie. Entries with empty values are skipped, later
    /// duplicates of a key replace earlier ones.
    pub fn build<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<[u8]>,
        V: Into<Bytes>,
    {
        let sorted: BTreeMap<Vec<u8>, Bytes> = entries
            .into_iter()
            .map(|(k, v)| {
                let v: Bytes = v.into();
                (nibbles(k.as_ref()), v)
            })
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let sorted: Vec<(Vec<u8>, Bytes)> = sorted.into_iter().collect();

        let mut nodes = HashMap::new();
        let root = if sorted.is_empty() {
            empty_root()
        } else {
            build_node(&sorted, 0, &mut nodes)
        };

        Self { root, nodes }
    }

    /// The trie root.
    pub fn root(&self) -> Hash {
        self.root
    }

    /// Collect the nodes proving the presence or absence of `key`.
    pub fn prove(&self, key: &[u8]) -> Vec<Bytes> {
        let mut out = Vec::new();
        // every referenced node is in the map, the walk cannot fail
        let _ = walk(
            &self.root,
            key,
            |h| self.nodes.get(h),
            |n| out.push(n.clone()),
        );
        out
    }

    /// Look up a key.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        walk(&self.root, key, |h| self.nodes.get(h), |_| ())
            .ok()
            .flatten()
    }
}

fn insert(node: TrieNode, nodes: &mut HashMap<Hash, Bytes>) -> Hash {
    let enc = node.encode();
    let hash = Hash::digest(&enc);
    nodes.insert(hash, enc);
    hash
}

// `entries` is sorted, non-empty and shares the key prefix `[..depth]`.
fn build_node(
    entries: &[(Vec<u8>, Bytes)],
    depth: usize,
    nodes: &mut HashMap<Hash, Bytes>,
) -> Hash {
    if let [(key, value)] = entries {
        return insert(
            TrieNode::Leaf {
                path: key[depth..].to_vec(),
                value: value.clone(),
            },
            nodes,
        );
    }

    // in a sorted list the prefix shared by the first and last entry is
    // shared by all of them
    let first = &entries[0].0;
    let last = &entries[entries.len() - 1].0;
    let mut common = 0;
    while depth + common < first.len()
        && depth + common < last.len()
        && first[depth + common] == last[depth + common]
    {
        common += 1;
    }

    if common > 0 {
        let child = build_node(entries, depth + common, nodes);
        return insert(
            TrieNode::Extension {
                path: first[depth..depth + common].to_vec(),
                child,
            },
            nodes,
        );
    }

    let mut rest = entries;
    let mut value = None;
    if rest[0].0.len() == depth {
        value = Some(rest[0].1.clone());
        rest = &rest[1..];
    }

    let mut children = Box::new([None; 16]);
    while let Some((key, _)) = rest.first() {
        let nibble = key[depth];
        let end = rest
            .iter()
            .position(|(k, _)| k[depth] != nibble)
            .unwrap_or(rest.len());
        children[nibble as usize] =
            Some(build_node(&rest[..end], depth + 1, nodes));
        rest = &rest[end..];
    }

    insert(TrieNode::Branch { children, value }, nodes)
}

/// The trie key of the item at `index` in an ordered list.
pub fn ordered_key(index: usize) -> [u8; 4] {
    (index as u32).to_be_bytes()
}

/// The trie value of an item in an ordered list.
///
/// Items are length prefixed so that an empty item still occupies its
/// slot, and the root commits to the length of the list.
pub fn ordered_value(item: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(4 + item.len());
    out.extend_from_slice(&(item.len() as u32).to_be_bytes());
    out.extend_from_slice(item);
    out.into()
}

/// The root of an ordered list of items, such as the transactions or
/// receipts of a block.
pub fn ordered_root(items: &[Bytes]) -> Hash {
    Trie::build(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| (ordered_key(i), ordered_value(item))),
    )
    .root()
}
