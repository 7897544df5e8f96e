//! An in-memory chain that can answer retrieval requests.
//!
//! This is NOT a production module. It is for testing only.
//! It plays the part of a full node's database, so that tests can serve
//! real, verifiable replies through [MemTransport](super::MemTransport).

use bytes::Bytes;
use lodr_api::{protocol::*, trie::Trie, *};
use prost::Message;
use std::collections::HashMap;

/// Number of accounts in the state trie.
pub const ACCOUNT_COUNT: usize = 16;

/// Number of slots in the contract storage trie.
pub const STORAGE_COUNT: usize = 8;

/// Number of bloom bit indices per bloom trie section.
pub const BLOOM_BIT_COUNT: u16 = 8;

/// A deterministic chain of generated blocks plus the tries a full node
/// keeps next to it.
///
/// The state is the same at every block. Every block has at least one
/// transaction. Two chains with different salts share no hashes.
#[derive(Debug)]
pub struct MemChain {
    section_size: u64,
    headers: Vec<Header>,
    bodies: Vec<Body>,
    receipts: Vec<Vec<Bytes>>,
    total_difficulties: Vec<u128>,
    state: Trie,
    storage: Trie,
    code: Bytes,
    cht: Vec<Trie>,
    bloom_trie: Vec<Trie>,
    by_hash: HashMap<Hash, u64>,
}

impl MemChain {
    /// Generate a chain of `len` blocks, with helper trie sections of
    /// `section_size` blocks each.
    pub fn generate(len: u64, section_size: u64, salt: &str) -> Self {
        let code = Bytes::from(format!("code-{salt}"));
        let storage = Trie::build(
            (0..STORAGE_COUNT)
                .map(|i| (storage_key(i), format!("slot-{salt}-{i}"))),
        );
        let state = Trie::build((0..ACCOUNT_COUNT).map(|i| {
            (account_key(i), format!("balance-{salt}-{i}"))
        }));

        let mut headers: Vec<Header> = Vec::new();
        let mut bodies = Vec::new();
        let mut receipts = Vec::new();
        let mut total_difficulties = Vec::new();
        let mut by_hash = HashMap::new();

        for number in 0..len {
            let tx_count = 1 + number % 3;
            let transactions: Vec<Bytes> = (0..tx_count)
                .map(|i| Bytes::from(format!("tx-{salt}-{number}-{i}")))
                .collect();
            let block_receipts: Vec<Bytes> = (0..tx_count)
                .map(|i| Bytes::from(format!("receipt-{salt}-{number}-{i}")))
                .collect();
            let body = Body {
                transactions,
                ommers: Vec::new(),
            };

            let header = Header {
                parent_hash: headers.last().map(|h| h.hash()).unwrap_or_default(),
                number,
                state_root: state.root(),
                transactions_root: trie::ordered_root(&body.transactions),
                receipts_root: trie::ordered_root(&block_receipts),
                ommers_hash: trie::ordered_root(&body.ommers),
                extra: Bytes::from(format!("block-{salt}-{number}")),
            };

            let td = total_difficulties.last().copied().unwrap_or(0)
                + 1_000
                + number as u128;

            by_hash.insert(header.hash(), number);
            headers.push(header);
            bodies.push(body);
            receipts.push(block_receipts);
            total_difficulties.push(td);
        }

        let sections = len / section_size;
        let cht = (0..sections)
            .map(|s| {
                Trie::build((s * section_size..(s + 1) * section_size).map(
                    |n| {
                        (
                            cht_key(n),
                            cht_value(
                                &headers[n as usize].hash(),
                                total_difficulties[n as usize],
                            ),
                        )
                    },
                ))
            })
            .collect();
        let bloom_trie = (0..sections)
            .map(|s| {
                Trie::build((0..BLOOM_BIT_COUNT).map(|bit| {
                    (bloom_trie_key(bit, s), bloom_bits_value(salt, bit, s))
                }))
            })
            .collect();

        Self {
            section_size,
            headers,
            bodies,
            receipts,
            total_difficulties,
            state,
            storage,
            code,
            cht,
            bloom_trie,
            by_hash,
        }
    }

    /// Number of blocks.
    pub fn len(&self) -> u64 {
        self.headers.len() as u64
    }

    /// True if the chain has no blocks.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Blocks per helper trie section.
    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    /// Number of complete helper trie sections.
    pub fn sections(&self) -> u64 {
        self.cht.len() as u64
    }

    /// The header at `number`. Panics if out of range.
    pub fn header(&self, number: u64) -> &Header {
        &self.headers[number as usize]
    }

    /// The head to announce when serving this chain.
    pub fn head(&self) -> HeadInfo {
        self.headers
            .last()
            .map(|h| HeadInfo {
                number: h.number,
                hash: h.hash(),
            })
            .unwrap_or_default()
    }

    /// The body at `number`. Panics if out of range.
    pub fn body(&self, number: u64) -> &Body {
        &self.bodies[number as usize]
    }

    /// The receipts at `number`. Panics if out of range.
    pub fn receipts(&self, number: u64) -> &[Bytes] {
        &self.receipts[number as usize]
    }

    /// The total difficulty at `number`. Panics if out of range.
    pub fn total_difficulty(&self, number: u64) -> u128 {
        self.total_difficulties[number as usize]
    }

    /// The value of account `i` in the state trie.
    pub fn account(&self, i: usize) -> Option<Bytes> {
        self.state.get(&account_key(i))
    }

    /// The root of the contract storage trie.
    pub fn storage_root(&self) -> Hash {
        self.storage.root()
    }

    /// The value of storage slot `i`.
    pub fn storage(&self, i: usize) -> Option<Bytes> {
        self.storage.get(&storage_key(i))
    }

    /// The contract code.
    pub fn code(&self) -> &Bytes {
        &self.code
    }

    /// The contract code hash.
    pub fn code_hash(&self) -> Hash {
        Hash::digest(&self.code)
    }

    /// The canonical hash trie root of a complete section.
    pub fn cht_root(&self, section: u64) -> Option<Hash> {
        self.cht.get(section as usize).map(|t| t.root())
    }

    /// The bloom trie root of a complete section.
    pub fn bloom_trie_root(&self, section: u64) -> Option<Hash> {
        self.bloom_trie.get(section as usize).map(|t| t.root())
    }

    /// The compressed bloom bits stored for `bit` in `section`.
    pub fn bloom_bits(&self, bit: u16, section: u64) -> Option<Bytes> {
        self.bloom_trie
            .get(section as usize)?
            .get(&bloom_trie_key(bit, section))
    }

    fn block_number(&self, req: &BlockReq) -> Option<u64> {
        let hash = Hash::from_slice(&req.block_hash)?;
        let number = *self.by_hash.get(&hash)?;
        (number == req.block_number).then_some(number)
    }

    /// Answer an encoded request the way an honest full node would.
    ///
    /// Returns `None` if this chain does not have the data.
    pub fn answer(&self, kind: RequestKind, data: &[u8]) -> Option<Bytes> {
        let out = match kind {
            RequestKind::HeaderRange => {
                let req = HeaderRangeReq::decode(data).ok()?;
                let last = self.headers.get(req.anchor_number as usize)?;
                if last.hash().to_bytes() != req.anchor
                    || req.count == 0
                    || req.count > req.anchor_number + 1
                {
                    return None;
                }
                let first = (req.anchor_number + 1 - req.count) as usize;
                HeadersMsg {
                    headers: self.headers
                        [first..=req.anchor_number as usize]
                        .iter()
                        .map(HeaderMsg::from)
                        .collect(),
                }
                .encode_to_vec()
            }
            RequestKind::Body => {
                let req = BlockReq::decode(data).ok()?;
                let body = self.body(self.block_number(&req)?);
                BodyMsg {
                    transactions: body.transactions.clone(),
                    ommers: body.ommers.clone(),
                }
                .encode_to_vec()
            }
            RequestKind::Receipts => {
                let req = BlockReq::decode(data).ok()?;
                ReceiptsMsg {
                    receipts: self.receipts(self.block_number(&req)?).to_vec(),
                }
                .encode_to_vec()
            }
            RequestKind::StateProof => {
                let req = StateReq::decode(data).ok()?;
                self.block_number(&req.block?)?;
                let root = Hash::from_slice(&req.root)?;
                let trie = if root == self.state.root() {
                    &self.state
                } else if root == self.storage.root() {
                    &self.storage
                } else {
                    return None;
                };
                ProofMsg {
                    nodes: trie.prove(&req.key),
                    header: None,
                }
                .encode_to_vec()
            }
            RequestKind::Code => {
                let req = CodeReq::decode(data).ok()?;
                self.block_number(&req.block?)?;
                if Hash::from_slice(&req.code_hash)? != self.code_hash() {
                    return None;
                }
                CodeMsg {
                    code: self.code.clone(),
                }
                .encode_to_vec()
            }
            RequestKind::HelperTrieProof => {
                let req = HelperTrieReq::decode(data).ok()?;
                match HelperTrieKind::from_wire(req.kind)? {
                    HelperTrieKind::Cht => {
                        let trie = self.cht.get(req.section as usize)?;
                        let number: [u8; 8] = req.key[..].try_into().ok()?;
                        let header =
                            self.headers.get(u64::from_be_bytes(number) as usize)?;
                        ProofMsg {
                            nodes: trie.prove(&req.key),
                            header: Some(HeaderMsg::from(header)),
                        }
                        .encode_to_vec()
                    }
                    HelperTrieKind::BloomTrie => {
                        let trie = self.bloom_trie.get(req.section as usize)?;
                        ProofMsg {
                            nodes: trie.prove(&req.key),
                            header: None,
                        }
                        .encode_to_vec()
                    }
                }
            }
        };
        Some(out.into())
    }
}

/// The state trie key of account `i`.
pub fn account_key(i: usize) -> Bytes {
    Hash::digest(format!("account-{i}")).to_bytes()
}

/// The storage trie key of slot `i`.
pub fn storage_key(i: usize) -> Bytes {
    Hash::digest(format!("slot-{i}")).to_bytes()
}

fn bloom_bits_value(salt: &str, bit: u16, section: u64) -> String {
    format!("bloom-{salt}-{section}-{bit}")
}
