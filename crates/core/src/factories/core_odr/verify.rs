//! Local verification of reply payloads against trusted roots.
//!
//! Each function decodes the payload for one request kind and checks it
//! against the root carried by the request. Anything that does not check
//! out is an [LodrError::InvalidProof] blamed on the replying peer.

use bytes::Bytes;
use lodr_api::{protocol::*, trie, *};
use prost::Message;

/// Verify a reply payload for `request` received from `peer`.
pub(crate) fn verify(
    request: &Request,
    peer: &PeerId,
    data: Bytes,
) -> LodrResult<Verified> {
    let bad = |ctx: String| LodrError::invalid_proof(peer.clone(), ctx);

    match request {
        Request::HeaderRange {
            anchor,
            anchor_number,
            count,
        } => headers(*anchor, *anchor_number, *count, data).map_err(bad),
        Request::Body {
            transactions_root,
            ommers_hash,
            ..
        } => body(transactions_root, ommers_hash, data).map_err(bad),
        Request::Receipts { receipts_root, .. } => {
            receipts(receipts_root, data).map_err(bad)
        }
        Request::StateProof { root, key, .. } => {
            state(root, key, data).map_err(bad)
        }
        Request::Code { code_hash, .. } => code(code_hash, data).map_err(bad),
        Request::HelperTrieProof {
            kind: HelperTrieKind::Cht,
            root,
            key,
            ..
        } => cht(root, key, data).map_err(bad),
        Request::HelperTrieProof {
            kind: HelperTrieKind::BloomTrie,
            root,
            key,
            ..
        } => bloom_bits(root, key, data).map_err(bad),
    }
}

type VerifyResult = Result<Verified, String>;

fn decode<M: Message + Default>(data: Bytes) -> Result<M, String> {
    M::decode(data).map_err(|e| format!("undecodable reply: {e}"))
}

fn headers(
    anchor: Hash,
    anchor_number: u64,
    count: u64,
    data: Bytes,
) -> VerifyResult {
    let msg: HeadersMsg = decode(data)?;
    if msg.headers.len() as u64 != count {
        return Err(format!(
            "expected {count} headers, got {}",
            msg.headers.len()
        ));
    }

    let headers = msg
        .headers
        .into_iter()
        .map(Header::try_from)
        .collect::<LodrResult<Vec<_>>>()
        .map_err(|e| e.to_string())?;

    let first = count
        .checked_sub(1)
        .and_then(|back| anchor_number.checked_sub(back))
        .ok_or("header range starts before genesis")?;
    for (i, h) in headers.iter().enumerate() {
        if h.number != first + i as u64 {
            return Err(format!(
                "header {i} has number {}, expected {}",
                h.number,
                first + i as u64
            ));
        }
        if i > 0 && h.parent_hash != headers[i - 1].hash() {
            return Err(format!(
                "header {} does not link to its parent",
                h.number
            ));
        }
    }

    match headers.last() {
        Some(last) if last.hash() == anchor => Ok(Verified::Headers(headers)),
        _ => Err("last header does not hash to the anchor".into()),
    }
}

fn body(
    transactions_root: &Hash,
    ommers_hash: &Hash,
    data: Bytes,
) -> VerifyResult {
    let msg: BodyMsg = decode(data)?;
    if trie::ordered_root(&msg.transactions) != *transactions_root {
        return Err("transactions root mismatch".into());
    }
    if trie::ordered_root(&msg.ommers) != *ommers_hash {
        return Err("ommers hash mismatch".into());
    }
    Ok(Verified::Body(Body {
        transactions: msg.transactions,
        ommers: msg.ommers,
    }))
}

fn receipts(receipts_root: &Hash, data: Bytes) -> VerifyResult {
    let msg: ReceiptsMsg = decode(data)?;
    if trie::ordered_root(&msg.receipts) != *receipts_root {
        return Err("receipts root mismatch".into());
    }
    Ok(Verified::Receipts(msg.receipts))
}

fn state(root: &Hash, key: &[u8], data: Bytes) -> VerifyResult {
    let msg: ProofMsg = decode(data)?;
    let value =
        trie::verify_proof(root, key, &msg.nodes).map_err(|e| e.to_string())?;
    Ok(Verified::State(value))
}

fn code(code_hash: &Hash, data: Bytes) -> VerifyResult {
    let msg: CodeMsg = decode(data)?;
    if Hash::digest(&msg.code) != *code_hash {
        return Err("code hash mismatch".into());
    }
    Ok(Verified::Code(msg.code))
}

fn cht(root: &Hash, key: &[u8], data: Bytes) -> VerifyResult {
    let msg: ProofMsg = decode(data)?;
    let value = trie::verify_proof(root, key, &msg.nodes)
        .map_err(|e| e.to_string())?
        .ok_or("canonical hash trie proves the block absent")?;
    let (hash, total_difficulty) = parse_cht_value(&value)
        .ok_or("malformed canonical hash trie value")?;

    let header = msg.header.ok_or("missing header")?;
    let header = Header::try_from(header).map_err(|e| e.to_string())?;
    if header.hash() != hash {
        return Err("header does not match the canonical hash".into());
    }
    if cht_key(header.number) != key {
        return Err("header number does not match the requested block".into());
    }

    Ok(Verified::CanonicalHeader {
        header,
        total_difficulty,
    })
}

fn bloom_bits(root: &Hash, key: &[u8], data: Bytes) -> VerifyResult {
    let msg: ProofMsg = decode(data)?;
    let bits = trie::verify_proof(root, key, &msg.nodes)
        .map_err(|e| e.to_string())?
        .ok_or("bloom trie proves the bits absent")?;
    Ok(Verified::BloomBits(bits))
}
