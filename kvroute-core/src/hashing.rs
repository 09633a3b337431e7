//! Stable block-chain hashing for the prefix index.
//!
//! Each block's hash is a function of its parent's hash and its token
//! bytes, so it can be recomputed identically by any participant (engine,
//! router, tests) given the same tokens and block size. The hash is
//! deliberately not Rust's randomized default hasher: it must be stable
//! across process restarts and, per the wire format, across languages.

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Compute a single block's hash from its (optional) parent hash and token chunk.
///
/// Token ids are encoded as 4-byte big-endian integers so the byte stream
/// (and therefore the hash) is reproducible regardless of the host's
/// native endianness. The parent hash, when present, is prefixed by a
/// `1` tag byte and its own 8 big-endian bytes; a root block (no parent)
/// is tagged `0`, so "no parent" and "parent hash 0" never collide.
#[must_use]
pub fn hash_block(parent_hash: Option<u64>, tokens: &[i32]) -> u64 {
    let mut buf = Vec::with_capacity(1 + 8 + tokens.len() * 4);
    match parent_hash {
        Some(h) => {
            buf.push(1);
            buf.extend_from_slice(&h.to_be_bytes());
        }
        None => buf.push(0),
    }
    for &t in tokens {
        buf.extend_from_slice(&t.to_be_bytes());
    }
    fnv1a64(&buf)
}

/// Chunk `tokens` into fixed-size blocks and compute the chain of hashes,
/// each depending on the previous block's hash. Used by both
/// `MatchPrefix` (with index probing) and `GetPrefixHashes` (without).
///
/// Returns one hash per complete block; a trailing partial block (fewer
/// than `block_size` tokens) is dropped, matching "a block is a fixed-size
/// run of tokens."
#[must_use]
pub fn chunk_and_hash_chain(tokens: &[i32], block_size: usize) -> Vec<u64> {
    if block_size == 0 {
        return Vec::new();
    }
    let num_blocks = tokens.len() / block_size;
    let mut chain = Vec::with_capacity(num_blocks);
    let mut parent: Option<u64> = None;
    for chunk in tokens[..num_blocks * block_size].chunks(block_size) {
        let hash = hash_block(parent, chunk);
        chain.push(hash);
        parent = Some(hash);
    }
    chain
}
