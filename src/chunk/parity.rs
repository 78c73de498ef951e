//! XOR parity
//!
//! Single-parity only: one parity chunk per stripe, recoverable when exactly
//! one member of the XOR set is absent. Chunks shorter than the stripe's
//! longest member contribute zero bytes past their end.

use bytes::Bytes;

pub struct ParityEngine;

impl ParityEngine {
    /// Compute the parity of a stripe's data chunks.
    ///
    /// Output length is the maximum input length; byte i is the XOR of
    /// byte i of every input that reaches that far.
    pub fn parity(chunks: &[Bytes]) -> Bytes {
        xor_accumulate(chunks)
    }

    /// Rebuild the one absent member of a stripe from the survivors.
    ///
    /// `known` must hold every other member of the XOR set (the remaining
    /// data chunks plus the parity chunk, or all data chunks when the
    /// parity itself is the absent one). With more than one member absent
    /// the result is garbage; callers detect that case and refuse.
    pub fn reconstruct_missing(known: &[Bytes]) -> Bytes {
        xor_accumulate(known)
    }
}

fn xor_accumulate(chunks: &[Bytes]) -> Bytes {
    let len = chunks.iter().map(|c| c.len()).max().unwrap_or(0);
    let mut out = vec![0u8; len];
    for chunk in chunks {
        for (i, byte) in chunk.iter().enumerate() {
            out[i] ^= byte;
        }
    }
    Bytes::from(out)
}
