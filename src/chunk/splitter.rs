//! Deterministic byte splitting
//!
//! Round-trip law: concatenating the slices reproduces the original bytes
//! exactly. Slices share the input buffer; no copying happens here.

use bytes::Bytes;

pub struct ChunkSplitter;

impl ChunkSplitter {
    /// Split `data` into fixed-size slices; the final slice may be shorter.
    ///
    /// `chunk_size` must be positive; configurations validate it before
    /// bytes ever reach the splitter.
    pub fn split(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
        debug_assert!(chunk_size > 0);

        let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size.max(1)));
        let mut offset = 0;
        while offset < data.len() {
            let end = std::cmp::min(offset + chunk_size, data.len());
            chunks.push(data.slice(offset..end));
            offset = end;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(chunks: &[Bytes]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    #[test]
    fn test_even_split() {
        let data = Bytes::from_static(b"ABCDEFGH");
        let chunks = ChunkSplitter::split(&data, 4);

        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0][..], b"ABCD");
        assert_eq!(&chunks[1][..], b"EFGH");
    }

    #[test]
    fn test_final_slice_shorter() {
        let data = Bytes::from_static(b"ABCDEFG");
        let chunks = ChunkSplitter::split(&data, 3);

        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[2][..], b"G");
    }

    #[test]
    fn test_round_trip() {
        let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let data = Bytes::from(payload.clone());

        for chunk_size in [1, 7, 256, 4096, 10_000, 20_000] {
            let chunks = ChunkSplitter::split(&data, chunk_size);
            assert_eq!(concat(&chunks), payload, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_empty_input() {
        let chunks = ChunkSplitter::split(&Bytes::new(), 1024);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_slices_share_the_buffer() {
        let data = Bytes::from(vec![0u8; 1024]);
        let chunks = ChunkSplitter::split(&data, 256);

        // Zero-copy: each slice points into the original allocation.
        assert_eq!(chunks[0].as_ptr(), data.as_ptr());
        assert_eq!(chunks[1].as_ptr(), unsafe { data.as_ptr().add(256) });
    }
}
