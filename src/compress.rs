//! Zlib streams that inflate to one block repeated many times.
//!
//! The whole point is that the repeats go through a single encoder: the
//! LZ77 window still holds the previous copy of the block when the next one
//! arrives, so every repeat after the first is emitted as back-references.
//! Nothing ever holds more than one block of uncompressed input.

use std::io::Write;

use libflate::{
    lz77::DefaultLz77Encoder,
    zlib::{EncodeOptions, Encoder},
};

use crate::error::{Error, Result};

/// Largest window deflate can address.
pub const MAX_WINDOW_SIZE: u16 = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Stored blocks, no amplification at all.
    Store,
    /// LZ77 with fixed Huffman codes.
    Fast,
    /// LZ77 with dynamic Huffman codes.
    Best,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub level: Level,
    /// Size of the match window. Bigger windows catch repeats further back.
    pub window_size: u16,
}

impl Default for CompressOptions {
    fn default() -> Self {
        CompressOptions {
            level: Level::Best,
            window_size: MAX_WINDOW_SIZE,
        }
    }
}

impl CompressOptions {
    fn encode_options(&self) -> EncodeOptions<DefaultLz77Encoder> {
        let lz77 = DefaultLz77Encoder::with_window_size(self.window_size.min(MAX_WINDOW_SIZE));
        let options = EncodeOptions::with_lz77(lz77);
        match self.level {
            Level::Store => options.no_compression(),
            Level::Fast => options.fixed_huffman_codes(),
            Level::Best => options,
        }
    }
}

/// One compression context. Feed it bytes, then `finish` it.
pub struct RepeatCompressor {
    encoder: Encoder<Vec<u8>, DefaultLz77Encoder>,
    fed: u64,
}

impl RepeatCompressor {
    pub fn new(options: CompressOptions) -> Result<RepeatCompressor> {
        let encoder =
            Encoder::with_options(Vec::new(), options.encode_options()).map_err(Error::Compress)?;
        Ok(RepeatCompressor { encoder, fed: 0 })
    }

    /// Pushes `bytes` through the context and returns whatever compressed
    /// output it produced so far.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.encoder.write_all(bytes).map_err(Error::Compress)?;
        self.fed += bytes.len() as u64;
        Ok(std::mem::take(self.encoder.as_inner_mut()))
    }

    /// Number of uncompressed bytes fed so far.
    pub fn fed(&self) -> u64 {
        self.fed
    }

    /// Flushes the stream and returns the remaining output.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.encoder.finish().into_result().map_err(Error::Compress)
    }
}

/// Compressed bytes together with the size they inflate to.
#[derive(Clone, PartialEq, Eq)]
pub struct BombPayload {
    pub bytes: Vec<u8>,
    /// Can exceed 4 GiB; never use it to size a buffer.
    pub logical_len: u64,
}

impl std::fmt::Debug for BombPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BombPayload")
            .field("compressed_len", &self.bytes.len())
            .field("logical_len", &self.logical_len)
            .finish()
    }
}

impl BombPayload {
    pub fn ratio(&self) -> f64 {
        if self.bytes.is_empty() {
            return 0.0;
        }
        self.logical_len as f64 / self.bytes.len() as f64
    }
}

/// Compresses `block` repeated `repeat_count` times through one context.
pub fn compress_repeated(
    block: &[u8],
    repeat_count: u64,
    options: CompressOptions,
) -> Result<BombPayload> {
    let logical_len = (block.len() as u64)
        .checked_mul(repeat_count)
        .ok_or(Error::LogicalSizeOverflow)?;

    let mut compressor = RepeatCompressor::new(options)?;
    let mut bytes = Vec::new();
    if !block.is_empty() {
        for _ in 0..repeat_count {
            bytes.extend(compressor.feed(block)?);
        }
    }
    debug_assert_eq!(compressor.fed(), logical_len);
    bytes.extend(compressor.finish()?);

    tracing::debug!(
        block_len = block.len(),
        repeat_count,
        compressed_len = bytes.len(),
        logical_len,
        "compressed repeated block"
    );
    Ok(BombPayload { bytes, logical_len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use libflate::zlib::Decoder;
    use std::io::Read;

    fn inflate(bytes: &[u8]) -> Vec<u8> {
        let mut decoder = Decoder::new(bytes).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn inflates_to_repeated_block() {
        let block: Vec<u8> = (0..300u32).map(|i| (i * 7 % 256) as u8).collect();
        for count in [1u64, 2, 17, 200] {
            let payload = compress_repeated(&block, count, CompressOptions::default()).unwrap();
            assert_eq!(payload.logical_len, 300 * count);
            let out = inflate(&payload.bytes);
            assert_eq!(out.len() as u64, payload.logical_len);
            assert!(out.chunks(block.len()).all(|c| c == &block[..]));
        }
    }

    #[test]
    fn every_level_round_trips() {
        let block = b"\x04\xff\xff\xff\xff";
        for level in [Level::Store, Level::Fast, Level::Best] {
            let options = CompressOptions {
                level,
                window_size: 1024,
            };
            let payload = compress_repeated(block, 50, options).unwrap();
            assert_eq!(inflate(&payload.bytes), block.repeat(50));
        }
    }

    #[test]
    fn zero_repeats_is_an_empty_stream() {
        let payload = compress_repeated(b"abc", 0, CompressOptions::default()).unwrap();
        assert_eq!(payload.logical_len, 0);
        assert!(!payload.bytes.is_empty());
        assert!(inflate(&payload.bytes).is_empty());
    }

    #[test]
    fn empty_block_is_an_empty_stream() {
        let payload = compress_repeated(b"", 1_000_000, CompressOptions::default()).unwrap();
        assert_eq!(payload.logical_len, 0);
        assert!(inflate(&payload.bytes).is_empty());
    }

    #[test]
    fn logical_size_overflow() {
        assert!(matches!(
            compress_repeated(b"ab", u64::MAX, CompressOptions::default()),
            Err(Error::LogicalSizeOverflow)
        ));
    }

    #[test]
    fn feed_and_finish_by_hand() {
        let mut compressor = RepeatCompressor::new(CompressOptions::default()).unwrap();
        let mut bytes = Vec::new();
        for _ in 0..64 {
            bytes.extend(compressor.feed(&[b'a'; 4096]).unwrap());
        }
        assert_eq!(compressor.fed(), 64 * 4096);
        bytes.extend(compressor.finish().unwrap());
        assert_eq!(inflate(&bytes), vec![b'a'; 64 * 4096]);
    }

    #[test]
    fn compressed_size_grows_slower_than_logical_size() {
        let block: Vec<u8> = b"png-bomb ".iter().copied().cycle().take(1024).collect();
        let sizes: Vec<BombPayload> = [1u64 << 10, 1 << 11, 1 << 12]
            .into_iter()
            .map(|count| compress_repeated(&block, count, CompressOptions::default()).unwrap())
            .collect();

        for payload in &sizes {
            assert!(payload.ratio() > 50.0, "ratio too low: {:?}", payload);
        }

        // Four times the input still compresses to a sliver of the smallest
        // sample's logical size.
        let first = &sizes[0];
        let last = &sizes[sizes.len() - 1];
        assert_eq!(last.logical_len, 4 * first.logical_len);
        assert!((last.bytes.len() as u64) * 10 < first.logical_len);
    }
}
