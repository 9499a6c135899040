//! Generator for PNG files whose compressed chunks inflate to far more data
//! than the file holds, for testing how image consumers cope with
//! decompression bombs.

pub mod compress;
pub mod error;
pub mod recipes;
pub mod structs;

pub use compress::{compress_repeated, BombPayload, CompressOptions, Level, RepeatCompressor};
pub use error::{Error, Result};
pub use recipes::{
    generate_all, AncillaryBomb, AncillaryKind, Bomb, BombReport, GeneratorConfig, PixelBomb,
};
pub use structs::{
    assemble, crc32, crc32_seeded, decode_chunk, encode_chunk, split_chunks, write_file, Chunk,
    ChunkType, ColourType, Ihdr, HEADER, PNG,
};
