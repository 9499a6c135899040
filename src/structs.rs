use std::{
    fmt::{self, Debug},
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

/// The fixed 8-byte PNG file signature.
pub const HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Length + type + checksum.
pub const CHUNK_OVERHEAD: usize = 12;

pub const IHDR: ChunkType = ChunkType(*b"IHDR");
pub const IDAT: ChunkType = ChunkType(*b"IDAT");
pub const IEND: ChunkType = ChunkType(*b"IEND");
pub const ICCP: ChunkType = ChunkType(*b"iCCP");
pub const ZTXT: ChunkType = ChunkType(*b"zTXt");

/// Checksum of an empty `IEND` chunk.
pub const IEND_CRC: u32 = 0xAE42_6082;

#[derive(Clone, PartialEq, Eq)]
pub struct Data {
    pub data: Vec<u8>,
}

impl Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 32;
        let preview = self
            .data
            .iter()
            .take(PREVIEW)
            .map(|x| format!("0x{:02X}", x))
            .collect::<Vec<_>>()
            .join(", ");
        if self.data.len() > PREVIEW {
            write!(f, "[{}, .. {} more]", preview, self.data.len() - PREVIEW)
        } else {
            write!(f, "[{}]", preview)
        }
    }
}

/// A four byte chunk tag such as `IHDR` or `zTXt`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    pub fn new(tag: &[u8]) -> Result<ChunkType> {
        let bytes: [u8; 4] = tag
            .try_into()
            .map_err(|_| Error::InvalidChunkType { len: tag.len() })?;
        Ok(ChunkType(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Critical chunks have an uppercase first letter (bit 5 clear).
    pub fn is_critical(&self) -> bool {
        self.0[0] & 0x20 == 0
    }

    pub fn is_ancillary(&self) -> bool {
        !self.is_critical()
    }
}

impl TryFrom<&[u8]> for ChunkType {
    type Error = Error;

    fn try_from(tag: &[u8]) -> Result<ChunkType> {
        ChunkType::new(tag)
    }
}

impl Debug for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.escape_ascii())
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

/// A framed chunk. Length and checksum are derived from the payload when the
/// chunk is built and cannot be changed afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    size: u32,
    name: ChunkType,
    data: Data,
    crc: u32,
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chunk {{
    Size:\t {}
    Name:\t{:?}
    Data:\t{:?}
    CRC:\t{:08X}
}}",
            self.size, self.name, self.data, self.crc
        )
    }
}

impl Chunk {
    pub fn crc(name: &ChunkType, data: &[u8]) -> u32 {
        crc32_seeded(name.as_bytes(), data)
    }

    pub fn check_crc(&self) -> bool {
        Chunk::crc(&self.name, self.data()) == self.crc
    }

    pub fn from_data(name: ChunkType, data: impl Into<Vec<u8>>) -> Result<Chunk> {
        let data = data.into();
        let size = payload_len(data.len())?;
        Ok(Chunk {
            size,
            crc: Chunk::crc(&name, &data),
            name,
            data: Data { data },
        })
    }

    pub fn end() -> Chunk {
        Chunk {
            size: 0,
            name: IEND,
            data: Data { data: Vec::new() },
            crc: IEND_CRC,
        }
    }

    pub fn name(&self) -> ChunkType {
        self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data.data
    }

    /// Value of the length field.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Value of the checksum field.
    pub fn stored_crc(&self) -> u32 {
        self.crc
    }

    /// Size of the serialized chunk, framing included.
    pub fn chunk_size(&self) -> usize {
        self.size as usize + CHUNK_OVERHEAD
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = Vec::with_capacity(self.chunk_size());
        res.extend_from_slice(&self.size.to_be_bytes());
        res.extend_from_slice(self.name.as_bytes());
        res.extend_from_slice(self.data());
        res.extend_from_slice(&self.crc.to_be_bytes());
        res
    }
}

/// CRC-32 over `tag ++ payload` without concatenating the two.
pub fn crc32_seeded(tag: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(tag);
    hasher.update(payload);
    hasher.finalize()
}

pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::PayloadTooLarge { len })
}

/// Frames `payload` as a chunk of type `tag`.
pub fn encode_chunk(tag: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let name = ChunkType::try_from(tag)?;
    // Reject before copying the payload into a chunk.
    payload_len(payload.len())?;
    Ok(Chunk::from_data(name, payload)?.to_bytes())
}

/// Parses one chunk off the front of `buffer`, returning it with the number
/// of bytes consumed. Fails if the stored checksum does not match.
pub fn decode_chunk(buffer: &[u8]) -> Result<(Chunk, usize)> {
    let (length_buf, rest) = take_bytes(buffer, 4)?;
    let size = bytes_to_u32(length_buf);
    let (name_buf, rest) = take_bytes(rest, 4)?;
    let name = ChunkType::try_from(name_buf)?;
    let (data, rest) = take_bytes(rest, size as usize)?;
    let (crc_buf, _) = take_bytes(rest, 4)?;
    let crc = bytes_to_u32(crc_buf);

    let chunk = Chunk {
        size,
        name,
        data: Data {
            data: data.to_vec(),
        },
        crc,
    };
    if !chunk.check_crc() {
        return Err(Error::ChecksumMismatch {
            expected: crc,
            actual: Chunk::crc(&name, data),
        });
    }
    let consumed = chunk.chunk_size();
    Ok((chunk, consumed))
}

/// Splits a whole file into its chunks after checking the signature.
pub fn split_chunks(buffer: &[u8]) -> Result<Vec<Chunk>> {
    let (signature, mut rest) = take_bytes(buffer, HEADER.len())?;
    if signature != HEADER {
        return Err(Error::Decode("bad signature"));
    }
    let mut chunks = Vec::new();
    while !rest.is_empty() {
        let (chunk, consumed) = decode_chunk(rest)?;
        rest = &rest[consumed..];
        chunks.push(chunk);
    }
    Ok(chunks)
}

fn bytes_to_u32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, &x| (acc << 8) + x as u32)
}

fn take_bytes(buffer: &[u8], count: usize) -> Result<(&[u8], &[u8])> {
    if buffer.len() < count {
        return Err(Error::Decode("truncated chunk"));
    }
    Ok(buffer.split_at(count))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourType {
    Grayscale,
    RGB,
    Palette,
    GrayscaleAlpha,
    RGBAlpha,
}

impl ColourType {
    pub fn valid_bit_depth(&self, bit_depth: u8) -> bool {
        match self {
            ColourType::Grayscale => [1, 2, 4, 8, 16].contains(&bit_depth),
            ColourType::RGB => [8, 16].contains(&bit_depth),
            ColourType::Palette => [1, 2, 4, 8].contains(&bit_depth),
            ColourType::GrayscaleAlpha => [8, 16].contains(&bit_depth),
            ColourType::RGBAlpha => [8, 16].contains(&bit_depth),
        }
    }

    pub fn get_code(&self) -> u8 {
        match self {
            ColourType::Grayscale => 0,
            ColourType::RGB => 2,
            ColourType::Palette => 3,
            ColourType::GrayscaleAlpha => 4,
            ColourType::RGBAlpha => 6,
        }
    }

    pub fn channels(&self) -> u8 {
        match self {
            ColourType::Grayscale | ColourType::Palette => 1,
            ColourType::GrayscaleAlpha => 2,
            ColourType::RGB => 3,
            ColourType::RGBAlpha => 4,
        }
    }
}

/// Payload of the `IHDR` chunk. Serialized field by field in declaration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ihdr {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub colour_type: ColourType,
    pub compression: u8,
    pub filter: u8,
    pub interlace: u8,
}

impl Ihdr {
    pub const LEN: usize = 13;

    pub fn new(width: u32, height: u32, bit_depth: u8, colour_type: ColourType) -> Ihdr {
        if !colour_type.valid_bit_depth(bit_depth) {
            tracing::warn!(
                ?colour_type,
                bit_depth,
                "nominal header uses a bit depth not allowed for its colour type"
            );
        }
        Ihdr {
            width,
            height,
            bit_depth,
            colour_type,
            compression: 0, // Type 0 compression
            filter: 0,      // Type 0 filtering
            interlace: 0,   // No interlacing
        }
    }

    /// Bytes of pixel data in one row, not counting the filter byte.
    pub fn bytes_per_row(&self) -> u64 {
        let bits_per_row =
            self.width as u64 * self.bit_depth as u64 * self.colour_type.channels() as u64;
        bits_per_row.div_ceil(8)
    }

    pub fn to_bytes(&self) -> [u8; Ihdr::LEN] {
        let mut res = [0u8; Ihdr::LEN];
        res[0..4].copy_from_slice(&self.width.to_be_bytes());
        res[4..8].copy_from_slice(&self.height.to_be_bytes());
        res[8] = self.bit_depth;
        res[9] = self.colour_type.get_code();
        res[10] = self.compression;
        res[11] = self.filter;
        res[12] = self.interlace;
        res
    }

    /// Reads back width and height from a header payload.
    pub fn dimensions(payload: &[u8]) -> Result<(u32, u32)> {
        if payload.len() != Ihdr::LEN {
            return Err(Error::Decode("IHDR chunk wrong size"));
        }
        Ok((bytes_to_u32(&payload[0..4]), bytes_to_u32(&payload[4..8])))
    }

    pub fn to_chunk(&self) -> Chunk {
        Chunk {
            size: Ihdr::LEN as u32,
            name: IHDR,
            crc: Chunk::crc(&IHDR, &self.to_bytes()),
            data: Data {
                data: self.to_bytes().to_vec(),
            },
        }
    }
}

/// An output file: signature, header, body chunks and terminator.
#[derive(Debug)]
pub struct PNG {
    header: [u8; 8],
    pub ihdr: Ihdr,
    pub chunks: Vec<Chunk>,
    end: Chunk,
}

impl PNG {
    pub fn new(ihdr: Ihdr) -> PNG {
        PNG {
            header: HEADER,
            ihdr,
            chunks: Vec::new(),
            end: Chunk::end(),
        }
    }

    pub fn push(&mut self, chunk: Chunk) -> &mut PNG {
        self.chunks.push(chunk);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut framed = Vec::with_capacity(self.chunks.len() + 2);
        framed.push(self.ihdr.to_chunk().to_bytes());
        for chunk in &self.chunks {
            tracing::debug!(name = %chunk.name, size = chunk.size, "appending chunk");
            framed.push(chunk.to_bytes());
        }
        framed.push(self.end.to_bytes());
        assemble(&self.header, &framed)
    }

    /// Serializes the whole file and writes it to `filepath`.
    pub fn save(&self, filepath: &Path) -> Result<usize> {
        let bytes = self.to_bytes();
        write_file(filepath, &bytes)?;
        Ok(bytes.len())
    }
}

/// Concatenates a signature and already framed chunks.
pub fn assemble<C: AsRef<[u8]>>(signature: &[u8], chunks: &[C]) -> Vec<u8> {
    let total_size = signature.len() + chunks.iter().map(|c| c.as_ref().len()).sum::<usize>();
    let mut result = Vec::with_capacity(total_size);
    result.extend_from_slice(signature);
    for chunk in chunks {
        result.extend_from_slice(chunk.as_ref());
    }
    result
}

/// Writes `bytes` to a sibling temp file and renames it over `filepath`, so
/// a failed write never leaves a truncated file at the destination.
pub fn write_file(filepath: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(filepath);
    let write = || -> io::Result<()> {
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, filepath)
    };

    write().map_err(|source| {
        let _ = fs::remove_file(&tmp);
        Error::Write {
            path: filepath.to_path_buf(),
            source,
        }
    })
}

fn tmp_path(filepath: &Path) -> PathBuf {
    let mut name = filepath
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "out".into());
    name.push(".tmp");
    filepath.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise CRC-32 (reflected, polynomial 0xEDB88320).
    fn reference_crc(bytes: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in bytes {
            crc ^= byte as u32;
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    #[test]
    fn iend_checksum_is_well_known() {
        assert_eq!(crc32(b"IEND"), IEND_CRC);
        assert_eq!(Chunk::from_data(IEND, Vec::new()).unwrap(), Chunk::end());
    }

    #[test]
    fn seeded_crc_matches_reference() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let mut joined = b"zTXt".to_vec();
        joined.extend_from_slice(&payload);
        assert_eq!(crc32_seeded(b"zTXt", &payload), reference_crc(&joined));
        assert_eq!(crc32(&joined), reference_crc(&joined));
    }

    #[test]
    fn encode_layout() {
        let bytes = encode_chunk(b"tEXt", b"abc").unwrap();
        assert_eq!(bytes.len(), 3 + CHUNK_OVERHEAD);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 3]);
        assert_eq!(&bytes[4..8], b"tEXt");
        assert_eq!(&bytes[8..11], b"abc");
        assert_eq!(&bytes[11..], &reference_crc(b"tEXtabc").to_be_bytes());
    }

    #[test]
    fn encode_then_decode() {
        for payload in [Vec::new(), vec![0u8; 1], b"Comment\0\0xyz".to_vec()] {
            let bytes = encode_chunk(b"zTXt", &payload).unwrap();
            let (chunk, consumed) = decode_chunk(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(chunk.name, ZTXT);
            assert_eq!(chunk.data(), &payload[..]);
            assert_eq!(chunk.to_bytes(), bytes);
        }
    }

    #[test]
    fn decode_rejects_corrupt_checksum() {
        let mut bytes = encode_chunk(b"IDAT", b"pixels").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode_chunk(&bytes),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_truncation() {
        let bytes = encode_chunk(b"IDAT", b"pixels").unwrap();
        assert!(matches!(
            decode_chunk(&bytes[..bytes.len() - 2]),
            Err(Error::Decode(_))
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_payload_is_rejected() {
        let len = u32::MAX as usize + 1;
        let payload = vec![0u8; len];
        assert!(matches!(
            encode_chunk(b"IDAT", &payload),
            Err(Error::PayloadTooLarge { len: l }) if l == len
        ));
        assert!(matches!(
            Chunk::from_data(IDAT, payload),
            Err(Error::PayloadTooLarge { len: l }) if l == len
        ));
    }

    #[test]
    fn framing_fields_follow_payload() {
        let chunk = Chunk::from_data(ZTXT, b"Comment\0\0".to_vec()).unwrap();
        assert_eq!(chunk.name(), ZTXT);
        assert_eq!(chunk.size(), 9);
        assert_eq!(chunk.stored_crc(), reference_crc(b"zTXtComment\0\0"));
        assert_eq!(chunk.chunk_size(), chunk.to_bytes().len());
        assert!(chunk.check_crc());
    }

    #[test]
    fn short_chunk_type_is_rejected() {
        assert!(matches!(
            encode_chunk(b"AB", b"payload"),
            Err(Error::InvalidChunkType { len: 2 })
        ));
        assert!(matches!(
            ChunkType::new(b"IHDRX"),
            Err(Error::InvalidChunkType { len: 5 })
        ));
    }

    #[test]
    fn critical_and_ancillary() {
        assert!(IHDR.is_critical());
        assert!(IDAT.is_critical());
        assert!(ICCP.is_ancillary());
        assert!(ZTXT.is_ancillary());
    }

    #[test]
    fn ihdr_field_order() {
        let ihdr = Ihdr::new(0x0102_0304, 0x0A0B_0C0D, 1, ColourType::Grayscale);
        assert_eq!(
            ihdr.to_bytes(),
            [1, 2, 3, 4, 0x0A, 0x0B, 0x0C, 0x0D, 1, 0, 0, 0, 0]
        );
        assert_eq!(
            Ihdr::dimensions(&ihdr.to_bytes()).unwrap(),
            (0x0102_0304, 0x0A0B_0C0D)
        );
    }

    #[test]
    fn bytes_per_row_rounds_up() {
        assert_eq!(Ihdr::new(1, 1, 1, ColourType::Grayscale).bytes_per_row(), 1);
        assert_eq!(Ihdr::new(9, 1, 1, ColourType::Grayscale).bytes_per_row(), 2);
        assert_eq!(Ihdr::new(1 << 15, 1, 1, ColourType::Grayscale).bytes_per_row(), 4096);
        assert_eq!(Ihdr::new(3, 1, 8, ColourType::RGB).bytes_per_row(), 9);
    }

    #[test]
    fn png_bytes_match_assembled_chunks() {
        let ihdr = Ihdr::new(1, 1, 1, ColourType::Grayscale);
        let mut png = PNG::new(ihdr);
        png.push(Chunk::from_data(IDAT, vec![1, 2, 3]).unwrap());

        let assembled = assemble(
            &HEADER,
            &[
                encode_chunk(b"IHDR", &ihdr.to_bytes()).unwrap(),
                encode_chunk(b"IDAT", &[1, 2, 3]).unwrap(),
                encode_chunk(b"IEND", &[]).unwrap(),
            ],
        );
        assert_eq!(png.to_bytes(), assembled);

        let chunks = split_chunks(&assembled).unwrap();
        let names: Vec<_> = chunks.iter().map(|c| c.name).collect();
        assert_eq!(names, [IHDR, IDAT, IEND]);
    }

    #[test]
    fn save_writes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let written = PNG::new(Ihdr::new(1, 1, 1, ColourType::Grayscale))
            .save(&path)
            .unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), written);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.png");
        let err = write_file(&path, b"bytes").unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(!path.exists());
    }
}
