//! Compression method selection and internal codec streams.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;
use stowaway_core::{Error, Result};

/// Sentinel meaning "no custom compression program".
pub const NO_CUSTOM_COMPRESSION: &str = "none";

/// Built-in codec used when no custom program is requested.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Zstd,
    Gzip,
    Lz4,
    /// Uncompressed tar.
    Tar,
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zstd" => Ok(Codec::Zstd),
            "gzip" => Ok(Codec::Gzip),
            "lz4" => Ok(Codec::Lz4),
            "tar" | "none" => Ok(Codec::Tar),
            other => Err(Error::Validation(format!("Unknown codec: {}", other))),
        }
    }
}

/// Compression applied to a cache archive.
///
/// Must match between save and restore; nothing enforces that across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Zstd,
    Gzip,
    Lz4,
    Tar,
    /// External program handed to the system archiver.
    Custom(String),
}

impl CompressionMethod {
    /// Resolve the method for one operation.
    ///
    /// An absent, blank or `"none"` custom program selects the built-in codec.
    pub fn resolve(codec: Codec, custom: Option<&str>) -> Self {
        match custom.map(str::trim) {
            Some(program) if !program.is_empty() && program != NO_CUSTOM_COMPRESSION => {
                CompressionMethod::Custom(program.to_string())
            }
            _ => match codec {
                Codec::Zstd => CompressionMethod::Zstd,
                Codec::Gzip => CompressionMethod::Gzip,
                Codec::Lz4 => CompressionMethod::Lz4,
                Codec::Tar => CompressionMethod::Tar,
            },
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, CompressionMethod::Custom(_))
    }

    /// The custom program command, if any.
    pub fn program(&self) -> Option<&str> {
        match self {
            CompressionMethod::Custom(program) => Some(program),
            _ => None,
        }
    }

    /// Stable name, part of the cache version fingerprint.
    pub fn name(&self) -> String {
        match self {
            CompressionMethod::Zstd => "zstd".to_string(),
            CompressionMethod::Gzip => "gzip".to_string(),
            CompressionMethod::Lz4 => "lz4".to_string(),
            CompressionMethod::Tar => "tar".to_string(),
            CompressionMethod::Custom(program) => format!("custom:{}", program),
        }
    }

    /// File name of the local archive.
    pub fn archive_file_name(&self) -> String {
        match self {
            CompressionMethod::Zstd => "cache.tzst".to_string(),
            CompressionMethod::Gzip => "cache.tgz".to_string(),
            CompressionMethod::Lz4 => "cache.tlz4".to_string(),
            CompressionMethod::Tar => "cache.tar".to_string(),
            CompressionMethod::Custom(program) => {
                format!("cache.tar.{}", program_extension(program))
            }
        }
    }

    /// Wrap a writer with this method's encoder.
    pub fn encoder<W: Write>(&self, writer: W) -> Result<Encoder<W>> {
        match self {
            CompressionMethod::Zstd => {
                let encoder = zstd::stream::write::Encoder::new(writer, 3)
                    .map_err(|e| Error::Archive(format!("Zstd init failed: {}", e)))?;
                Ok(Encoder::Zstd(encoder))
            }
            CompressionMethod::Gzip => Ok(Encoder::Gzip(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            ))),
            CompressionMethod::Lz4 => Ok(Encoder::Lz4(lz4_flex::frame::FrameEncoder::new(writer))),
            CompressionMethod::Tar => Ok(Encoder::Plain(writer)),
            CompressionMethod::Custom(program) => Err(custom_unsupported(program)),
        }
    }

    /// Wrap a reader with this method's decoder.
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        match self {
            CompressionMethod::Zstd => {
                let decoder = zstd::stream::read::Decoder::new(reader)
                    .map_err(|e| Error::Archive(format!("Failed to create decoder: {}", e)))?;
                Ok(Box::new(decoder))
            }
            CompressionMethod::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
            CompressionMethod::Lz4 => Ok(Box::new(lz4_flex::frame::FrameDecoder::new(reader))),
            CompressionMethod::Tar => Ok(Box::new(reader)),
            CompressionMethod::Custom(program) => Err(custom_unsupported(program)),
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn custom_unsupported(program: &str) -> Error {
    Error::Archive(format!(
        "Custom compression '{}' is handled by the external archiver",
        program
    ))
}

/// `"/usr/bin/pigz -p 4"` becomes `"pigz"`.
fn program_extension(program: &str) -> String {
    let command = program.split_whitespace().next().unwrap_or(program);
    let stem = Path::new(command)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if ext.is_empty() {
        "bin".to_string()
    } else {
        ext
    }
}

/// Streaming encoder for one of the built-in codecs.
pub enum Encoder<W: Write> {
    Zstd(zstd::stream::write::Encoder<'static, W>),
    Gzip(flate2::write::GzEncoder<W>),
    Lz4(lz4_flex::frame::FrameEncoder<W>),
    Plain(W),
}

impl<W: Write> Encoder<W> {
    /// Flush trailing codec state and return the inner writer.
    pub fn finish(self) -> Result<W> {
        match self {
            Encoder::Zstd(encoder) => encoder
                .finish()
                .map_err(|e| Error::Archive(format!("Zstd finish failed: {}", e))),
            Encoder::Gzip(encoder) => encoder
                .finish()
                .map_err(|e| Error::Archive(format!("Gzip finish failed: {}", e))),
            Encoder::Lz4(encoder) => encoder
                .finish()
                .map_err(|e| Error::Archive(format!("LZ4 finish failed: {}", e))),
            Encoder::Plain(mut writer) => {
                writer.flush()?;
                Ok(writer)
            }
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Zstd(encoder) => encoder.write(buf),
            Encoder::Gzip(encoder) => encoder.write(buf),
            Encoder::Lz4(encoder) => encoder.write(buf),
            Encoder::Plain(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Zstd(encoder) => encoder.flush(),
            Encoder::Gzip(encoder) => encoder.flush(),
            Encoder::Lz4(encoder) => encoder.flush(),
            Encoder::Plain(writer) => writer.flush(),
        }
    }
}
