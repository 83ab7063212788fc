//! Gzip packing of document text for export and transfer.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("gzip stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decompressed document is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Gzip `text` at the default compression level.
pub fn compress(text: &str) -> Result<Vec<u8>, CompressError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip stream produced by [`compress`] back into text.
pub fn decompress(data: &[u8]) -> Result<String, CompressError> {
    let mut bytes = Vec::new();
    GzDecoder::new(data).read_to_end(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}
