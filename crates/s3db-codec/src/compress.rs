//! Optional whole-entry compression, applied last in the encode pipeline
//! (spec §4.2 step 4): gzip the combined metadata blob and keep the
//! compressed form only if it saves at least `compression_min_savings`
//! bytes over the raw entries.

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("failed to gzip metadata blob")]
    Encode(#[source] std::io::Error),
    #[error("failed to gunzip metadata blob")]
    Decode(#[source] std::io::Error),
}

/// gzip `raw`, returning the compressed bytes.
pub fn compress(raw: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut encoder = GzEncoder::new(raw, Compression::default());
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).map_err(CompressError::Encode)?;
    Ok(out)
}

/// Reverse of [`compress`].
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CompressError::Decode)?;
    Ok(out)
}

/// Whether compressing `raw` is worth keeping, per `min_savings`.
#[must_use]
pub fn worth_compressing(raw: &[u8], compressed: &[u8], min_savings: usize) -> bool {
    raw.len().saturating_sub(compressed.len()) >= min_savings
}
