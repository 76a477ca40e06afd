//! Compression of archived event chains.

use crate::store::MachineEvent;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Errors from encoding or decoding archive payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression level {0} is out of range 0..=9")]
    InvalidLevel(u32),

    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("archived events are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lossless byte compression.
pub trait CompressionCodec: Send + Sync {
    fn compress(&self, bytes: &[u8], level: u32) -> Result<Vec<u8>, CodecError>;

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Whether `bytes` carry this codec's header.
    fn is_compressed(&self, bytes: &[u8]) -> bool;
}

/// zlib (RFC 1950) codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZlibCodec;

impl CompressionCodec for ZlibCodec {
    fn compress(&self, bytes: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
        if level > 9 {
            return Err(CodecError::InvalidLevel(level));
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(bytes).map_err(CodecError::Compress)?;
        encoder.finish().map_err(CodecError::Compress)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        ZlibDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(CodecError::Decompress)?;
        Ok(out)
    }

    fn is_compressed(&self, bytes: &[u8]) -> bool {
        // CMF says deflate and (CMF, FLG) is a multiple of 31. JSON never
        // starts with such a pair since '[' and '{' fail the method check.
        match bytes {
            [cmf, flg, ..] => cmf & 0x0F == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
            _ => false,
        }
    }
}

/// An encoded event chain ready to be stored.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedEvents {
    pub data: Vec<u8>,
    pub original_size: usize,
    /// Level actually applied; `None` when stored as plain JSON.
    pub level: Option<u32>,
}

/// Serialize a chain and compress it when it reaches `threshold_bytes`.
pub fn encode_events(
    codec: &dyn CompressionCodec,
    events: &[MachineEvent],
    level: u32,
    threshold_bytes: usize,
) -> Result<EncodedEvents, CodecError> {
    let json = serde_json::to_vec(events)?;
    let original_size = json.len();

    if original_size < threshold_bytes {
        return Ok(EncodedEvents {
            data: json,
            original_size,
            level: None,
        });
    }

    Ok(EncodedEvents {
        data: codec.compress(&json, level)?,
        original_size,
        level: Some(level),
    })
}

/// Decode a stored chain, compressed or plain.
pub fn decode_events(
    codec: &dyn CompressionCodec,
    data: &[u8],
) -> Result<Vec<MachineEvent>, CodecError> {
    if codec.is_compressed(data) {
        let json = codec.decompress(data)?;
        Ok(serde_json::from_slice(&json)?)
    } else {
        Ok(serde_json::from_slice(data)?)
    }
}
