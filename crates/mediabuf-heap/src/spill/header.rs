//! Spill file header.
//!
//! Layout on disk:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ payload_len: u64 ][ stored_len: u64 ]
//! [ stored payload bytes … ]
//!
//! The heap keeps a blake3 checksum over (header || stored payload) for every
//! file it writes and verifies it when the file is read back.

use mediabuf_core::config::SpillCodec;

use super::codec::{codec_from_tag, codec_tag};
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x5053_424D; // "MBSP" little-endian
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillFileHeader {
    pub codec: SpillCodec,
    /// Allocation size seen by callers.
    pub payload_len: u64,
    /// Bytes following the header (after compression).
    pub stored_len: u64,
}

impl SpillFileHeader {
    pub fn new(codec: SpillCodec, payload_len: u64, stored_len: u64) -> Self {
        Self {
            codec,
            payload_len,
            stored_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&VERSION.to_le_bytes());
        out[6] = codec_tag(self.codec);
        // out[7] reserved
        out[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.stored_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Storage("short spill file header".into()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut version = [0u8; 2];
        version.copy_from_slice(&bytes[4..6]);
        if u32::from_le_bytes(magic) != MAGIC || u16::from_le_bytes(version) != VERSION {
            return Err(Error::Storage("bad spill file magic/version".into()));
        }

        let codec = codec_from_tag(bytes[6])?;
        let mut payload_len = [0u8; 8];
        payload_len.copy_from_slice(&bytes[8..16]);
        let mut stored_len = [0u8; 8];
        stored_len.copy_from_slice(&bytes[16..24]);

        Ok(Self {
            codec,
            payload_len: u64::from_le_bytes(payload_len),
            stored_len: u64::from_le_bytes(stored_len),
        })
    }
}

/// Checksum over a full spill file image.
pub fn checksum(image: &[u8]) -> [u8; 32] {
    blake3::hash(image).into()
}
