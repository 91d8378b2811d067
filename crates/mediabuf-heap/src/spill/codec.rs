//! Compression facade for spill files (feature-gated).
//!
//! Keep this tiny and synchronous. We only support `None`, `Zstd`, `Lz4`.

use mediabuf_core::config::SpillCodec;

use crate::error::{Error, Result};

pub fn codec_tag(codec: SpillCodec) -> u8 {
    match codec {
        SpillCodec::None => 0,
        SpillCodec::Zstd => 1,
        SpillCodec::Lz4 => 2,
    }
}

pub fn codec_from_tag(v: u8) -> Result<SpillCodec> {
    match v {
        0 => Ok(SpillCodec::None),
        1 => Ok(SpillCodec::Zstd),
        2 => Ok(SpillCodec::Lz4),
        _ => Err(Error::CodecUnsupported("unknown")),
    }
}

/// Fails early when the codec was not compiled in.
pub fn ensure_available(codec: SpillCodec) -> Result<()> {
    match codec {
        SpillCodec::None => Ok(()),
        SpillCodec::Zstd if cfg!(feature = "zstd") => Ok(()),
        SpillCodec::Zstd => Err(Error::CodecUnsupported("zstd")),
        SpillCodec::Lz4 if cfg!(feature = "lz4") => Ok(()),
        SpillCodec::Lz4 => Err(Error::CodecUnsupported("lz4")),
    }
}

pub fn compress(codec: SpillCodec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        SpillCodec::None => Ok(input.to_vec()),
        SpillCodec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                // Spill files are rewritten on every unmap; favour speed.
                let lvl = 1;
                let mut out = Vec::new();
                zstd::stream::copy_encode(input, &mut out, lvl)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd"))
            }
        }
        SpillCodec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                Ok(lz4_flex::compress_prepend_size(input))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4"))
            }
        }
    }
}

pub fn decompress(codec: SpillCodec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        SpillCodec::None => Ok(input.to_vec()),
        SpillCodec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let mut out = Vec::new();
                zstd::stream::copy_decode(input, &mut out)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd"))
            }
        }
        SpillCodec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                lz4_flex::decompress_size_prepended(input)
                    .map_err(|e| Error::Codec(format!("lz4: {e}")))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4"))
            }
        }
    }
}
