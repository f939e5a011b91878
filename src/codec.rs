//! Persisted artifact format.
//!
//! Every artifact is wrapped in the same envelope so the storage layer can
//! treat it as an opaque blob:
//!
//! ```text
//! magic "LTAF" | version u8 | kind u8 | flags u8 | reserved u8 |
//! payload_len u32 LE | payload | crc32 u32 LE (over everything before it)
//! ```
//!
//! Compressed caches use a little-endian binary payload; W-matrices use JSON.

use bytes::{Buf, BufMut, BytesMut};
use half::f16;
use serde::{Deserialize, Serialize};

use crate::cache::kv::{CompressedCache, CompressedHead};
use crate::error::{EngineError, Result};

const MAGIC: &[u8; 4] = b"LTAF";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 12;
const FLAG_ZSTD: u8 = 1 << 0;

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    CompressedCache = 1,
    WMatrix = 2,
}

impl ArtifactKind {
    fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(ArtifactKind::CompressedCache),
            2 => Some(ArtifactKind::WMatrix),
            _ => None,
        }
    }
}

/// Element encoding for cache vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    /// Bit-exact.
    #[default]
    F32,
    /// Half the size, ~1e-3 relative error.
    F16,
}

impl ValueFormat {
    fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(ValueFormat::F32),
            1 => Some(ValueFormat::F16),
            _ => None,
        }
    }

    fn bytes_per_element(&self) -> usize {
        match self {
            ValueFormat::F32 => 4,
            ValueFormat::F16 => 2,
        }
    }
}

/// Encoding options for artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodeOptions {
    pub format: ValueFormat,
    /// zstd level, or None to store the payload raw.
    pub zstd_level: Option<i32>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            format: ValueFormat::F32,
            zstd_level: Some(3),
        }
    }
}

/// Wrap a payload in the artifact envelope.
pub fn encode_envelope(
    kind: ArtifactKind,
    payload: &[u8],
    zstd_level: Option<i32>,
) -> Result<Vec<u8>> {
    let (flags, body) = match zstd_level {
        Some(level) => (FLAG_ZSTD, zstd::encode_all(payload, level)?),
        None => (0, payload.to_vec()),
    };
    let len = u32::try_from(body.len())
        .map_err(|_| EngineError::serialization("payload exceeds 4 GiB"))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len() + 4);
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(kind as u8);
    buf.put_u8(flags);
    buf.put_u8(0);
    buf.put_u32_le(len);
    buf.put_slice(&body);
    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);
    Ok(buf.to_vec())
}

/// Unwrap an envelope, checking magic, version, kind, length and CRC.
pub fn decode_envelope(data: &[u8], expected: ArtifactKind) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN + 4 {
        return Err(EngineError::serialization(format!(
            "artifact truncated: {} bytes",
            data.len()
        )));
    }
    let (framed, mut tail) = data.split_at(data.len() - 4);
    let stored_crc = tail.get_u32_le();
    let computed_crc = crc32fast::hash(framed);
    if stored_crc != computed_crc {
        return Err(EngineError::serialization(format!(
            "CRC32 mismatch: stored {stored_crc:08x}, computed {computed_crc:08x}"
        )));
    }

    let mut buf = framed;
    if &buf[..4] != MAGIC {
        return Err(EngineError::serialization("bad magic"));
    }
    buf.advance(4);
    let version = buf.get_u8();
    if version != VERSION {
        return Err(EngineError::serialization(format!(
            "unsupported artifact version {version}"
        )));
    }
    let kind = ArtifactKind::from_u8(buf.get_u8())
        .ok_or_else(|| EngineError::serialization("unknown artifact kind"))?;
    if kind != expected {
        return Err(EngineError::serialization(format!(
            "expected {expected:?} artifact, found {kind:?}"
        )));
    }
    let flags = buf.get_u8();
    buf.advance(1);
    let len = buf.get_u32_le() as usize;
    if buf.remaining() != len {
        return Err(EngineError::serialization(format!(
            "payload length {len} does not match {} remaining bytes",
            buf.remaining()
        )));
    }

    if flags & FLAG_ZSTD != 0 {
        Ok(zstd::decode_all(buf)?)
    } else {
        Ok(buf.to_vec())
    }
}

fn need(buf: &impl Buf, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(EngineError::serialization(format!(
            "truncated while reading {what}: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn put_vector(buf: &mut BytesMut, v: &[f32], format: ValueFormat) {
    match format {
        ValueFormat::F32 => v.iter().for_each(|&x| buf.put_f32_le(x)),
        ValueFormat::F16 => v
            .iter()
            .for_each(|&x| buf.put_u16_le(f16::from_f32(x).to_bits())),
    }
}

fn get_vector(buf: &mut &[u8], dim: usize, format: ValueFormat) -> Result<Vec<f32>> {
    need(&*buf, dim * format.bytes_per_element(), "vector")?;
    Ok(match format {
        ValueFormat::F32 => (0..dim).map(|_| buf.get_f32_le()).collect(),
        ValueFormat::F16 => (0..dim)
            .map(|_| f16::from_bits(buf.get_u16_le()).to_f32())
            .collect(),
    })
}

impl CompressedCache {
    /// Serialize into an artifact envelope.
    pub fn serialize(&self, options: &EncodeOptions) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_u8(options.format as u8);
        buf.put_u32_le(self.dim as u32);
        buf.put_u64_le(self.original_len as u64);
        buf.put_u32_le(self.layers.len() as u32);
        for layer in &self.layers {
            buf.put_u32_le(layer.len() as u32);
            for head in layer {
                buf.put_u32_le(head.retained() as u32);
                buf.put_f64_le(head.attention_mass);
                for &idx in &head.retained_indices {
                    buf.put_u64_le(idx as u64);
                }
                for k in &head.keys {
                    put_vector(&mut buf, k, options.format);
                }
                for v in &head.values {
                    put_vector(&mut buf, v, options.format);
                }
            }
        }
        encode_envelope(ArtifactKind::CompressedCache, &buf, options.zstd_level)
    }

    /// Restore a cache written by [`CompressedCache::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let payload = decode_envelope(data, ArtifactKind::CompressedCache)?;
        let mut buf = payload.as_slice();

        need(&buf, 17, "cache header")?;
        let format = ValueFormat::from_u8(buf.get_u8())
            .ok_or_else(|| EngineError::serialization("unknown value format"))?;
        let dim = buf.get_u32_le() as usize;
        let original_len = buf.get_u64_le() as usize;
        let num_layers = buf.get_u32_le() as usize;

        let mut layers = Vec::with_capacity(num_layers.min(1024));
        for _ in 0..num_layers {
            need(&buf, 4, "head count")?;
            let num_heads = buf.get_u32_le() as usize;
            let mut heads = Vec::with_capacity(num_heads.min(1024));
            for _ in 0..num_heads {
                need(&buf, 12, "head header")?;
                let retained = buf.get_u32_le() as usize;
                let attention_mass = buf.get_f64_le();
                if retained == 0 || retained > original_len {
                    return Err(EngineError::serialization(format!(
                        "head retains {retained} of {original_len} tokens"
                    )));
                }
                need(&buf, retained * 8, "retained indices")?;
                let retained_indices: Vec<usize> =
                    (0..retained).map(|_| buf.get_u64_le() as usize).collect();
                let ordered = retained_indices.windows(2).all(|w| w[0] < w[1]);
                if !ordered || retained_indices[retained - 1] >= original_len {
                    return Err(EngineError::serialization(
                        "retained indices out of order or out of range",
                    ));
                }
                let keys = (0..retained)
                    .map(|_| get_vector(&mut buf, dim, format))
                    .collect::<Result<Vec<_>>>()?;
                let values = (0..retained)
                    .map(|_| get_vector(&mut buf, dim, format))
                    .collect::<Result<Vec<_>>>()?;
                heads.push(CompressedHead {
                    keys,
                    values,
                    retained_indices,
                    original_len,
                    attention_mass,
                });
            }
            layers.push(heads);
        }
        if buf.has_remaining() {
            return Err(EngineError::serialization(format!(
                "{} trailing bytes after cache payload",
                buf.remaining()
            )));
        }

        Ok(Self {
            layers,
            original_len,
            dim,
        })
    }
}
