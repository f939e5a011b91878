//! Embedding backends for anchor prompts.

use crate::error::{EngineError, Result};

/// Text to vector. Implemented by the caller's model; anchors only need `embed`.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

/// Deterministic signed feature hashing over words and character trigrams.
///
/// Not semantic, but texts sharing vocabulary land close together, which is
/// enough to exercise calibration without a model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(EngineError::invalid_config("embedding dimension must be >= 1"));
        }
        Ok(Self { dimensions })
    }

    fn add(&self, acc: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let slot = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        acc[slot] += sign * weight;
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut acc = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add(&mut acc, word.as_bytes(), 1.0);
            let chars: Vec<char> = word.chars().collect();
            for tri in chars.windows(3) {
                let gram: String = tri.iter().collect();
                self.add(&mut acc, gram.as_bytes(), 0.5);
            }
        }

        let norm = acc.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            acc.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(acc)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
