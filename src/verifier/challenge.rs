//! Challenges, responses, and the prompt buckets they are drawn from.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Category a challenge prompt is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptCategory {
    Factual,
    Reasoning,
    Creative,
    Ethical,
    Technical,
}

impl PromptCategory {
    pub const ALL: [PromptCategory; 5] = [
        PromptCategory::Factual,
        PromptCategory::Reasoning,
        PromptCategory::Creative,
        PromptCategory::Ethical,
        PromptCategory::Technical,
    ];

    /// Largest challenge the prompt buckets can fill without repeats.
    pub fn capacity() -> usize {
        PromptCategory::ALL.iter().map(|c| c.prompts().len()).sum()
    }

    pub fn prompts(self) -> &'static [&'static str] {
        match self {
            PromptCategory::Factual => &[
                "What is the boiling point of water at sea level?",
                "Name the largest planet in the solar system.",
                "Which element has the atomic number 6?",
                "In which year did the first human land on the Moon?",
                "What is the capital city of Australia?",
                "How many bones are in the adult human body?",
            ],
            PromptCategory::Reasoning => &[
                "If all bloops are razzies and all razzies are lazzies, are all bloops lazzies?",
                "A bat and a ball cost 1.10 in total; the bat costs 1.00 more. What does the ball cost?",
                "What comes next in the sequence 2, 6, 12, 20, 30?",
                "If it rained, the street is wet. The street is dry. What follows?",
                "Three boxes are mislabeled. How many draws identify them all?",
                "Which weighs more, a kilogram of feathers or a kilogram of iron?",
            ],
            PromptCategory::Creative => &[
                "Write the opening line of a story set on a drifting iceberg.",
                "Describe the colour blue to someone who has never seen it.",
                "Invent a name and a purpose for a new kitchen tool.",
                "Compose a haiku about a city at dawn.",
                "Imagine a conversation between a lighthouse and a storm.",
                "Describe a festival held by creatures living in a teacup.",
            ],
            PromptCategory::Ethical => &[
                "Is it acceptable to lie to protect a friend's feelings?",
                "Should autonomous cars prioritise passengers or pedestrians?",
                "Is it fair to use personal data to train public models?",
                "When is breaking a promise justified?",
                "Should wealth be taxed to fund universal healthcare?",
                "Is it wrong to keep extra change a cashier gave by mistake?",
            ],
            PromptCategory::Technical => &[
                "Explain how a hash table resolves collisions.",
                "Describe the difference between TCP and UDP.",
                "How does public-key cryptography establish a shared secret?",
                "What does a garbage collector do in a managed runtime?",
                "Explain how gradient descent updates model weights.",
                "Describe how a B-tree keeps itself balanced.",
            ],
        }
    }

    /// Largest share of unit-vector mass one component may hold.
    pub(crate) fn peak_limit(self) -> f64 {
        match self {
            PromptCategory::Factual | PromptCategory::Technical => 0.85,
            PromptCategory::Reasoning | PromptCategory::Ethical => 0.8,
            PromptCategory::Creative => 0.9,
        }
    }

    /// Largest fraction of components that may be (near) zero.
    pub(crate) fn sparsity_limit(self) -> f64 {
        match self {
            PromptCategory::Technical => 0.6,
            _ => 0.5,
        }
    }
}

impl std::fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptCategory::Factual => write!(f, "factual"),
            PromptCategory::Reasoning => write!(f, "reasoning"),
            PromptCategory::Creative => write!(f, "creative"),
            PromptCategory::Ethical => write!(f, "ethical"),
            PromptCategory::Technical => write!(f, "technical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePrompt {
    pub category: PromptCategory,
    pub text: String,
}

/// A single-use set of prompts that a responder must embed before expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    /// Hex-encoded random nonce the response signature must bind to.
    pub nonce: String,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub prompts: Vec<ChallengePrompt>,
}

impl Challenge {
    /// Draw `size` prompts evenly across the categories.
    ///
    /// With `size` not a multiple of 5, the first categories get one extra prompt.
    pub fn generate(size: usize, timeout_ms: u64, now_ms: u64) -> Result<Self> {
        let capacity = PromptCategory::capacity();
        if size == 0 || size > capacity {
            return Err(EngineError::invalid_config(format!(
                "challenge_size must be in 1..={capacity}, got {size}"
            )));
        }

        let mut rng = rand::thread_rng();
        let base = size / PromptCategory::ALL.len();
        let extra = size % PromptCategory::ALL.len();
        let mut prompts = Vec::with_capacity(size);
        for (i, category) in PromptCategory::ALL.into_iter().enumerate() {
            let take = base + usize::from(i < extra);
            prompts.extend(
                category
                    .prompts()
                    .choose_multiple(&mut rng, take)
                    .map(|text| ChallengePrompt {
                        category,
                        text: (*text).to_string(),
                    }),
            );
        }

        let nonce_bytes: [u8; 16] = rng.gen();
        let nonce = nonce_bytes.iter().map(|b| format!("{b:02x}")).collect();

        Ok(Self {
            id: Uuid::new_v4(),
            nonce,
            issued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(timeout_ms),
            prompts,
        })
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// Lifecycle of an issued challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeState {
    Issued,
    Responded,
    Expired,
}

/// One vector per challenge prompt, in prompt order, plus a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge_id: Uuid,
    pub vectors: Vec<Vec<f32>>,
    pub signature: Option<String>,
}

impl ChallengeResponse {
    /// Build a response with a signature bound to `challenge`'s nonce.
    pub fn new(challenge: &Challenge, vectors: Vec<Vec<f32>>) -> Self {
        let signature = Some(sign(&challenge.nonce, &vectors));
        Self {
            challenge_id: challenge.id,
            vectors,
            signature,
        }
    }
}

/// `"<nonce>.<crc32>"`, where the CRC covers the nonce and every vector in order.
pub fn sign(nonce: &str, vectors: &[Vec<f32>]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(nonce.as_bytes());
    for v in vectors {
        for x in v {
            hasher.update(&x.to_le_bytes());
        }
    }
    format!("{nonce}.{:08x}", hasher.finalize())
}
