//! The fixed catalogue of 1,024 semantic anchors.
//!
//! 16 categories x 64 prompts. Within a category the first five prompts are
//! hand-written core anchors (weight 1.0); the rest pair a core prompt with a
//! facet and carry a strictly decreasing weight. Embeddings are computed once
//! at build time and never change.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anchor::embedding::{EmbeddingProvider, HashingEmbedder};
use crate::error::{EngineError, Result};

pub const ANCHORS_PER_CATEGORY: usize = 64;
pub const CORE_ANCHORS: usize = 5;
pub const CATEGORY_COUNT: usize = 16;
pub const CATALOGUE_SIZE: usize = CATEGORY_COUNT * ANCHORS_PER_CATEGORY;

/// Dimension of the default process-wide catalogue.
pub const DEFAULT_EMBEDDING_DIM: usize = 256;

const FACETS: [&str; 12] = [
    "a young child",
    "a domain expert",
    "a historical setting",
    "a future society",
    "a resource shortage",
    "an everyday conversation",
    "a formal report",
    "a cross-cultural exchange",
    "a high-stakes decision",
    "an ambiguous situation",
    "a numerical example",
    "a counterexample",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorCategory {
    FactualKnowledge,
    LogicalReasoning,
    CreativeExpression,
    EthicalJudgment,
    TechnicalExplanation,
    EmotionalUnderstanding,
    SpatialReasoning,
    TemporalReasoning,
    CausalReasoning,
    AbstractConcepts,
    SocialInteraction,
    ScientificKnowledge,
    MathematicalReasoning,
    LinguisticPatterns,
    CulturalContext,
    CommonSense,
}

impl AnchorCategory {
    pub const ALL: [AnchorCategory; CATEGORY_COUNT] = [
        AnchorCategory::FactualKnowledge,
        AnchorCategory::LogicalReasoning,
        AnchorCategory::CreativeExpression,
        AnchorCategory::EthicalJudgment,
        AnchorCategory::TechnicalExplanation,
        AnchorCategory::EmotionalUnderstanding,
        AnchorCategory::SpatialReasoning,
        AnchorCategory::TemporalReasoning,
        AnchorCategory::CausalReasoning,
        AnchorCategory::AbstractConcepts,
        AnchorCategory::SocialInteraction,
        AnchorCategory::ScientificKnowledge,
        AnchorCategory::MathematicalReasoning,
        AnchorCategory::LinguisticPatterns,
        AnchorCategory::CulturalContext,
        AnchorCategory::CommonSense,
    ];

    /// Categories whose absence from a calibration is worth calling out.
    pub const PRIMARY: [AnchorCategory; 5] = [
        AnchorCategory::FactualKnowledge,
        AnchorCategory::LogicalReasoning,
        AnchorCategory::CreativeExpression,
        AnchorCategory::EthicalJudgment,
        AnchorCategory::TechnicalExplanation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnchorCategory::FactualKnowledge => "factual knowledge",
            AnchorCategory::LogicalReasoning => "logical reasoning",
            AnchorCategory::CreativeExpression => "creative expression",
            AnchorCategory::EthicalJudgment => "ethical judgment",
            AnchorCategory::TechnicalExplanation => "technical explanation",
            AnchorCategory::EmotionalUnderstanding => "emotional understanding",
            AnchorCategory::SpatialReasoning => "spatial reasoning",
            AnchorCategory::TemporalReasoning => "temporal reasoning",
            AnchorCategory::CausalReasoning => "causal reasoning",
            AnchorCategory::AbstractConcepts => "abstract concepts",
            AnchorCategory::SocialInteraction => "social interaction",
            AnchorCategory::ScientificKnowledge => "scientific knowledge",
            AnchorCategory::MathematicalReasoning => "mathematical reasoning",
            AnchorCategory::LinguisticPatterns => "linguistic patterns",
            AnchorCategory::CulturalContext => "cultural context",
            AnchorCategory::CommonSense => "common sense",
        }
    }

    fn core_prompts(self) -> [&'static str; CORE_ANCHORS] {
        match self {
            AnchorCategory::FactualKnowledge => [
                "What is the tallest mountain on Earth?",
                "Who wrote the novel Pride and Prejudice?",
                "What currency is used in Japan?",
                "Which ocean lies between Africa and Australia?",
                "What language is most widely spoken in Brazil?",
            ],
            AnchorCategory::LogicalReasoning => [
                "If every square is a rectangle, is every rectangle a square?",
                "Deduce the winner when Ann beats Bo and Bo beats Cy.",
                "Spot the flaw in an argument that assumes its conclusion.",
                "Which statement must be true if exactly one of two liars speaks?",
                "Solve a syllogism with one negative premise.",
            ],
            AnchorCategory::CreativeExpression => [
                "Write a short poem about an abandoned train station.",
                "Invent a myth explaining why the sea is salty.",
                "Describe a colour that does not exist.",
                "Tell a story from the point of view of a forgotten umbrella.",
                "Design a board game played with shadows.",
            ],
            AnchorCategory::EthicalJudgment => [
                "Is it right to break a rule to save a stranger?",
                "Weigh honesty against kindness when giving feedback.",
                "Should future generations count in today's decisions?",
                "Is it fair to reward effort rather than results?",
                "When does loyalty to a group become wrong?",
            ],
            AnchorCategory::TechnicalExplanation => [
                "Explain how a compiler turns source code into machine code.",
                "Describe how DNS resolves a domain name.",
                "How does a transistor act as a switch?",
                "Explain the role of an index in a database.",
                "Describe how TLS protects data in transit.",
            ],
            AnchorCategory::EmotionalUnderstanding => [
                "How might someone feel after losing a close friend?",
                "Describe the difference between guilt and shame.",
                "Why can good news sometimes cause anxiety?",
                "Comfort a person who failed an important exam.",
                "Recognise frustration hidden behind polite words.",
            ],
            AnchorCategory::SpatialReasoning => [
                "Which way is north if the sunset is on your right?",
                "How many faces does a cube cut corner to corner show?",
                "Describe the route from the kitchen to the attic.",
                "Fit three boxes of different sizes into one crate.",
                "Imagine rotating a letter L by ninety degrees.",
            ],
            AnchorCategory::TemporalReasoning => [
                "What day is it three days after the day before Friday?",
                "Order these events: sunrise, breakfast, alarm, commute.",
                "How long ago was a date given only by its season?",
                "Plan a schedule where two meetings cannot overlap.",
                "Explain why a delayed flight can cause a missed connection.",
            ],
            AnchorCategory::CausalReasoning => [
                "Why does ice float on water?",
                "What happens to prices when supply suddenly falls?",
                "Separate correlation from causation in a health study.",
                "Trace the chain of events that leads to a traffic jam.",
                "Why does a plant lean toward a window?",
            ],
            AnchorCategory::AbstractConcepts => [
                "What is the meaning of freedom?",
                "Define infinity without using numbers.",
                "Is justice the same as fairness?",
                "What makes something beautiful?",
                "Explain the idea of identity over time.",
            ],
            AnchorCategory::SocialInteraction => [
                "How should you introduce yourself at a new job?",
                "Resolve a disagreement between two roommates.",
                "Decline an invitation without giving offence.",
                "Build trust with a team you have just joined.",
                "Read the mood of a quiet dinner party.",
            ],
            AnchorCategory::ScientificKnowledge => [
                "Explain photosynthesis in simple terms.",
                "Why do objects fall at the same rate in a vacuum?",
                "Describe how vaccines train the immune system.",
                "What causes the seasons on Earth?",
                "How do tectonic plates create earthquakes?",
            ],
            AnchorCategory::MathematicalReasoning => [
                "Prove that the sum of two even numbers is even.",
                "Estimate the number of piano tuners in a large city.",
                "Find the area of a triangle from its three sides.",
                "Why is division by zero undefined?",
                "Compute the probability of two sixes in two dice rolls.",
            ],
            AnchorCategory::LinguisticPatterns => [
                "Explain the difference between a metaphor and a simile.",
                "Identify the subject and verb in a long sentence.",
                "Why do some words sound the same but differ in meaning?",
                "Translate an idiom without losing its sense.",
                "Describe how questions are formed in English.",
            ],
            AnchorCategory::CulturalContext => [
                "Why do greetings differ between cultures?",
                "Describe the significance of a harvest festival.",
                "How does cuisine reflect a region's history?",
                "Explain gift-giving customs in different societies.",
                "What role does storytelling play in tradition?",
            ],
            AnchorCategory::CommonSense => [
                "Why should you not touch a hot stove?",
                "What do you need to bring when it starts to rain?",
                "Why do people lock their doors at night?",
                "Where would you look for lost keys first?",
                "What happens if you leave milk out overnight?",
            ],
        }
    }
}

impl std::fmt::Display for AnchorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One catalogue entry. `id` is its position in the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: usize,
    pub category: AnchorCategory,
    pub prompt: String,
    pub weight: f64,
    pub embedding: Vec<f32>,
}

/// Weight of the `index`-th anchor within its category.
pub fn anchor_weight(index: usize) -> f64 {
    if index < CORE_ANCHORS {
        1.0
    } else {
        1.0 / (1.0 + 0.05 * (index - CORE_ANCHORS + 1) as f64)
    }
}

fn prompt_for(category: AnchorCategory, index: usize) -> String {
    let cores = category.core_prompts();
    if index < CORE_ANCHORS {
        return cores[index].to_string();
    }
    let j = index - CORE_ANCHORS;
    let core = cores[j % CORE_ANCHORS];
    let facet = FACETS[j / CORE_ANCHORS];
    format!("{core} Consider the case of {facet}.")
}

/// Immutable arena of anchor records indexed by id.
#[derive(Debug, Clone)]
pub struct AnchorCatalogue {
    records: Vec<AnchorRecord>,
    dimensions: usize,
    provider: String,
}

impl AnchorCatalogue {
    /// Embed every anchor prompt with `provider`.
    pub fn build(provider: &dyn EmbeddingProvider) -> Result<Self> {
        let dimensions = provider.dimensions();
        let mut records = Vec::with_capacity(CATALOGUE_SIZE);
        for category in AnchorCategory::ALL {
            for index in 0..ANCHORS_PER_CATEGORY {
                let prompt = prompt_for(category, index);
                let embedding = provider.embed(&prompt)?;
                if embedding.len() != dimensions {
                    return Err(EngineError::dimension(
                        format!("embedding for anchor {}", records.len()),
                        dimensions,
                        embedding.len(),
                    ));
                }
                records.push(AnchorRecord {
                    id: records.len(),
                    category,
                    prompt,
                    weight: anchor_weight(index),
                    embedding,
                });
            }
        }
        info!(
            anchors = records.len(),
            dimensions,
            provider = provider.name(),
            "Built anchor catalogue"
        );
        Ok(Self {
            records,
            dimensions,
            provider: provider.name().to_string(),
        })
    }

    pub fn records(&self) -> &[AnchorRecord] {
        &self.records
    }

    pub fn get(&self, id: usize) -> Option<&AnchorRecord> {
        self.records.get(id)
    }

    pub fn in_category(&self, category: AnchorCategory) -> impl Iterator<Item = &AnchorRecord> {
        self.records.iter().filter(move |r| r.category == category)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

static GLOBAL: OnceLock<Arc<AnchorCatalogue>> = OnceLock::new();

/// Install a catalogue built from `provider` as the process-wide one.
///
/// The first successful call wins; later calls return the installed catalogue.
pub fn init_global(provider: &dyn EmbeddingProvider) -> Result<Arc<AnchorCatalogue>> {
    if let Some(existing) = GLOBAL.get() {
        return Ok(existing.clone());
    }
    let built = Arc::new(AnchorCatalogue::build(provider)?);
    Ok(GLOBAL.get_or_init(|| built).clone())
}

/// The process-wide catalogue, built with the hashing embedder on first use.
pub fn global() -> Result<Arc<AnchorCatalogue>> {
    match GLOBAL.get() {
        Some(catalogue) => Ok(catalogue.clone()),
        None => init_global(&HashingEmbedder::new(DEFAULT_EMBEDDING_DIM)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_weight_schedule() {
        assert!((0..CORE_ANCHORS).all(|i| anchor_weight(i) == 1.0));
        for i in CORE_ANCHORS..ANCHORS_PER_CATEGORY - 1 {
            assert!(anchor_weight(i) > anchor_weight(i + 1));
        }
        assert!(anchor_weight(CORE_ANCHORS) < 1.0);
        assert!(anchor_weight(ANCHORS_PER_CATEGORY - 1) > 0.0);
    }

    #[test]
    fn test_prompts_unique_within_category() {
        for category in AnchorCategory::ALL {
            let prompts: HashSet<String> = (0..ANCHORS_PER_CATEGORY)
                .map(|i| prompt_for(category, i))
                .collect();
            assert_eq!(prompts.len(), ANCHORS_PER_CATEGORY, "{category}");
        }
    }

    #[test]
    fn test_catalogue_shape() {
        let catalogue = AnchorCatalogue::build(&HashingEmbedder::new(32).unwrap()).unwrap();
        assert_eq!(catalogue.len(), CATALOGUE_SIZE);
        for (i, r) in catalogue.records().iter().enumerate() {
            assert_eq!(r.id, i);
            assert_eq!(r.embedding.len(), 32);
        }
        for category in AnchorCategory::ALL {
            let in_cat: Vec<_> = catalogue.in_category(category).collect();
            assert_eq!(in_cat.len(), ANCHORS_PER_CATEGORY);
            assert_eq!(in_cat.iter().filter(|r| r.weight == 1.0).count(), CORE_ANCHORS);
        }
    }

    #[test]
    fn test_global_is_shared() {
        let a = global().unwrap();
        let b = global().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), CATALOGUE_SIZE);
    }
}
