//! Proof-of-latent-fidelity: challenge/response verification of a vector source.
//!
//! - [`challenge`]: Challenge, ChallengeResponse, prompt buckets, signatures
//! - [`registry`]: mutex-guarded registry of outstanding challenges
//! - [`analysis`]: pattern, distribution and consistency signals
//!
//! Malformed or stale responses are errors. Suspicious vectors are not: they
//! come back as a failing [`VerificationResult`] with the anomalies listed.

pub mod analysis;
pub mod challenge;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::VerifierConfig;
use crate::error::{EngineError, Result};

pub use analysis::{Anomaly, AnomalyKind};
pub use challenge::{Challenge, ChallengeResponse, ChallengeState, PromptCategory};
pub use registry::ChallengeRegistry;

const PATTERN_WEIGHT: f64 = 0.4;
const DISTRIBUTION_WEIGHT: f64 = 0.3;
const CONSISTENCY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    /// Weighted combination of the three signals, in [0, 1].
    pub fidelity_score: f64,
    pub pattern_matches: usize,
    /// Always populated, whether or not the check passed.
    pub anomalies: Vec<Anomaly>,
    /// Total anomaly severity divided by the challenge size.
    pub anomaly_ratio: f64,
    /// How clear-cut the pass/fail call is, in [0.5, 1].
    pub confidence: f64,
}

impl VerificationResult {
    pub fn has_anomaly(&self, kind: AnomalyKind) -> bool {
        self.anomalies.iter().any(|a| a.kind == kind)
    }

    pub fn anomaly_names(&self) -> Vec<&'static str> {
        self.anomalies.iter().map(|a| a.kind.name()).collect()
    }
}

/// Issues challenges and verifies responses against them.
pub struct IntegrityVerifier {
    config: VerifierConfig,
    registry: Arc<ChallengeRegistry>,
}

impl IntegrityVerifier {
    pub fn new(config: VerifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(ChallengeRegistry::new()),
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChallengeRegistry> {
        &self.registry
    }

    /// Start the background expiry sweep on the current tokio runtime.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        registry::spawn_sweeper(
            self.registry.clone(),
            Duration::from_millis(self.config.sweep_interval_ms.max(1)),
        )
    }

    pub fn generate_challenge(&self) -> Result<Challenge> {
        self.generate_challenge_at(registry::now_ms())
    }

    pub fn generate_challenge_at(&self, now_ms: u64) -> Result<Challenge> {
        let challenge =
            Challenge::generate(self.config.challenge_size, self.config.timeout_ms, now_ms)?;
        self.registry.insert(challenge.clone());
        info!(
            id = %challenge.id,
            prompts = challenge.len(),
            expires_at_ms = challenge.expires_at_ms,
            "Issued challenge"
        );
        Ok(challenge)
    }

    pub fn verify(
        &self,
        response: &ChallengeResponse,
        challenge: &Challenge,
    ) -> Result<VerificationResult> {
        self.verify_at(response, challenge, registry::now_ms())
    }

    /// Verify `response` as of `now_ms`.
    ///
    /// Order of rejection: wrong id, challenge not outstanding, expiry, then
    /// response shape. Shape errors leave the challenge outstanding; any
    /// response that gets as far as scoring consumes it.
    pub fn verify_at(
        &self,
        response: &ChallengeResponse,
        challenge: &Challenge,
        now_ms: u64,
    ) -> Result<VerificationResult> {
        if response.challenge_id != challenge.id {
            return Err(EngineError::ChallengeMismatch {
                reason: format!(
                    "response is for {}, challenge is {}",
                    response.challenge_id, challenge.id
                ),
            });
        }
        self.registry.check_live(challenge, now_ms)?;
        check_shape(response, challenge)?;
        let challenge = self.registry.claim(challenge, now_ms)?;

        let categories: Vec<PromptCategory> =
            challenge.prompts.iter().map(|p| p.category).collect();
        let signals = analysis::analyze(
            &response.vectors,
            &categories,
            self.config.similarity_ceiling,
        );
        let mut anomalies = signals.anomalies;

        let expected = challenge::sign(&challenge.nonce, &response.vectors);
        let signed = response.signature.as_deref() == Some(expected.as_str());
        if !signed {
            anomalies.push(Anomaly::new(
                AnomalyKind::SignatureMismatch,
                Vec::new(),
                match &response.signature {
                    Some(_) => "signature does not bind the nonce and vectors".to_string(),
                    None => "signature missing".to_string(),
                },
            ));
        }

        let fidelity_score = (PATTERN_WEIGHT * signals.pattern_score
            + DISTRIBUTION_WEIGHT * signals.distribution_score
            + CONSISTENCY_WEIGHT * signals.consistency_score)
            .clamp(0.0, 1.0);
        let anomaly_ratio =
            anomalies.iter().map(|a| a.severity).sum::<f64>() / challenge.len() as f64;
        let passed = signed
            && fidelity_score >= self.config.fidelity_threshold
            && anomaly_ratio <= self.config.anomaly_threshold;
        let confidence = self.confidence(fidelity_score, passed);

        debug!(
            id = %challenge.id,
            fidelity_score,
            pattern_matches = signals.pattern_matches,
            anomalies = anomalies.len(),
            anomaly_ratio,
            passed,
            "Verified response"
        );

        Ok(VerificationResult {
            passed,
            fidelity_score,
            pattern_matches: signals.pattern_matches,
            anomalies,
            anomaly_ratio,
            confidence,
        })
    }

    /// Distance of the score from the threshold, on the side of the verdict.
    fn confidence(&self, fidelity_score: f64, passed: bool) -> f64 {
        let threshold = self.config.fidelity_threshold;
        let (margin, span) = if passed {
            (fidelity_score - threshold, 1.0 - threshold)
        } else {
            ((threshold - fidelity_score).max(0.0), threshold)
        };
        if span <= 0.0 {
            return 1.0;
        }
        0.5 + 0.5 * (margin / span).clamp(0.0, 1.0)
    }
}

fn check_shape(response: &ChallengeResponse, challenge: &Challenge) -> Result<()> {
    let Some(first) = response.vectors.first() else {
        return Err(EngineError::empty("challenge response has no vectors"));
    };
    if response.vectors.len() != challenge.len() {
        return Err(EngineError::dimension(
            "response vector count",
            challenge.len(),
            response.vectors.len(),
        ));
    }
    let dim = first.len();
    if dim == 0 {
        return Err(EngineError::empty("challenge response vector 0"));
    }
    for (i, v) in response.vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(EngineError::dimension(format!("response vector {i}"), dim, v.len()));
        }
    }
    Ok(())
}
