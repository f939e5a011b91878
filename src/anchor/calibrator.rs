//! Scoring arbitrary vectors against the anchor catalogue.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anchor::catalogue::{AnchorCatalogue, AnchorCategory, AnchorRecord, CATEGORY_COUNT};
use crate::config::CalibrationConfig;
use crate::error::{EngineError, Result};
use crate::vector;

/// An anchor and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorMatch {
    pub id: usize,
    pub category: AnchorCategory,
    pub prompt: String,
    pub weight: f64,
    pub similarity: f64,
}

impl AnchorMatch {
    fn new(record: &AnchorRecord, similarity: f64) -> Self {
        Self {
            id: record.id,
            category: record.category,
            prompt: record.prompt.clone(),
            weight: record.weight,
            similarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Weighted mean similarity of the nearest anchors, in [0, 1].
    pub calibration_score: f64,
    /// Distinct categories among the nearest anchors, divided by 16.
    pub coverage: f64,
    pub nearest: Vec<AnchorMatch>,
    pub recommendations: Vec<String>,
}

pub struct Calibrator {
    catalogue: Arc<AnchorCatalogue>,
    config: CalibrationConfig,
}

impl Calibrator {
    /// `config.embedding_dim` must match the catalogue's embedding width.
    pub fn new(catalogue: Arc<AnchorCatalogue>, config: CalibrationConfig) -> Result<Self> {
        config.validate()?;
        if config.embedding_dim != catalogue.dimensions() {
            return Err(EngineError::dimension(
                "calibration embedding_dim",
                catalogue.dimensions(),
                config.embedding_dim,
            ));
        }
        Ok(Self { catalogue, config })
    }

    pub fn catalogue(&self) -> &AnchorCatalogue {
        &self.catalogue
    }

    /// Top `k` anchors by descending cosine similarity.
    ///
    /// Ties keep catalogue order. `k` larger than the catalogue is clamped.
    pub fn find_nearest(&self, query: &[f32], k: usize) -> Result<Vec<AnchorMatch>> {
        if k == 0 {
            return Err(EngineError::invalid_config("k must be >= 1"));
        }
        if query.is_empty() {
            return Err(EngineError::empty("calibration vector"));
        }
        if query.len() != self.catalogue.dimensions() {
            return Err(EngineError::dimension(
                "calibration vector",
                self.catalogue.dimensions(),
                query.len(),
            ));
        }
        EngineError::check_finite("calibration vector", query)?;

        let mut scored: Vec<(usize, f64)> = self
            .catalogue
            .records()
            .iter()
            .map(|r| (r.id, vector::cosine(query, &r.embedding)))
            .collect();
        // Stable sort preserves catalogue order on ties.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(k)
            .filter_map(|(id, sim)| self.catalogue.get(id).map(|r| AnchorMatch::new(r, sim)))
            .collect())
    }

    pub fn calibrate(&self, query: &[f32]) -> Result<CalibrationResult> {
        let nearest = self.find_nearest(query, self.config.top_k)?;

        let weight_sum: f64 = nearest.iter().map(|m| m.weight).sum();
        let calibration_score = if weight_sum > 0.0 {
            (nearest.iter().map(|m| m.weight * m.similarity).sum::<f64>() / weight_sum)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };

        let touched: BTreeSet<AnchorCategory> = nearest.iter().map(|m| m.category).collect();
        let coverage = touched.len() as f64 / CATEGORY_COUNT as f64;

        let mut recommendations = Vec::new();
        if coverage < self.config.coverage_floor {
            recommendations.push(format!(
                "coverage {:.0}% is below {:.0}%: vector concentrates on {}",
                coverage * 100.0,
                self.config.coverage_floor * 100.0,
                touched
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            for missing in AnchorCategory::PRIMARY
                .iter()
                .filter(|c| !touched.contains(*c))
            {
                recommendations.push(format!("recommend broadening {missing} category"));
            }
        }
        if calibration_score < self.config.score_floor {
            recommendations.push(format!(
                "calibration score {calibration_score:.3} is below {:.3}: vector is far from every core anchor",
                self.config.score_floor
            ));
        }

        debug!(
            calibration_score,
            coverage,
            top = ?nearest.first().map(|m| m.id),
            recommendations = recommendations.len(),
            "Calibrated vector"
        );

        Ok(CalibrationResult {
            calibration_score,
            coverage,
            nearest,
            recommendations,
        })
    }
}
