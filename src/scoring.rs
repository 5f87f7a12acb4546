use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ai::{BaselineResult, JobAnalysis, JobProvider};
use crate::config::Preferences;
use crate::error::ProviderError;
use crate::models::JobRecord;

pub const PROVIDER_ERROR_REASON: &str = "provider error";

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// Rejected by the baseline phase (or its fallback).
    Filtered { reason: String },
    Scored { score: i64 },
    /// Passed the baseline but full analysis failed; the record keeps no score.
    Unscored { error: String },
}

/// Baseline filter first, full analysis only for jobs it keeps.
pub struct ScoringEngine {
    provider: Arc<dyn JobProvider>,
    resume: Arc<str>,
}

impl ScoringEngine {
    pub fn new(provider: Arc<dyn JobProvider>, resume: Arc<str>) -> Self {
        Self { provider, resume }
    }

    pub fn provider(&self) -> &Arc<dyn JobProvider> {
        &self.provider
    }

    /// Phase 1. Never fails: an exhausted provider yields a safe reject.
    pub async fn baseline(&self, job: &JobRecord, preferences: &Preferences) -> BaselineResult {
        match self.provider.filter_and_score(job, &self.resume, preferences).await {
            Ok(result) => result,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "baseline failed; rejecting");
                BaselineResult::fallback(PROVIDER_ERROR_REASON)
            }
        }
    }

    /// Phase 2.
    pub async fn analyze(&self, job: &JobRecord) -> Result<JobAnalysis, ProviderError> {
        self.provider.analyze_job(job, &self.resume).await
    }

    /// Run both phases and write the results onto the record.
    pub async fn score(&self, job: &mut JobRecord, preferences: &Preferences) -> ScoreOutcome {
        let baseline = self.baseline(job, preferences).await;
        job.baseline_score = Some(baseline.baseline_score);

        if !baseline.keep {
            let reason = if baseline.filter_reason.is_empty() {
                "not a fit".to_string()
            } else {
                baseline.filter_reason
            };
            job.is_filtered = true;
            job.filter_reason = Some(format!("baseline: {}", reason));
            debug!(job_id = %job.job_id, baseline = baseline.baseline_score, %reason, "filtered by baseline");
            return ScoreOutcome::Filtered { reason };
        }

        match self.analyze(job).await {
            Ok(analysis) => {
                job.score = Some(analysis.qualification_score);
                job.analysis = Some(analysis.to_analysis());
                info!(
                    job_id = %job.job_id,
                    title = %job.title,
                    baseline = baseline.baseline_score,
                    score = analysis.qualification_score,
                    "scored"
                );
                ScoreOutcome::Scored {
                    score: analysis.qualification_score,
                }
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "analysis failed; leaving unscored");
                ScoreOutcome::Unscored { error: e.to_string() }
            }
        }
    }
}
