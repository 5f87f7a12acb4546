//! Follow-up email ingestion and the ghosting sweep.
//!
//! Ingestion turns classified replies into events and, where a job matches,
//! status transitions. The sweep only flags; it never moves a job to
//! `ghosted`.

use chrono::{DateTime, Duration, Utc};
use strsim::jaro_winkler;
use tracing::{debug, info, warn};

use crate::ai::JobProvider;
use crate::db::Database;
use crate::email::MailMessage;
use crate::error::{HuntError, Result};
use crate::models::{EmailKind, JobRecord};
use crate::status::{EvidenceSource, request_transition};

const COMPANY_MATCH_THRESHOLD: f64 = 0.92;
const SNIPPET_CHARS: usize = 280;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FollowUpReport {
    pub classified: usize,
    pub events: usize,
    pub transitions: usize,
    pub rejected_transitions: usize,
    pub unmatched: usize,
    /// Messages already recorded by an earlier scan.
    pub replayed: usize,
    pub errors: usize,
}

/// Most recently updated active job whose company matches, exactly
/// (ignoring case) or by a close Jaro-Winkler score.
pub fn match_job<'a>(jobs: &'a [JobRecord], company: &str) -> Option<&'a JobRecord> {
    let wanted = company.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }

    if let Some(job) = jobs.iter().find(|j| j.company.to_lowercase() == wanted) {
        return Some(job);
    }

    jobs.iter()
        .map(|j| (j, jaro_winkler(&j.company.to_lowercase(), &wanted)))
        .filter(|(_, sim)| *sim >= COMPANY_MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(j, _)| j)
}

fn snippet(body: &str) -> String {
    let text = if body.contains('<') {
        scraper::Html::parse_document(body)
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        body.to_string()
    };
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}

pub async fn ingest_followups(
    db: &Database,
    provider: &dyn JobProvider,
    messages: &[MailMessage],
) -> Result<FollowUpReport> {
    let mut report = FollowUpReport::default();

    for message in messages.iter().filter(|m| m.looks_like_followup()) {
        let classification = match provider.classify_email(&message.subject, &message.body).await {
            Ok(c) => c,
            Err(e) if e.is_unsupported() => {
                debug!("email classification not supported; skipping follow-ups");
                break;
            }
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "classification failed");
                report.errors += 1;
                continue;
            }
        };
        report.classified += 1;

        if classification.kind == EmailKind::Other {
            continue;
        }
        let Some(company) = classification.company else {
            debug!(subject = %message.subject, kind = %classification.kind, "no company in follow-up");
            report.unmatched += 1;
            continue;
        };

        let active = db.list_active_jobs()?;
        let matched = match_job(&active, &company).map(|j| j.job_id.clone());

        let Some(event_id) = db.insert_followup(
            Some(&message.message_id),
            matched.as_deref(),
            &company,
            &message.subject,
            classification.kind,
            &snippet(&message.body),
            message.date,
        )?
        else {
            // Same Message-ID seen before; its transition was already requested
            debug!(message_id = %message.message_id, "follow-up already recorded");
            report.replayed += 1;
            continue;
        };
        report.events += 1;

        let Some(job_id) = matched else {
            debug!(%company, kind = %classification.kind, "follow-up matches no active job");
            report.unmatched += 1;
            continue;
        };
        let Some(target) = classification.kind.implied_status() else {
            continue;
        };

        match request_transition(db, &job_id, target, EvidenceSource::FollowUpEmail { event_id }) {
            Ok(_) => report.transitions += 1,
            Err(HuntError::InvalidTransition { from, to, .. }) => {
                warn!(%job_id, %from, %to, event_id, "follow-up implies a transition the job cannot make");
                report.rejected_transitions += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if report.classified > 0 {
        info!(
            classified = report.classified,
            events = report.events,
            transitions = report.transitions,
            rejected = report.rejected_transitions,
            "follow-ups ingested"
        );
    }
    Ok(report)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GhostingFlag {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub days_silent: i64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct GhostingReport {
    pub evaluated: usize,
    pub skipped: usize,
    pub cleared: usize,
    pub flagged: Vec<GhostingFlag>,
}

/// Flag active jobs whose last sign of life (application or follow-up)
/// is older than `threshold_days`. Jobs with no such sign are skipped.
pub fn sweep_ghosting(db: &Database, threshold_days: i64, now: DateTime<Utc>) -> Result<GhostingReport> {
    let threshold = Duration::days(threshold_days);
    let mut report = GhostingReport::default();

    for job in db.list_active_jobs()? {
        let last_event = db.latest_followup_date(&job.job_id)?;
        let anchor = match (job.applied_at, last_event) {
            (Some(a), Some(e)) => a.max(e),
            (Some(a), None) => a,
            (None, Some(e)) => e,
            (None, None) => {
                report.skipped += 1;
                continue;
            }
        };
        report.evaluated += 1;

        let silent = now - anchor;
        let at_risk = silent > threshold;
        if at_risk != job.ghosting_risk {
            db.set_ghosting_risk(&job.job_id, at_risk)?;
            if !at_risk {
                report.cleared += 1;
            }
        }
        if at_risk {
            report.flagged.push(GhostingFlag {
                job_id: job.job_id,
                title: job.title,
                company: job.company,
                days_silent: silent.num_days(),
            });
        }
    }

    info!(
        evaluated = report.evaluated,
        flagged = report.flagged.len(),
        cleared = report.cleared,
        "ghosting sweep"
    );
    Ok(report)
}
