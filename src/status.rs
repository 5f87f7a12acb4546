use chrono::Utc;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{HuntError, Result};
use crate::models::{JobRecord, JobStatus};

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceSource {
    User,
    FollowUpEmail { event_id: i64 },
}

/// Forward along new → interested → applied → interviewing → offered
/// (skips allowed), or into a terminal state from any non-terminal one.
/// `ghosted` needs the user's word.
pub fn is_allowed(from: JobStatus, to: JobStatus, evidence: EvidenceSource) -> bool {
    if from == to || from.is_terminal() {
        return false;
    }
    if to == JobStatus::Ghosted && evidence != EvidenceSource::User {
        return false;
    }
    if to.is_terminal() {
        return true;
    }
    to.rank() > from.rank()
}

pub fn request_transition(
    db: &Database,
    job_id: &str,
    to: JobStatus,
    evidence: EvidenceSource,
) -> Result<JobRecord> {
    let job = load(db, job_id)?;
    commit(db, &job, to, evidence)
}

fn load(db: &Database, job_id: &str) -> Result<JobRecord> {
    db.get_job(job_id)?
        .ok_or_else(|| HuntError::NotFound(format!("job {}", job_id)))
}

/// Validate against the status `job` was read with and write only if the
/// row still holds it. A concurrent writer that got there first wins; this
/// call then fails against the status it actually finds.
fn commit(db: &Database, job: &JobRecord, to: JobStatus, evidence: EvidenceSource) -> Result<JobRecord> {
    let invalid = |from| HuntError::InvalidTransition {
        job_id: job.job_id.clone(),
        from,
        to,
    };
    if !is_allowed(job.status, to, evidence) {
        return Err(invalid(job.status));
    }

    let now = Utc::now();
    // Reaching applied or beyond means an application went out, even if
    // the user skipped recording it
    let applied_at = (to.rank() >= JobStatus::Applied.rank()).then_some(now);
    if !db.update_status(&job.job_id, job.status, to, applied_at, now)? {
        let current = load(db, &job.job_id)?;
        warn!(job_id = %job.job_id, expected = %job.status, found = %current.status, "status changed concurrently");
        return Err(invalid(current.status));
    }
    info!(job_id = %job.job_id, from = %job.status, to = %to, ?evidence, "status changed");

    load(db, &job.job_id)
}
