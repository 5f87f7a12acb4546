use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job board an alert email came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Linkedin,
    Indeed,
    Glassdoor,
    Generic,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Linkedin,
        Source::Indeed,
        Source::Glassdoor,
        Source::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Linkedin => "linkedin",
            Source::Indeed => "indeed",
            Source::Glassdoor => "glassdoor",
            Source::Generic => "generic",
        }
    }

    /// Pick the board from an email's From header.
    pub fn from_sender(from: &str) -> Self {
        let from = from.to_lowercase();
        if from.contains("linkedin.com") {
            Source::Linkedin
        } else if from.contains("indeed.com") {
            Source::Indeed
        } else if from.contains("glassdoor.com") {
            Source::Glassdoor
        } else {
            Source::Generic
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|src| src.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown source '{}'", s))
    }
}

/// Application lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    New,
    Interested,
    Applied,
    Interviewing,
    Offered,
    Rejected,
    Ghosted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::New,
        JobStatus::Interested,
        JobStatus::Applied,
        JobStatus::Interviewing,
        JobStatus::Offered,
        JobStatus::Rejected,
        JobStatus::Ghosted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Interested => "interested",
            JobStatus::Applied => "applied",
            JobStatus::Interviewing => "interviewing",
            JobStatus::Offered => "offered",
            JobStatus::Rejected => "rejected",
            JobStatus::Ghosted => "ghosted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Rejected | JobStatus::Ghosted)
    }

    /// Position along new → interested → applied → interviewing → offered.
    /// Terminal states have no position.
    pub fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::New => Some(0),
            JobStatus::Interested => Some(1),
            JobStatus::Applied => Some(2),
            JobStatus::Interviewing => Some(3),
            JobStatus::Offered => Some(4),
            JobStatus::Rejected | JobStatus::Ghosted => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown status '{}' (expected one of: new, interested, applied, interviewing, offered, rejected, ghosted)",
                    s
                )
            })
    }
}

/// Full-analysis output stored with the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub should_apply: bool,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub recommendation: String,
    pub resume_variant: String,
}

/// A job extracted from an alert email, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDraft {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub source: Source,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
    pub email_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub source: Source,
    pub status: JobStatus,
    pub baseline_score: Option<i64>,
    pub score: Option<i64>,
    pub analysis: Option<Analysis>,
    pub cover_letter: Option<String>,
    pub notes: Option<String>,
    pub raw_text: String,
    pub is_filtered: bool,
    pub filter_reason: Option<String>,
    pub viewed: bool,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub is_aggregator: bool,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub ghosting_risk: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub email_date: DateTime<Utc>,
}

impl JobRecord {
    /// Fresh record for a draft that passed deduplication.
    pub fn from_draft(job_id: String, draft: JobDraft) -> Self {
        Self {
            job_id,
            title: draft.title,
            company: draft.company,
            location: draft.location,
            url: draft.url,
            source: draft.source,
            status: JobStatus::New,
            baseline_score: None,
            score: None,
            analysis: None,
            cover_letter: None,
            notes: None,
            raw_text: draft.raw_text,
            is_filtered: false,
            filter_reason: None,
            viewed: false,
            salary_min: None,
            salary_max: None,
            is_aggregator: false,
            description: None,
            logo_url: None,
            ghosting_risk: false,
            applied_at: None,
            processed_at: None,
            created_at: draft.created_at,
            updated_at: draft.created_at,
            email_date: draft.email_date,
        }
    }

    /// Text handed to the AI: the enriched description when there is one.
    pub fn job_text(&self) -> String {
        let body = self.description.as_deref().unwrap_or(&self.raw_text);
        format!(
            "Title: {}\nCompany: {}\nLocation: {}\n\n{}",
            self.title, self.company, self.location, body
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub id: i64,
    pub last_scan_date: DateTime<Utc>,
    pub emails_found: i64,
    pub jobs_added: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub id: i64,
    pub company: String,
    pub careers_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a follow-up email says about an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailKind {
    Interview,
    Offer,
    Rejection,
    Applied,
    Other,
}

impl EmailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::Interview => "interview",
            EmailKind::Offer => "offer",
            EmailKind::Rejection => "rejection",
            EmailKind::Applied => "applied",
            EmailKind::Other => "other",
        }
    }

    /// Status a classified email is positive evidence for.
    pub fn implied_status(&self) -> Option<JobStatus> {
        match self {
            EmailKind::Interview => Some(JobStatus::Interviewing),
            EmailKind::Offer => Some(JobStatus::Offered),
            EmailKind::Rejection => Some(JobStatus::Rejected),
            EmailKind::Applied => Some(JobStatus::Applied),
            EmailKind::Other => None,
        }
    }
}

impl fmt::Display for EmailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "interview" => Ok(EmailKind::Interview),
            "offer" => Ok(EmailKind::Offer),
            "rejection" => Ok(EmailKind::Rejection),
            "applied" => Ok(EmailKind::Applied),
            "other" => Ok(EmailKind::Other),
            other => Err(format!("unknown email kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpEvent {
    pub id: i64,
    pub job_id: Option<String>,
    pub company: String,
    pub subject: String,
    pub kind: EmailKind,
    pub snippet: String,
    pub email_date: DateTime<Utc>,
}
