//! Fakes shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ai::{BaselineResult, EmailClassification, JobAnalysis, JobProvider};
use crate::config::Preferences;
use crate::dedup::fingerprint;
use crate::email::{MailMessage, MailSource};
use crate::error::{ProviderError, Result};
use crate::filters::LogoSource;
use crate::models::{EmailKind, JobDraft, JobRecord, Source};

type ProviderResult<T> = std::result::Result<T, ProviderError>;

pub fn draft(title: &str, company: &str, location: &str) -> JobDraft {
    let now = Utc::now();
    JobDraft {
        title: title.into(),
        company: company.into(),
        location: location.into(),
        url: format!(
            "https://jobs.example.com/{}",
            title.to_lowercase().replace(' ', "-")
        ),
        source: Source::Generic,
        raw_text: format!("{} | {} | {}", title, company, location),
        created_at: now,
        email_date: now,
    }
}

pub fn record(title: &str, company: &str, location: &str) -> JobRecord {
    let d = draft(title, company, location);
    let id = fingerprint(&d.url, &d.title, &d.company);
    JobRecord::from_draft(id, d)
}

/// Scripted provider with per-operation call counters.
pub struct FakeProvider {
    baseline: ProviderResult<BaselineResult>,
    analysis: ProviderResult<JobAnalysis>,
    search: ProviderResult<String>,
    filter_calls: AtomicUsize,
    analyze_calls: AtomicUsize,
    search_calls: AtomicUsize,
    classify_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn keeping(baseline_score: i64) -> Self {
        Self {
            baseline: Ok(BaselineResult {
                keep: true,
                baseline_score,
                filter_reason: String::new(),
            }),
            analysis: Ok(analysis(85)),
            search: Err(ProviderError::Unsupported("searchJobDescription")),
            filter_calls: AtomicUsize::new(0),
            analyze_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            classify_calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(baseline_score: i64, reason: &str) -> Self {
        Self::keeping(baseline_score).with_baseline(Ok(BaselineResult {
            keep: false,
            baseline_score,
            filter_reason: reason.into(),
        }))
    }

    pub fn with_baseline(mut self, baseline: ProviderResult<BaselineResult>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_analysis(mut self, analysis: ProviderResult<JobAnalysis>) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_analysis_score(self, score: i64) -> Self {
        self.with_analysis(Ok(analysis(score)))
    }

    pub fn with_search(mut self, search: ProviderResult<String>) -> Self {
        self.search = search;
        self
    }

    pub fn filter_calls(&self) -> usize {
        self.filter_calls.load(Ordering::SeqCst)
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }
}

fn analysis(score: i64) -> JobAnalysis {
    JobAnalysis {
        qualification_score: score,
        should_apply: score >= 70,
        strengths: vec!["Rust".into()],
        gaps: vec![],
        recommendation: "Apply".into(),
        resume_variant: "backend".into(),
    }
}

#[async_trait]
impl JobProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn filter_and_score(
        &self,
        _job: &JobRecord,
        _resume: &str,
        _preferences: &Preferences,
    ) -> ProviderResult<BaselineResult> {
        self.filter_calls.fetch_add(1, Ordering::SeqCst);
        self.baseline.clone()
    }

    async fn analyze_job(&self, _job: &JobRecord, _resume: &str) -> ProviderResult<JobAnalysis> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.analysis.clone()
    }

    async fn generate_cover_letter(&self, job: &JobRecord, _resume: &str) -> ProviderResult<String> {
        Ok(format!("Dear {} team,", job.company))
    }

    async fn generate_interview_answer(
        &self,
        _job: &JobRecord,
        _resume: &str,
        question: &str,
    ) -> ProviderResult<String> {
        Ok(format!("Answer to: {}", question))
    }

    async fn search_job_description(&self, _title: &str, _company: &str) -> ProviderResult<String> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.search.clone()
    }

    /// Keyword classification; the company is the word after "from" or "to".
    async fn classify_email(&self, subject: &str, body: &str) -> ProviderResult<EmailClassification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        let text = format!("{} {}", subject, body).to_lowercase();
        let kind = if text.contains("interview") {
            EmailKind::Interview
        } else if text.contains("offer") {
            EmailKind::Offer
        } else if text.contains("unfortunately") || text.contains("not moving forward") {
            EmailKind::Rejection
        } else if text.contains("thank you for applying") || text.contains("application received") {
            EmailKind::Applied
        } else {
            EmailKind::Other
        };
        let company = text
            .split_whitespace()
            .skip_while(|w| *w != "from" && *w != "to")
            .nth(1)
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string());
        Ok(EmailClassification { kind, company })
    }
}

pub struct FakeLogoSource {
    url: Option<String>,
    calls: AtomicUsize,
}

impl FakeLogoSource {
    pub fn found(url: &str) -> Self {
        Self {
            url: Some(url.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn missing() -> Self {
        Self {
            url: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogoSource for FakeLogoSource {
    async fn logo_url(&self, _company: &str, _job_url: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.url.clone())
    }
}

/// In-memory mailbox. With `ignore_since` it replays everything on every
/// fetch, like a provider whose date search is coarse.
pub struct FakeMailSource {
    messages: Vec<MailMessage>,
    ignore_since: bool,
    requests: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeMailSource {
    pub fn new(messages: Vec<MailMessage>) -> Self {
        Self {
            messages,
            ignore_since: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replaying(messages: Vec<MailMessage>) -> Self {
        Self {
            ignore_since: true,
            ..Self::new(messages)
        }
    }

    pub fn requests(&self) -> Vec<DateTime<Utc>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<MailMessage>> {
        self.requests.lock().unwrap().push(since);
        let mut messages: Vec<_> = self
            .messages
            .iter()
            .filter(|m| self.ignore_since || m.date > since)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.date);
        Ok(messages)
    }
}
