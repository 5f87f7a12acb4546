//! Ordered filter and enrichment stages run on every new job before scoring.
//!
//! Cheap deterministic stages come first so a rejection never pays for the
//! network stages behind it.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::ai::JobProvider;
use crate::config::Preferences;
use crate::error::{HuntError, Result};
use crate::models::{Analysis, JobRecord};

/// Fields a stage may fill in on a record that keeps going.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub is_aggregator: Option<bool>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub score: Option<i64>,
    pub analysis: Option<Analysis>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }

    fn apply(self, job: &mut JobRecord) {
        if self.salary_min.is_some() {
            job.salary_min = self.salary_min;
        }
        if self.salary_max.is_some() {
            job.salary_max = self.salary_max;
        }
        if let Some(flag) = self.is_aggregator {
            job.is_aggregator = flag;
        }
        if self.description.is_some() {
            job.description = self.description;
        }
        if self.logo_url.is_some() {
            job.logo_url = self.logo_url;
        }
        if self.score.is_some() {
            job.score = self.score;
        }
        if self.analysis.is_some() {
            job.analysis = self.analysis;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub pass: bool,
    pub short_circuit: bool,
    pub patch: RecordPatch,
    pub reason: Option<String>,
}

impl StageOutcome {
    pub fn pass() -> Self {
        Self::pass_with(RecordPatch::default())
    }

    pub fn pass_with(patch: RecordPatch) -> Self {
        Self {
            pass: true,
            short_circuit: false,
            patch,
            reason: None,
        }
    }

    /// Reject and stop the chain.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            short_circuit: true,
            patch: RecordPatch::default(),
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, job: &JobRecord, preferences: &Preferences) -> StageOutcome;

    /// Whether patches from this stage may overwrite `score` and `analysis`.
    fn may_rescore(&self) -> bool {
        false
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ChainReport {
    pub stages_run: Vec<&'static str>,
    pub filtered_by: Option<&'static str>,
}

pub struct FilterChain {
    stages: Vec<Box<dyn Stage>>,
}

impl FilterChain {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// location → salary → aggregator → web search → logo → re-score
    pub fn standard(provider: Arc<dyn JobProvider>, logos: Arc<dyn LogoSource>, resume: Arc<str>) -> Self {
        Self::new(vec![
            Box::new(LocationFilter),
            Box::new(SalaryFilter),
            Box::new(AggregatorDetector),
            Box::new(WebSearchEnrichment::new(provider.clone())),
            Box::new(LogoFetch::new(logos)),
            Box::new(Rescore::new(provider, resume)),
        ])
    }

    pub async fn run(&self, job: &mut JobRecord, preferences: &Preferences) -> ChainReport {
        let mut report = ChainReport::default();

        for stage in &self.stages {
            report.stages_run.push(stage.name());
            let outcome = stage.evaluate(job, preferences).await;

            let mut patch = outcome.patch;
            if !stage.may_rescore() && (patch.score.is_some() || patch.analysis.is_some()) {
                warn!(stage = stage.name(), job_id = %job.job_id, "stage tried to change score; ignored");
                patch.score = None;
                patch.analysis = None;
            }
            if !patch.is_empty() {
                debug!(stage = stage.name(), job_id = %job.job_id, ?patch, "patched");
                patch.apply(job);
            }

            // Stopping the chain always excludes the record, whatever `pass` says
            if !outcome.pass || outcome.short_circuit {
                job.is_filtered = true;
                job.filter_reason = Some(format!(
                    "{}: {}",
                    stage.name(),
                    outcome.reason.as_deref().unwrap_or("rejected")
                ));
            }
            if outcome.short_circuit {
                debug!(stage = stage.name(), job_id = %job.job_id, reason = ?job.filter_reason, "short-circuit");
                report.filtered_by = Some(stage.name());
                break;
            }
        }

        report
    }
}

// --- Location ---

pub struct LocationFilter;

#[async_trait]
impl Stage for LocationFilter {
    fn name(&self) -> &'static str {
        "location"
    }

    async fn evaluate(&self, job: &JobRecord, preferences: &Preferences) -> StageOutcome {
        if preferences.locations.is_empty() {
            return StageOutcome::pass();
        }

        let location = job.location.to_lowercase();
        // "Remote", "Remote (US)", "Anywhere" all count when remote is ok
        if preferences.remote_ok && (location.contains("remote") || location.contains("anywhere")) {
            return StageOutcome::pass();
        }
        // Substring match so "Berlin" accepts "Berlin, Germany (Hybrid)"
        if preferences
            .locations
            .iter()
            .any(|wanted| location.contains(&wanted.to_lowercase()))
        {
            return StageOutcome::pass();
        }

        StageOutcome::reject(format!("'{}' not in preferred locations", job.location))
    }
}

// --- Salary ---

// "$150,000", "$150k", "$ 95.5K": group 1 is the number, group 2 the k suffix
static PAY_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)\s*(k\b)?").unwrap()
});

// Checked against the text right after an amount
static HOURLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:/\s*(?:hr|hour)|per\s+hour|an\s+hour)").unwrap());

/// Pull an annual pay range out of free text: "$150,000 - $200,000",
/// "$150k-$200k", "$150K". Bare numbers under 1000 are read as thousands.
/// Hourly rates are ignored.
pub fn extract_pay_range(content: &str) -> (Option<i64>, Option<i64>) {
    let mut values = Vec::new();

    for caps in PAY_AMOUNT.captures_iter(content) {
        let Some(whole) = caps.get(0) else { continue };
        // "$45/hr" is a contract rate, not a salary
        if HOURLY.is_match(&content[whole.end()..]) {
            continue;
        }
        let digits: String = caps[1].chars().filter(|c| *c != ',').collect();
        let Ok(num) = digits.parse::<f64>() else { continue };

        // "$150 - $200k" shares the suffix, so small bare numbers are thousands too
        let value = if caps.get(2).is_some() || num < 1000.0 {
            num * 1000.0
        } else {
            num
        };
        values.push(value.round() as i64);
        if values.len() == 2 {
            break;
        }
    }

    match values.as_slice() {
        [] => (None, None),
        [only] => (Some(*only), None),
        [a, b, ..] => (Some(*a.min(b)), Some(*a.max(b))),
    }
}

pub struct SalaryFilter;

#[async_trait]
impl Stage for SalaryFilter {
    fn name(&self) -> &'static str {
        "salary"
    }

    async fn evaluate(&self, job: &JobRecord, preferences: &Preferences) -> StageOutcome {
        // Boards put pay in different places; first field with a range wins
        let mut range = (None, None);
        for text in [
            job.title.as_str(),
            job.location.as_str(),
            job.raw_text.as_str(),
            job.description.as_deref().unwrap_or(""),
        ] {
            range = extract_pay_range(text);
            if range.0.is_some() {
                break;
            }
        }

        let (min, max) = range;
        if min.is_none() {
            return StageOutcome::pass();
        }

        // Judge by the top of the range: a $120k-$160k job meets a $150k floor
        if let Some(floor) = preferences.min_salary {
            let top = max.or(min).unwrap_or_default();
            if top < floor {
                return StageOutcome::reject(format!("pays at most ${} (minimum ${})", top, floor));
            }
        }

        StageOutcome::pass_with(RecordPatch {
            salary_min: min,
            salary_max: max,
            ..RecordPatch::default()
        })
    }
}

// --- Aggregator ---

const KNOWN_AGENCIES: &[&str] = &[
    "robert half",
    "teksystems",
    "randstad",
    "adecco",
    "insight global",
    "kforce",
    "aerotek",
    "cybercoders",
    "jobot",
    "hays",
    "manpowergroup",
    "apex systems",
    "motion recruitment",
    "kelly services",
    "harnham",
];

static AGENCY_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(staffing|recruiting|recruitment|recruiters|talent solutions|talent partners|search partners|headhunters?)\b",
    )
    .unwrap()
});

// Agencies that hide behind a generic name still talk about their "client"
static CLIENT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(on behalf of (our|a) client|our client is|confidential client)\b").unwrap()
});

pub fn is_aggregator(company: &str, raw_text: &str) -> bool {
    let lower = company.to_lowercase();
    KNOWN_AGENCIES.iter().any(|agency| lower.contains(agency))
        || AGENCY_KEYWORDS.is_match(company)
        || CLIENT_PHRASE.is_match(raw_text)
}

pub struct AggregatorDetector;

#[async_trait]
impl Stage for AggregatorDetector {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    async fn evaluate(&self, job: &JobRecord, preferences: &Preferences) -> StageOutcome {
        if !is_aggregator(&job.company, &job.raw_text) {
            return StageOutcome::pass();
        }
        if preferences.exclude_aggregators {
            return StageOutcome::reject(format!("'{}' looks like a staffing agency", job.company));
        }
        StageOutcome::pass_with(RecordPatch {
            is_aggregator: Some(true),
            ..RecordPatch::default()
        })
    }
}

// --- Web search ---

const MAX_DESCRIPTION_CHARS: usize = 12_000;

pub struct WebSearchEnrichment {
    provider: Arc<dyn JobProvider>,
}

impl WebSearchEnrichment {
    pub fn new(provider: Arc<dyn JobProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for WebSearchEnrichment {
    fn name(&self) -> &'static str {
        "web_search"
    }

    async fn evaluate(&self, job: &JobRecord, _preferences: &Preferences) -> StageOutcome {
        // Already enriched on an earlier pass; searching again costs money
        if job.description.is_some() {
            return StageOutcome::pass();
        }

        match self.provider.search_job_description(&job.title, &job.company).await {
            Ok(text) => StageOutcome::pass_with(RecordPatch {
                description: Some(text.chars().take(MAX_DESCRIPTION_CHARS).collect()),
                ..RecordPatch::default()
            }),
            Err(e) if e.is_unsupported() => {
                debug!(provider = self.provider.name(), "web search not supported");
                StageOutcome::pass()
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "web search failed");
                StageOutcome::pass()
            }
        }
    }
}

// --- Logo ---

/// Resolves a company logo URL.
#[async_trait]
pub trait LogoSource: Send + Sync {
    async fn logo_url(&self, company: &str, job_url: &str) -> Result<Option<String>>;
}

// Hosts that serve many employers; their favicon says nothing about the company
const BOARD_HOSTS: &[&str] = &[
    "linkedin.com",
    "indeed.com",
    "glassdoor.com",
    "greenhouse.io",
    "lever.co",
    "workday.com",
    "myworkdayjobs.com",
    "ashbyhq.com",
    "smartrecruiters.com",
];

/// Favicon service lookup keyed on the employer's domain.
pub struct FaviconLogoSource {
    client: reqwest::Client,
}

impl FaviconLogoSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HuntError::Configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Employer domain: the job URL's host unless it is a job board, else a
/// guess from the company name.
pub fn company_domain(company: &str, job_url: &str) -> Option<String> {
    let host = url::Url::parse(job_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()));
    if let Some(host) = host {
        if !BOARD_HOSTS.iter().any(|board| host == *board || host.ends_with(&format!(".{}", board))) {
            return Some(host);
        }
    }

    let slug: String = company
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !matches!(*w, "inc" | "inc." | "llc" | "ltd" | "ltd." | "corp" | "corp." | "co."))
        .collect::<String>()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if slug.is_empty() || company.eq_ignore_ascii_case(crate::parser::UNKNOWN_COMPANY) {
        None
    } else {
        Some(format!("{}.com", slug))
    }
}

#[async_trait]
impl LogoSource for FaviconLogoSource {
    async fn logo_url(&self, company: &str, job_url: &str) -> Result<Option<String>> {
        let Some(domain) = company_domain(company, job_url) else {
            return Ok(None);
        };
        let logo = format!("https://www.google.com/s2/favicons?domain={}&sz=128", domain);

        let response = self
            .client
            .get(&logo)
            .send()
            .await
            .map_err(|e| HuntError::Provider(e.into()))?;
        Ok(response.status().is_success().then_some(logo))
    }
}

pub struct LogoFetch {
    source: Arc<dyn LogoSource>,
}

impl LogoFetch {
    pub fn new(source: Arc<dyn LogoSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Stage for LogoFetch {
    fn name(&self) -> &'static str {
        "logo"
    }

    async fn evaluate(&self, job: &JobRecord, _preferences: &Preferences) -> StageOutcome {
        if job.logo_url.is_some() {
            return StageOutcome::pass();
        }
        match self.source.logo_url(&job.company, &job.url).await {
            Ok(Some(url)) => StageOutcome::pass_with(RecordPatch {
                logo_url: Some(url),
                ..RecordPatch::default()
            }),
            Ok(None) => StageOutcome::pass(),
            Err(e) => {
                debug!(company = %job.company, error = %e, "logo lookup failed");
                StageOutcome::pass()
            }
        }
    }
}

// --- Re-score ---

/// Re-runs the full analysis on an already-scored job once enrichment has
/// given it a better description.
pub struct Rescore {
    provider: Arc<dyn JobProvider>,
    resume: Arc<str>,
}

impl Rescore {
    pub fn new(provider: Arc<dyn JobProvider>, resume: Arc<str>) -> Self {
        Self { provider, resume }
    }
}

#[async_trait]
impl Stage for Rescore {
    fn name(&self) -> &'static str {
        "rescore"
    }

    fn may_rescore(&self) -> bool {
        true
    }

    async fn evaluate(&self, job: &JobRecord, _preferences: &Preferences) -> StageOutcome {
        if job.score.is_none() || job.is_filtered {
            return StageOutcome::pass();
        }

        match self.provider.analyze_job(job, &self.resume).await {
            Ok(analysis) => StageOutcome::pass_with(RecordPatch {
                score: Some(analysis.qualification_score),
                analysis: Some(analysis.to_analysis()),
                ..RecordPatch::default()
            }),
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "re-score failed; keeping previous score");
                StageOutcome::pass()
            }
        }
    }
}
