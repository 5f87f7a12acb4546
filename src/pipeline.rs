//! One scan: fetch mail since the last checkpoint, parse alerts, drop
//! duplicates, then run the filter chain and scoring with bounded
//! concurrency. The checkpoint only moves once every job is saved.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::JobProvider;
use crate::config::{AppConfig, Preferences};
use crate::db::Database;
use crate::dedup::{Deduplicator, fingerprint};
use crate::email::{MailMessage, MailSource};
use crate::error::Result;
use crate::filters::{FilterChain, LogoSource};
use crate::followup::{FollowUpReport, ingest_followups};
use crate::logging::StepTimer;
use crate::models::{JobDraft, JobRecord};
use crate::parser::ParserRegistry;
use crate::scoring::{ScoreOutcome, ScoringEngine};

#[derive(Debug, Default)]
pub struct ScanReport {
    pub window_start: Option<DateTime<Utc>>,
    pub emails_found: usize,
    pub alerts: usize,
    pub parse_errors: usize,
    pub item_errors: usize,
    pub duplicates: usize,
    pub jobs_added: usize,
    pub resumed: usize,
    pub filtered: usize,
    pub scored: usize,
    pub unscored: usize,
    /// Drafts that would be added (dry run only).
    pub preview: Vec<JobDraft>,
    pub followups: FollowUpReport,
    pub checkpoint: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum JobOutcome {
    Filtered,
    Scored,
    Unscored,
    Enriched,
}

pub struct Pipeline<'a> {
    config: &'a AppConfig,
    db: &'a Database,
    parsers: ParserRegistry,
    chain: Arc<FilterChain>,
    engine: Arc<ScoringEngine>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a AppConfig,
        db: &'a Database,
        provider: Arc<dyn JobProvider>,
        logos: Arc<dyn LogoSource>,
        resume: Arc<str>,
    ) -> Self {
        let chain = FilterChain::standard(provider.clone(), logos, resume.clone());
        Self {
            config,
            db,
            parsers: ParserRegistry::new(),
            chain: Arc::new(chain),
            engine: Arc::new(ScoringEngine::new(provider, resume)),
        }
    }

    fn window_start(&self) -> Result<DateTime<Utc>> {
        Ok(match self.db.latest_checkpoint()? {
            Some(checkpoint) => checkpoint.last_scan_date,
            None => Utc::now() - Duration::days(i64::from(self.config.scan.initial_lookback_days)),
        })
    }

    pub async fn scan(
        &self,
        mail: &dyn MailSource,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let since = self.window_start()?;
        let mut report = ScanReport {
            window_start: Some(since),
            ..ScanReport::default()
        };
        info!(since = %since, dry_run, "scan started");

        let timer = StepTimer::start("fetch");
        let messages = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                return Ok(report);
            }
            fetched = mail.fetch_since(since) => fetched?,
        };
        timer.finish();
        report.emails_found = messages.len();

        let inserted = self.ingest_alerts(&messages, dry_run, &mut report)?;
        if dry_run {
            return Ok(report);
        }

        let pending = self.db.list_unprocessed()?;
        report.resumed = pending.len().saturating_sub(inserted);
        self.process_pending(pending, cancel, &mut report).await?;
        if cancel.is_cancelled() {
            report.cancelled = true;
            warn!("scan cancelled; checkpoint not advanced");
            return Ok(report);
        }

        report.followups = ingest_followups(self.db, self.engine.provider().as_ref(), &messages).await?;

        // Date headers come from the sender; a future one must not push the
        // window past mail that has yet to arrive
        let now = Utc::now();
        let newest = messages.iter().map(|m| m.date).max().unwrap_or(since);
        if newest > now {
            warn!(newest = %newest, "message dated in the future; checkpoint capped at now");
        }
        let last_seen = newest.min(now);
        self.db
            .append_checkpoint(last_seen, report.emails_found as i64, report.jobs_added as i64)?;
        report.checkpoint = Some(last_seen);

        info!(
            emails = report.emails_found,
            added = report.jobs_added,
            duplicates = report.duplicates,
            scored = report.scored,
            filtered = report.filtered,
            checkpoint = %last_seen,
            "scan finished"
        );
        Ok(report)
    }

    /// Parse alert emails and insert every draft that survives dedup.
    /// Returns how many rows were inserted.
    fn ingest_alerts(&self, messages: &[MailMessage], dry_run: bool, report: &mut ScanReport) -> Result<usize> {
        let timer = StepTimer::start("parse");
        let mut dedup = Deduplicator::new();
        let mut inserted = 0;

        for message in messages.iter().filter(|m| m.is_job_alert()) {
            report.alerts += 1;
            let source = message.source();
            let batch = match self.parsers.parse(&message.body, source, message.date) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(%source, subject = %message.subject, error = %e, "skipping message");
                    report.parse_errors += 1;
                    continue;
                }
            };
            report.item_errors += batch.item_errors;

            for draft in batch.drafts {
                let job_id = fingerprint(&draft.url, &draft.title, &draft.company);
                if dedup.is_duplicate(self.db, &job_id)? {
                    debug!(%job_id, title = %draft.title, "duplicate");
                    report.duplicates += 1;
                    continue;
                }

                if dry_run {
                    report.preview.push(draft);
                    continue;
                }

                let record = JobRecord::from_draft(job_id, draft);
                if self.db.insert_job(&record)? {
                    inserted += 1;
                    report.jobs_added += 1;
                    debug!(job_id = %record.job_id, %source, title = %record.title, "added");
                }
            }
        }

        timer.finish();
        Ok(inserted)
    }

    async fn process_pending(
        &self,
        pending: Vec<JobRecord>,
        cancel: &CancellationToken,
        report: &mut ScanReport,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let timer = StepTimer::start("score");
        let semaphore = Arc::new(Semaphore::new(self.config.scan.concurrency));
        let preferences = Arc::new(self.config.preferences.clone());
        let mut tasks = JoinSet::new();

        for job in pending {
            let semaphore = semaphore.clone();
            let chain = self.chain.clone();
            let engine = self.engine.clone();
            let preferences = preferences.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    done = process_job(job, &chain, &engine, &preferences) => Some(done),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((job, outcome))) => {
                    self.db.save_job(&job)?;
                    match outcome {
                        JobOutcome::Filtered => report.filtered += 1,
                        JobOutcome::Scored | JobOutcome::Enriched => report.scored += 1,
                        JobOutcome::Unscored => report.unscored += 1,
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "scoring task failed"),
            }
        }

        timer.finish();
        Ok(())
    }

    /// Re-run enrichment on a stored job. Scored jobs are re-scored by the
    /// chain; unscored ones go through both scoring phases.
    pub async fn enrich(&self, job: JobRecord) -> Result<JobRecord> {
        let (job, outcome) = process_job(job, &self.chain, &self.engine, &self.config.preferences).await;
        self.db.save_job(&job)?;
        debug!(job_id = %job.job_id, ?outcome, "enriched");
        Ok(job)
    }
}

async fn process_job(
    mut job: JobRecord,
    chain: &FilterChain,
    engine: &ScoringEngine,
    preferences: &Preferences,
) -> (JobRecord, JobOutcome) {
    let report = chain.run(&mut job, preferences).await;

    let outcome = if report.filtered_by.is_some() || job.is_filtered {
        JobOutcome::Filtered
    } else if job.score.is_some() {
        JobOutcome::Enriched
    } else {
        match engine.score(&mut job, preferences).await {
            ScoreOutcome::Filtered { .. } => JobOutcome::Filtered,
            ScoreOutcome::Scored { .. } => JobOutcome::Scored,
            ScoreOutcome::Unscored { .. } => JobOutcome::Unscored,
        }
    };

    let now = Utc::now();
    job.processed_at = Some(now);
    job.updated_at = now;
    (job, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::testing::{FakeLogoSource, FakeMailSource, FakeProvider, record};

    const ALERT_HTML: &str = r#"
        <html><body>
          <ul>
            <li><a href="https://boards.greenhouse.io/acme/jobs/42?utm_source=alert">Senior Backend Engineer at Acme - Remote</a></li>
          </ul>
        </body></html>
    "#;

    fn hours_ago(hours: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(Utc::now().timestamp() - hours * 3600, 0).unwrap()
    }

    fn alert(date: DateTime<Utc>, html: &str) -> MailMessage {
        MailMessage {
            message_id: format!("<{}@acme.io>", date.timestamp()),
            date,
            from: "careers@acme.io".into(),
            subject: "Job alert: new roles".into(),
            body: html.into(),
        }
    }

    async fn scan(
        config: &AppConfig,
        db: &Database,
        mail: &FakeMailSource,
        provider: Arc<FakeProvider>,
    ) -> ScanReport {
        let pipeline = Pipeline::new(
            config,
            db,
            provider,
            Arc::new(FakeLogoSource::missing()),
            Arc::from("resume"),
        );
        pipeline.scan(mail, false, &CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_alert_becomes_scored_record() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let mail = FakeMailSource::new(vec![alert(hours_ago(2), ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));

        let report = scan(&config, &db, &mail, provider.clone()).await;

        assert_eq!(report.jobs_added, 1);
        assert_eq!(report.scored, 1);
        let jobs = db.list_jobs(None, true).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.title, "Senior Backend Engineer");
        assert_eq!(job.company, "Acme");
        assert_eq!(job.location, "Remote");
        assert_eq!(job.url, "https://boards.greenhouse.io/acme/jobs/42");
        assert_eq!(job.baseline_score, Some(80));
        assert_eq!(job.score, Some(85));
        assert_eq!(job.status, JobStatus::New);
        assert!(!job.is_filtered);
        assert!(job.processed_at.is_some());
        assert_eq!(job.job_id, fingerprint(&job.url, &job.title, &job.company));
        assert_eq!(provider.filter_calls(), 1);
        assert_eq!(provider.analyze_calls(), 1);
    }

    #[tokio::test]
    async fn test_same_email_twice_stores_one_record() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let mail = FakeMailSource::replaying(vec![alert(hours_ago(2), ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));

        scan(&config, &db, &mail, provider.clone()).await;
        let second = scan(&config, &db, &mail, provider.clone()).await;

        assert_eq!(second.duplicates, 1);
        assert_eq!(second.jobs_added, 0);
        assert_eq!(db.count_jobs().unwrap(), 1);
        assert_eq!(provider.filter_calls(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_tracks_latest_email() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let older = hours_ago(3);
        let newer = hours_ago(1);
        let other_html = ALERT_HTML.replace("Senior Backend Engineer", "Staff Platform Engineer");
        let mail = FakeMailSource::new(vec![alert(newer, &other_html), alert(older, ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));

        let first = scan(&config, &db, &mail, provider.clone()).await;
        assert_eq!(first.checkpoint, Some(newer));
        assert_eq!(first.jobs_added, 2);

        let second = scan(&config, &db, &mail, provider.clone()).await;
        assert_eq!(second.emails_found, 0);
        assert_eq!(second.jobs_added, 0);
        assert_eq!(second.checkpoint, Some(newer));
        assert_eq!(mail.requests()[1], newer);

        let checkpoints = db.list_checkpoints(10).unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert!(checkpoints.iter().all(|c| c.last_scan_date == newer));
    }

    #[tokio::test]
    async fn test_future_dated_email_does_not_hide_later_mail() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let provider = Arc::new(FakeProvider::keeping(80));
        let future = alert(Utc::now() + Duration::days(365), ALERT_HTML);

        let first = scan(&config, &db, &FakeMailSource::new(vec![future.clone()]), provider.clone()).await;
        let checkpoint = first.checkpoint.unwrap();
        assert!(checkpoint <= Utc::now());

        let other_html = ALERT_HTML.replace("Senior Backend Engineer", "Staff Platform Engineer");
        let fresh = alert(Utc::now() + Duration::minutes(5), &other_html);
        let second = scan(&config, &db, &FakeMailSource::new(vec![future, fresh]), provider.clone()).await;

        assert_eq!(second.jobs_added, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(db.count_jobs().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_non_ascii_alert_does_not_abort_scan() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let unicode_html = r#"<html><body><ul>
            <li><a href="https://jobs.example.com/ist/1">İstanbul Engineer at Émile Corp - Remote</a></li>
        </ul></body></html>"#;
        let mail = FakeMailSource::new(vec![alert(hours_ago(3), unicode_html), alert(hours_ago(2), ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));

        let report = scan(&config, &db, &mail, provider).await;

        assert_eq!(report.jobs_added, 2);
        let companies: Vec<String> = db.list_jobs(None, true).unwrap().into_iter().map(|j| j.company).collect();
        assert!(companies.contains(&"Émile Corp".to_string()));
    }

    #[tokio::test]
    async fn test_location_reject_costs_no_ai_calls() {
        let mut config = AppConfig::default();
        config.preferences.locations = vec!["Berlin".into()];
        config.preferences.remote_ok = false;
        let db = Database::open_in_memory().unwrap();
        let mail = FakeMailSource::new(vec![alert(hours_ago(2), ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));

        let report = scan(&config, &db, &mail, provider.clone()).await;

        assert_eq!(report.filtered, 1);
        let job = &db.list_jobs(None, true).unwrap()[0];
        assert!(job.is_filtered);
        assert!(job.filter_reason.as_deref().unwrap().starts_with("location"));
        assert_eq!(provider.filter_calls(), 0);
        assert_eq!(provider.search_calls(), 0);
        assert!(db.list_jobs(None, false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_message_does_not_stop_batch() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let mail = FakeMailSource::new(vec![alert(hours_ago(3), "   "), alert(hours_ago(2), ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));

        let report = scan(&config, &db, &mail, provider).await;

        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.jobs_added, 1);
    }

    #[tokio::test]
    async fn test_unprocessed_rows_are_resumed() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let leftover = record("Backend Engineer", "Globex", "Remote");
        db.insert_job(&leftover).unwrap();
        let mail = FakeMailSource::new(vec![]);
        let provider = Arc::new(FakeProvider::keeping(80));

        let report = scan(&config, &db, &mail, provider).await;

        assert_eq!(report.resumed, 1);
        assert_eq!(report.scored, 1);
        let job = db.get_job(&leftover.job_id).unwrap().unwrap();
        assert_eq!(job.score, Some(85));
        assert!(db.is_processed(&leftover.job_id).unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_scan_keeps_checkpoint() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let mail = FakeMailSource::new(vec![alert(hours_ago(2), ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));
        let pipeline = Pipeline::new(
            &config,
            &db,
            provider.clone(),
            Arc::new(FakeLogoSource::missing()),
            Arc::from("resume"),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline.scan(&mail, false, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert!(db.latest_checkpoint().unwrap().is_none());
        assert_eq!(provider.filter_calls(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let mail = FakeMailSource::new(vec![alert(hours_ago(2), ALERT_HTML)]);
        let provider = Arc::new(FakeProvider::keeping(80));
        let pipeline = Pipeline::new(
            &config,
            &db,
            provider.clone(),
            Arc::new(FakeLogoSource::missing()),
            Arc::from("resume"),
        );

        let report = pipeline.scan(&mail, true, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.preview.len(), 1);
        assert_eq!(db.count_jobs().unwrap(), 0);
        assert!(db.latest_checkpoint().unwrap().is_none());
        assert_eq!(provider.filter_calls(), 0);
    }

    #[tokio::test]
    async fn test_enrich_rescored_job() {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let provider = Arc::new(
            FakeProvider::keeping(80)
                .with_analysis_score(92)
                .with_search(Ok("Full description".into())),
        );
        let pipeline = Pipeline::new(
            &config,
            &db,
            provider.clone(),
            Arc::new(FakeLogoSource::missing()),
            Arc::from("resume"),
        );
        let mut job = record("Backend Engineer", "Acme", "Remote");
        job.score = Some(60);
        db.insert_job(&job).unwrap();

        let job = pipeline.enrich(job).await.unwrap();

        assert_eq!(job.score, Some(92));
        assert_eq!(job.description.as_deref(), Some("Full description"));
        assert_eq!(provider.filter_calls(), 0);
        assert_eq!(db.get_job(&job.job_id).unwrap().unwrap().score, Some(92));
    }
}
