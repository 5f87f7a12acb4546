use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

use crate::error::{HuntError, Result};
use crate::models::{
    Analysis, EmailKind, FollowUpEvent, JobRecord, JobStatus, ScanCheckpoint, Source,
    WatchlistEntry,
};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

const JOB_COLUMNS: &str = "job_id, title, company, location, url, source, status,
    baseline_score, score, analysis, cover_letter, notes, raw_text, is_filtered,
    filter_reason, viewed, salary_min, salary_max, is_aggregator, description,
    logo_url, ghosting_risk, applied_at, processed_at, created_at, updated_at, email_date";

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Initialized in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL,
                url TEXT NOT NULL,
                source TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new' CHECK (status IN
                    ('new', 'interested', 'applied', 'interviewing', 'offered', 'rejected', 'ghosted')),
                baseline_score INTEGER,
                score INTEGER,
                analysis TEXT,
                cover_letter TEXT,
                notes TEXT,
                raw_text TEXT NOT NULL,
                is_filtered INTEGER NOT NULL DEFAULT 0,
                filter_reason TEXT,
                viewed INTEGER NOT NULL DEFAULT 0,
                salary_min INTEGER,
                salary_max INTEGER,
                is_aggregator INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                logo_url TEXT,
                ghosting_risk INTEGER NOT NULL DEFAULT 0,
                applied_at TEXT,
                processed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                email_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scan_checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                last_scan_date TEXT NOT NULL,
                emails_found INTEGER NOT NULL,
                jobs_added INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watchlist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company TEXT NOT NULL UNIQUE COLLATE NOCASE,
                careers_url TEXT,
                notes TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS followup_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT UNIQUE,
                job_id TEXT REFERENCES jobs(job_id),
                company TEXT NOT NULL,
                subject TEXT NOT NULL,
                kind TEXT NOT NULL,
                snippet TEXT NOT NULL,
                email_date TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_followups_job ON followup_events(job_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(HuntError::Configuration(
                "Database not initialized. Run 'hunt init' first.".to_string(),
            ));
        }
        Ok(())
    }

    // --- Job operations ---

    /// Insert a freshly deduplicated record. Returns false if the id already exists.
    pub fn insert_job(&self, job: &JobRecord) -> Result<bool> {
        let analysis = job.analysis.as_ref().map(serde_json::to_string).transpose()?;
        let inserted = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO jobs ({JOB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)"
            ),
            params![
                job.job_id,
                job.title,
                job.company,
                job.location,
                job.url,
                job.source.as_str(),
                job.status.as_str(),
                job.baseline_score,
                job.score,
                analysis,
                job.cover_letter,
                job.notes,
                job.raw_text,
                job.is_filtered,
                job.filter_reason,
                job.viewed,
                job.salary_min,
                job.salary_max,
                job.is_aggregator,
                job.description,
                job.logo_url,
                job.ghosting_risk,
                job.applied_at.map(|d| to_sql_ts(&d)),
                job.processed_at.map(|d| to_sql_ts(&d)),
                to_sql_ts(&job.created_at),
                to_sql_ts(&job.updated_at),
                to_sql_ts(&job.email_date),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Upsert keyed by `job_id`. Only the fields owned by the enrichment chain
    /// and the scoring engine are overwritten on conflict; status and user
    /// fields go through their own setters.
    pub fn save_job(&self, job: &JobRecord) -> Result<()> {
        self.insert_job(job)?;
        let analysis = job.analysis.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "UPDATE jobs SET
                baseline_score = ?2, score = ?3, analysis = ?4, is_filtered = ?5,
                filter_reason = ?6, salary_min = ?7, salary_max = ?8, is_aggregator = ?9,
                description = ?10, logo_url = ?11, processed_at = ?12, updated_at = ?13
             WHERE job_id = ?1",
            params![
                job.job_id,
                job.baseline_score,
                job.score,
                analysis,
                job.is_filtered,
                job.filter_reason,
                job.salary_min,
                job.salary_max,
                job.is_aggregator,
                job.description,
                job.logo_url,
                job.processed_at.map(|d| to_sql_ts(&d)),
                to_sql_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn is_processed(&self, job_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM jobs WHERE job_id = ?1 AND processed_at IS NOT NULL",
                [job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count_jobs(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                [job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Resolve a full id or a unique prefix of one.
    pub fn find_job(&self, id_or_prefix: &str) -> Result<JobRecord> {
        let prefix = id_or_prefix.trim().to_lowercase();
        // Plain prefix comparison; LIKE would treat '%' and '_' as wildcards
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE substr(job_id, 1, length(?1)) = ?1 LIMIT 2"
        ))?;
        let mut jobs = stmt
            .query_map([prefix], Self::row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match jobs.len() {
            0 => Err(HuntError::NotFound(format!("job '{}'", id_or_prefix))),
            1 => Ok(jobs.remove(0)),
            _ => Err(HuntError::NotFound(format!(
                "job id '{}' is ambiguous, use more characters",
                id_or_prefix
            ))),
        }
    }

    pub fn list_jobs(&self, status: Option<JobStatus>, include_filtered: bool) -> Result<Vec<JobRecord>> {
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1=1");
        if !include_filtered {
            sql.push_str(" AND is_filtered = 0");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?1");
        }
        sql.push_str(" ORDER BY COALESCE(score, baseline_score, 0) DESC, email_date DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match status {
            Some(s) => stmt.query_map([s.as_str()], Self::row_to_job)?,
            None => stmt.query_map([], Self::row_to_job)?,
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Stored records whose chain/scoring never completed.
    pub fn list_unprocessed(&self) -> Result<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE processed_at IS NULL ORDER BY email_date"
        ))?;
        let rows = stmt.query_map([], Self::row_to_job)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Non-terminal jobs, most recently updated first. Filtered jobs are
    /// included: the user may still have applied to one.
    pub fn list_active_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status NOT IN ('rejected', 'ghosted')
             ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_job)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Compare-and-set on the status column. Returns false when the row no
    /// longer holds `from`, i.e. someone else moved the job first.
    pub fn update_status(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        applied_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs SET status = ?3, applied_at = COALESCE(applied_at, ?4), updated_at = ?5
             WHERE job_id = ?1 AND status = ?2",
            params![
                job_id,
                from.as_str(),
                to.as_str(),
                applied_at.map(|d| to_sql_ts(&d)),
                to_sql_ts(&now)
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn set_ghosting_risk(&self, job_id: &str, risk: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET ghosting_risk = ?2 WHERE job_id = ?1",
            params![job_id, risk],
        )?;
        Ok(())
    }

    pub fn set_cover_letter(&self, job_id: &str, letter: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET cover_letter = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job_id, letter, to_sql_ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn set_notes(&self, job_id: &str, notes: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET notes = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job_id, notes, to_sql_ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn mark_viewed(&self, job_id: &str) -> Result<()> {
        self.conn
            .execute("UPDATE jobs SET viewed = 1 WHERE job_id = ?1", [job_id])?;
        Ok(())
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<JobRecord> {
        let source: String = row.get(5)?;
        let status: String = row.get(6)?;
        let analysis: Option<String> = row.get(9)?;

        Ok(JobRecord {
            job_id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            url: row.get(4)?,
            source: source.parse().map_err(|e| conversion_error(5, e))?,
            status: status.parse().map_err(|e| conversion_error(6, e))?,
            baseline_score: row.get(7)?,
            score: row.get(8)?,
            analysis: analysis
                .map(|a| serde_json::from_str::<Analysis>(&a))
                .transpose()
                .map_err(|e| conversion_error(9, e.to_string()))?,
            cover_letter: row.get(10)?,
            notes: row.get(11)?,
            raw_text: row.get(12)?,
            is_filtered: row.get(13)?,
            filter_reason: row.get(14)?,
            viewed: row.get(15)?,
            salary_min: row.get(16)?,
            salary_max: row.get(17)?,
            is_aggregator: row.get(18)?,
            description: row.get(19)?,
            logo_url: row.get(20)?,
            ghosting_risk: row.get(21)?,
            applied_at: opt_timestamp(row, 22)?,
            processed_at: opt_timestamp(row, 23)?,
            created_at: timestamp(row, 24)?,
            updated_at: timestamp(row, 25)?,
            email_date: timestamp(row, 26)?,
        })
    }

    // --- Scan checkpoints ---

    pub fn latest_checkpoint(&self) -> Result<Option<ScanCheckpoint>> {
        let checkpoint = self
            .conn
            .query_row(
                "SELECT id, last_scan_date, emails_found, jobs_added, created_at
                 FROM scan_checkpoints ORDER BY id DESC LIMIT 1",
                [],
                Self::row_to_checkpoint,
            )
            .optional()?;
        Ok(checkpoint)
    }

    pub fn append_checkpoint(
        &self,
        last_scan_date: DateTime<Utc>,
        emails_found: i64,
        jobs_added: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO scan_checkpoints (last_scan_date, emails_found, jobs_added, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                to_sql_ts(&last_scan_date),
                emails_found,
                jobs_added,
                to_sql_ts(&Utc::now())
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_checkpoints(&self, limit: usize) -> Result<Vec<ScanCheckpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, last_scan_date, emails_found, jobs_added, created_at
             FROM scan_checkpoints ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], Self::row_to_checkpoint)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn row_to_checkpoint(row: &Row) -> rusqlite::Result<ScanCheckpoint> {
        Ok(ScanCheckpoint {
            id: row.get(0)?,
            last_scan_date: timestamp(row, 1)?,
            emails_found: row.get(2)?,
            jobs_added: row.get(3)?,
            created_at: timestamp(row, 4)?,
        })
    }

    // --- Watchlist ---

    pub fn add_watchlist(
        &self,
        company: &str,
        careers_url: Option<&str>,
        notes: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO watchlist (company, careers_url, notes, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(company) DO UPDATE SET
                careers_url = COALESCE(excluded.careers_url, careers_url),
                notes = COALESCE(excluded.notes, notes)",
            params![company, careers_url, notes, to_sql_ts(&Utc::now())],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM watchlist WHERE company = ?1",
            [company],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn list_watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company, careers_url, notes, created_at FROM watchlist ORDER BY company",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WatchlistEntry {
                id: row.get(0)?,
                company: row.get(1)?,
                careers_url: row.get(2)?,
                notes: row.get(3)?,
                created_at: timestamp(row, 4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // --- Follow-up events ---

    /// Append an event. Returns None when an event for the same
    /// Message-ID is already stored, so replaying a window adds nothing.
    pub fn insert_followup(
        &self,
        message_id: Option<&str>,
        job_id: Option<&str>,
        company: &str,
        subject: &str,
        kind: EmailKind,
        snippet: &str,
        email_date: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        // Empty ids are stored as NULL, which UNIQUE does not compare
        let message_id = message_id.map(str::trim).filter(|id| !id.is_empty());
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO followup_events
                 (message_id, job_id, company, subject, kind, snippet, email_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message_id,
                job_id,
                company,
                subject,
                kind.as_str(),
                snippet,
                to_sql_ts(&email_date)
            ],
        )?;
        Ok((inserted == 1).then(|| self.conn.last_insert_rowid()))
    }

    pub fn list_followups(&self, company: Option<&str>) -> Result<Vec<FollowUpEvent>> {
        let mut sql = String::from(
            "SELECT id, job_id, company, subject, kind, snippet, email_date FROM followup_events",
        );
        if company.is_some() {
            sql.push_str(" WHERE LOWER(company) = LOWER(?1)");
        }
        sql.push_str(" ORDER BY email_date DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match company {
            Some(c) => stmt.query_map([c], Self::row_to_followup)?,
            None => stmt.query_map([], Self::row_to_followup)?,
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn latest_followup_date(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        let date: Option<String> = self.conn.query_row(
            "SELECT MAX(email_date) FROM followup_events WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        date.map(|d| parse_rfc3339(&d).map_err(|e| conversion_error(0, e)))
            .transpose()
            .map_err(HuntError::from)
    }

    fn row_to_followup(row: &Row) -> rusqlite::Result<FollowUpEvent> {
        let kind: String = row.get(4)?;
        Ok(FollowUpEvent {
            id: row.get(0)?,
            job_id: row.get(1)?,
            company: row.get(2)?,
            subject: row.get(3)?,
            kind: kind.parse().map_err(|e| conversion_error(4, e))?,
            snippet: row.get(5)?,
            email_date: timestamp(row, 6)?,
        })
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn to_sql_ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_rfc3339(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", value, e))
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_rfc3339(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_rfc3339(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobDraft;
    use chrono::Duration;

    fn record(id: &str, company: &str) -> JobRecord {
        let now = Utc::now();
        JobRecord::from_draft(
            id.to_string(),
            JobDraft {
                title: "Platform Engineer".into(),
                company: company.into(),
                location: "Remote".into(),
                url: format!("https://example.com/jobs/{id}"),
                source: Source::Linkedin,
                raw_text: "Platform Engineer".into(),
                created_at: now,
                email_date: now,
            },
        )
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let job = record("aa01", "Acme");
        assert!(db.insert_job(&job).unwrap());
        assert!(!db.insert_job(&job).unwrap());
        assert_eq!(db.count_jobs().unwrap(), 1);
    }

    #[test]
    fn test_save_job_round_trips_enrichment() {
        let db = Database::open_in_memory().unwrap();
        let mut job = record("aa02", "Acme");
        job.baseline_score = Some(80);
        job.score = Some(72);
        job.salary_min = Some(150_000);
        job.analysis = Some(Analysis {
            should_apply: true,
            strengths: vec!["Rust".into()],
            gaps: vec!["Go".into()],
            recommendation: "Apply".into(),
            resume_variant: "backend".into(),
        });
        job.processed_at = Some(Utc::now());
        db.save_job(&job).unwrap();

        let stored = db.get_job("aa02").unwrap().unwrap();
        assert_eq!(stored.score, Some(72));
        assert_eq!(stored.salary_min, Some(150_000));
        assert_eq!(stored.analysis.unwrap().strengths, vec!["Rust".to_string()]);
        assert!(db.is_processed("aa02").unwrap());
    }

    #[test]
    fn test_save_job_does_not_touch_status() {
        let db = Database::open_in_memory().unwrap();
        let job = record("aa03", "Acme");
        db.insert_job(&job).unwrap();
        db.update_status("aa03", JobStatus::New, JobStatus::Applied, Some(Utc::now()), Utc::now())
            .unwrap();

        db.save_job(&job).unwrap();
        assert_eq!(db.get_job("aa03").unwrap().unwrap().status, JobStatus::Applied);
    }

    #[test]
    fn test_find_job_by_prefix() {
        let db = Database::open_in_memory().unwrap();
        db.insert_job(&record("abc123", "Acme")).unwrap();
        db.insert_job(&record("abd456", "Globex")).unwrap();

        assert_eq!(db.find_job("abc").unwrap().company, "Acme");
        assert!(matches!(db.find_job("ab"), Err(HuntError::NotFound(_))));
        assert!(matches!(db.find_job("zz"), Err(HuntError::NotFound(_))));
    }

    #[test]
    fn test_find_job_treats_wildcards_literally() {
        let db = Database::open_in_memory().unwrap();
        db.insert_job(&record("abc123", "Acme")).unwrap();

        assert!(matches!(db.find_job("%"), Err(HuntError::NotFound(_))));
        assert!(matches!(db.find_job("_bc"), Err(HuntError::NotFound(_))));
        assert!(matches!(db.find_job("a%3"), Err(HuntError::NotFound(_))));
        assert_eq!(db.find_job("ABC1").unwrap().company, "Acme");
    }

    #[test]
    fn test_update_status_is_compare_and_set() {
        let db = Database::open_in_memory().unwrap();
        db.insert_job(&record("aa05", "Acme")).unwrap();

        assert!(db.update_status("aa05", JobStatus::New, JobStatus::Rejected, None, Utc::now()).unwrap());
        // A writer that still believes the job is new must not resurrect it
        assert!(!db.update_status("aa05", JobStatus::New, JobStatus::Applied, None, Utc::now()).unwrap());
        assert_eq!(db.get_job("aa05").unwrap().unwrap().status, JobStatus::Rejected);
    }

    #[test]
    fn test_followup_message_id_is_unique() {
        let db = Database::open_in_memory().unwrap();
        let date = Utc::now();
        let first = db
            .insert_followup(Some("<m1@acme.io>"), None, "Acme", "Hi", EmailKind::Interview, "", date)
            .unwrap();
        let again = db
            .insert_followup(Some("<m1@acme.io>"), None, "Acme", "Hi", EmailKind::Interview, "", date)
            .unwrap();
        assert!(first.is_some());
        assert!(again.is_none());

        // Messages without an id are never collapsed
        assert!(db.insert_followup(None, None, "Acme", "a", EmailKind::Other, "", date).unwrap().is_some());
        assert!(db.insert_followup(Some(""), None, "Acme", "b", EmailKind::Other, "", date).unwrap().is_some());
        assert_eq!(db.list_followups(Some("acme")).unwrap().len(), 3);
    }

    #[test]
    fn test_checkpoints_are_append_only() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_checkpoint().unwrap().is_none());

        let first = Utc::now() - Duration::days(2);
        let second = Utc::now() - Duration::days(1);
        db.append_checkpoint(first, 3, 2).unwrap();
        db.append_checkpoint(second, 1, 0).unwrap();

        let latest = db.latest_checkpoint().unwrap().unwrap();
        assert_eq!(latest.last_scan_date.timestamp(), second.timestamp());
        assert_eq!(db.list_checkpoints(10).unwrap().len(), 2);
    }

    #[test]
    fn test_watchlist_upserts_by_company() {
        let db = Database::open_in_memory().unwrap();
        let a = db.add_watchlist("Acme", Some("https://acme.com/careers"), None).unwrap();
        let b = db.add_watchlist("acme", None, Some("great team")).unwrap();
        assert_eq!(a, b);

        let entries = db.list_watchlist().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].careers_url.as_deref(), Some("https://acme.com/careers"));
        assert_eq!(entries[0].notes.as_deref(), Some("great team"));
    }

    #[test]
    fn test_latest_followup_date() {
        let db = Database::open_in_memory().unwrap();
        db.insert_job(&record("aa04", "Acme")).unwrap();
        assert!(db.latest_followup_date("aa04").unwrap().is_none());

        let older = Utc::now() - Duration::days(5);
        let newer = Utc::now() - Duration::days(1);
        db.insert_followup(None, Some("aa04"), "Acme", "Hi", EmailKind::Other, "", older)
            .unwrap();
        db.insert_followup(None, Some("aa04"), "Acme", "Interview", EmailKind::Interview, "", newer)
            .unwrap();

        let latest = db.latest_followup_date("aa04").unwrap().unwrap();
        assert_eq!(latest.timestamp(), newer.timestamp());
        assert_eq!(db.list_followups(Some("ACME")).unwrap().len(), 2);
    }
}
