//! Deterministic job identity.
//!
//! `job_id` = first 16 bytes of SHA-256 over
//! `url + "\n" + title + "\n" + company`, each field lowercased with
//! whitespace collapsed, rendered as 32 lowercase hex characters. Any
//! implementation following this produces byte-identical ids.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::db::Database;
use crate::error::Result;

pub const FINGERPRINT_BYTES: usize = 16;

pub fn fingerprint(url: &str, title: &str, company: &str) -> String {
    let input = format!(
        "{}\n{}\n{}",
        normalize_field(url),
        normalize_field(title),
        normalize_field(company)
    );

    let digest = Sha256::digest(input.as_bytes());
    digest[..FINGERPRINT_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn normalize_field(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rejects ids already stored or already seen in the current batch.
///
/// A stored row only counts once it has been fully processed, so a scan that
/// crashed between insert and scoring picks the job up again.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_duplicate(&mut self, db: &Database, job_id: &str) -> Result<bool> {
        if !self.seen.insert(job_id.to_string()) {
            return Ok(true);
        }
        db.is_processed(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDraft, JobRecord, Source};
    use chrono::Utc;

    #[test]
    fn test_fingerprint_is_bit_exact() {
        let id = fingerprint(
            "https://www.linkedin.com/jobs/view/123",
            "Senior Backend Engineer",
            "Acme",
        );
        assert_eq!(id, "cab1538d3c0ae3a36ae38f49c147ae74");
    }

    #[test]
    fn test_fingerprint_ignores_case_and_spacing() {
        let a = fingerprint("https://x.com/jobs/1", "Senior  Backend Engineer ", "ACME");
        let b = fingerprint("https://x.com/jobs/1", "senior backend engineer", "acme");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_format() {
        let id = fingerprint("", "", "");
        assert_eq!(id.len(), FINGERPRINT_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_distinct_postings_differ() {
        let a = fingerprint("https://x.com/jobs/1", "Engineer", "Acme");
        let b = fingerprint("https://x.com/jobs/2", "Engineer", "Acme");
        let c = fingerprint("https://x.com/jobs/1", "Engineer", "Globex");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_field_boundaries_matter() {
        // "a\nb c" vs "a b\nc" must not collide
        let a = fingerprint("u", "a", "b c");
        let b = fingerprint("u", "a b", "c");
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_duplicate_within_batch_and_after_processing() {
        let db = Database::open_in_memory().unwrap();
        let mut dedup = Deduplicator::new();
        let id = fingerprint("https://x.com/jobs/1", "Engineer", "Acme");

        assert!(!dedup.is_duplicate(&db, &id).unwrap());
        assert!(dedup.is_duplicate(&db, &id).unwrap());

        let now = Utc::now();
        let mut record = JobRecord::from_draft(
            id.clone(),
            JobDraft {
                title: "Engineer".into(),
                company: "Acme".into(),
                location: "Remote".into(),
                url: "https://x.com/jobs/1".into(),
                source: Source::Generic,
                raw_text: "Engineer".into(),
                created_at: now,
                email_date: now,
            },
        );
        db.insert_job(&record).unwrap();

        // stored but unprocessed rows are resumed, not skipped
        let mut next_scan = Deduplicator::new();
        assert!(!next_scan.is_duplicate(&db, &id).unwrap());

        record.processed_at = Some(now);
        db.save_job(&record).unwrap();
        let mut later_scan = Deduplicator::new();
        assert!(later_scan.is_duplicate(&db, &id).unwrap());
    }
}
