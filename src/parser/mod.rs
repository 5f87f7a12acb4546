//! Job-alert parsers, one per board, behind the `JobParser` trait.
//!
//! Boards only locate candidate items in the HTML. Validation and
//! normalization (URL cleanup, whitespace, length caps) are shared so every
//! board produces drafts with the same shape.

mod generic;
mod glassdoor;
mod indeed;
mod linkedin;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::ElementRef;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

use crate::dedup::fingerprint;
use crate::error::{HuntError, Result};
use crate::models::{JobDraft, Source};

pub use generic::GenericParser;
pub use glassdoor::GlassdoorParser;
pub use indeed::IndeedParser;
pub use linkedin::LinkedinParser;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_COMPANY_CHARS: usize = 100;
pub const MAX_LOCATION_CHARS: usize = 100;
pub const MAX_RAW_TEXT_CHARS: usize = 2000;
pub const UNKNOWN_COMPANY: &str = "Unknown";

/// A candidate job as found in the email, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub raw_text: String,
}

/// Drafts from one message plus the count of items that failed validation.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub drafts: Vec<JobDraft>,
    pub item_errors: usize,
}

pub trait JobParser: Send + Sync {
    fn source(&self) -> Source;

    fn source_name(&self) -> &'static str {
        self.source().as_str()
    }

    /// Query parameters that identify the posting and must survive cleanup.
    /// Empty means "keep anything not on the deny list".
    fn url_allow_list(&self) -> &'static [&'static str] {
        &[]
    }

    /// Locate candidate job items in the message HTML.
    fn extract(&self, html: &str) -> Vec<RawItem>;

    fn parse(&self, html: &str, email_date: DateTime<Utc>) -> ParsedBatch {
        let now = Utc::now();
        let mut batch = ParsedBatch::default();
        let mut seen = HashSet::new();

        for item in self.extract(html) {
            match build_draft(item, self.source(), self.url_allow_list(), email_date, now) {
                Ok(draft) => {
                    // Boards often link the same job from its title and its logo
                    let id = fingerprint(&draft.url, &draft.title, &draft.company);
                    if seen.insert(id) {
                        batch.drafts.push(draft);
                    }
                }
                Err(e) => {
                    batch.item_errors += 1;
                    debug!(source = self.source_name(), error = %e, "skipping item");
                }
            }
        }
        batch
    }
}

/// Explicit source → parser map, built once.
pub struct ParserRegistry {
    parsers: HashMap<Source, Box<dyn JobParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        let mut parsers: HashMap<Source, Box<dyn JobParser>> = HashMap::new();
        parsers.insert(Source::Linkedin, Box::new(LinkedinParser));
        parsers.insert(Source::Indeed, Box::new(IndeedParser));
        parsers.insert(Source::Glassdoor, Box::new(GlassdoorParser));
        parsers.insert(Source::Generic, Box::new(GenericParser));
        Self { parsers }
    }

    pub fn get(&self, source: Source) -> Result<&dyn JobParser> {
        self.parsers
            .get(&source)
            .map(|p| p.as_ref())
            .ok_or_else(|| HuntError::Parse(format!("no parser registered for {}", source)))
    }

    /// Parse one message. Failures are per-message and never panic the batch.
    pub fn parse(&self, html: &str, source: Source, email_date: DateTime<Utc>) -> Result<ParsedBatch> {
        if html.trim().is_empty() {
            return Err(HuntError::Parse("empty message body".to_string()));
        }
        let parser = self.get(source)?;
        let batch = parser.parse(html, email_date);
        if batch.item_errors > 0 {
            warn!(
                source = %source,
                kept = batch.drafts.len(),
                skipped = batch.item_errors,
                "some items were missing required fields"
            );
        }
        Ok(batch)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_draft(
    item: RawItem,
    source: Source,
    allow_list: &[&str],
    email_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<JobDraft> {
    let title = item
        .title
        .map(|t| normalize_text(&t, MAX_TITLE_CHARS))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HuntError::Parse("missing title".to_string()))?;

    let url = item
        .url
        .as_deref()
        .and_then(|u| normalize_url(u, allow_list))
        .ok_or_else(|| HuntError::Parse(format!("missing or invalid url for '{}'", title)))?;

    let location = item
        .location
        .map(|l| normalize_text(&l, MAX_LOCATION_CHARS))
        .filter(|l| !l.is_empty())
        .ok_or_else(|| HuntError::Parse(format!("missing location for '{}'", title)))?;

    let company = item
        .company
        .map(|c| normalize_text(&c, MAX_COMPANY_CHARS))
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_COMPANY.to_string());

    let raw_text = normalize_text(&item.raw_text, MAX_RAW_TEXT_CHARS);

    Ok(JobDraft {
        title,
        company,
        location,
        url,
        source,
        raw_text,
        created_at: now,
        email_date,
    })
}

/// Collapse whitespace and cap the length in characters.
pub fn normalize_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
    }
}

const DENIED_PARAMS: &[&str] = &[
    "trk", "trkemail", "refid", "trackingid", "lipi", "midtoken", "midsig", "eid",
    "otptoken", "tk", "from", "src", "alid", "ref", "campaign", "mcid", "cid", "gclid",
    "fbclid", "ao", "guid", "pos", "ssid", "jrtk", "utm", "gh_src", "lever-source",
];

fn is_denied_param(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("utm_") || DENIED_PARAMS.contains(&lower.as_str())
}

/// Strip tracking parameters and fragments from a job URL.
///
/// A parameter survives when it is on the board's allow list, or, for boards
/// without one, when it is not on the deny list.
pub fn normalize_url(raw: &str, allow_list: &[&str]) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = Url::parse(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            if allow_list.is_empty() {
                !is_denied_param(k)
            } else {
                allow_list.iter().any(|a| a.eq_ignore_ascii_case(k)) && !is_denied_param(k)
            }
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.set_fragment(None);
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut cleaned = url.to_string();
    if cleaned.ends_with('/') && url.path() != "/" && url.query().is_none() {
        cleaned.pop();
    }
    Some(cleaned)
}

pub fn is_navigation_artifact(text: &str) -> bool {
    let text_lower = text.to_lowercase();
    let text_trimmed = text.trim();

    if text_trimmed.chars().count() < 10 {
        return true;
    }

    let artifacts = [
        "search for jobs",
        "see all jobs",
        "view all",
        "search other jobs",
        "jobs",
    ];
    if artifacts.iter().any(|a| text_lower == *a) {
        return true;
    }

    if text_lower.starts_with("jobs similar to")
        || text_lower.starts_with("jobs in ")
        || text_lower.starts_with("manage job")
        || text_lower.contains("unsubscribe")
        || text_lower.contains("privacy")
    {
        return true;
    }

    // "Engineering Manager jobs" links to search results, not a posting
    text_trimmed.ends_with(" jobs") || text_trimmed.ends_with(" Jobs")
}

pub fn is_search_link(url: &str) -> bool {
    url.contains("/jobs/search") || url.contains("/search?") || url.contains("/jobs/alerts")
}

// Matched on the original text: lowercasing can change byte lengths
static AT_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+at\s+").unwrap());

/// Split "Title at Company", "Title - Company" or "Title, Company".
pub fn parse_title_at_company(text: &str) -> (String, Option<String>) {
    let text = text.trim();

    if let Some(m) = AT_SEPARATOR.find(text) {
        let title = text[..m.start()].trim().to_string();
        let employer = text[m.end()..].trim().to_string();
        if !title.is_empty() && !employer.is_empty() {
            return (title, Some(employer));
        }
    }

    if let Some(idx) = text.rfind(" - ") {
        let title = text[..idx].trim().to_string();
        let employer = text[idx + 3..].trim().to_string();
        let lower = employer.to_lowercase();
        // "Engineer - Backend Developer" is a title with a dash, not a company
        if !employer.is_empty() && !lower.contains("engineer") && !lower.contains("developer") {
            return (title, Some(employer));
        }
    }

    if let Some(idx) = text.rfind(", ") {
        let potential = text[idx + 2..].trim();
        // Short and not a work arrangement, else it is probably a location
        if !potential.is_empty()
            && potential.len() < 50
            && !potential.contains("Remote")
            && !potential.contains("Hybrid")
        {
            return (text[..idx].trim().to_string(), Some(potential.to_string()));
        }
    }

    (text.to_string(), None)
}

/// Split "Company · Location" / "Company - Location" / "Company | Location".
pub fn split_company_location(text: &str) -> (String, Option<String>) {
    for sep in [" · ", "·", " | ", " - ", " – "] {
        if let Some(idx) = text.rfind(sep) {
            let company = text[..idx].trim();
            let location = text[idx + sep.len()..].trim();
            if !company.is_empty() && !location.is_empty() {
                return (company.to_string(), Some(location.to_string()));
            }
        }
    }
    (text.trim().to_string(), None)
}

/// Text fragments of the nearest enclosing "card" of a job link.
///
/// Alert emails lay each job out as a small table: the link holds the title,
/// sibling cells hold company, location and pay. Walk up until an ancestor
/// has more than the link's own text.
pub fn card_fragments(link: ElementRef) -> Vec<String> {
    let own = link.text().map(str::trim).filter(|t| !t.is_empty()).count();
    // Card tables nest a few cells deep at most
    for ancestor in link.ancestors().take(5) {
        if let Some(el) = ElementRef::wrap(ancestor) {
            let fragments: Vec<String> = el
                .text()
                .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|t| !t.is_empty())
                .collect();
            if fragments.len() > own {
                return fragments;
            }
        }
    }
    Vec::new()
}

/// Company and location from card fragments that follow the title.
pub fn company_location_from_card(
    fragments: &[String],
    title: &str,
) -> (Option<String>, Option<String>) {
    let start = fragments
        .iter()
        .position(|f| f.contains(title) || title.contains(f.as_str()))
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut rest = fragments[start.min(fragments.len())..]
        .iter()
        .filter(|f| !f.starts_with('$') && !is_navigation_noise(f));

    let Some(company_part) = rest.next() else {
        return (None, None);
    };
    let (company, location) = split_company_location(company_part);
    let location = location.or_else(|| rest.next().cloned());
    (Some(company), location)
}

fn is_navigation_noise(fragment: &str) -> bool {
    let lower = fragment.to_lowercase();
    lower == "new"
        || lower == "easy apply"
        || lower == "actively recruiting"
        || lower.starts_with("apply")
        || lower.starts_with("view job")
        || lower.contains("ago")
        || lower.contains("promoted")
}
