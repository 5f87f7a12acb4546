use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, parse_mail};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{EmailSettings, expand_home};
use crate::error::{HuntError, Result};
use crate::models::Source;
use crate::retry::RetryPolicy;

/// One fetched message, decoded down to what the pipeline reads.
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub message_id: String,
    pub date: DateTime<Utc>,
    pub from: String,
    pub subject: String,
    pub body: String,
}

const ALERT_SUBJECT_HINTS: &[&str] = &[
    "job alert",
    "jobs for you",
    "new jobs",
    "jobs you may be interested",
    "recommended jobs",
    "is hiring",
];

const FOLLOWUP_HINTS: &[&str] = &[
    "your application",
    "thank you for applying",
    "thanks for applying",
    "application received",
    "interview",
    "next steps",
    "offer",
    "candidacy",
    "unfortunately",
    "not moving forward",
    "other candidates",
];

impl MailMessage {
    /// Decode a raw RFC 822 message.
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let parsed = parse_mail(raw).map_err(|e| HuntError::Parse(format!("bad message: {}", e)))?;

        let from = parsed.headers.get_first_value("From").unwrap_or_default();
        let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
        let message_id = parsed.headers.get_first_value("Message-ID").unwrap_or_default();
        let date = parsed
            .headers
            .get_first_value("Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .ok_or_else(|| HuntError::Parse(format!("message '{}' has no usable Date header", subject)))?;

        let body = get_email_body(&parsed)?;

        Ok(Self {
            message_id,
            date,
            from,
            subject,
            body,
        })
    }

    pub fn source(&self) -> Source {
        Source::from_sender(&self.from)
    }

    /// Alerts come from a known board, or read like an alert digest.
    pub fn is_job_alert(&self) -> bool {
        if self.source() != Source::Generic {
            return true;
        }
        let subject = self.subject.to_lowercase();
        ALERT_SUBJECT_HINTS.iter().any(|hint| subject.contains(hint))
    }

    /// Cheap keyword screen before spending a classification call.
    pub fn looks_like_followup(&self) -> bool {
        if self.is_job_alert() {
            return false;
        }
        let subject = self.subject.to_lowercase();
        let head: String = self.body.chars().take(2000).collect::<String>().to_lowercase();
        FOLLOWUP_HINTS
            .iter()
            .any(|hint| subject.contains(hint) || head.contains(hint))
    }
}

/// Where alert and follow-up emails come from.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Messages strictly newer than `since`, oldest first.
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<MailMessage>>;
}

pub struct ImapMailSource {
    settings: EmailSettings,
    password: String,
    policy: RetryPolicy,
}

impl ImapMailSource {
    pub fn new(settings: &EmailSettings, policy: RetryPolicy) -> Result<Self> {
        if settings.username.is_empty() {
            return Err(HuntError::Configuration(
                "email.username is not set (HUNT_EMAIL__USERNAME)".to_string(),
            ));
        }
        let password_file = settings.password_file.as_ref().ok_or_else(|| {
            HuntError::Configuration("email.password_file is not set (HUNT_EMAIL__PASSWORD_FILE)".to_string())
        })?;
        let password_file = expand_home(password_file);
        let password = fs::read_to_string(&password_file).map_err(|e| {
            HuntError::Configuration(format!(
                "failed to read password file {}: {}",
                password_file.display(),
                e
            ))
        })?;

        Ok(Self {
            settings: settings.clone(),
            password: password.trim().to_string(),
            policy,
        })
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<MailMessage>> {
        self.policy
            .run("fetchMail", || {
                let settings = self.settings.clone();
                let password = self.password.clone();
                async move {
                    tokio::task::spawn_blocking(move || fetch_blocking(&settings, &password, since))
                        .await
                        .map_err(|e| HuntError::Mail(format!("mail task failed: {}", e)))?
                }
            })
            .await
    }
}

fn fetch_blocking(settings: &EmailSettings, password: &str, since: DateTime<Utc>) -> Result<Vec<MailMessage>> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| HuntError::Mail(format!("TLS setup failed: {}", e)))?;

    let timeout = Some(Duration::from_secs(settings.timeout_secs));
    let tcp = std::net::TcpStream::connect((settings.server.as_str(), settings.port))
        .map_err(|e| HuntError::Mail(format!("failed to connect to {}: {}", settings.server, e)))?;
    tcp.set_read_timeout(timeout)?;
    tcp.set_write_timeout(timeout)?;
    let tls_stream = tls
        .connect(&settings.server, tcp)
        .map_err(|e| HuntError::Mail(format!("TLS handshake failed: {}", e)))?;

    let client = imap::Client::new(tls_stream);
    let mut session = client
        .login(&settings.username, password)
        .map_err(|e| HuntError::Configuration(format!("IMAP login failed: {}", e.0)))?;

    session
        .select(&settings.mailbox)
        .map_err(|e| HuntError::Mail(format!("select {}: {}", settings.mailbox, e)))?;

    // SINCE has day granularity; the exact cut happens on the Date header below.
    let query = format!("SINCE {}", since.format("%d-%b-%Y"));
    let ids = session
        .search(&query)
        .map_err(|e| HuntError::Mail(format!("search failed: {}", e)))?;
    debug!(count = ids.len(), %query, "imap search");

    let mut messages = Vec::new();
    let mut seen = HashSet::new();
    for id in ids {
        let fetched = session
            .fetch(id.to_string(), "RFC822")
            .map_err(|e| HuntError::Mail(format!("fetch {}: {}", id, e)))?;
        for fetch in fetched.iter() {
            let Some(raw) = fetch.body() else { continue };
            match MailMessage::from_raw(raw) {
                Ok(message) if message.date > since => {
                    if message.message_id.is_empty() || seen.insert(message.message_id.clone()) {
                        messages.push(message);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(imap_id = id, error = %e, "skipping undecodable message"),
            }
        }
    }

    if let Err(e) = session.logout() {
        debug!(error = %e, "imap logout failed");
    }

    messages.sort_by_key(|m| m.date);
    info!(count = messages.len(), since = %since, "fetched mail");
    Ok(messages)
}

fn get_email_body(parsed: &mailparse::ParsedMail) -> Result<String> {
    let body_of = |part: &mailparse::ParsedMail| {
        part.get_body()
            .map_err(|e| HuntError::Parse(format!("undecodable body: {}", e)))
    };

    if parsed.subparts.is_empty() {
        return body_of(parsed);
    }

    // Prefer HTML, then plain text, then whatever comes first. Nested
    // multiparts (alternative inside mixed) are searched depth-first.
    for wanted in ["text/html", "text/plain"] {
        if let Some(part) = find_part(parsed, wanted) {
            return body_of(part);
        }
    }

    match parsed.subparts.first() {
        Some(part) => body_of(part),
        None => Err(HuntError::Parse("no email body found".to_string())),
    }
}

fn find_part<'a>(parsed: &'a mailparse::ParsedMail<'a>, mime: &str) -> Option<&'a mailparse::ParsedMail<'a>> {
    if parsed.ctype.mimetype.eq_ignore_ascii_case(mime) {
        return Some(parsed);
    }
    parsed.subparts.iter().find_map(|part| find_part(part, mime))
}
