mod ai;
mod config;
mod db;
mod dedup;
mod email;
mod error;
mod filters;
mod followup;
mod logging;
mod models;
mod parser;
mod pipeline;
mod retry;
mod scoring;
mod status;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ai::{JobProvider, ProviderRegistry};
use config::AppConfig;
use db::Database;
use email::ImapMailSource;
use filters::FaviconLogoSource;
use models::{JobRecord, JobStatus};
use pipeline::Pipeline;
use retry::RetryPolicy;
use status::{EvidenceSource, request_transition};

const WRAP_WIDTH: usize = 88;

#[derive(Parser)]
#[command(name = "hunt")]
#[command(about = "Job search automation - ingest alert emails, score jobs, track applications")]
struct Cli {
    /// Config file (defaults to hunt.toml in the data directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// AI model to use (overrides ai.model)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Fetch new alert emails, then filter and score the jobs in them
    Scan {
        /// Parse and deduplicate only; write nothing and skip AI calls
        #[arg(long)]
        dry_run: bool,
    },

    /// List jobs
    List {
        /// Filter by status (new, interested, applied, interviewing, offered, rejected, ghosted)
        #[arg(short, long)]
        status: Option<String>,

        /// Include filtered-out jobs
        #[arg(short, long)]
        all: bool,
    },

    /// Show job details
    Show {
        /// Job ID (a unique prefix is enough)
        id: String,
    },

    /// Change a job's status
    Status {
        /// Job ID
        id: String,

        /// New status
        status: String,
    },

    /// Re-run enrichment (web search, logo, re-score) on a stored job
    Enrich {
        /// Job ID
        id: String,
    },

    /// Generate a cover letter for a job
    CoverLetter {
        /// Job ID
        id: String,
    },

    /// Draft an answer to an interview question for a job
    Interview {
        /// Job ID
        id: String,

        /// The question
        question: String,
    },

    /// Flag active applications that have gone quiet
    Ghosting,

    /// Companies to keep an eye on
    Watchlist {
        #[command(subcommand)]
        command: WatchlistCommands,
    },

    /// Show classified follow-up emails
    Followups {
        /// Only events for this company
        #[arg(short, long)]
        company: Option<String>,
    },

    /// Show recent scan checkpoints
    Checkpoints {
        /// Number of rows to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Mark a job as viewed
    View {
        /// Job ID
        id: String,
    },

    /// Set notes on a job
    Note {
        /// Job ID
        id: String,

        /// Note text
        text: String,
    },
}

#[derive(Subcommand)]
enum WatchlistCommands {
    /// Add or update a company
    Add {
        /// Company name
        company: String,

        /// Careers page URL
        #[arg(short, long)]
        url: Option<String>,

        /// Notes
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List watched companies
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init_logging(&config.logging.level, cli.verbose)?;

    let db = Database::open(&config.database_path())?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Scan { dry_run } => {
            db.ensure_initialized()?;
            let policy = RetryPolicy::from_config(&config.retry);
            let provider = build_provider(&config, cli.model.as_deref())?;
            let resume: Arc<str> = if dry_run {
                Arc::from("")
            } else {
                Arc::from(config.resume_text()?)
            };
            let mail = ImapMailSource::new(&config.email, policy)?;
            let logos = Arc::new(FaviconLogoSource::new(Duration::from_secs(10))?);

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nInterrupted - finishing in-flight writes...");
                    on_ctrl_c.cancel();
                }
            });

            println!("Connecting to {} as {}...", config.email.server, config.email.username);
            let pipeline = Pipeline::new(&config, &db, provider, logos, resume);
            let report = pipeline.scan(&mail, dry_run, &cancel).await?;

            if let Some(since) = report.window_start {
                println!("Window: emails after {}", since.format("%Y-%m-%d %H:%M UTC"));
            }
            println!("\nResults:");
            println!("  Emails found:   {}", report.emails_found);
            println!("  Job alerts:     {}", report.alerts);
            println!("  Duplicates:     {}", report.duplicates);
            if dry_run {
                for draft in &report.preview {
                    println!(
                        "[DRY RUN] Would add: {} at {} ({}, {})",
                        draft.title, draft.company, draft.location, draft.source
                    );
                }
                println!("\n(Dry run - no jobs were actually added)");
                return Ok(());
            }
            println!("  Jobs added:     {}", report.jobs_added);
            if report.resumed > 0 {
                println!("  Resumed:        {}", report.resumed);
            }
            println!("  Scored:         {}", report.scored);
            println!("  Filtered out:   {}", report.filtered);
            if report.unscored > 0 {
                println!("  Unscored:       {}", report.unscored);
            }
            if report.parse_errors + report.item_errors > 0 {
                println!(
                    "  Parse errors:   {} message(s), {} item(s)",
                    report.parse_errors, report.item_errors
                );
            }
            if report.followups.events > 0 {
                println!(
                    "  Follow-ups:     {} event(s), {} status change(s)",
                    report.followups.events, report.followups.transitions
                );
            }
            if report.followups.rejected_transitions > 0 {
                println!(
                    "  Conflicts:      {} follow-up(s) implied an impossible status change",
                    report.followups.rejected_transitions
                );
            }
            if report.cancelled {
                println!("\nScan cancelled. Saved jobs are kept; the next scan repeats this window.");
            }
        }

        Commands::List { status, all } => {
            db.ensure_initialized()?;
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .map_err(|e| anyhow!(e))?;
            let jobs = db.list_jobs(status, all)?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<10} {:<13} {:>5} {:<30} {:<20} {:>12}",
                    "ID", "STATUS", "SCORE", "TITLE", "COMPANY", "PAY RANGE"
                );
                println!("{}", "-".repeat(95));
                for job in jobs {
                    let marker = if job.ghosting_risk {
                        "!"
                    } else if !job.viewed {
                        "*"
                    } else {
                        " "
                    };
                    let score = match (job.is_filtered, job.score) {
                        (true, _) => "-".to_string(),
                        (false, Some(s)) => s.to_string(),
                        (false, None) => "?".to_string(),
                    };
                    println!(
                        "{:<10} {:<13} {:>5} {:<30} {:<20} {:>12}",
                        format!("{}{}", marker, &job.job_id[..8]),
                        job.status,
                        score,
                        truncate(&job.title, 28),
                        truncate(&job.company, 18),
                        pay_range(&job)
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            let job = db.find_job(&id)?;
            print_job(&job);
        }

        Commands::Status { id, status } => {
            db.ensure_initialized()?;
            let status: JobStatus = status.parse().map_err(|e: String| anyhow!(e))?;
            let job = db.find_job(&id)?;
            let job = request_transition(&db, &job.job_id, status, EvidenceSource::User)?;
            println!("{} at {} is now {}.", job.title, job.company, job.status);
        }

        Commands::Enrich { id } => {
            db.ensure_initialized()?;
            let job = db.find_job(&id)?;
            if job.is_filtered {
                bail!(
                    "Job {} was filtered out ({}); nothing to enrich",
                    &job.job_id[..8],
                    job.filter_reason.as_deref().unwrap_or("no reason recorded")
                );
            }
            let provider = build_provider(&config, cli.model.as_deref())?;
            let logos = Arc::new(FaviconLogoSource::new(Duration::from_secs(10))?);
            let resume: Arc<str> = Arc::from(config.resume_text()?);
            let pipeline = Pipeline::new(&config, &db, provider, logos, resume);

            let before = job.score;
            let job = pipeline.enrich(job).await?;
            match (before, job.score) {
                (Some(old), Some(new)) if old != new => println!("Score: {} -> {}", old, new),
                (_, Some(new)) => println!("Score: {}", new),
                _ => println!("No score (analysis unavailable)."),
            }
            if job.description.is_some() {
                println!("Description: found");
            }
            if let Some(logo) = &job.logo_url {
                println!("Logo: {}", logo);
            }
        }

        Commands::CoverLetter { id } => {
            db.ensure_initialized()?;
            let job = db.find_job(&id)?;
            let provider = build_provider(&config, cli.model.as_deref())?;
            let resume = config.resume_text()?;

            eprintln!("Writing cover letter with {}...", provider.name());
            let letter = provider
                .generate_cover_letter(&job, &resume)
                .await
                .context("Cover letter generation failed")?;
            db.set_cover_letter(&job.job_id, &letter)?;
            println!("{}", letter);
        }

        Commands::Interview { id, question } => {
            db.ensure_initialized()?;
            let job = db.find_job(&id)?;
            let provider = build_provider(&config, cli.model.as_deref())?;
            let resume = config.resume_text()?;

            let answer = provider
                .generate_interview_answer(&job, &resume, &question)
                .await
                .context("Interview answer generation failed")?;
            println!("Q: {}\n", question);
            println!("{}", textwrap::fill(&answer, WRAP_WIDTH));
        }

        Commands::Ghosting => {
            db.ensure_initialized()?;
            let days = config.monitor.ghosting_days;
            let report = followup::sweep_ghosting(&db, days, Utc::now())?;
            if report.flagged.is_empty() {
                println!("No active applications silent for more than {} days.", days);
            } else {
                println!("{:<10} {:>6} {:<30} {:<20}", "ID", "DAYS", "TITLE", "COMPANY");
                println!("{}", "-".repeat(69));
                for flag in &report.flagged {
                    println!(
                        "{:<10} {:>6} {:<30} {:<20}",
                        &flag.job_id[..8],
                        flag.days_silent,
                        truncate(&flag.title, 28),
                        truncate(&flag.company, 18)
                    );
                }
                println!(
                    "\n{} job(s) at risk. Use 'hunt status <id> ghosted' to confirm.",
                    report.flagged.len()
                );
            }
            if report.skipped > 0 {
                println!("({} active job(s) never applied to; not checked)", report.skipped);
            }
        }

        Commands::Watchlist { command } => {
            db.ensure_initialized()?;
            match command {
                WatchlistCommands::Add { company, url, notes } => {
                    db.add_watchlist(&company, url.as_deref(), notes.as_deref())?;
                    println!("Watching '{}'.", company);
                }

                WatchlistCommands::List => {
                    let entries = db.list_watchlist()?;
                    if entries.is_empty() {
                        println!("Watchlist is empty.");
                    } else {
                        println!("{:<25} {:<40} {:<30}", "COMPANY", "CAREERS URL", "NOTES");
                        println!("{}", "-".repeat(97));
                        for entry in entries {
                            println!(
                                "{:<25} {:<40} {:<30}",
                                truncate(&entry.company, 23),
                                truncate(&entry.careers_url.unwrap_or_default(), 38),
                                truncate(&entry.notes.unwrap_or_default(), 28)
                            );
                        }
                    }
                }
            }
        }

        Commands::Followups { company } => {
            db.ensure_initialized()?;
            let events = db.list_followups(company.as_deref())?;
            if events.is_empty() {
                println!("No follow-up emails recorded.");
            } else {
                println!("{:<12} {:<10} {:<20} {:<10} {:<40}", "DATE", "KIND", "COMPANY", "JOB", "SUBJECT");
                println!("{}", "-".repeat(96));
                for event in events {
                    println!(
                        "{:<12} {:<10} {:<20} {:<10} {:<40}",
                        event.email_date.format("%Y-%m-%d"),
                        event.kind,
                        truncate(&event.company, 18),
                        event.job_id.as_deref().map(|id| &id[..8]).unwrap_or("-"),
                        truncate(&event.subject, 38)
                    );
                }
            }
        }

        Commands::Checkpoints { limit } => {
            db.ensure_initialized()?;
            let checkpoints = db.list_checkpoints(limit)?;
            if checkpoints.is_empty() {
                println!("No scans yet.");
            } else {
                println!("{:<6} {:<22} {:>8} {:>8} {:<22}", "ID", "LAST EMAIL", "EMAILS", "ADDED", "SCANNED");
                println!("{}", "-".repeat(70));
                for checkpoint in checkpoints {
                    println!(
                        "{:<6} {:<22} {:>8} {:>8} {:<22}",
                        checkpoint.id,
                        checkpoint.last_scan_date.format("%Y-%m-%d %H:%M:%S"),
                        checkpoint.emails_found,
                        checkpoint.jobs_added,
                        checkpoint.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        Commands::View { id } => {
            db.ensure_initialized()?;
            let job = db.find_job(&id)?;
            db.mark_viewed(&job.job_id)?;
            println!("Marked {} at {} as viewed.", job.title, job.company);
        }

        Commands::Note { id, text } => {
            db.ensure_initialized()?;
            let job = db.find_job(&id)?;
            db.set_notes(&job.job_id, &text)?;
            println!("Saved note on {}.", &job.job_id[..8]);
        }
    }

    Ok(())
}

fn build_provider(config: &AppConfig, model: Option<&str>) -> Result<Arc<dyn JobProvider>> {
    let registry = ProviderRegistry::new();
    let name = model.unwrap_or(config.ai.model.as_str());
    let spec = registry.resolve(name)?;
    tracing::debug!(model = %spec.model_id, provider = ?spec.provider, "using model");
    let provider = registry
        .create(name, RetryPolicy::from_config(&config.retry))
        .with_context(|| format!("Failed to set up AI model '{}'", name))?;
    Ok(provider)
}

fn print_job(job: &JobRecord) {
    println!("Job {}", job.job_id);
    println!("Title: {}", job.title);
    println!("Company: {}", job.company);
    println!("Location: {}", job.location);
    println!("Status: {}", job.status);
    println!("URL: {}", job.url);
    println!("Source: {}", job.source);
    if job.salary_min.is_some() || job.salary_max.is_some() {
        println!("Pay: {}", pay_range(job));
    }
    if job.is_aggregator {
        println!("Posted by a staffing agency");
    }
    if let Some(reason) = &job.filter_reason {
        println!("Filtered: {}", reason);
    }
    match (job.baseline_score, job.score) {
        (Some(baseline), Some(score)) => println!("Score: {} (baseline {})", score, baseline),
        (Some(baseline), None) => println!("Baseline score: {}", baseline),
        _ => {}
    }
    if job.ghosting_risk {
        println!("Ghosting risk: no activity in a while");
    }
    if let Some(applied) = job.applied_at {
        println!("Applied: {}", applied.format("%Y-%m-%d"));
    }
    println!("Email date: {}", job.email_date.format("%Y-%m-%d %H:%M"));

    if let Some(analysis) = &job.analysis {
        println!("\n--- Analysis ---");
        println!("Should apply: {}", if analysis.should_apply { "yes" } else { "no" });
        if !analysis.resume_variant.is_empty() {
            println!("Resume variant: {}", analysis.resume_variant);
        }
        for strength in &analysis.strengths {
            println!("  + {}", strength);
        }
        for gap in &analysis.gaps {
            println!("  - {}", gap);
        }
        if !analysis.recommendation.is_empty() {
            println!("\n{}", textwrap::fill(&analysis.recommendation, WRAP_WIDTH));
        }
    }
    if let Some(notes) = &job.notes {
        println!("\n--- Notes ---\n{}", textwrap::fill(notes, WRAP_WIDTH));
    }
    if let Some(letter) = &job.cover_letter {
        println!("\n--- Cover Letter ---\n{}", letter);
    }
    let text = job.description.as_deref().unwrap_or(&job.raw_text);
    println!("\n--- Description ---\n{}", textwrap::fill(text, WRAP_WIDTH));
}

fn pay_range(job: &JobRecord) -> String {
    match (job.salary_min, job.salary_max) {
        (Some(min), Some(max)) => format!("${}k-${}k", min / 1000, max / 1000),
        (Some(min), None) => format!("${}k+", min / 1000),
        (None, Some(max)) => format!("<${}k", max / 1000),
        (None, None) => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
