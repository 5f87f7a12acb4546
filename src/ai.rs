use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Preferences;
use crate::error::{HuntError, ProviderError};
use crate::models::{Analysis, EmailKind, JobRecord};
use crate::retry::RetryPolicy;

type ProviderResult<T> = std::result::Result<T, ProviderError>;

// --- Provider contract ---

/// Phase 1 output.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineResult {
    pub keep: bool,
    pub baseline_score: i64,
    pub filter_reason: String,
}

impl BaselineResult {
    /// Safe reject used when the provider could not answer.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            keep: false,
            baseline_score: 0,
            filter_reason: reason.into(),
        }
    }
}

/// Phase 2 output.
#[derive(Debug, Clone, PartialEq)]
pub struct JobAnalysis {
    pub qualification_score: i64,
    pub should_apply: bool,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub recommendation: String,
    pub resume_variant: String,
}

impl JobAnalysis {
    pub fn to_analysis(&self) -> Analysis {
        Analysis {
            should_apply: self.should_apply,
            strengths: self.strengths.clone(),
            gaps: self.gaps.clone(),
            recommendation: self.recommendation.clone(),
            resume_variant: self.resume_variant.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailClassification {
    pub kind: EmailKind,
    pub company: Option<String>,
}

/// The six operations every AI backend exposes. Operations a backend cannot
/// perform return `ProviderError::Unsupported`.
#[async_trait]
pub trait JobProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn filter_and_score(
        &self,
        job: &JobRecord,
        resume: &str,
        preferences: &Preferences,
    ) -> ProviderResult<BaselineResult>;

    async fn analyze_job(&self, job: &JobRecord, resume: &str) -> ProviderResult<JobAnalysis>;

    async fn generate_cover_letter(&self, job: &JobRecord, resume: &str) -> ProviderResult<String>;

    async fn generate_interview_answer(
        &self,
        job: &JobRecord,
        resume: &str,
        question: &str,
    ) -> ProviderResult<String>;

    async fn search_job_description(&self, title: &str, company: &str) -> ProviderResult<String>;

    async fn classify_email(&self, subject: &str, body: &str) -> ProviderResult<EmailClassification>;
}

/// Wraps every operation of a provider in the retry policy.
pub struct RetryingProvider {
    inner: Arc<dyn JobProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn JobProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl JobProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn filter_and_score(
        &self,
        job: &JobRecord,
        resume: &str,
        preferences: &Preferences,
    ) -> ProviderResult<BaselineResult> {
        self.policy
            .run("filterAndScore", || self.inner.filter_and_score(job, resume, preferences))
            .await
    }

    async fn analyze_job(&self, job: &JobRecord, resume: &str) -> ProviderResult<JobAnalysis> {
        self.policy
            .run("analyzeJob", || self.inner.analyze_job(job, resume))
            .await
    }

    async fn generate_cover_letter(&self, job: &JobRecord, resume: &str) -> ProviderResult<String> {
        self.policy
            .run("generateCoverLetter", || self.inner.generate_cover_letter(job, resume))
            .await
    }

    async fn generate_interview_answer(
        &self,
        job: &JobRecord,
        resume: &str,
        question: &str,
    ) -> ProviderResult<String> {
        self.policy
            .run("generateInterviewAnswer", || {
                self.inner.generate_interview_answer(job, resume, question)
            })
            .await
    }

    async fn search_job_description(&self, title: &str, company: &str) -> ProviderResult<String> {
        self.policy
            .run("searchJobDescription", || self.inner.search_job_description(title, company))
            .await
    }

    async fn classify_email(&self, subject: &str, body: &str) -> ProviderResult<EmailClassification> {
        self.policy
            .run("classifyEmail", || self.inner.classify_email(subject, body))
            .await
    }
}

// --- Completion backends ---

/// Raw text completion, implemented once per AI vendor.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> ProviderResult<String>;

    fn model_name(&self) -> &str;

    fn supports_web_search(&self) -> bool {
        false
    }

    /// Completion that may consult the web. Only called when supported.
    async fn complete_with_search(&self, prompt: &str, max_tokens: u32) -> ProviderResult<String> {
        let _ = (prompt, max_tokens);
        Err(ProviderError::Unsupported("searchJobDescription"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    ClaudeCli,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

type BackendConstructor = fn(&ModelSpec, Duration) -> Result<Box<dyn CompletionBackend>, HuntError>;

struct RegistryEntry {
    spec: ModelSpec,
    construct: BackendConstructor,
}

/// Model identifier → backend constructor, built once at startup.
pub struct ProviderRegistry {
    entries: HashMap<&'static str, RegistryEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };

        let cli: BackendConstructor = |spec, timeout| {
            Ok(Box::new(ClaudeCliBackend::new(spec.model_id.clone(), timeout)?))
        };
        let anthropic: BackendConstructor = |spec, timeout| {
            Ok(Box::new(AnthropicBackend::new(spec.model_id.clone(), timeout)?))
        };
        let openai: BackendConstructor = |spec, timeout| {
            Ok(Box::new(OpenAIBackend::new(spec.model_id.clone(), timeout)?))
        };

        registry.register(&["claude-sonnet", "sonnet"], ProviderKind::ClaudeCli, "claude-sonnet-4-5-20250929", cli);
        registry.register(&["claude-opus", "opus"], ProviderKind::ClaudeCli, "claude-opus-4-6", cli);
        registry.register(&["claude-haiku", "haiku"], ProviderKind::ClaudeCli, "claude-haiku-4-5-20251001", cli);
        registry.register(&["api-sonnet"], ProviderKind::Anthropic, "claude-sonnet-4-5-20250929", anthropic);
        registry.register(&["api-opus"], ProviderKind::Anthropic, "claude-opus-4-6", anthropic);
        registry.register(&["api-haiku"], ProviderKind::Anthropic, "claude-haiku-4-5-20251001", anthropic);
        registry.register(&["gpt-5.2", "gpt5"], ProviderKind::OpenAI, "gpt-5.2", openai);
        registry.register(&["gpt-4o"], ProviderKind::OpenAI, "gpt-4o", openai);
        registry.register(&["o3"], ProviderKind::OpenAI, "o3", openai);

        registry
    }

    fn register(
        &mut self,
        names: &[&'static str],
        provider: ProviderKind,
        model_id: &str,
        construct: BackendConstructor,
    ) {
        let short_name = names[0].to_string();
        for &name in names {
            self.entries.insert(
                name,
                RegistryEntry {
                    spec: ModelSpec {
                        provider,
                        model_id: model_id.to_string(),
                        short_name: short_name.clone(),
                    },
                    construct,
                },
            );
        }
    }

    pub fn resolve(&self, name: &str) -> Result<&ModelSpec, HuntError> {
        self.entries.get(name).map(|e| &e.spec).ok_or_else(|| {
            let mut known: Vec<_> = self.entries.keys().copied().collect();
            known.sort_unstable();
            HuntError::Configuration(format!(
                "unknown model '{}'. Available: {}",
                name,
                known.join(", ")
            ))
        })
    }

    /// Build the provider for `name`, wrapped in the retry policy.
    pub fn create(&self, name: &str, policy: RetryPolicy) -> Result<Arc<dyn JobProvider>, HuntError> {
        let entry = self.entries.get(name).ok_or_else(|| {
            HuntError::Configuration(format!("unknown model '{}'", name))
        })?;
        let backend = (entry.construct)(&entry.spec, policy.timeout)?;
        let provider: Arc<dyn JobProvider> = Arc::new(LlmProvider::new(backend));
        Ok(Arc::new(RetryingProvider::new(provider, policy)))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// --- Anthropic backend ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

pub struct AnthropicBackend {
    api_key: String,
    model_id: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(model_id: String, timeout: Duration) -> Result<Self, HuntError> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            HuntError::Configuration(
                "ANTHROPIC_API_KEY environment variable not set. Set it with: export ANTHROPIC_API_KEY=your-key-here"
                    .to_string(),
            )
        })?;
        let client = http_client(timeout)?;
        Ok(Self { api_key, model_id, client })
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> ProviderResult<String> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response = check_status(response).await?;
        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Anthropic response: {}", e)))?;

        api_response
            .content
            .into_iter()
            .map(|block| block.text)
            .find(|text| !text.is_empty())
            .ok_or_else(|| ProviderError::Malformed("no content in Anthropic response".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI backend ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_completion_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

pub struct OpenAIBackend {
    api_key: String,
    model_id: String,
    client: reqwest::Client,
}

impl OpenAIBackend {
    pub fn new(model_id: String, timeout: Duration) -> Result<Self, HuntError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            HuntError::Configuration(
                "OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here"
                    .to_string(),
            )
        })?;
        let client = http_client(timeout)?;
        Ok(Self { api_key, model_id, client })
    }
}

#[async_trait]
impl CompletionBackend for OpenAIBackend {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> ProviderResult<String> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            max_completion_tokens: max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response = check_status(response).await?;
        let api_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("OpenAI response: {}", e)))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Malformed("no choices in OpenAI response".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- claude CLI backend (no API key, can browse) ---

pub struct ClaudeCliBackend {
    model_id: String,
}

impl ClaudeCliBackend {
    pub fn new(model_id: String, _timeout: Duration) -> Result<Self, HuntError> {
        std::process::Command::new("claude")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|_| {
                HuntError::Configuration(
                    "'claude' CLI not found. Install it or use api-sonnet/gpt-5.2 instead.".to_string(),
                )
            })?;
        Ok(Self { model_id })
    }

    async fn run(&self, prompt: &str, allowed_tools: Option<&str>) -> ProviderResult<String> {
        let mut command = tokio::process::Command::new("claude");
        command.arg("-p").arg(prompt).arg("--model").arg(&self.model_id);
        if let Some(tools) = allowed_tools {
            command.arg("--allowedTools").arg(tools);
        }
        command.kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to run 'claude' CLI: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Network(format!("claude CLI failed: {}", stderr.trim())));
        }

        let response = String::from_utf8(output.stdout)
            .map_err(|_| ProviderError::Malformed("invalid UTF-8 in claude CLI output".to_string()))?;
        if response.trim().is_empty() {
            return Err(ProviderError::Malformed("empty response from claude CLI".to_string()));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for ClaudeCliBackend {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> ProviderResult<String> {
        self.run(prompt, None).await
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn supports_web_search(&self) -> bool {
        true
    }

    async fn complete_with_search(&self, prompt: &str, _max_tokens: u32) -> ProviderResult<String> {
        self.run(prompt, Some("WebSearch,WebFetch")).await
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, HuntError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| HuntError::Configuration(format!("failed to create HTTP client: {}", e)))
}

async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::Auth(body));
    }
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

// --- LLM-backed provider ---

/// Implements the six operations by prompting a completion backend for JSON.
pub struct LlmProvider {
    backend: Box<dyn CompletionBackend>,
}

#[derive(Debug, Deserialize)]
struct BaselineWire {
    keep: bool,
    #[serde(alias = "baselineScore")]
    baseline_score: f64,
    #[serde(default, alias = "filterReason")]
    filter_reason: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisWire {
    #[serde(alias = "qualificationScore")]
    qualification_score: f64,
    #[serde(default, alias = "shouldApply")]
    should_apply: bool,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    recommendation: String,
    #[serde(default, alias = "resumeVariant")]
    resume_variant: String,
}

#[derive(Debug, Deserialize)]
struct ClassificationWire {
    #[serde(alias = "type")]
    kind: String,
    #[serde(default)]
    company: Option<String>,
}

impl LlmProvider {
    pub fn new(backend: Box<dyn CompletionBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl JobProvider for LlmProvider {
    fn name(&self) -> &str {
        self.backend.model_name()
    }

    async fn filter_and_score(
        &self,
        job: &JobRecord,
        resume: &str,
        preferences: &Preferences,
    ) -> ProviderResult<BaselineResult> {
        let prefs = serde_json::to_string(preferences)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let prompt = format!(
            "You screen job postings for a candidate. Decide quickly whether this job is worth a \
            detailed review.\n\n\
            Return ONLY JSON: {{\"keep\": true|false, \"baseline_score\": 1-100, \"filter_reason\": \"...\"}}\n\n\
            Candidate preferences (JSON): {prefs}\n\n\
            Job:\n{job}\n\n\
            Resume:\n{resume}",
            job = job.job_text(),
        );

        let response = self.backend.complete(&prompt, 512).await?;
        let wire: BaselineWire = parse_json(&response)?;
        Ok(BaselineResult {
            keep: wire.keep,
            baseline_score: clamp_score(wire.baseline_score),
            filter_reason: wire.filter_reason,
        })
    }

    async fn analyze_job(&self, job: &JobRecord, resume: &str) -> ProviderResult<JobAnalysis> {
        let prompt = format!(
            "Compare this resume against the job posting and provide a fit analysis.\n\n\
            Return ONLY JSON with keys: qualification_score (1-100), should_apply (bool), \
            strengths (list of strings), gaps (list of strings), recommendation (string), \
            resume_variant (short name of the resume angle to use, e.g. \"backend\", \"platform\").\n\n\
            Job:\n{job}\n\n\
            Resume:\n{resume}",
            job = job.job_text(),
        );

        let response = self.backend.complete(&prompt, 2048).await?;
        let wire: AnalysisWire = parse_json(&response)?;
        Ok(JobAnalysis {
            qualification_score: clamp_score(wire.qualification_score),
            should_apply: wire.should_apply,
            strengths: wire.strengths,
            gaps: wire.gaps,
            recommendation: wire.recommendation,
            resume_variant: wire.resume_variant,
        })
    }

    async fn generate_cover_letter(&self, job: &JobRecord, resume: &str) -> ProviderResult<String> {
        let prompt = format!(
            "Write a concise, specific cover letter (under 350 words) for this job. \
            Stay truthful to the resume. Return only the letter text.\n\n\
            Job:\n{job}\n\n\
            Resume:\n{resume}",
            job = job.job_text(),
        );
        let letter = self.backend.complete(&prompt, 2048).await?;
        Ok(letter.trim().to_string())
    }

    async fn generate_interview_answer(
        &self,
        job: &JobRecord,
        resume: &str,
        question: &str,
    ) -> ProviderResult<String> {
        let prompt = format!(
            "Draft an answer to this interview question for the job below, grounded in the \
            resume. Use concrete examples. Return only the answer.\n\n\
            Question: {question}\n\n\
            Job:\n{job}\n\n\
            Resume:\n{resume}",
            job = job.job_text(),
        );
        let answer = self.backend.complete(&prompt, 2048).await?;
        Ok(answer.trim().to_string())
    }

    async fn search_job_description(&self, title: &str, company: &str) -> ProviderResult<String> {
        if !self.backend.supports_web_search() {
            return Err(ProviderError::Unsupported("searchJobDescription"));
        }
        let prompt = format!(
            "Find the current public job posting for \"{title}\" at \"{company}\" and return its \
            full description text (responsibilities, requirements, compensation if listed). \
            Return only the description. If you cannot find it, return NOT_FOUND."
        );
        let text = self.backend.complete_with_search(&prompt, 4096).await?;
        let text = text.trim();
        if text.is_empty() || text == "NOT_FOUND" {
            return Err(ProviderError::Malformed("no description found".to_string()));
        }
        Ok(text.to_string())
    }

    async fn classify_email(&self, subject: &str, body: &str) -> ProviderResult<EmailClassification> {
        let body: String = body.chars().take(4000).collect();
        let prompt = format!(
            "Classify this email about a job application.\n\
            Return ONLY JSON: {{\"kind\": \"interview\"|\"offer\"|\"rejection\"|\"applied\"|\"other\", \
            \"company\": \"employer name or null\"}}\n\n\
            Subject: {subject}\n\n{body}"
        );
        let response = self.backend.complete(&prompt, 256).await?;
        let wire: ClassificationWire = parse_json(&response)?;
        Ok(EmailClassification {
            kind: wire.kind.parse().unwrap_or(EmailKind::Other),
            company: wire.company.filter(|c| !c.trim().is_empty()),
        })
    }
}

fn clamp_score(score: f64) -> i64 {
    if score.is_nan() {
        return 1;
    }
    (score.round() as i64).clamp(1, 100)
}

/// Parse the first JSON object in a model response, tolerating code fences
/// and surrounding prose.
fn parse_json<T: DeserializeOwned>(response: &str) -> ProviderResult<T> {
    let start = response.find('{');
    let end = response.rfind('}');
    let slice = match (start, end) {
        (Some(s), Some(e)) if e > s => &response[s..=e],
        _ => {
            return Err(ProviderError::Malformed(format!(
                "no JSON object in response: {}",
                response.chars().take(120).collect::<String>()
            )));
        }
    };
    serde_json::from_str(slice).map_err(|e| ProviderError::Malformed(e.to_string()))
}
