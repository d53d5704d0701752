//! Lead qualification: prompt construction, LLM backends, and strict JSON
//! validation of the model verdict.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::config::QualifierConfig;
use crate::scout::types::Lead;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Fully qualified lead, ready for presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualificationResult {
    pub lead_id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub score: i64,
    pub justification: String,
    pub cover_letter: String,
    pub company_name: Option<String>,
    pub contact_info: Option<String>,
}

/// Shape the model must return. Missing required keys fail deserialization,
/// which is the validation the qualifier relies on.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    score: i64,
    justification: String,
    cover_letter_draft: String,
    #[serde(default)]
    extracted_company_name: Option<String>,
    #[serde(default)]
    extracted_contact_info: Option<String>,
}

const SYSTEM_INSTRUCTION: &str = "You are an expert career assistant. Your task is to analyze \
a job posting based on a user's resume and skills. You MUST respond with a single, valid JSON \
object and nothing else. The JSON object must have the following structure: \
{\"score\": <integer>, \"justification\": \"<string>\", \"cover_letter_draft\": \"<string>\", \
\"extracted_company_name\": \"<string or null>\", \"extracted_contact_info\": \"<string or null>\"}.";

// ------------------------------------------------------------
// Backend abstraction + concrete backends
// ------------------------------------------------------------

/// Low-level completion backend: does one remote call. The qualifier owns
/// prompt construction and response validation.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

pub type DynLlmBackend = Arc<dyn LlmBackend>;

/// OpenAI chat-completions backend. Requires an API key.
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiBackend {
    pub fn new(api_key: String, model: String, temperature: f32) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("job-prospector/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model,
            temperature,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        if self.api_key.is_empty() {
            bail!("missing api key");
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: 1024,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("sending completion request")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("completion request returned {status}");
        }
        let body: Resp = resp.json().await.context("decoding completion response")?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Deterministic backend for tests and offline runs.
#[derive(Clone)]
pub struct MockBackend {
    pub fixed: String,
}

impl MockBackend {
    pub fn returning(fixed: &str) -> Self {
        Self {
            fixed: fixed.to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        Ok(self.fixed.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Qualifier
// ------------------------------------------------------------

/// Scores and annotates leads against the user's resume and keywords.
///
/// A qualifier without a backend (missing API key) is in a disabled state:
/// every `qualify` call returns `None` without touching the network.
#[derive(Clone)]
pub struct Qualifier {
    backend: Option<DynLlmBackend>,
    keywords: Vec<String>,
}

impl Qualifier {
    /// Build from configuration. `QUALIFIER_TEST_MODE=mock` substitutes a
    /// deterministic backend regardless of credentials.
    pub fn from_config(cfg: &QualifierConfig) -> Self {
        if std::env::var("QUALIFIER_TEST_MODE")
            .map(|v| v == "mock")
            .unwrap_or(false)
        {
            let fixed =
                r#"{"score": 50, "justification": "Mock verdict.", "cover_letter_draft": ""}"#;
            return Self::with_backend(
                Arc::new(MockBackend::returning(fixed)),
                cfg.keywords.clone(),
            );
        }

        if cfg.api_key.is_empty() {
            tracing::error!("OPENAI_API_KEY not configured; qualifier disabled");
            return Self {
                backend: None,
                keywords: cfg.keywords.clone(),
            };
        }

        Self::with_backend(
            Arc::new(OpenAiBackend::new(
                cfg.api_key.clone(),
                cfg.model.clone(),
                cfg.temperature,
            )),
            cfg.keywords.clone(),
        )
    }

    pub fn with_backend(backend: DynLlmBackend, keywords: Vec<String>) -> Self {
        Self {
            backend: Some(backend),
            keywords,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Analyze one lead. Returns `None` when the qualifier is disabled, the
    /// lead has no body text, or the backend call/verdict fails; failure is
    /// always per-lead, never fatal to the caller's run.
    pub async fn qualify(&self, lead: &Lead, resume: &str) -> Option<QualificationResult> {
        let Some(backend) = &self.backend else {
            tracing::warn!(title = %lead.title, "qualifier disabled; skipping analysis");
            return None;
        };
        if lead.body.trim().is_empty() {
            tracing::info!(title = %lead.title, "lead has no body text; skipping analysis");
            return None;
        }

        tracing::info!(title = %lead.title, source = %lead.source, "analyzing lead");
        let prompt = build_prompt(&lead.title, &lead.body, resume, &self.keywords);

        let raw = match backend.complete(SYSTEM_INSTRUCTION, &prompt).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    title = %lead.title,
                    backend = backend.name(),
                    "completion call failed"
                );
                counter!("qualify_failures_total").increment(1);
                return None;
            }
        };
        if raw.trim().is_empty() {
            tracing::error!(title = %lead.title, "completion response was empty");
            counter!("qualify_failures_total").increment(1);
            return None;
        }

        let verdict: ModelVerdict = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    raw = %raw,
                    title = %lead.title,
                    "model verdict failed validation"
                );
                counter!("qualify_failures_total").increment(1);
                return None;
            }
        };

        counter!("qualify_results_total").increment(1);
        Some(QualificationResult {
            lead_id: lead.id.clone(),
            title: lead.title.clone(),
            url: lead.url.clone(),
            source: lead.source.clone(),
            score: verdict.score.clamp(0, 100),
            justification: verdict.justification,
            cover_letter: verdict.cover_letter_draft,
            company_name: verdict.extracted_company_name,
            contact_info: verdict.extracted_contact_info,
        })
    }
}

fn build_prompt(title: &str, body: &str, resume: &str, keywords: &[String]) -> String {
    let keywords_joined = keywords.join(", ");
    let resume_section = if resume.trim().is_empty() {
        "No resume provided.".to_string()
    } else {
        format!("Here is my resume for context:\n\n---\n{resume}\n---")
    };

    format!(
        "Analyze the following job posting based on my skills and resume.\n\n\
         **My Key Skills/Interests:**\n{keywords_joined}\n\n\
         **My Resume/CV:**\n{resume_section}\n\n\
         **Job Posting to Analyze:**\nTitle: {title}\nBody:\n{body}\n\n\
         ---\n\
         **Your Task:**\n\
         Evaluate the posting's relevance to my profile. Provide a relevance score from 0 \
         (not relevant) to 100 (perfect match), a brief justification for the score, and a \
         concise, professional, tailored cover letter draft. Extract the company name and any \
         contact information if available.\n\n\
         Return a single, valid JSON object with the following exact structure:\n\
         {{\n\
           \"score\": <integer, 0-100>,\n\
           \"justification\": \"<string, your reasoning for the score>\",\n\
           \"cover_letter_draft\": \"<string, the drafted cover letter text>\",\n\
           \"extracted_company_name\": \"<string or null, the company name if found>\",\n\
           \"extracted_contact_info\": \"<string or null, email or contact person if found>\"\n\
         }}"
    )
}
