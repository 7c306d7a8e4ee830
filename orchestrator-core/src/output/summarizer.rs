//! Tiered summarization: passthrough under threshold, else LLM summary with
//! artifact preservation, falling back through a second model and finally a
//! hard truncation.

use std::io::Write;

use crate::config::OrchestratorConfig;
use crate::error::OutputPipelineError;
use crate::output::artifacts::{self, Artifacts};

#[derive(Debug, Clone)]
pub struct SummarizedResponse {
    pub text: String,
    pub was_summarized: bool,
    pub full_output_path: Option<std::path::PathBuf>,
    pub artifacts: Artifacts,
}

fn build_summary_prompt(raw: &str, artifacts: &Artifacts, max_chars: usize) -> String {
    let mut must_preserve = Vec::new();
    must_preserve.extend(artifacts.commit_hashes.iter().cloned());
    must_preserve.extend(artifacts.urls.iter().cloned());
    must_preserve.extend(artifacts.changed_files.iter().cloned());
    must_preserve.extend(artifacts.test_results.iter().cloned());

    let mut prompt = String::new();
    prompt.push_str("Summarize the following agent output for a chat message. ");
    prompt.push_str(&format!("Target length: {max_chars} characters or fewer. "));
    if !must_preserve.is_empty() {
        prompt.push_str("The following MUST appear verbatim in your summary: ");
        prompt.push_str(&must_preserve.join(", "));
        prompt.push_str(". ");
    }
    prompt.push_str("\n\n---\n\n");
    prompt.push_str(raw);
    prompt
}

fn write_full_output_file(raw: &str) -> Result<std::path::PathBuf, OutputPipelineError> {
    let mut file = tempfile::Builder::new()
        .prefix("agent-output-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(raw.as_bytes())?;
    let (_, path) = file.keep().map_err(|e| OutputPipelineError::Io(e.error))?;
    Ok(path)
}

fn hard_truncate(raw: &str, limit: usize) -> String {
    if raw.len() <= limit {
        return raw.to_string();
    }
    // "…" is 3 bytes in UTF-8; reserve room for it so the result never
    // exceeds `limit`.
    let mut cut = limit.saturating_sub(3);
    while cut > 0 && !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &raw[..cut])
}

/// Calls an LLM summarization endpoint. Kept as a trait so tests can swap in
/// a stub without a live HTTP round-trip.
#[async_trait::async_trait]
pub trait SummarizerClient: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String, OutputPipelineError>;
}

pub struct HttpSummarizerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSummarizerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(20))
                .build()
                .expect("reqwest client builds"),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl SummarizerClient for HttpSummarizerClient {
    async fn summarize(&self, prompt: &str) -> Result<String, OutputPipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| OutputPipelineError::Summarizer(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OutputPipelineError::Summarizer(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OutputPipelineError::Summarizer(e.to_string()))?;
        body.get("summary")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| OutputPipelineError::Summarizer("missing summary field".to_string()))
    }
}

/// Summarize raw agent output via a tiered fallback. `primary` and
/// `fallback` are tried in order; a failure of both (or a summary that
/// is not actually shorter than the input) degrades to hard truncation.
pub async fn summarize_response(
    raw: &str,
    config: &OrchestratorConfig,
    primary: &dyn SummarizerClient,
    fallback: &dyn SummarizerClient,
) -> SummarizedResponse {
    if raw.len() <= config.summarize_threshold {
        return SummarizedResponse {
            text: raw.to_string(),
            was_summarized: false,
            full_output_path: None,
            artifacts: Artifacts::default(),
        };
    }

    let artifacts = artifacts::extract(raw);
    let full_output_path = if raw.len() > config.file_attach_threshold {
        write_full_output_file(raw).ok()
    } else {
        None
    };

    let prompt = build_summary_prompt(raw, &artifacts, config.max_summary_chars);

    let summary = match primary.summarize(&prompt).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::warn!(error = %e, "primary summarizer failed, trying fallback");
            match fallback.summarize(&prompt).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::warn!(error = %e, "fallback summarizer also failed, hard-truncating");
                    None
                }
            }
        }
    };

    let text = match summary {
        // Defense against a misbehaving summarizer making output longer, not shorter.
        Some(summary) if summary.len() < raw.len() => summary,
        _ => hard_truncate(raw, config.safety_truncate),
    };

    SummarizedResponse {
        text,
        was_summarized: true,
        full_output_path,
        artifacts,
    }
}
