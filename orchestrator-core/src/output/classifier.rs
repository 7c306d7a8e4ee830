//! Output classification: a five-way LLM call plus a deterministic,
//! rule-based hedging-language detector layered on top of it.

use serde::{Deserialize, Serialize};

use crate::error::OutputPipelineError;
use crate::output::artifacts::Artifacts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputType {
    StatusUpdate,
    Question,
    Completion,
    Blocker,
    Error,
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub output_type: OutputType,
    pub confidence: f64,
    pub reason: String,
    pub was_rejected_completion: bool,
}

const HEDGING_PHRASES: &[&str] = &[
    "should work",
    "probably",
    "i think",
    "hopefully",
    "might work",
    "this should",
    "i believe",
];

const COMPLETION_FRAME_PHRASES: &[&str] = &[
    "done",
    "completed",
    "finished",
    "all set",
    "that's it",
    "task complete",
];

/// True when the agent's language claims completion but no verifiable
/// artifact (commit hash, test result, changed file) backs it up, and the
/// text reads as hedged rather than confident.
pub fn was_rejected_completion(text: &str, artifacts: &Artifacts) -> bool {
    let lowered = text.to_lowercase();
    let claims_completion = COMPLETION_FRAME_PHRASES.iter().any(|p| lowered.contains(p));
    if !claims_completion {
        return false;
    }
    let has_evidence = !artifacts.commit_hashes.is_empty()
        || !artifacts.test_results.is_empty()
        || !artifacts.changed_files.is_empty();
    if has_evidence {
        return false;
    }
    HEDGING_PHRASES.iter().any(|p| lowered.contains(p))
}

#[async_trait::async_trait]
pub trait ClassifierClient: Send + Sync {
    async fn classify(&self, text: &str) -> Result<(OutputType, f64, String), OutputPipelineError>;
}

pub struct HttpClassifierClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifierClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .expect("reqwest client builds"),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl ClassifierClient for HttpClassifierClient {
    async fn classify(&self, text: &str) -> Result<(OutputType, f64, String), OutputPipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| OutputPipelineError::Classifier(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OutputPipelineError::Classifier(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct Response {
            output_type: OutputType,
            confidence: f64,
            reason: String,
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| OutputPipelineError::Classifier(e.to_string()))?;
        Ok((parsed.output_type, parsed.confidence, parsed.reason))
    }
}

/// Classify terminal agent output. `artifacts` should be the same
/// extraction the summarizer performed, so the hedging check and the
/// summary see identical evidence.
pub async fn classify(
    text: &str,
    artifacts: &Artifacts,
    client: &dyn ClassifierClient,
) -> Result<ClassificationResult, OutputPipelineError> {
    let (output_type, confidence, reason) = client.classify(text).await?;
    Ok(ClassificationResult {
        output_type,
        confidence,
        reason,
        was_rejected_completion: was_rejected_completion(text, artifacts),
    })
}
