//! Narrative providers
//!
//! The language-model call is a capability with two interchangeable
//! implementations: a deterministic template stand-in and a live HTTP
//! call, selected by configuration. The composer's contract is the same
//! regardless of which is wired in.

use super::ReasonCode;
use crate::config::NarrativeConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default timeout for live narrative requests (30 seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of retry attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors from narrative generation
#[derive(Error, Debug, Clone)]
pub enum NarrativeError {
    /// Network or API communication error
    #[error("Communication error: {0}")]
    Communication(String),

    /// Invalid response from the provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Generic error
    #[error("Narrative error: {0}")]
    Other(String),
}

/// Structured request for one insight entry's narrative
#[derive(Debug, Clone)]
pub struct NarrativeRequest {
    pub reason: ReasonCode,
    pub player_label: String,
    pub metric: f64,
    pub related_labels: Vec<String>,
    /// Decrypted note text, present only when the caller supplied notes
    pub note: Option<String>,
}

/// Capability for rendering an insight entry as prose
pub trait NarrativeProvider: Send + Sync {
    fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError>;
}

/// Deterministic template-based narrative, used when no live provider
/// is configured and as the test stand-in
pub struct TemplateNarrative;

impl NarrativeProvider for TemplateNarrative {
    fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError> {
        let contact = request
            .related_labels
            .first()
            .map(|l| l.as_str())
            .unwrap_or("a mutual contact");

        let mut text = match request.reason {
            ReasonCode::Broker => format!(
                "{} sits on an outsized share of shortest paths (betweenness {:.2}) - information in this organization routes through them",
                request.player_label, request.metric
            ),
            ReasonCode::BrokerageOpportunity => format!(
                "The contacts around {} are tightly interlocked (constraint {:.2}) - bridging that cluster could open a brokerage position; ask {} for an introduction",
                request.player_label, request.metric, contact
            ),
            ReasonCode::HighInfluenceRisk => format!(
                "{} combines high centrality ({:.2}) with a hostile stance - treat interactions deliberately and route proposals through {}",
                request.player_label, request.metric, contact
            ),
            ReasonCode::UnderleveragedAlly => format!(
                "{} is an ally with low connectivity ({:.2}) - low-cost support worth activating",
                request.player_label, request.metric
            ),
        };

        if let Some(note) = &request.note {
            text.push_str(&format!(" (notes on file: {})", note));
        }

        Ok(text)
    }
}

/// Request body for the live generate API
#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    temperature: f32,
    stream: bool,
}

/// Response from the live generate API
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Live HTTP narrative provider
///
/// Speaks a minimal generate API with bounded retries and exponential
/// backoff. Endpoint, model, and temperature come from configuration;
/// the API key is read from the configured environment variable.
pub struct ApiNarrative {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    client: reqwest::Client,
    max_retries: u32,
}

impl ApiNarrative {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        temperature: f32,
    ) -> Result<Self, NarrativeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| NarrativeError::Other(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            temperature,
            client,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Set the maximum number of retry attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Generate text for a prompt
    pub async fn generate(&self, prompt: &str) -> Result<String, NarrativeError> {
        let url = format!("{}/api/generate", self.endpoint);

        let request_body = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            temperature: self.temperature,
            stream: false,
        };

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_retries {
            let mut request = self.client.post(&url).json(&request_body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return match response.json::<GenerateResponse>().await {
                            Ok(body) => Ok(body.response),
                            Err(e) => Err(NarrativeError::InvalidResponse(format!(
                                "Failed to parse response: {}",
                                e
                            ))),
                        };
                    }
                    let status = response.status();
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    last_error = Some(NarrativeError::Communication(format!(
                        "HTTP {}: {}",
                        status, error_text
                    )));
                }
                Err(e) => {
                    last_error =
                        Some(NarrativeError::Communication(format!("Request failed: {}", e)));
                }
            }

            attempts += 1;
            if attempts < self.max_retries {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(2u64.pow(attempts - 1));
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| NarrativeError::Communication("Max retries exceeded".to_string())))
    }

    fn build_prompt(request: &NarrativeRequest) -> String {
        let mut prompt = format!(
            "You are an executive coach advising on workplace network building.\n\n\
             **Finding:** {:?}\n\
             **Person:** {}\n\
             **Metric:** {:.2}\n\
             **Strongest connections:** {}\n",
            request.reason,
            request.player_label,
            request.metric,
            if request.related_labels.is_empty() {
                "none".to_string()
            } else {
                request.related_labels.join(", ")
            },
        );
        if let Some(note) = &request.note {
            prompt.push_str(&format!("**Private notes:** {}\n", note));
        }
        prompt.push_str(
            "\nIn one concise sentence, explain the strategic significance and one \
             concrete next step. Keep it professional and ethical.",
        );
        prompt
    }
}

impl NarrativeProvider for ApiNarrative {
    fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError> {
        let prompt = Self::build_prompt(request);
        // Blocking wrapper for the async call path
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| NarrativeError::Other(format!("Failed to start runtime: {}", e)))?;
        runtime.block_on(self.generate(&prompt))
    }
}

/// Build the provider selected by configuration
pub fn provider_from_config(
    config: &NarrativeConfig,
) -> Result<Box<dyn NarrativeProvider>, NarrativeError> {
    if config.enabled && config.provider == "api" {
        let api_key = std::env::var(&config.api_key_env).ok();
        let provider = ApiNarrative::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            config.temperature,
        )?;
        Ok(Box::new(provider))
    } else {
        Ok(Box::new(TemplateNarrative))
    }
}
