//! Safety Gate: screens every utterance before any other processing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use medidesk_core::config::{SafetyConfig, SafetyProvider};
use medidesk_core::errors::{ApplicationError, ExternalService};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToxicityVerdict {
    pub is_toxic: bool,
    pub score: f32,
}

impl ToxicityVerdict {
    pub fn clean() -> Self {
        Self { is_toxic: false, score: 0.0 }
    }
}

/// One label emitted by a text classifier, e.g. `{"label": "toxic", "score": 0.93}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToxicityLabel {
    pub label: String,
    pub score: f32,
}

#[async_trait]
pub trait ToxicityClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn labels(&self, text: &str) -> Result<Vec<ToxicityLabel>>;
}

/// Result of screening one utterance. `degraded` is set when the classifier
/// could not be consulted and the gate let the utterance through.
#[derive(Clone, Debug, PartialEq)]
pub struct SafetyCheck {
    pub verdict: ToxicityVerdict,
    pub degraded: Option<ApplicationError>,
}

pub struct SafetyGate {
    classifier: Arc<dyn ToxicityClassifier>,
    threshold: f32,
    timeout: Duration,
}

impl SafetyGate {
    pub fn new(classifier: Arc<dyn ToxicityClassifier>, threshold: f32, timeout: Duration) -> Self {
        Self { classifier, threshold, timeout }
    }

    pub fn from_config(config: &SafetyConfig) -> Result<Self> {
        let classifier: Arc<dyn ToxicityClassifier> = match config.provider {
            SafetyProvider::Lexicon => Arc::new(LexiconClassifier::default()),
            SafetyProvider::Http => {
                let endpoint = config
                    .endpoint
                    .clone()
                    .context("safety.endpoint is required for the http classifier")?;
                Arc::new(HttpToxicityClassifier::new(
                    endpoint,
                    config.api_key.clone(),
                    Duration::from_millis(config.timeout_ms),
                )?)
            }
        };
        Ok(Self::new(classifier, config.toxicity_threshold, Duration::from_millis(config.timeout_ms)))
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Never fails: an unreachable or slow classifier yields a clean verdict
    /// with `degraded` populated.
    pub async fn classify(&self, text: &str) -> SafetyCheck {
        let labels = match tokio::time::timeout(self.timeout, self.classifier.labels(text)).await {
            Ok(Ok(labels)) => labels,
            Ok(Err(error)) => return self.degraded(format!("{error:#}")),
            Err(_) => {
                return self.degraded(format!(
                    "no verdict within {} ms",
                    self.timeout.as_millis()
                ))
            }
        };

        SafetyCheck { verdict: verdict_from_labels(&labels, self.threshold), degraded: None }
    }

    fn degraded(&self, message: String) -> SafetyCheck {
        tracing::warn!(
            event_name = "safety.classifier_unavailable",
            classifier = self.classifier.name(),
            error = %message,
            "safety classifier unavailable; letting utterance through"
        );
        SafetyCheck {
            verdict: ToxicityVerdict::clean(),
            degraded: Some(ApplicationError::unavailable(ExternalService::SafetyClassifier, message)),
        }
    }
}

/// An utterance is toxic when any label starting with `toxic` scores above
/// `threshold`. The verdict score is the highest such label score.
pub fn verdict_from_labels(labels: &[ToxicityLabel], threshold: f32) -> ToxicityVerdict {
    let score = labels
        .iter()
        .filter(|label| label.label.trim().to_ascii_lowercase().starts_with("toxic"))
        .map(|label| label.score)
        .fold(0.0f32, f32::max);

    ToxicityVerdict { is_toxic: score > threshold, score }
}

const DEFAULT_LEXICON: &[&str] = &[
    "idiot", "stupid", "moron", "dumb", "loser", "shut up", "hate you", "kill you", "fuck",
    "fucking", "shit", "bitch", "bastard", "asshole", "crap", "useless bot",
];

/// Offline classifier matching whole words and phrases from a block list.
#[derive(Clone, Debug)]
pub struct LexiconClassifier {
    terms: Vec<String>,
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_LEXICON.iter().map(|term| term.to_string()))
    }
}

impl LexiconClassifier {
    pub fn new(terms: impl IntoIterator<Item = String>) -> Self {
        Self { terms: terms.into_iter().map(|term| normalize(&term)).collect() }
    }

    fn hits(&self, text: &str) -> usize {
        let padded = format!(" {} ", normalize(text));
        self.terms.iter().filter(|term| padded.contains(&format!(" {term} "))).count()
    }
}

#[async_trait]
impl ToxicityClassifier for LexiconClassifier {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    async fn labels(&self, text: &str) -> Result<Vec<ToxicityLabel>> {
        let score = match self.hits(text) {
            0 => 0.0,
            1 => 0.9,
            _ => 1.0,
        };
        Ok(vec![ToxicityLabel { label: "toxic".to_string(), score }])
    }
}

fn normalize(text: &str) -> String {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remote text-classification endpoint speaking the hosted inference format:
/// `POST {"inputs": text}` answered by `[{label, score}]` or `[[{label, score}]]`.
pub struct HttpToxicityClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    inputs: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Nested(Vec<Vec<ToxicityLabel>>),
    Flat(Vec<ToxicityLabel>),
}

impl HttpToxicityClassifier {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build safety classifier http client")?;
        Ok(Self { client, endpoint: endpoint.into(), api_key })
    }
}

#[async_trait]
impl ToxicityClassifier for HttpToxicityClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn labels(&self, text: &str) -> Result<Vec<ToxicityLabel>> {
        let mut request = self.client.post(&self.endpoint).json(&ClassifyRequest { inputs: text });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("safety classifier request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("safety classifier returned {status}: {body}");
        }

        let parsed: ClassifyResponse =
            response.json().await.context("failed to parse safety classifier response")?;
        Ok(match parsed {
            ClassifyResponse::Nested(batches) => batches.into_iter().flatten().collect(),
            ClassifyResponse::Flat(labels) => labels,
        })
    }
}
