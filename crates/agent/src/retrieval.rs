//! Knowledge Retriever: nearest-FAQ lookup by cosine similarity.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use medidesk_core::config::{EmbedderKind, RetrievalConfig};
use medidesk_core::domain::faq::{parse_faq_document, FaqDocument, FaqEntry, RetrievalResult};
use medidesk_core::errors::{ApplicationError, ExternalService};

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub fn build_embedder(config: &RetrievalConfig) -> Result<Arc<dyn Embedder>> {
    Ok(match config.embedder {
        EmbedderKind::Hash => Arc::new(HashEmbedder::new(config.embedding_dim)),
        EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
            config.embedding_endpoint.clone(),
            config.embedding_model.clone(),
            Duration::from_millis(config.timeout_ms),
        )?),
    })
}

/// Deterministic bag-of-words feature hashing (FNV-1a), L2-normalised.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for token in text
            .to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.as_bytes() {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            vector[(hash % self.dim as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &'static str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { model: &self.model, input: text })
            .send()
            .await
            .with_context(|| format!("embedding request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("embedding service returned {status}: {body}");
        }

        let parsed: EmbedResponse =
            response.json().await.context("failed to parse embedding response")?;
        parsed.embeddings.into_iter().next().context("embedding service returned no vectors")
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// Highest-similarity entry; on ties the lower corpus index wins.
pub fn best_match(query: &[f32], entries: &[FaqEntry]) -> RetrievalResult {
    let mut best: Option<(usize, f32)> = None;
    for (index, entry) in entries.iter().enumerate() {
        let score = cosine_similarity(query, &entry.embedding);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((index, score));
        }
    }

    match best {
        Some((index, similarity)) => RetrievalResult {
            matched_entry: entries.get(index).cloned(),
            matched_index: Some(index),
            similarity,
        },
        None => RetrievalResult::no_match(),
    }
}

/// The static FAQ corpus with question embeddings computed once at startup.
#[derive(Clone, Debug, Default)]
pub struct FaqCorpus {
    entries: Vec<FaqEntry>,
}

impl FaqCorpus {
    pub fn from_entries(entries: Vec<FaqEntry>) -> Self {
        Self { entries }
    }

    pub async fn build(documents: Vec<FaqDocument>, embedder: &dyn Embedder) -> Result<Self, ApplicationError> {
        let mut entries = Vec::with_capacity(documents.len());
        for document in documents {
            let embedding = embedder.embed(&document.question).await.map_err(|error| {
                ApplicationError::unavailable(ExternalService::Embedder, format!("{error:#}"))
            })?;
            entries.push(FaqEntry { question: document.question, answer: document.answer, embedding });
        }

        if entries.is_empty() {
            tracing::warn!(
                event_name = "retrieval.corpus_empty",
                "FAQ corpus is empty; every question will go to the fallback responder"
            );
        }
        Ok(Self { entries })
    }

    /// Reads a `Q:`/`A:` knowledge base. A missing or unreadable file is fatal.
    pub async fn load(path: &Path, embedder: &dyn Embedder) -> Result<Self, ApplicationError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|error| {
            ApplicationError::Fatal(format!("FAQ corpus `{}` unavailable: {error}", path.display()))
        })?;
        let corpus = Self::build(parse_faq_document(&raw), embedder).await?;
        tracing::info!(
            event_name = "retrieval.corpus_loaded",
            path = %path.display(),
            entries = corpus.len(),
            embedder = embedder.name(),
            "FAQ corpus loaded"
        );
        Ok(corpus)
    }

    pub fn entries(&self) -> &[FaqEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalOutcome {
    pub result: RetrievalResult,
    pub degraded: Option<ApplicationError>,
}

pub struct KnowledgeRetriever {
    corpus: Arc<FaqCorpus>,
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    timeout: Duration,
}

impl KnowledgeRetriever {
    pub fn new(
        corpus: Arc<FaqCorpus>,
        embedder: Arc<dyn Embedder>,
        threshold: f32,
        timeout: Duration,
    ) -> Self {
        Self { corpus, embedder, threshold, timeout }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn corpus(&self) -> &FaqCorpus {
        &self.corpus
    }

    /// Never fails. An empty corpus or an embedding failure is reported as
    /// "no match"; the latter also sets `degraded`.
    pub async fn retrieve(&self, text: &str) -> RetrievalOutcome {
        if self.corpus.is_empty() {
            return RetrievalOutcome { result: RetrievalResult::no_match(), degraded: None };
        }

        let embedded = tokio::time::timeout(self.timeout, self.embedder.embed(text)).await;
        let query = match embedded {
            Ok(Ok(query)) => query,
            Ok(Err(error)) => return self.degraded(format!("{error:#}")),
            Err(_) => {
                return self.degraded(format!("no embedding within {} ms", self.timeout.as_millis()))
            }
        };

        RetrievalOutcome { result: best_match(&query, self.corpus.entries()), degraded: None }
    }

    fn degraded(&self, message: String) -> RetrievalOutcome {
        tracing::warn!(
            event_name = "retrieval.embedder_unavailable",
            embedder = self.embedder.name(),
            error = %message,
            "embedder unavailable; treating utterance as unmatched"
        );
        RetrievalOutcome {
            result: RetrievalResult::no_match(),
            degraded: Some(ApplicationError::unavailable(ExternalService::Embedder, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use medidesk_core::domain::faq::{FaqDocument, FaqEntry};
    use medidesk_core::errors::ApplicationError;

    use super::{best_match, cosine_similarity, Embedder, FaqCorpus, HashEmbedder, KnowledgeRetriever};

    fn entry(answer: &str, embedding: Vec<f32>) -> FaqEntry {
        FaqEntry { question: format!("q-{answer}"), answer: answer.to_string(), embedding }
    }

    struct Broken;

    #[async_trait]
    impl Embedder for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(anyhow!("model not loaded"))
        }
    }

    #[test]
    fn cosine_handles_orthogonal_and_degenerate_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn ties_resolve_to_lower_index() {
        let entries = vec![
            entry("low", vec![0.0, 1.0]),
            entry("first", vec![1.0, 0.0]),
            entry("second", vec![1.0, 0.0]),
        ];

        let result = best_match(&[1.0, 0.0], &entries);

        assert_eq!(result.matched_index, Some(1));
        assert_eq!(result.matched_entry.map(|entry| entry.answer), Some("first".to_string()));
    }

    #[test]
    fn threshold_gates_the_answer() {
        let result = best_match(&[1.0, 0.0], &[entry("hours", vec![1.0, 0.0])]);

        assert_eq!(result.answer_above(0.75), Some("hours"));
        assert_eq!(result.answer_above(1.01), None);
    }

    #[tokio::test]
    async fn identical_queries_retrieve_identically() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let corpus = FaqCorpus::build(
            vec![
                FaqDocument {
                    question: "What are your opening hours?".to_string(),
                    answer: "9 to 5".to_string(),
                },
                FaqDocument {
                    question: "Where can I park?".to_string(),
                    answer: "Behind the clinic".to_string(),
                },
            ],
            embedder.as_ref(),
        )
        .await
        .expect("build corpus");
        let retriever = KnowledgeRetriever::new(
            Arc::new(corpus),
            embedder,
            0.75,
            Duration::from_millis(100),
        );

        let first = retriever.retrieve("what are your opening hours").await;
        let second = retriever.retrieve("what are your opening hours").await;

        assert_eq!(first, second);
        assert_eq!(first.result.matched_index, Some(0));
        assert!(first.result.similarity >= 0.75);
    }

    #[tokio::test]
    async fn empty_corpus_and_broken_embedder_yield_no_match() {
        let empty = KnowledgeRetriever::new(
            Arc::new(FaqCorpus::default()),
            Arc::new(Broken),
            0.75,
            Duration::from_millis(100),
        );
        let outcome = empty.retrieve("anything").await;
        assert!(outcome.result.matched_entry.is_none());
        assert!(outcome.degraded.is_none());

        let broken = KnowledgeRetriever::new(
            Arc::new(FaqCorpus::from_entries(vec![entry("a", vec![1.0, 0.0])])),
            Arc::new(Broken),
            0.75,
            Duration::from_millis(100),
        );
        let outcome = broken.retrieve("anything").await;
        assert!(outcome.result.matched_entry.is_none());
        assert!(matches!(outcome.degraded, Some(ApplicationError::ServiceUnavailable { .. })));
    }

    #[tokio::test]
    async fn missing_corpus_file_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = FaqCorpus::load(&dir.path().join("missing.txt"), &HashEmbedder::default())
            .await
            .expect_err("missing file must fail");

        assert!(matches!(error, ApplicationError::Fatal(_)));
    }

    #[tokio::test]
    async fn corpus_loads_from_question_answer_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("faq.txt");
        std::fs::write(&path, "Q: Do you take walk-ins?\nA: Only before noon.\n\nQ: Is there parking?\nA: Yes.\n")
            .expect("write faq");

        let corpus = FaqCorpus::load(&path, &HashEmbedder::default()).await.expect("load");

        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.entries()[0].answer, "Only before noon.");
        assert_eq!(corpus.entries()[1].embedding.len(), 384);
    }
}
