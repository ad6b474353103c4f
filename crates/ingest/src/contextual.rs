//! Contextual enrichment
//!
//! Prefixes each chunk with a short LLM-generated description of its place in
//! the whole document before embedding and sparse indexing. The document text
//! rides in a prompt-cached system block, so the first chunk of an ingest
//! pays cache creation and the rest pay cache reads. Locally the cache is
//! nothing but four token counters advanced on every call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use parley_config::ContextualConfig;
use parley_core::TokenUsage;

use crate::chunk::{count_tokens, ChunkDraft};
use crate::error::IngestError;

/// One situating context plus the tokens it cost
#[derive(Debug, Clone)]
pub struct Annotation {
    pub context: String,
    pub usage: TokenUsage,
}

/// Summarizer backend seam
#[async_trait]
pub trait ChunkAnnotator: Send + Sync {
    /// Situate one chunk within the whole document
    async fn situate(&self, document: &str, chunk: &str) -> Result<Annotation, IngestError>;

    /// Situate many chunks in one batch submission
    ///
    /// The default runs chunks sequentially; the HTTP backend overrides this
    /// with the real batch endpoint. A `None` slot means that chunk failed.
    async fn situate_batch(
        &self,
        document: &str,
        chunks: &[String],
    ) -> Result<Vec<Option<Annotation>>, IngestError> {
        let mut out = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            out.push(self.situate(document, chunk).await.ok());
        }
        Ok(out)
    }
}

/// A chunk flowing through enrichment
#[derive(Debug, Clone)]
pub struct AnnotatedChunk {
    pub index: usize,
    pub content: String,
    pub contextual_content: Option<String>,
    pub is_contextualized: bool,
}

impl AnnotatedChunk {
    pub fn from_draft(draft: &ChunkDraft) -> Self {
        Self {
            index: draft.index,
            content: draft.content.clone(),
            contextual_content: None,
            is_contextualized: false,
        }
    }
}

/// Outcome of one enrichment run
#[derive(Debug, Clone, Default)]
pub struct ContextualReport {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    /// Chunks skipped by caps or because they were already contextualized
    pub skipped: usize,
    pub usage: TokenUsage,
    pub cost_estimate_usd: f64,
    pub elapsed_seconds: f64,
}

struct DailyWindow {
    day: NaiveDate,
    used: u64,
}

/// Rate-limited enrichment orchestrator
pub struct Contextualizer {
    annotator: Arc<dyn ChunkAnnotator>,
    config: ContextualConfig,
    semaphore: Arc<Semaphore>,
    daily: Mutex<DailyWindow>,
}

impl Contextualizer {
    pub fn new(annotator: Arc<dyn ChunkAnnotator>, config: ContextualConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            annotator,
            config,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            daily: Mutex::new(DailyWindow {
                day: chrono::Utc::now().date_naive(),
                used: 0,
            }),
        }
    }

    /// Requests used today; the window rolls at UTC midnight
    pub fn daily_requests_used(&self) -> u64 {
        let mut window = self.daily.lock();
        let today = chrono::Utc::now().date_naive();
        if window.day != today {
            window.day = today;
            window.used = 0;
        }
        window.used
    }

    /// Reserve up to `wanted` requests against the daily cap
    fn reserve_requests(&self, wanted: usize) -> usize {
        let mut window = self.daily.lock();
        let today = chrono::Utc::now().date_naive();
        if window.day != today {
            window.day = today;
            window.used = 0;
        }
        let remaining = self.config.max_daily_requests.saturating_sub(window.used);
        let granted = (wanted as u64).min(remaining);
        window.used += granted;
        granted as usize
    }

    /// Enrich a document's chunks
    ///
    /// Chunks that already carry contextual content pass through untouched
    /// and cost nothing. Individual failures are non-fatal; the chunk
    /// continues raw and is counted as failed.
    pub async fn process(
        &self,
        document: &str,
        mut chunks: Vec<AnnotatedChunk>,
    ) -> (Vec<AnnotatedChunk>, ContextualReport) {
        let started = Instant::now();
        let mut report = ContextualReport {
            total: chunks.len(),
            ..ContextualReport::default()
        };

        if !self.config.enabled || chunks.is_empty() {
            report.skipped = chunks.len();
            return (chunks, report);
        }

        let doc_tokens = count_tokens(document) as u64;
        if doc_tokens > self.config.max_tokens_per_document {
            tracing::warn!(
                doc_tokens,
                cap = self.config.max_tokens_per_document,
                "document exceeds contextualization token cap; storing raw chunks"
            );
            report.skipped = chunks.len();
            return (chunks, report);
        }

        // Already-contextualized chunks are settled; never re-billed.
        let pending: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contextual_content.is_none())
            .map(|(i, _)| i)
            .collect();
        report.skipped += chunks.len() - pending.len();

        let granted = self.reserve_requests(pending.len());
        if granted < pending.len() {
            tracing::warn!(
                wanted = pending.len(),
                granted,
                "daily contextualization cap reached; remaining chunks stay raw"
            );
        }
        let to_process = &pending[..granted];
        report.skipped += pending.len() - granted;

        if to_process.is_empty() {
            report.elapsed_seconds = started.elapsed().as_secs_f64();
            return (chunks, report);
        }

        let use_batch =
            self.config.use_batch_api && to_process.len() >= self.config.batch_threshold;
        let annotations = if use_batch {
            self.run_batch(document, &chunks, to_process).await
        } else {
            self.run_streaming(document, &chunks, to_process).await
        };

        for (slot, annotation) in to_process.iter().zip(annotations) {
            match annotation {
                Some(annotation) => {
                    let chunk = &mut chunks[*slot];
                    chunk.contextual_content = Some(format!(
                        "{}\n{}",
                        annotation.context.trim(),
                        chunk.content
                    ));
                    chunk.is_contextualized = true;
                    report.usage.add(&annotation.usage);
                    report.processed += 1;
                }
                None => report.failed += 1,
            }
        }

        report.cost_estimate_usd = self.estimate_cost(&report.usage);
        report.elapsed_seconds = started.elapsed().as_secs_f64();

        tracing::info!(
            total = report.total,
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            tokens = report.usage.total(),
            "contextualization finished"
        );

        (chunks, report)
    }

    /// Per-chunk streaming under the concurrency semaphore
    async fn run_streaming(
        &self,
        document: &str,
        chunks: &[AnnotatedChunk],
        slots: &[usize],
    ) -> Vec<Option<Annotation>> {
        let futures = slots.iter().map(|&slot| {
            let annotator = self.annotator.clone();
            let semaphore = self.semaphore.clone();
            let timeout = Duration::from_secs(self.config.request_timeout_seconds);
            let content = chunks[slot].content.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                match tokio::time::timeout(timeout, annotator.situate(document, &content)).await {
                    Ok(Ok(annotation)) => Some(annotation),
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "chunk contextualization failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!("chunk contextualization timed out");
                        None
                    }
                }
            }
        });

        futures::future::join_all(futures).await
    }

    /// One batch submission for the whole document
    async fn run_batch(
        &self,
        document: &str,
        chunks: &[AnnotatedChunk],
        slots: &[usize],
    ) -> Vec<Option<Annotation>> {
        let contents: Vec<String> = slots
            .iter()
            .map(|&slot| chunks[slot].content.clone())
            .collect();

        match self.annotator.situate_batch(document, &contents).await {
            Ok(annotations) if annotations.len() == contents.len() => annotations,
            Ok(annotations) => {
                tracing::warn!(
                    expected = contents.len(),
                    got = annotations.len(),
                    "batch returned wrong annotation count; treating all as failed"
                );
                vec![None; contents.len()]
            }
            Err(err) => {
                tracing::warn!(error = %err, "batch contextualization failed");
                vec![None; contents.len()]
            }
        }
    }

    fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        let per_mtok = |tokens: u64, rate: f64| tokens as f64 * rate / 1_000_000.0;
        per_mtok(usage.input, self.config.input_cost_per_mtok)
            + per_mtok(usage.output, self.config.output_cost_per_mtok)
            + per_mtok(usage.cache_creation, self.config.cache_write_cost_per_mtok)
            + per_mtok(usage.cache_read, self.config.cache_read_cost_per_mtok)
    }
}

const SYSTEM_PREAMBLE: &str = "You are an AI assistant that helps create contextual information \
                               for document chunks to improve search retrieval.";

fn situating_prompt(chunk: &str) -> String {
    format!(
        "Here is the chunk we want to situate within the whole document:\n\n\
         <chunk>\n{chunk}\n</chunk>\n\n\
         Please give a short succinct context to situate this chunk within the overall document \
         for the purposes of improving search retrieval of the chunk. \
         Answer only with the succinct context and nothing else."
    )
}

/// Client for an Anthropic-style messages API with prompt caching
pub struct AnthropicAnnotator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    batch_poll: Duration,
    batch_timeout: Duration,
}

impl AnthropicAnnotator {
    pub fn new(config: &ContextualConfig) -> Result<Self, IngestError> {
        use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(config.api_key.trim())
                .map_err(|_| IngestError::Annotation("invalid API key".to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(30)))
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::Annotation(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            batch_poll: Duration::from_secs(config.batch_poll_seconds),
            batch_timeout: Duration::from_secs(config.batch_timeout_seconds),
        })
    }

    /// Message params shared by the single and batch endpoints
    fn message_params(&self, document: &str, chunk: &str) -> MessageParams {
        MessageParams {
            model: self.model.clone(),
            max_tokens: 1024,
            temperature: 0.0,
            system: vec![
                SystemBlock {
                    kind: "text",
                    text: SYSTEM_PREAMBLE.to_string(),
                    cache_control: None,
                },
                SystemBlock {
                    kind: "text",
                    text: format!("<document>\n{document}\n</document>"),
                    cache_control: Some(CacheControl { kind: "ephemeral" }),
                },
            ],
            messages: vec![UserMessage {
                role: "user",
                content: situating_prompt(chunk),
            }],
        }
    }
}

#[async_trait]
impl ChunkAnnotator for AnthropicAnnotator {
    async fn situate(&self, document: &str, chunk: &str) -> Result<Annotation, IngestError> {
        let params = self.message_params(document, chunk);
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(&params)
            .send()
            .await
            .map_err(|e| IngestError::Annotation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(IngestError::Annotation(format!(
                "summarizer returned {status}: {body}"
            )));
        }

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Annotation(e.to_string()))?;

        message_to_annotation(message)
    }

    async fn situate_batch(
        &self,
        document: &str,
        chunks: &[String],
    ) -> Result<Vec<Option<Annotation>>, IngestError> {
        let requests: Vec<BatchRequest> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| BatchRequest {
                custom_id: format!("chunk_{i}"),
                params: self.message_params(document, chunk),
            })
            .collect();

        let submitted: BatchHandle = self
            .client
            .post(format!("{}/v1/messages/batches", self.base_url))
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| IngestError::Annotation(e.to_string()))?
            .json()
            .await
            .map_err(|e| IngestError::Annotation(e.to_string()))?;

        let deadline = Instant::now() + self.batch_timeout;
        loop {
            let handle: BatchHandle = self
                .client
                .get(format!(
                    "{}/v1/messages/batches/{}",
                    self.base_url, submitted.id
                ))
                .send()
                .await
                .map_err(|e| IngestError::Annotation(e.to_string()))?
                .json()
                .await
                .map_err(|e| IngestError::Annotation(e.to_string()))?;

            match handle.processing_status.as_str() {
                "ended" => break,
                "failed" | "expired" | "canceled" => {
                    return Err(IngestError::Annotation(format!(
                        "batch {}: {}",
                        submitted.id, handle.processing_status
                    )));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(IngestError::Annotation(format!(
                    "batch {} did not finish within the timeout",
                    submitted.id
                )));
            }
            tokio::time::sleep(self.batch_poll).await;
        }

        let body = self
            .client
            .get(format!(
                "{}/v1/messages/batches/{}/results",
                self.base_url, submitted.id
            ))
            .send()
            .await
            .map_err(|e| IngestError::Annotation(e.to_string()))?
            .text()
            .await
            .map_err(|e| IngestError::Annotation(e.to_string()))?;

        // Results arrive as JSONL keyed by custom id, in no guaranteed order.
        let mut by_index: Vec<Option<Annotation>> = vec![None; chunks.len()];
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(result) = serde_json::from_str::<BatchResultLine>(line) else {
                continue;
            };
            let Some(index) = result
                .custom_id
                .strip_prefix("chunk_")
                .and_then(|s| s.parse::<usize>().ok())
            else {
                continue;
            };
            if index >= by_index.len() || result.result.kind != "succeeded" {
                continue;
            }
            if let Some(message) = result.result.message {
                by_index[index] = message_to_annotation(message).ok();
            }
        }

        Ok(by_index)
    }
}

fn message_to_annotation(message: MessageResponse) -> Result<Annotation, IngestError> {
    let context = message
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    if context.is_empty() {
        return Err(IngestError::Annotation(
            "summarizer returned empty context".to_string(),
        ));
    }

    Ok(Annotation {
        context,
        usage: TokenUsage {
            input: message.usage.input_tokens,
            output: message.usage.output_tokens,
            cache_creation: message.usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read: message.usage.cache_read_input_tokens.unwrap_or(0),
        },
    })
}

#[derive(Serialize)]
struct MessageParams {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: Vec<SystemBlock>,
    messages: Vec<UserMessage>,
}

#[derive(Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct UserMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct BatchRequest {
    custom_id: String,
    params: MessageParams,
}

#[derive(Debug, Deserialize)]
struct BatchHandle {
    id: String,
    processing_status: String,
}

#[derive(Debug, Deserialize)]
struct BatchResultLine {
    custom_id: String,
    result: BatchResult,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(rename = "type")]
    kind: String,
    message: Option<MessageResponse>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: UsageResponse,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeAnnotator {
        calls: AtomicU64,
        fail_on: Option<usize>,
    }

    impl FakeAnnotator {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail_on: None,
            }
        }

        fn failing_on(index: usize) -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail_on: Some(index),
            }
        }
    }

    #[async_trait]
    impl ChunkAnnotator for FakeAnnotator {
        async fn situate(&self, _document: &str, chunk: &str) -> Result<Annotation, IngestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_on) = self.fail_on {
                if chunk.contains(&format!("chunk {fail_on}")) {
                    return Err(IngestError::Annotation("synthetic failure".to_string()));
                }
            }
            Ok(Annotation {
                context: format!("context for call {call}"),
                usage: TokenUsage {
                    input: 10,
                    output: 5,
                    cache_creation: if call == 0 { 1_000 } else { 0 },
                    cache_read: if call == 0 { 0 } else { 1_000 },
                },
            })
        }
    }

    fn config(enabled: bool) -> ContextualConfig {
        ContextualConfig {
            enabled,
            ..ContextualConfig::default()
        }
    }

    fn drafts(n: usize) -> Vec<AnnotatedChunk> {
        (0..n)
            .map(|i| AnnotatedChunk {
                index: i,
                content: format!("text of chunk {i}"),
                contextual_content: None,
                is_contextualized: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_disabled_passes_chunks_through() {
        let contextualizer = Contextualizer::new(Arc::new(FakeAnnotator::new()), config(false));
        let (chunks, report) = contextualizer.process("doc", drafts(3)).await;

        assert!(chunks.iter().all(|c| !c.is_contextualized));
        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.usage.total(), 0);
    }

    #[tokio::test]
    async fn test_enrichment_prefixes_context() {
        let contextualizer = Contextualizer::new(Arc::new(FakeAnnotator::new()), config(true));
        let (chunks, report) = contextualizer.process("doc", drafts(2)).await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);
        for chunk in &chunks {
            assert!(chunk.is_contextualized);
            let contextual = chunk.contextual_content.as_ref().unwrap();
            assert!(contextual.contains("context for call"));
            assert!(contextual.ends_with(&chunk.content));
        }
    }

    #[tokio::test]
    async fn test_individual_failure_is_non_fatal() {
        let contextualizer =
            Contextualizer::new(Arc::new(FakeAnnotator::failing_on(1)), config(true));
        let (chunks, report) = contextualizer.process("doc", drafts(3)).await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert!(!chunks[1].is_contextualized);
        assert!(chunks[1].contextual_content.is_none());
        assert!(chunks[0].is_contextualized);
        assert!(chunks[2].is_contextualized);
    }

    #[tokio::test]
    async fn test_daily_cap_leaves_excess_raw() {
        let mut cfg = config(true);
        cfg.max_daily_requests = 2;
        let contextualizer = Contextualizer::new(Arc::new(FakeAnnotator::new()), cfg);

        let (chunks, report) = contextualizer.process("doc", drafts(5)).await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 3);
        assert_eq!(chunks.iter().filter(|c| c.is_contextualized).count(), 2);
    }

    #[tokio::test]
    async fn test_document_over_token_cap_is_skipped() {
        let mut cfg = config(true);
        cfg.max_tokens_per_document = 3;
        let contextualizer = Contextualizer::new(Arc::new(FakeAnnotator::new()), cfg);

        let (chunks, report) = contextualizer
            .process("this document has far too many tokens", drafts(2))
            .await;

        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 2);
        assert!(chunks.iter().all(|c| !c.is_contextualized));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_and_free() {
        let annotator = Arc::new(FakeAnnotator::new());
        let contextualizer = Contextualizer::new(annotator.clone(), config(true));

        let (chunks, first) = contextualizer.process("doc", drafts(2)).await;
        assert_eq!(first.processed, 2);
        let before: Vec<Option<String>> =
            chunks.iter().map(|c| c.contextual_content.clone()).collect();

        let (rerun, second) = contextualizer.process("doc", chunks).await;
        let after: Vec<Option<String>> =
            rerun.iter().map(|c| c.contextual_content.clone()).collect();

        assert_eq!(before, after);
        assert_eq!(second.processed, 0);
        assert_eq!(second.usage.total(), 0);
        assert_eq!(annotator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_usage_counters_accumulate() {
        let contextualizer = Contextualizer::new(Arc::new(FakeAnnotator::new()), config(true));
        let (_, report) = contextualizer.process("doc", drafts(3)).await;

        assert_eq!(report.usage.input, 30);
        assert_eq!(report.usage.output, 15);
        assert_eq!(report.usage.cache_creation, 1_000);
        assert_eq!(report.usage.cache_read, 2_000);
        assert!(report.cost_estimate_usd > 0.0);
    }

    #[test]
    fn test_cost_estimate_math() {
        let contextualizer =
            Contextualizer::new(Arc::new(FakeAnnotator::new()), config(true));
        let usage = TokenUsage {
            input: 1_000_000,
            output: 0,
            cache_creation: 0,
            cache_read: 0,
        };
        let cost = contextualizer.estimate_cost(&usage);
        assert!((cost - ContextualConfig::default().input_cost_per_mtok).abs() < 1e-9);
    }

    #[test]
    fn test_prompt_mentions_chunk() {
        let prompt = situating_prompt("the payload");
        assert!(prompt.contains("<chunk>\nthe payload\n</chunk>"));
    }
}
