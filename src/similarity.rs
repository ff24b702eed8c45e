use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_bert::pipelines::sentence_embeddings::{
    SentenceEmbeddingsBuilder, SentenceEmbeddingsModel, SentenceEmbeddingsModelType,
};
use simsimd::SpatialSimilarity;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use crate::pipeline::SimilarityScorer;
use crate::utils::{log_ml_error, log_ml_loading, log_ml_model_loaded, log_ml_ready};

/// Result of a similarity request. `NoScore` means the scorer itself
/// failed; it is distinct from a legitimate score of 0.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimilarityOutcome {
    Score(f32),
    NoScore,
}

impl SimilarityOutcome {
    pub fn as_db(self) -> Option<f32> {
        match self {
            Self::Score(value) => Some(value),
            Self::NoScore => None,
        }
    }
}

enum SimilarityRequest {
    Score {
        text_a: String,
        text_b: String,
        response_tx: tokio::sync::oneshot::Sender<SimilarityOutcome>,
    },
}

/// Async handle to the embedding model, which lives on its own thread
/// because encoding is blocking and the model is not `Send`.
#[derive(Clone)]
pub struct SimilarityHandle {
    request_tx: mpsc::Sender<SimilarityRequest>,
}

impl SimilarityHandle {
    /// Spawns the worker and blocks until the model has loaded, so a
    /// missing or broken model aborts the run before any post is fetched.
    pub fn spawn(model_type: SentenceEmbeddingsModelType) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<SimilarityRequest>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        thread::spawn(move || run_similarity_worker(model_type, request_rx, ready_tx));

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { request_tx }),
            Ok(Err(e)) => Err(anyhow!("Similarity model failed to load: {e}")),
            Err(_) => Err(anyhow!("Similarity worker exited before the model loaded")),
        }
    }
}

fn run_similarity_worker(
    model_type: SentenceEmbeddingsModelType,
    request_rx: mpsc::Receiver<SimilarityRequest>,
    ready_tx: mpsc::Sender<std::result::Result<(), String>>,
) {
    log_ml_loading();
    let start = Instant::now();

    let model = match SentenceEmbeddingsBuilder::remote(model_type).create_model() {
        Ok(model) => model,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    log_ml_model_loaded(start.elapsed().as_secs_f32());
    let _ = ready_tx.send(Ok(()));
    log_ml_ready();

    for request in request_rx {
        let SimilarityRequest::Score {
            text_a,
            text_b,
            response_tx,
        } = request;
        let _ = response_tx.send(score_pair(&model, &text_a, &text_b));
    }
}

fn score_pair(model: &SentenceEmbeddingsModel, text_a: &str, text_b: &str) -> SimilarityOutcome {
    match model.encode(&[text_a, text_b]) {
        Ok(embeddings) if embeddings.len() == 2 => {
            SimilarityOutcome::Score(cosine_score(&embeddings[0], &embeddings[1]))
        }
        Ok(_) => {
            log_ml_error("Unexpected embedding count");
            SimilarityOutcome::NoScore
        }
        Err(e) => {
            log_ml_error(&format!("Encoding failed: {e}"));
            SimilarityOutcome::NoScore
        }
    }
}

/// Cosine similarity clamped to [0, 1] to absorb floating-point overshoot.
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    f32::cosine(a, b)
        .map(|distance| (1.0 - distance) as f32)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
}

pub fn is_empty_pair(text_a: &str, text_b: &str) -> bool {
    text_a.trim().is_empty() || text_b.trim().is_empty()
}

#[async_trait]
impl SimilarityScorer for SimilarityHandle {
    async fn score(&self, text_a: &str, text_b: &str) -> SimilarityOutcome {
        // An empty text has a well-defined similarity of zero; it never
        // reaches the model and never counts as a scorer failure.
        if is_empty_pair(text_a, text_b) {
            return SimilarityOutcome::Score(0.0);
        }

        let (response_tx, response_rx) = tokio::sync::oneshot::channel();

        let request = SimilarityRequest::Score {
            text_a: text_a.to_string(),
            text_b: text_b.to_string(),
            response_tx,
        };

        if self.request_tx.send(request).is_err() {
            log_ml_error("Worker channel closed");
            return SimilarityOutcome::NoScore;
        }

        response_rx.await.unwrap_or(SimilarityOutcome::NoScore)
    }
}
