//! End-to-end sentiment classifier: embedding → DCNN encoder → dense → sigmoid.
//!
//! Provides the inference path plus a single SGD step; epoch scheduling and
//! checkpoint policies belong to the caller.

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::DcnnConfig;
use crate::encoder::FeatureMapEncoder;
use crate::error::{DcnnError, DcnnResult};
use crate::layers::{Dense, Embedding, Layer};
use crate::math;
use crate::tensor::SequenceTensor;

/// Decision threshold on `P(positive)`.
pub const POSITIVE_THRESHOLD: f32 = 0.5;

pub struct SentimentClassifier {
    config: DcnnConfig,
    embedding: Embedding,
    encoder: FeatureMapEncoder,
    head: Dense,
}

impl SentimentClassifier {
    /// Build every component from `config`, seeding initialization with
    /// `config.seed`.
    pub fn new(config: DcnnConfig) -> DcnnResult<Self> {
        config.validate()?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        let embedding = Embedding::new(config.vocab_size, config.embedding_dim, &mut rng)?;
        let encoder = FeatureMapEncoder::from_config(&config, &mut rng)?;
        let head = Dense::new(encoder.output_dim(), 1, &mut rng)?;
        debug!(
            "classifier: vocab {}, embedding {}, fused {}, {} encoder parameters",
            config.vocab_size,
            config.embedding_dim,
            encoder.output_dim(),
            encoder.parameter_count()
        );
        Ok(Self { config, embedding, encoder, head })
    }

    pub fn config(&self) -> &DcnnConfig { &self.config }
    pub fn embedding(&self) -> &Embedding { &self.embedding }
    pub fn encoder(&self) -> &FeatureMapEncoder { &self.encoder }
    pub fn encoder_mut(&mut self) -> &mut FeatureMapEncoder { &mut self.encoder }
    pub fn head(&self) -> &Dense { &self.head }

    fn embed(&self, tokens: &Array2<usize>) -> DcnnResult<SequenceTensor> {
        if tokens.ncols() != self.config.max_len {
            return Err(DcnnError::InvalidInputLength {
                expected: self.config.max_len,
                actual: tokens.ncols(),
            });
        }
        self.embedding.forward(tokens)
    }

    /// Fused representation `(batch, fused_dim)`.
    pub fn encode(&self, tokens: &Array2<usize>) -> DcnnResult<Array2<f32>> {
        let embedded = self.embed(tokens)?;
        self.encoder.forward(&embedded)
    }

    /// `P(label = positive)` per sentence.
    pub fn predict_proba(&self, tokens: &Array2<usize>) -> DcnnResult<Array1<f32>> {
        let fused = SequenceTensor::from_matrix(self.encode(tokens)?);
        let logits = self.head.forward(&fused)?;
        logits_to_probs(&logits)
    }

    pub fn predict(&self, tokens: &Array2<usize>) -> DcnnResult<Vec<bool>> {
        Ok(self
            .predict_proba(tokens)?
            .iter()
            .map(|&p| p >= POSITIVE_THRESHOLD)
            .collect())
    }

    /// Fraction of sentences whose thresholded prediction matches `labels`
    /// (labels are 0.0 / 1.0).
    pub fn accuracy(&self, tokens: &Array2<usize>, labels: ArrayView1<'_, f32>) -> DcnnResult<f32> {
        let predictions = self.predict(tokens)?;
        if predictions.len() != labels.len() {
            return Err(DcnnError::DimensionMismatch {
                expected: predictions.len(),
                actual: labels.len(),
            });
        }
        let correct = predictions
            .iter()
            .zip(labels.iter())
            .filter(|&(&pred, &label)| pred == (label >= POSITIVE_THRESHOLD))
            .count();
        Ok(correct as f32 / predictions.len() as f32)
    }

    /// One SGD step on binary cross-entropy; returns the loss before the update.
    pub fn train_step(&mut self, tokens: &Array2<usize>, labels: ArrayView1<'_, f32>) -> DcnnResult<f32> {
        let lr = self.config.learning_rate;
        let embedded = self.embed(tokens)?;
        let trace = self.encoder.forward_traced(&embedded)?;
        let fused = SequenceTensor::from_matrix(trace.fused.clone());
        let logits = self.head.forward(&fused)?;
        let probs = logits_to_probs(&logits)?;

        let loss = math::binary_cross_entropy(probs.view(), labels)?;
        let logit_grad = math::binary_cross_entropy_logit_grad(probs.view(), labels)?;
        let logit_grad = SequenceTensor::from_matrix(logit_grad.insert_axis(Axis(1)));

        let fused_grad = self.head.backward(&fused, &logits, &logit_grad, lr)?;
        let embedded_grad = self
            .encoder
            .backward(&embedded, &trace, &fused_grad.to_matrix()?, lr)?;
        if self.config.train_embedding {
            self.embedding.backward(tokens, &embedded_grad, lr)?;
        }
        trace!("train step: batch {}, loss {loss:.5}", tokens.nrows());
        Ok(loss)
    }
}

/// `(B, 1, 1)` logits → `(B)` probabilities.
fn logits_to_probs(logits: &SequenceTensor) -> DcnnResult<Array1<f32>> {
    Ok(logits.to_matrix()?.column(0).mapv(math::sigmoid))
}
