//! Token embedding lookup: `(B, L)` token ids → `(B, L, dim)`.
//!
//! Sits in front of the pipeline rather than inside it, since its input is
//! integer ids instead of a `SequenceTensor`.

use ndarray::{Array2, Array3, Axis};
use rand::Rng;

use crate::error::{DcnnError, DcnnResult};
use crate::tensor::SequenceTensor;

/// Lookup table of shape `(vocab_size, dim)`.
pub struct Embedding {
    table: Array2<f32>,
}

impl Embedding {
    /// Uniform `[-0.05, 0.05]` initialization.
    pub fn new<R: Rng + ?Sized>(vocab_size: usize, dim: usize, rng: &mut R) -> DcnnResult<Self> {
        if vocab_size == 0 || dim == 0 {
            return Err(DcnnError::InvalidConfig(format!(
                "embedding needs vocab_size and dim >= 1 (got {vocab_size}, {dim})"
            )));
        }
        let table = Array2::from_shape_simple_fn((vocab_size, dim), || rng.random_range(-0.05..=0.05));
        Ok(Self { table })
    }

    pub fn from_weights(table: Array2<f32>) -> DcnnResult<Self> {
        if table.nrows() == 0 || table.ncols() == 0 {
            return Err(DcnnError::InvalidConfig("embedding table has an empty axis".into()));
        }
        Ok(Self { table })
    }

    pub fn vocab_size(&self) -> usize { self.table.nrows() }
    pub fn dim(&self) -> usize { self.table.ncols() }
    pub fn weights(&self) -> &Array2<f32> { &self.table }

    fn check_tokens(&self, tokens: &Array2<usize>) -> DcnnResult<()> {
        if tokens.nrows() == 0 {
            return Err(DcnnError::EmptyBatch);
        }
        let vocab_size = self.vocab_size();
        match tokens.iter().find(|&&t| t >= vocab_size) {
            Some(&token) => Err(DcnnError::TokenOutOfRange { token, vocab_size }),
            None => Ok(()),
        }
    }

    pub fn forward(&self, tokens: &Array2<usize>) -> DcnnResult<SequenceTensor> {
        self.check_tokens(tokens)?;
        let (batch, len) = tokens.dim();
        let dim = self.dim();
        let out = Array3::from_shape_fn((batch, len, dim), |(b, t, d)| {
            self.table[[tokens[[b, t]], d]]
        });
        Ok(SequenceTensor::from_array(out))
    }

    /// SGD on the rows that were looked up; repeated tokens accumulate.
    pub fn backward(
        &mut self,
        tokens: &Array2<usize>,
        output_grad: &SequenceTensor,
        learning_rate: f32,
    ) -> DcnnResult<()> {
        self.check_tokens(tokens)?;
        let (batch, len) = tokens.dim();
        if output_grad.dim() != (batch, len, self.dim()) {
            return Err(DcnnError::DimensionMismatch {
                expected: batch * len * self.dim(),
                actual: output_grad.len(),
            });
        }
        let grad = output_grad.view();
        for ((b, t), &token) in tokens.indexed_iter() {
            let row_grad = grad.index_axis(Axis(0), b).index_axis(Axis(0), t).to_owned();
            self.table
                .row_mut(token)
                .scaled_add(-learning_rate, &row_grad);
        }
        Ok(())
    }
}
