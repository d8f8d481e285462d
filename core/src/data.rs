//! Fixed-length batching of token sequences.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{DcnnError, DcnnResult};

/// Which end of a sequence is padded or truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingSide {
    /// Front of the sequence.
    #[default]
    Pre,
    /// End of the sequence.
    Post,
}

/// Pad or truncate every sequence to exactly `max_len` tokens.
///
/// `padding` chooses where `pad_id` is inserted on short sequences;
/// `truncating` chooses which end is dropped from long ones (`Pre` keeps
/// the tail).
pub fn pad_sequences(
    sequences: &[Vec<usize>],
    max_len: usize,
    pad_id: usize,
    padding: PaddingSide,
    truncating: PaddingSide,
) -> DcnnResult<Array2<usize>> {
    if sequences.is_empty() {
        return Err(DcnnError::EmptyBatch);
    }
    if max_len == 0 {
        return Err(DcnnError::InvalidConfig("max_len must be >= 1".into()));
    }
    let mut out = Array2::from_elem((sequences.len(), max_len), pad_id);
    for (mut row, seq) in out.rows_mut().into_iter().zip(sequences) {
        let kept: &[usize] = if seq.len() > max_len {
            match truncating {
                PaddingSide::Pre => &seq[seq.len() - max_len..],
                PaddingSide::Post => &seq[..max_len],
            }
        } else {
            seq
        };
        let start = match padding {
            PaddingSide::Pre => max_len - kept.len(),
            PaddingSide::Post => 0,
        };
        for (offset, &token) in kept.iter().enumerate() {
            row[start + offset] = token;
        }
    }
    Ok(out)
}
