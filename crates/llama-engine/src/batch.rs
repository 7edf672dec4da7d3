//! Positional batches submitted to [`Context::decode`](crate::Context::decode).
//!
//! A [`Batch`] is an ordered list of `(token, position, sequence id, logits
//! flag)` entries with a capacity fixed at construction. Batches come from a
//! [`BatchBuilder`], which counts how many are alive; a batch gives its slot
//! back when dropped, so release happens exactly once on every exit path.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{LlamaError, Pos, Result, SeqId, TokenId};

/// One slot of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: TokenId,
    pub pos: Pos,
    /// Number of sequence ids attached to this slot (always 1 here).
    pub n_seq_id: usize,
    pub seq_id: SeqId,
    /// Whether the forward pass must produce logits for this slot.
    pub logits: bool,
}

/// A fixed-capacity positional batch.
pub struct Batch {
    entries: Vec<BatchEntry>,
    capacity: usize,
    n_seq_max: usize,
    live: Arc<AtomicUsize>,
}

impl Batch {
    /// Entries in submission order.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slots allocated at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence ids each slot can carry.
    pub fn n_seq_max(&self) -> usize {
        self.n_seq_max
    }

    /// Index of the last entry that requested logits.
    pub fn last_logits_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.logits)
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("n_seq_max", &self.n_seq_max)
            .finish()
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Builds batches and tracks how many are still alive.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    n_seq_max: usize,
    live: Arc<AtomicUsize>,
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchBuilder {
    /// Builder for single-sequence batches.
    pub fn new() -> Self {
        Self {
            n_seq_max: 1,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build a batch covering `tokens` at positions `start..start + len`.
    ///
    /// Every slot gets `seq_id` and `logits = false`; with
    /// `only_last_logits` the final slot requests logits.
    ///
    /// # Errors
    /// - `BatchAllocation`: empty `tokens`, or the allocation failed
    /// - `InvalidToken`: a token id is negative (the partial batch is released)
    pub fn build(
        &self,
        tokens: &[TokenId],
        start: Pos,
        seq_id: SeqId,
        only_last_logits: bool,
    ) -> Result<Batch> {
        if tokens.is_empty() {
            return Err(LlamaError::BatchAllocation("zero-sized batch".into()));
        }

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(tokens.len())
            .map_err(|e| LlamaError::BatchAllocation(e.to_string()))?;

        self.live.fetch_add(1, Ordering::AcqRel);
        let mut batch = Batch {
            entries,
            capacity: tokens.len(),
            n_seq_max: self.n_seq_max,
            live: Arc::clone(&self.live),
        };

        for (i, &token) in tokens.iter().enumerate() {
            if token < 0 {
                return Err(LlamaError::InvalidToken(token));
            }
            let offset = Pos::try_from(i)
                .ok()
                .and_then(|i| start.checked_add(i))
                .ok_or_else(|| LlamaError::BatchAllocation("position overflow".into()))?;
            batch.entries.push(BatchEntry {
                token,
                pos: offset,
                n_seq_id: 1,
                seq_id,
                logits: false,
            });
        }

        if only_last_logits {
            if let Some(last) = batch.entries.last_mut() {
                last.logits = true;
            }
        }

        Ok(batch)
    }

    /// Build the one-token batch used for an incremental decode step.
    pub fn single(&self, token: TokenId, pos: Pos, seq_id: SeqId) -> Result<Batch> {
        self.build(&[token], pos, seq_id, true)
    }

    /// Number of batches built by this builder that are not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_batch_positions_and_flags() {
        let builder = BatchBuilder::new();
        let batch = builder.build(&[5, 6, 7], 0, 0, true).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.capacity(), 3);
        assert_eq!(batch.n_seq_max(), 1);
        for (i, entry) in batch.entries().iter().enumerate() {
            assert_eq!(entry.pos, i as Pos);
            assert_eq!(entry.seq_id, 0);
            assert_eq!(entry.n_seq_id, 1);
        }
        assert!(!batch.entries()[0].logits);
        assert!(!batch.entries()[1].logits);
        assert!(batch.entries()[2].logits);
        assert_eq!(batch.last_logits_index(), Some(2));
    }

    #[test]
    fn no_logits_requested_when_flag_off() {
        let builder = BatchBuilder::new();
        let batch = builder.build(&[1, 2], 10, 3, false).unwrap();
        assert_eq!(batch.last_logits_index(), None);
        assert_eq!(batch.entries()[1].pos, 11);
        assert_eq!(batch.entries()[1].seq_id, 3);
    }

    #[test]
    fn single_requests_logits() {
        let builder = BatchBuilder::new();
        let batch = builder.single(42, 17, 0).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.entries()[0].token, 42);
        assert_eq!(batch.entries()[0].pos, 17);
        assert!(batch.entries()[0].logits);
    }

    #[test]
    fn negative_token_rejected_and_released() {
        let builder = BatchBuilder::new();
        let err = builder.build(&[1, -4, 2], 0, 0, true).unwrap_err();
        assert!(matches!(err, LlamaError::InvalidToken(-4)));
        assert_eq!(builder.live(), 0);
    }

    #[test]
    fn empty_tokens_fail_allocation() {
        let builder = BatchBuilder::new();
        let err = builder.build(&[], 0, 0, true).unwrap_err();
        assert!(matches!(err, LlamaError::BatchAllocation(_)));
        assert_eq!(builder.live(), 0);
    }

    #[test]
    fn live_count_follows_drop() {
        let builder = BatchBuilder::new();
        let a = builder.single(1, 0, 0).unwrap();
        let b = builder.build(&[1, 2, 3], 0, 0, true).unwrap();
        assert_eq!(builder.live(), 2);
        drop(a);
        assert_eq!(builder.live(), 1);
        drop(b);
        assert_eq!(builder.live(), 0);
    }

    #[test]
    fn position_overflow_is_an_allocation_error() {
        let builder = BatchBuilder::new();
        let err = builder.build(&[1, 2], Pos::MAX, 0, true).unwrap_err();
        assert!(matches!(err, LlamaError::BatchAllocation(_)));
        assert_eq!(builder.live(), 0);
    }
}
