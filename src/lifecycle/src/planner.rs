//! Batch deletion planning.
//!
//! Relational backends cap the number of bound parameters per statement, so
//! an id set is split into bounded chunks and each chunk becomes one delete.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("max_chunk_size must be positive, got 0")]
    ZeroChunkSize,
}

/// Splits id sets into chunks no larger than `max_chunk_size`.
#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    max_chunk_size: usize,
}

impl BatchPlanner {
    pub fn new(max_chunk_size: usize) -> Result<Self, PlanError> {
        if max_chunk_size == 0 {
            return Err(PlanError::ZeroChunkSize);
        }
        Ok(Self { max_chunk_size })
    }

    /// Partition `ids` into ordered chunks.
    ///
    /// Duplicates are dropped, keeping the first occurrence, so every id
    /// lands in exactly one chunk. Input order is preserved.
    pub fn plan<T>(&self, ids: impl IntoIterator<Item = T>) -> Vec<Vec<T>>
    where
        T: Copy + Eq + Hash,
    {
        let mut seen = HashSet::new();
        let mut chunks: Vec<Vec<T>> = Vec::new();

        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            match chunks.last_mut() {
                Some(chunk) if chunk.len() < self.max_chunk_size => chunk.push(id),
                _ => {
                    let mut chunk = Vec::with_capacity(self.max_chunk_size.min(1024));
                    chunk.push(id);
                    chunks.push(chunk);
                }
            }
        }

        chunks
    }
}

/// Partition `ids` into chunks of at most `max_chunk_size`.
pub fn plan_chunks<T>(ids: &[T], max_chunk_size: usize) -> Result<Vec<Vec<T>>, PlanError>
where
    T: Copy + Eq + Hash,
{
    Ok(BatchPlanner::new(max_chunk_size)?.plan(ids.iter().copied()))
}
