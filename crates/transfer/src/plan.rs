use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Splits a file of `total_size` bytes into fixed-size chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes; the last one ends
/// at `total_size`. An empty file has zero chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
}

impl ChunkPlan {
    /// Builds a plan, rejecting a zero chunk size and plans whose chunk
    /// count does not fit in `u32`.
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        let chunk_count = chunk_count(total_size, chunk_size)?;
        Ok(Self {
            total_size,
            chunk_size,
            chunk_count,
        })
    }

    /// Byte range `[start, end)` of chunk `index`.
    pub fn range(&self, index: u32) -> Result<Range<u64>, TransferError> {
        if index >= self.chunk_count {
            return Err(TransferError::ChunkOutOfRange {
                index,
                chunk_count: self.chunk_count,
            });
        }
        let start = u64::from(index) * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.total_size);
        Ok(start..end)
    }

    /// Returns `true` if `self` is the plan `new` would compute for its sizes.
    pub fn is_consistent(&self) -> bool {
        chunk_count(self.total_size, self.chunk_size).is_ok_and(|n| n == self.chunk_count)
    }
}

/// `ceil(total_size / chunk_size)`.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }
    u32::try_from(total_size.div_ceil(chunk_size)).map_err(|_| TransferError::TooManyChunks {
        total_size,
        chunk_size,
    })
}
