//! Routing decision and chunk planning

use crate::error::{TransferError, TransferResult};

use super::types::{ChunkPart, ChunkPlan, TransferRoute};

/// Payloads up to and including `threshold` go single-shot.
pub fn decide(payload_size: u64, threshold: u64) -> TransferRoute {
    if payload_size <= threshold {
        TransferRoute::SingleShot
    } else {
        TransferRoute::Multipart
    }
}

/// Split `payload_size` bytes into `ceil(payload_size / chunk_size)` parts.
/// An empty payload yields an empty plan.
pub fn plan(payload_size: u64, chunk_size: u64) -> TransferResult<ChunkPlan> {
    if chunk_size == 0 {
        return Err(TransferError::invalid("chunk size must be positive"));
    }

    let part_count = payload_size.div_ceil(chunk_size);
    if part_count > u32::MAX as u64 {
        return Err(TransferError::invalid(format!(
            "{} bytes in {} byte chunks exceeds the part number range",
            payload_size, chunk_size
        )));
    }

    let parts = (0..part_count)
        .map(|index| {
            let offset = index * chunk_size;
            ChunkPart {
                part_number: index as u32 + 1,
                offset,
                length: std::cmp::min(chunk_size, payload_size - offset),
            }
        })
        .collect();

    Ok(ChunkPlan {
        total_size: payload_size,
        chunk_size,
        parts,
    })
}
