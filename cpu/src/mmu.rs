//! Logical-to-physical span resolution.
//!
//! A logical access can straddle page boundaries, so the span is split at
//! every boundary and each piece is translated on its own. The resulting
//! physical chunks are what memory reads/writes and device transfers
//! operate on.

use simnix_shared::error::SimError;
use simnix_shared::pcb::{PhysChunk, Pid};

use crate::bus::MemoryBus;

/// Split `[address, address + len)` at page boundaries into logical
/// `(address, len)` pieces.
pub fn split_span(page_size: u32, address: u32, len: u32) -> Vec<(u32, u32)> {
    let mut pieces = Vec::new();
    let mut cursor = address;
    let mut remaining = len;
    while remaining > 0 {
        let page_end = (cursor / page_size + 1) * page_size;
        let take = remaining.min(page_end - cursor);
        pieces.push((cursor, take));
        cursor += take;
        remaining -= take;
    }
    pieces
}

/// Resolve a logical span to physical chunks. Any piece outside the page
/// table fails the whole access with `SegmentationFault`.
pub async fn resolve_span<B: MemoryBus>(
    bus: &B,
    page_size: u32,
    pid: Pid,
    address: u32,
    len: u32,
) -> Result<Vec<PhysChunk>, SimError> {
    let mut chunks = Vec::new();
    for (logical, piece_len) in split_span(page_size, address, len) {
        let physical = bus.translate(pid, logical).await?;
        chunks.push(PhysChunk {
            address: physical,
            len: piece_len,
        });
    }
    Ok(chunks)
}
