//! Byte-level synchronization over a noisy transport stream.
//!
//! A position is accepted as a sync point only when three packets starting
//! there parse as valid and chain under the consistent-sequence predicate.
//! The byte-by-byte scan plus the 3-packet cross-check is the defense
//! against arbitrary framing loss and spurious 0x47 bytes in garbage.

use tracing::debug;

use crate::packet::{TsPacket, TS_PACKET_SIZE};

/// Number of chained packets required to declare synchronization.
pub const SYNC_VALIDATION_DEPTH: usize = 3;

/// Forward search window, in bytes, for the chained candidates after a
/// candidate start position.
const SYNC_SEARCH_WINDOW: usize = TS_PACKET_SIZE * 10;

/// Synchronization state of the demuxer.
#[derive(Debug, Default)]
pub struct Synchronizer {
    synchronized: bool,
    sync_offset: usize,
}

impl Synchronizer {
    /// Create an unsynchronized state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a sync point is currently held.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Buffer offset of the current sync point.
    pub fn offset(&self) -> usize {
        self.sync_offset
    }

    /// Rebase the sync offset after the buffer head was trimmed.
    pub fn set_offset(&mut self, offset: usize) {
        self.sync_offset = offset;
    }

    /// Drop synchronization. Acquisition re-runs on the next feed.
    pub fn lose(&mut self) {
        if self.synchronized {
            debug!("synchronization lost");
        }
        self.synchronized = false;
        self.sync_offset = 0;
    }

    /// Try to acquire a sync point over the buffered bytes.
    ///
    /// Returns `true` and records the offset when a position with
    /// [`SYNC_VALIDATION_DEPTH`] chained valid packets is found.
    pub fn acquire(&mut self, buffer: &[u8]) -> bool {
        match find_sync_point(buffer) {
            Some(offset) => {
                debug!(offset, "synchronization acquired");
                self.synchronized = true;
                self.sync_offset = offset;
                true
            }
            None => false,
        }
    }
}

/// Scan for a position where three packets chain under
/// [`belongs_to_same_iteration`].
///
/// Requires at least `3 * 188` buffered bytes. After each accepted
/// candidate the search jumps exactly 188 bytes ahead; when a jump does not
/// land on a valid chaining packet, the scan falls back to single-byte
/// advances, bounded by a ten-packet window from the start position.
pub fn find_sync_point(buffer: &[u8]) -> Option<usize> {
    let min_needed = TS_PACKET_SIZE * SYNC_VALIDATION_DEPTH;
    if buffer.len() < min_needed {
        return None;
    }

    for start in 0..=(buffer.len() - min_needed) {
        if buffer[start] != crate::packet::SYNC_BYTE {
            continue;
        }

        let first = match TsPacket::parse(&buffer[start..]) {
            Ok(packet) => packet,
            Err(_) => continue,
        };

        let mut candidates = vec![first];
        let mut search_pos = start + 1;
        let max_search = (start + SYNC_SEARCH_WINDOW).min(buffer.len());

        while candidates.len() < SYNC_VALIDATION_DEPTH
            && search_pos + TS_PACKET_SIZE <= max_search
        {
            if buffer[search_pos] == crate::packet::SYNC_BYTE {
                if let Ok(candidate) = TsPacket::parse(&buffer[search_pos..]) {
                    let chains = candidates
                        .last()
                        .map_or(true, |prev| belongs_to_same_iteration(prev, &candidate));
                    if chains {
                        candidates.push(candidate);
                        // Assume the next packet is exactly 188 bytes ahead.
                        search_pos += TS_PACKET_SIZE;
                        continue;
                    }
                }
            }
            // Adaptive fallback: advance one byte.
            search_pos += 1;
        }

        if candidates.len() >= SYNC_VALIDATION_DEPTH
            && candidates
                .windows(2)
                .all(|pair| belongs_to_same_iteration(&pair[0], &pair[1]))
        {
            return Some(start);
        }
    }

    None
}

/// Consistent-sequence predicate between two adjacent packet candidates.
///
/// `p2` must either continue `p1`'s continuity counter modulo 16 or carry
/// an adaptation-field discontinuity indicator. When `p1` carries payload,
/// the PIDs must match. The continuity relaxation for payload-less packets
/// is intentional and must not be tightened.
pub fn belongs_to_same_iteration(p1: &TsPacket, p2: &TsPacket) -> bool {
    let expected_cc = (p1.continuity_counter() + 1) % 16;

    if p2.continuity_counter() != expected_cc {
        let discontinuity = p2
            .adaptation_field()
            .ok()
            .flatten()
            .map(|af| af.discontinuity)
            .unwrap_or(false);
        if !discontinuity {
            return false;
        }
    }

    if p1.has_payload() && p1.pid() != p2.pid() {
        return false;
    }

    true
}
