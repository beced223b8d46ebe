//! Iteration storage.
//!
//! An *iteration* groups the packets of one PID between payload unit
//! starts. Its payload bytes live in a per-iteration arena; segments
//! reference `(offset, length)` ranges inside that arena, tagged normal or
//! private, so growing the arena never invalidates a segment.
//!
//! Storage owns every finalized iteration across PIDs and issues iteration
//! IDs that are unique for the demuxer's lifetime.

use std::collections::{BTreeMap, BTreeSet};

/// Kind of payload bytes inside an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Elementary-stream bytes from the packet payload.
    Normal,
    /// Private bytes from the adaptation field.
    Private,
}

/// A segment of payload data inside an iteration's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSegment {
    /// Kind of payload.
    pub kind: PayloadType,
    /// Byte offset inside the iteration arena.
    pub offset: usize,
    /// Length in bytes.
    pub length: usize,
}

/// Data accumulated for one iteration of a PID.
#[derive(Debug, Clone, Default)]
pub struct IterationData {
    data: Vec<u8>,
    segments: Vec<PayloadSegment>,
    /// First continuity counter seen.
    pub first_cc: u8,
    /// Last continuity counter seen.
    pub last_cc: u8,
    /// Number of packets accumulated.
    pub packet_count: usize,
    /// Whether the iteration began on a payload unit start.
    pub payload_unit_start_seen: bool,
    /// Whether a flagged continuity discontinuity landed in this iteration.
    pub discontinuity_detected: bool,
}

impl IterationData {
    /// Create an empty iteration starting at a continuity counter.
    pub fn new(first_cc: u8, payload_unit_start_seen: bool) -> Self {
        Self {
            first_cc,
            last_cc: first_cc,
            payload_unit_start_seen,
            ..Self::default()
        }
    }

    /// Append payload bytes as a new segment.
    pub fn push_segment(&mut self, kind: PayloadType, bytes: &[u8]) {
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        self.segments.push(PayloadSegment {
            kind,
            offset,
            length: bytes.len(),
        });
    }

    /// Segments in arrival order.
    pub fn segments(&self) -> &[PayloadSegment] {
        &self.segments
    }

    /// Bytes of one segment.
    pub fn segment_bytes(&self, segment: &PayloadSegment) -> &[u8] {
        &self.data[segment.offset..segment.offset + segment.length]
    }

    /// Total bytes of a given payload kind.
    pub fn size_of(&self, kind: PayloadType) -> usize {
        self.segments
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.length)
            .sum()
    }

    /// Total payload bytes of both kinds.
    pub fn total_size(&self) -> usize {
        self.data.len()
    }
}

/// Summary of one finalized iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationInfo {
    /// Unique iteration ID.
    pub iteration_id: u32,
    /// Total normal payload bytes.
    pub payload_normal_size: usize,
    /// Total private payload bytes.
    pub payload_private_size: usize,
    /// Discontinuity flag.
    pub has_discontinuity: bool,
    /// First continuity counter.
    pub cc_start: u8,
    /// Last continuity counter.
    pub cc_end: u8,
    /// Number of packets.
    pub packet_count: usize,
}

/// Finalized iterations of one PID, in arrival order.
#[derive(Debug, Default)]
pub struct StreamIterations {
    iterations: Vec<(u32, IterationData)>,
    observed_cc: BTreeSet<u8>,
}

impl StreamIterations {
    /// Append a finalized iteration. Arrival order is preserved; iterations
    /// never reorder.
    pub fn add(&mut self, iteration_id: u32, data: IterationData) {
        self.observed_cc.insert(data.first_cc);
        self.observed_cc.insert(data.last_cc);
        self.iterations.push((iteration_id, data));
    }

    /// Look up an iteration by ID.
    pub fn get(&self, iteration_id: u32) -> Option<&IterationData> {
        self.iterations
            .iter()
            .find(|(id, _)| *id == iteration_id)
            .map(|(_, data)| data)
    }

    /// Remove an iteration by ID.
    pub fn remove(&mut self, iteration_id: u32) {
        self.iterations.retain(|(id, _)| *id != iteration_id);
    }

    /// Iterations with their IDs, in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &IterationData)> {
        self.iterations.iter().map(|(id, data)| (*id, data))
    }

    /// Number of finalized iterations.
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    /// Whether no iterations are stored.
    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Whether any stored iteration carries a discontinuity.
    pub fn has_discontinuity(&self) -> bool {
        self.iterations
            .iter()
            .any(|(_, data)| data.discontinuity_detected)
    }

    /// Continuity counter values observed at iteration boundaries.
    pub fn observed_cc_values(&self) -> &BTreeSet<u8> {
        &self.observed_cc
    }

    /// Drop all iterations.
    pub fn clear(&mut self) {
        self.iterations.clear();
        self.observed_cc.clear();
    }
}

/// All finalized iterations across PIDs plus the iteration ID counter.
#[derive(Debug)]
pub struct StreamStorage {
    streams: BTreeMap<u16, StreamIterations>,
    next_iteration_id: u32,
}

impl Default for StreamStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStorage {
    /// Create empty storage. IDs start at 1.
    pub fn new() -> Self {
        Self {
            streams: BTreeMap::new(),
            next_iteration_id: 1,
        }
    }

    /// Issue the next iteration ID. IDs are globally monotone and unique
    /// for the demuxer's lifetime, but not contiguous within a PID.
    pub fn next_id(&mut self) -> u32 {
        let id = self.next_iteration_id;
        self.next_iteration_id += 1;
        id
    }

    /// Get or create the stream for a PID.
    pub fn get_or_create(&mut self, pid: u16) -> &mut StreamIterations {
        self.streams.entry(pid).or_default()
    }

    /// Stream for a PID, if any iteration was stored.
    pub fn get(&self, pid: u16) -> Option<&StreamIterations> {
        self.streams.get(&pid)
    }

    /// PIDs with stored iterations, ascending.
    pub fn discovered_pids(&self) -> BTreeSet<u16> {
        self.streams.keys().copied().collect()
    }

    /// Streams with their PIDs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &StreamIterations)> {
        self.streams.iter().map(|(pid, stream)| (*pid, stream))
    }

    /// Drop the iterations of one PID.
    pub fn clear_stream(&mut self, pid: u16) {
        if let Some(stream) = self.streams.get_mut(&pid) {
            stream.clear();
        }
    }

    /// Drop everything and restart IDs at 1.
    pub fn clear(&mut self) {
        self.streams.clear();
        self.next_iteration_id = 1;
    }
}
