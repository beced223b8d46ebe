//! MPEG Transport Stream demultiplexer.
//!
//! [`TsDemuxer`] is a single-threaded state machine over a noisy byte
//! stream. Callers push arbitrary chunks through [`feed`]; the demuxer
//! acquires packet synchronization, parses transport packets, routes PSI
//! (PAT/PMT) and PCR, and groups every non-system PID's packets into
//! iterations delimited by the payload unit start indicator.
//!
//! `feed` never fails and never panics: structural errors drop the
//! offending packet and trigger resynchronization, policy filters skip
//! silently, and diagnostics surface only through query results.
//!
//! [`feed`]: TsDemuxer::feed

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::buffer::ByteBuffer;
use crate::packet::{is_system_pid, Pcr, TsPacket, PID_PAT, TS_PACKET_SIZE};
use crate::pcr::{PcrManager, PcrStats};
use crate::pes::PesHeader;
use crate::psi::{Pat, Pmt, PsiAssembler};
use crate::storage::{IterationData, IterationInfo, PayloadType, StreamStorage};
use crate::sync::Synchronizer;

/// Optional whitelist of PIDs grouped by program number.
///
/// When installed via [`TsDemuxer::set_programs_table`], packets on PIDs
/// outside the table are dropped at assembly time.
#[derive(Debug, Clone, Default)]
pub struct ProgramTable {
    /// Program number to the PIDs belonging to it.
    pub programs: BTreeMap<u16, Vec<u16>>,
}

impl ProgramTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a program with its PIDs.
    pub fn add_program(&mut self, program_number: u16, pids: Vec<u16>) {
        self.programs.insert(program_number, pids);
    }
}

/// Report entry for one program.
#[derive(Debug, Clone)]
pub struct ProgramInfo {
    /// Program number (0 when no PMT identifies the stream).
    pub program_number: u16,
    /// PIDs composing the program.
    pub stream_pids: Vec<u16>,
    /// Total stored payload bytes across the program's PIDs.
    pub total_payload_size: usize,
    /// Number of stored iterations across the program's PIDs.
    pub iteration_count: usize,
    /// Whether any stored iteration carries a discontinuity.
    pub has_discontinuity: bool,
}

/// A borrowed view of one payload segment.
///
/// Valid until the next mutating call on the demuxer. A missing lookup
/// yields the empty default rather than an error.
#[derive(Debug, Clone, Copy)]
pub struct PayloadBuffer<'a> {
    /// Payload bytes (empty when the lookup found nothing).
    pub data: &'a [u8],
    /// Kind of payload.
    pub kind: PayloadType,
}

impl Default for PayloadBuffer<'_> {
    fn default() -> Self {
        Self {
            data: &[],
            kind: PayloadType::Normal,
        }
    }
}

impl PayloadBuffer<'_> {
    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// MPEG Transport Stream demultiplexer.
pub struct TsDemuxer {
    buffer: ByteBuffer,
    sync: Synchronizer,
    storage: StreamStorage,
    /// In-progress iteration per PID, with its pre-assigned ID.
    current: HashMap<u16, (u32, IterationData)>,
    /// Last continuity counter seen per PID, for discontinuity tracking.
    last_cc: HashMap<u16, u8>,
    pat_assembler: PsiAssembler,
    pmt_assemblers: HashMap<u16, PsiAssembler>,
    pat: Option<Pat>,
    /// Parsed PMTs by program number.
    pmts: BTreeMap<u16, Pmt>,
    pcr: PcrManager,
    program_filter: Option<BTreeSet<u16>>,
    packets_processed: u64,
}

impl Default for TsDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl TsDemuxer {
    /// Create a demuxer in the unsynchronized state.
    pub fn new() -> Self {
        Self {
            buffer: ByteBuffer::new(),
            sync: Synchronizer::new(),
            storage: StreamStorage::new(),
            current: HashMap::new(),
            last_cc: HashMap::new(),
            pat_assembler: PsiAssembler::new(),
            pmt_assemblers: HashMap::new(),
            pat: None,
            pmts: BTreeMap::new(),
            pcr: PcrManager::new(),
            program_filter: None,
            packets_processed: 0,
        }
    }

    /// Feed a chunk of the transport stream.
    ///
    /// Accepts arbitrary alignment and chunk sizes. Empty input is a no-op.
    pub fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        self.buffer.append(bytes);
        self.process_buffer();
    }

    fn process_buffer(&mut self) {
        loop {
            if !self.sync.is_synchronized() && !self.sync.acquire(self.buffer.as_slice()) {
                // Wait for more bytes.
                return;
            }

            let mut offset = self.sync.offset();
            let mut lost = false;

            while offset + TS_PACKET_SIZE <= self.buffer.len() {
                let frame = &self.buffer.as_slice()[offset..offset + TS_PACKET_SIZE];
                let packet = match TsPacket::parse(frame) {
                    Ok(packet) => packet,
                    Err(err) => {
                        debug!(offset, %err, "packet rejected, dropping sync");
                        self.sync.lose();
                        // Discard the processed region plus the failing
                        // sync byte so reacquisition never re-ingests
                        // stored packets.
                        self.buffer.trim_front(offset + 1);
                        lost = true;
                        break;
                    }
                };

                self.process_psi(&packet);
                self.process_pcr(&packet);
                self.assemble(&packet);

                offset += TS_PACKET_SIZE;
                self.packets_processed += 1;
            }

            if lost {
                // Retry acquisition on whatever remains.
                continue;
            }

            // Drop consumed bytes; the tail is a partial packet at offset 0.
            self.buffer.trim_front(offset);
            self.sync.set_offset(0);
            return;
        }
    }

    /// Route PAT/PMT packets into their section accumulators.
    fn process_psi(&mut self, packet: &TsPacket) {
        let pid = packet.pid();
        let pusi = packet.payload_unit_start();

        if pid == PID_PAT {
            let Some(payload) = packet.payload() else {
                return;
            };
            if let Some(section) = self.pat_assembler.push(payload, pusi) {
                match Pat::parse(&section) {
                    Ok(pat) => {
                        debug!(
                            tsid = pat.transport_stream_id,
                            programs = pat.programs.len(),
                            "PAT updated"
                        );
                        for entry in &pat.programs {
                            if entry.program_number != 0 {
                                self.pmt_assemblers.entry(entry.pid).or_default();
                            }
                        }
                        self.pat = Some(pat);
                    }
                    Err(err) => {
                        warn!(%err, "PAT section discarded");
                    }
                }
            }
            return;
        }

        if let Some(assembler) = self.pmt_assemblers.get_mut(&pid) {
            let Some(payload) = packet.payload() else {
                return;
            };
            if let Some(section) = assembler.push(payload, pusi) {
                match Pmt::parse(&section) {
                    Ok(pmt) => {
                        debug!(
                            program = pmt.program_number,
                            pcr_pid = pmt.pcr_pid,
                            streams = pmt.streams.len(),
                            "PMT updated"
                        );
                        self.pmts.insert(pmt.program_number, pmt);
                    }
                    Err(err) => {
                        warn!(pid, %err, "PMT section discarded");
                    }
                }
            }
        }
    }

    /// Record an adaptation-field PCR if present and in range.
    fn process_pcr(&mut self, packet: &TsPacket) {
        let Ok(Some(af)) = packet.adaptation_field() else {
            return;
        };
        let Some(pcr) = af.pcr else {
            return;
        };
        if pcr.is_valid() {
            self.pcr.add(
                packet.pid(),
                pcr,
                self.packets_processed,
                packet.continuity_counter(),
            );
        }
    }

    /// Group a non-system packet into its PID's current iteration.
    fn assemble(&mut self, packet: &TsPacket) {
        let pid = packet.pid();

        if is_system_pid(pid) {
            return;
        }
        if let Some(filter) = &self.program_filter {
            if !filter.contains(&pid) {
                return;
            }
        }

        let cc = packet.continuity_counter();
        let pusi = packet.payload_unit_start();

        let start_new = if !self.current.contains_key(&pid) {
            true
        } else if pusi {
            self.finalize_iteration(pid);
            true
        } else {
            false
        };

        if start_new {
            let id = self.storage.next_id();
            self.current.insert(pid, (id, IterationData::new(cc, pusi)));
        }

        // The adaptation field parsed successfully at packet validation.
        let adaptation = packet.adaptation_field().ok().flatten();

        let Some((_, iteration)) = self.current.get_mut(&pid) else {
            return;
        };

        iteration.last_cc = cc;
        iteration.packet_count += 1;

        // A CC gap counts as a discontinuity only when the adaptation
        // field asserts the indicator; silent gaps pass unflagged.
        if let Some(&prev_cc) = self.last_cc.get(&pid) {
            let expected = (prev_cc + 1) % 16;
            if cc != expected
                && adaptation.as_ref().map(|af| af.discontinuity).unwrap_or(false)
            {
                iteration.discontinuity_detected = true;
            }
        }
        self.last_cc.insert(pid, cc);

        if let Some(af) = &adaptation {
            let private = af.private_data_bytes();
            if !private.is_empty() {
                iteration.push_segment(PayloadType::Private, private);
            }
        }

        if let Some(payload) = packet.payload() {
            if !payload.is_empty() {
                iteration.push_segment(PayloadType::Normal, payload);
            }
        }
    }

    /// Move the current iteration of a PID into storage.
    fn finalize_iteration(&mut self, pid: u16) {
        if let Some((id, data)) = self.current.remove(&pid) {
            self.storage.get_or_create(pid).add(id, data);
        }
    }

    /// Make every pending iteration visible, exactly once.
    fn finalize_all_iterations(&mut self) {
        let pids: Vec<u16> = self.current.keys().copied().collect();
        for pid in pids {
            self.finalize_iteration(pid);
        }
    }

    // ------------------------------------------------------------------
    // Queries. Each first flushes in-progress iterations into storage;
    // none of them touches the synchronization state.
    // ------------------------------------------------------------------

    /// Program reports composed from parsed PMTs.
    ///
    /// Before any PMT is known, every discovered PID is reported as its own
    /// entry with program number 0.
    pub fn programs(&mut self) -> Vec<ProgramInfo> {
        self.finalize_all_iterations();

        let mut result = Vec::new();

        if !self.pmts.is_empty() {
            for (program_number, pmt) in &self.pmts {
                let mut info = ProgramInfo {
                    program_number: *program_number,
                    stream_pids: Vec::new(),
                    total_payload_size: 0,
                    iteration_count: 0,
                    has_discontinuity: false,
                };

                for stream in &pmt.streams {
                    info.stream_pids.push(stream.elementary_pid);

                    if let Some(stored) = self.storage.get(stream.elementary_pid) {
                        info.iteration_count += stored.len();
                        if stored.has_discontinuity() {
                            info.has_discontinuity = true;
                        }
                        info.total_payload_size += stored
                            .iter()
                            .map(|(_, data)| data.total_size())
                            .sum::<usize>();
                    }
                }

                result.push(info);
            }
        } else {
            for (pid, stream) in self.storage.iter() {
                result.push(ProgramInfo {
                    program_number: 0,
                    stream_pids: vec![pid],
                    total_payload_size: stream
                        .iter()
                        .map(|(_, data)| data.total_size())
                        .sum(),
                    iteration_count: stream.len(),
                    has_discontinuity: stream.has_discontinuity(),
                });
            }
        }

        result
    }

    /// PIDs with stored iterations, ascending. System PIDs never appear.
    pub fn discovered_pids(&mut self) -> BTreeSet<u16> {
        self.finalize_all_iterations();
        self.storage.discovered_pids()
    }

    /// Per-iteration summaries for a PID, in arrival order.
    pub fn iterations_summary(&mut self, pid: u16) -> Vec<IterationInfo> {
        self.finalize_all_iterations();

        let Some(stream) = self.storage.get(pid) else {
            return Vec::new();
        };

        stream
            .iter()
            .map(|(id, data)| IterationInfo {
                iteration_id: id,
                payload_normal_size: data.size_of(PayloadType::Normal),
                payload_private_size: data.size_of(PayloadType::Private),
                has_discontinuity: data.discontinuity_detected,
                cc_start: data.first_cc,
                cc_end: data.last_cc,
                packet_count: data.packet_count,
            })
            .collect()
    }

    /// First payload segment of the requested kind in an iteration.
    ///
    /// The returned buffer borrows storage and is valid until the next
    /// mutating call. Unknown `(pid, iteration_id)` or a missing kind
    /// yields the empty buffer.
    pub fn payload(&mut self, pid: u16, iteration_id: u32, kind: PayloadType) -> PayloadBuffer<'_> {
        self.finalize_all_iterations();

        let Some(data) = self.storage.get(pid).and_then(|s| s.get(iteration_id)) else {
            return PayloadBuffer::default();
        };

        data.segments()
            .iter()
            .find(|segment| segment.kind == kind)
            .map(|segment| PayloadBuffer {
                data: data.segment_bytes(segment),
                kind: segment.kind,
            })
            .unwrap_or_default()
    }

    /// PES header opening an iteration, when there is one.
    ///
    /// Parses the leading normal-payload segment of an iteration that began
    /// on a payload unit start. Iterations carrying PSI or mid-stream data
    /// yield `None`.
    pub fn pes_header(&mut self, pid: u16, iteration_id: u32) -> Option<PesHeader> {
        self.finalize_all_iterations();

        let data = self.storage.get(pid)?.get(iteration_id)?;
        if !data.payload_unit_start_seen {
            return None;
        }

        let first_normal = data
            .segments()
            .iter()
            .find(|segment| segment.kind == PayloadType::Normal)?;
        PesHeader::parse(data.segment_bytes(first_normal)).ok()
    }

    /// Every payload segment of an iteration, in arrival order.
    pub fn all_payloads(&mut self, pid: u16, iteration_id: u32) -> Vec<PayloadBuffer<'_>> {
        self.finalize_all_iterations();

        let Some(data) = self.storage.get(pid).and_then(|s| s.get(iteration_id)) else {
            return Vec::new();
        };

        data.segments()
            .iter()
            .map(|segment| PayloadBuffer {
                data: data.segment_bytes(segment),
                kind: segment.kind,
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Destructive operations.
    // ------------------------------------------------------------------

    /// Remove one stored iteration.
    pub fn clear_iteration(&mut self, pid: u16, iteration_id: u32) {
        self.storage.get_or_create(pid).remove(iteration_id);
    }

    /// Remove every stored iteration of a PID.
    pub fn clear_stream(&mut self, pid: u16) {
        self.storage.clear_stream(pid);
    }

    /// Drop all iterations, pending state and buffered bytes, and
    /// unsynchronize. Parsed PAT/PMT tables and PCR history survive.
    pub fn clear_all(&mut self) {
        self.current.clear();
        self.last_cc.clear();
        self.storage.clear();
        self.buffer.clear();
        self.sync.lose();
    }

    /// Install a PID whitelist. Packets on unknown PIDs are dropped at
    /// assembly time. Invalidates stored and pending iterations.
    pub fn set_programs_table(&mut self, table: &ProgramTable) {
        let mut known = BTreeSet::new();
        for pids in table.programs.values() {
            known.extend(pids.iter().copied());
        }
        self.program_filter = Some(known);

        self.current.clear();
        self.last_cc.clear();
        self.storage.clear();
    }

    // ------------------------------------------------------------------
    // Observers.
    // ------------------------------------------------------------------

    /// Whether packet synchronization is currently held.
    pub fn is_synchronized(&self) -> bool {
        self.sync.is_synchronized()
    }

    /// Bytes currently held in the input buffer.
    pub fn buffer_occupancy(&self) -> usize {
        self.buffer.len()
    }

    /// Whole packets currently held in the input buffer.
    pub fn packet_count(&self) -> usize {
        self.buffer.len() / TS_PACKET_SIZE
    }

    /// Packets parsed and consumed since construction.
    pub fn packets_processed(&self) -> u64 {
        self.packets_processed
    }

    /// The last successfully parsed PAT, if any.
    pub fn pat(&self) -> Option<&Pat> {
        self.pat.as_ref()
    }

    /// The parsed PMT for a program number, if any.
    pub fn pmt(&self, program_number: u16) -> Option<&Pmt> {
        self.pmts.get(&program_number)
    }

    // ------------------------------------------------------------------
    // PCR observers.
    // ------------------------------------------------------------------

    /// PCR statistics for a PID, when it has carried PCR.
    pub fn pcr_stats(&self, pid: u16) -> Option<PcrStats> {
        self.pcr.tracker(pid).map(|t| t.stats())
    }

    /// PCR statistics for every PID carrying PCR.
    pub fn all_pcr_stats(&self) -> Vec<PcrStats> {
        self.pcr.all_stats()
    }

    /// PIDs that have carried PCR, ascending.
    pub fn pids_with_pcr(&self) -> Vec<u16> {
        self.pcr.pids_with_pcr()
    }

    /// Most recent PCR on a PID.
    pub fn last_pcr(&self, pid: u16) -> Option<Pcr> {
        self.pcr.tracker(pid).and_then(|t| t.last_pcr())
    }

    /// PCR interpolated (or extrapolated) for a global packet number.
    pub fn interpolated_pcr(&self, pid: u16, packet_number: u64) -> Option<Pcr> {
        self.pcr.tracker(pid).and_then(|t| t.interpolate(packet_number))
    }
}
