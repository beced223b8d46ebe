//! PES (Packetized Elementary Stream) packet handling.
//!
//! This module reassembles and parses PES packets carried across transport
//! packets. Completeness is length-driven for bounded packets; packets
//! declaring length 0 (typical for video) are unbounded and run until the
//! next payload unit start on the same PID.

use std::collections::BTreeMap;

use crate::error::{DemuxError, Result};

/// PES start code prefix.
pub const PES_START_CODE_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

/// Program stream map stream ID.
pub const STREAM_ID_PROGRAM_STREAM_MAP: u8 = 0xBC;
/// Private stream 1 stream ID.
pub const STREAM_ID_PRIVATE_STREAM_1: u8 = 0xBD;
/// Padding stream ID.
pub const STREAM_ID_PADDING_STREAM: u8 = 0xBE;
/// Private stream 2 stream ID.
pub const STREAM_ID_PRIVATE_STREAM_2: u8 = 0xBF;
/// ECM stream ID.
pub const STREAM_ID_ECM: u8 = 0xF0;
/// EMM stream ID.
pub const STREAM_ID_EMM: u8 = 0xF1;
/// DSMCC stream ID.
pub const STREAM_ID_DSMCC: u8 = 0xF2;
/// H.222.1 type E stream ID.
pub const STREAM_ID_H222_TYPE_E: u8 = 0xF8;
/// Program stream directory stream ID.
pub const STREAM_ID_PROGRAM_STREAM_DIRECTORY: u8 = 0xFF;

/// Check if a stream ID carries audio (0xC0 through 0xDF).
pub fn is_audio_stream_id(id: u8) -> bool {
    (0xC0..=0xDF).contains(&id)
}

/// Check if a stream ID carries video (0xE0 through 0xEF).
pub fn is_video_stream_id(id: u8) -> bool {
    (0xE0..=0xEF).contains(&id)
}

/// Check if a stream ID carries the optional header block.
///
/// program_stream_map, padding, private_stream_2, ECM, EMM, DSMCC,
/// H.222.1 type E and program_stream_directory do not.
pub fn has_optional_header(id: u8) -> bool {
    !matches!(
        id,
        STREAM_ID_PROGRAM_STREAM_MAP
            | STREAM_ID_PADDING_STREAM
            | STREAM_ID_PRIVATE_STREAM_2
            | STREAM_ID_ECM
            | STREAM_ID_EMM
            | STREAM_ID_DSMCC
            | STREAM_ID_H222_TYPE_E
            | STREAM_ID_PROGRAM_STREAM_DIRECTORY
    )
}

/// A PTS or DTS value: 33 bits at 90 kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Raw 33-bit timestamp value.
    pub value: u64,
}

impl Timestamp {
    /// Create a timestamp. Values are stored unmasked so
    /// [`is_valid`](Self::is_valid) stays meaningful.
    pub fn new(value: u64) -> Self {
        Self { value }
    }

    /// Timestamp in seconds.
    pub fn seconds(&self) -> f64 {
        self.value as f64 / 90_000.0
    }

    /// Timestamp in milliseconds.
    pub fn millis(&self) -> f64 {
        self.value as f64 / 90.0
    }

    /// Check the value fits in 33 bits.
    pub fn is_valid(&self) -> bool {
        self.value < (1u64 << 33)
    }

    /// Decode a PTS/DTS from its 5-byte field.
    ///
    /// The 33 bits are interleaved with a 4-bit prefix and three marker
    /// bits: ts\[32:30\] in byte 0, ts\[29:22\] in byte 1, ts\[21:15\] in
    /// byte 2, ts\[14:7\] in byte 3, ts\[6:0\] in byte 4.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(DemuxError::invalid_pes("Timestamp requires 5 bytes"));
        }

        let mut value = (((data[0] & 0x0E) as u64) >> 1) << 30;
        value |= (data[1] as u64) << 22;
        value |= (((data[2] & 0xFE) as u64) >> 1) << 15;
        value |= (data[3] as u64) << 7;
        value |= ((data[4] & 0xFE) as u64) >> 1;

        Ok(Self::new(value))
    }
}

/// Wrap-aware difference between two 33-bit timestamps, in 90 kHz ticks.
pub fn timestamp_difference(ts1: Timestamp, ts2: Timestamp) -> i64 {
    const TS_MAX: i64 = 1i64 << 33;

    let mut diff = ts2.value as i64 - ts1.value as i64;
    if diff > TS_MAX / 2 {
        diff -= TS_MAX;
    } else if diff < -TS_MAX / 2 {
        diff += TS_MAX;
    }
    diff
}

/// Wrap-aware timestamp difference in milliseconds.
pub fn timestamp_difference_ms(ts1: Timestamp, ts2: Timestamp) -> f64 {
    timestamp_difference(ts1, ts2) as f64 / 90.0
}

/// Parsed PES packet header.
///
/// The optional-header fields are meaningful only when
/// `has_optional_fields` is set; stream IDs without the optional block
/// leave them at their defaults.
#[derive(Debug, Clone, Default)]
pub struct PesHeader {
    /// Stream ID.
    pub stream_id: u8,
    /// PES packet length field (0 declares an unbounded packet).
    pub packet_length: u16,
    /// Whether the stream ID carries the optional header block.
    pub has_optional_fields: bool,
    /// PES scrambling control (2 bits).
    pub scrambling_control: u8,
    /// PES priority.
    pub priority: bool,
    /// Data alignment indicator.
    pub data_alignment: bool,
    /// Copyright flag.
    pub copyright: bool,
    /// Original-or-copy flag.
    pub original_or_copy: bool,
    /// PTS/DTS flags (00 = none, 10 = PTS only, 11 = PTS+DTS).
    pub pts_dts_flags: u8,
    /// ESCR flag.
    pub escr_flag: bool,
    /// ES rate flag.
    pub es_rate_flag: bool,
    /// DSM trick mode flag.
    pub dsm_trick_mode_flag: bool,
    /// Additional copy info flag.
    pub additional_copy_info_flag: bool,
    /// PES CRC flag.
    pub crc_flag: bool,
    /// PES extension flag.
    pub extension_flag: bool,
    /// Length of the remaining optional header data.
    pub header_data_length: u8,
    /// Presentation timestamp.
    pub pts: Option<Timestamp>,
    /// Decode timestamp.
    pub dts: Option<Timestamp>,
}

impl PesHeader {
    /// Minimum PES header size (start code + stream_id + length).
    pub const MIN_SIZE: usize = 6;

    /// Parse a PES header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(DemuxError::invalid_pes("Data too short for PES header"));
        }

        if data[0..3] != PES_START_CODE_PREFIX {
            return Err(DemuxError::invalid_pes("Invalid PES start code prefix"));
        }

        let mut header = PesHeader {
            stream_id: data[3],
            packet_length: ((data[4] as u16) << 8) | (data[5] as u16),
            ..PesHeader::default()
        };

        header.has_optional_fields = has_optional_header(header.stream_id);
        if !header.has_optional_fields {
            return Ok(header);
        }

        if data.len() < 9 {
            return Err(DemuxError::invalid_pes(
                "Data too short for PES optional header",
            ));
        }

        let flags1 = data[6];
        if (flags1 & 0xC0) != 0x80 {
            return Err(DemuxError::invalid_pes(
                "Invalid PES optional header marker bits",
            ));
        }
        header.scrambling_control = (flags1 >> 4) & 0x03;
        header.priority = (flags1 & 0x08) != 0;
        header.data_alignment = (flags1 & 0x04) != 0;
        header.copyright = (flags1 & 0x02) != 0;
        header.original_or_copy = (flags1 & 0x01) != 0;

        let flags2 = data[7];
        header.pts_dts_flags = (flags2 >> 6) & 0x03;
        header.escr_flag = (flags2 & 0x20) != 0;
        header.es_rate_flag = (flags2 & 0x10) != 0;
        header.dsm_trick_mode_flag = (flags2 & 0x08) != 0;
        header.additional_copy_info_flag = (flags2 & 0x04) != 0;
        header.crc_flag = (flags2 & 0x02) != 0;
        header.extension_flag = (flags2 & 0x01) != 0;

        header.header_data_length = data[8];
        if data.len() < header.size() {
            return Err(DemuxError::invalid_pes(
                "Header data length exceeds available data",
            ));
        }

        let mut offset = 9;
        if header.has_pts() {
            if offset + 5 > data.len() {
                return Err(DemuxError::invalid_pes("Truncated PTS"));
            }
            header.pts = Some(Timestamp::parse(&data[offset..offset + 5])?);
            offset += 5;

            if header.has_dts() {
                if offset + 5 > data.len() {
                    return Err(DemuxError::invalid_pes("Truncated DTS"));
                }
                header.dts = Some(Timestamp::parse(&data[offset..offset + 5])?);
            }
        }

        Ok(header)
    }

    /// Total header size in bytes, including the start code.
    pub fn size(&self) -> usize {
        if !self.has_optional_fields {
            Self::MIN_SIZE
        } else {
            9 + self.header_data_length as usize
        }
    }

    /// Check if PTS is present.
    pub fn has_pts(&self) -> bool {
        self.pts_dts_flags & 0x02 != 0
    }

    /// Check if DTS is present.
    pub fn has_dts(&self) -> bool {
        self.pts_dts_flags == 0x03
    }

    /// Check if this is a video stream.
    pub fn is_video(&self) -> bool {
        is_video_stream_id(self.stream_id)
    }

    /// Check if this is an audio stream.
    pub fn is_audio(&self) -> bool {
        is_audio_stream_id(self.stream_id)
    }

    /// Whether the packet length field declares an unbounded packet.
    pub fn is_unbounded(&self) -> bool {
        self.packet_length == 0
    }
}

/// A reassembled PES packet.
#[derive(Debug, Clone)]
pub struct PesPacket {
    /// Parsed header.
    pub header: PesHeader,
    /// Payload bytes following the header.
    pub payload: Vec<u8>,
}

/// PES packet accumulator for one PID.
///
/// A payload unit start resets and re-arms accumulation; a bad start code
/// resets. A bounded packet is complete at `6 + pes_packet_length` bytes;
/// an unbounded one is considered complete once its optional header is
/// fully buffered, the payload continuing until the next unit start.
#[derive(Debug, Default)]
pub struct PesAssembler {
    buffer: Vec<u8>,
    expected_length: Option<usize>,
    synced: bool,
    complete: bool,
}

impl PesAssembler {
    /// Create a new, idle assembler.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(65536),
            expected_length: None,
            synced: false,
            complete: false,
        }
    }

    /// Reset to the idle state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_length = None;
        self.synced = false;
        self.complete = false;
    }

    /// Whether a complete packet is buffered.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one transport packet's payload. Returns `true` when a complete
    /// PES packet is available via [`take`](Self::take).
    pub fn push(&mut self, payload: &[u8], payload_unit_start: bool) -> bool {
        if payload.is_empty() {
            return self.complete;
        }

        if payload_unit_start {
            self.reset();
            self.synced = true;
        }

        if !self.synced {
            // Mid-packet join: wait for the next unit start.
            return false;
        }

        self.buffer.extend_from_slice(payload);
        self.check_complete()
    }

    /// Take the completed packet, resetting the assembler.
    pub fn take(&mut self) -> Option<PesPacket> {
        if !self.complete {
            return None;
        }

        let header = PesHeader::parse(&self.buffer).ok()?;
        let end = match self.expected_length {
            Some(expected) => expected.min(self.buffer.len()),
            None => self.buffer.len(),
        };
        let payload = self.buffer[header.size().min(end)..end].to_vec();

        self.reset();
        Some(PesPacket { header, payload })
    }

    fn check_complete(&mut self) -> bool {
        if self.buffer.len() < PesHeader::MIN_SIZE {
            return false;
        }

        if self.buffer[0..3] != PES_START_CODE_PREFIX {
            // Garbage where a packet should begin; wait for the next start.
            self.reset();
            return false;
        }

        let packet_length = ((self.buffer[4] as u16) << 8) | (self.buffer[5] as u16);

        if packet_length == 0 {
            // Unbounded: complete once the optional header is buffered.
            if let Ok(header) = PesHeader::parse(&self.buffer) {
                if self.buffer.len() >= header.size() {
                    self.expected_length = None;
                    self.complete = true;
                }
            }
            return self.complete;
        }

        let expected = 6 + packet_length as usize;
        self.expected_length = Some(expected);
        if self.buffer.len() >= expected {
            self.complete = true;
        }
        self.complete
    }
}

/// Registry of PES assemblers keyed by PID.
#[derive(Debug, Default)]
pub struct PesManager {
    assemblers: BTreeMap<u16, PesAssembler>,
}

impl PesManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the assembler for a PID.
    pub fn assembler(&mut self, pid: u16) -> &mut PesAssembler {
        self.assemblers.entry(pid).or_insert_with(PesAssembler::new)
    }

    /// Whether a PID already has an assembler.
    pub fn has_assembler(&self, pid: u16) -> bool {
        self.assemblers.contains_key(&pid)
    }

    /// Remove the assembler for a PID.
    pub fn remove(&mut self, pid: u16) {
        self.assemblers.remove(&pid);
    }

    /// PIDs with assemblers.
    pub fn pids(&self) -> Vec<u16> {
        self.assemblers.keys().copied().collect()
    }

    /// Drop all assemblers.
    pub fn clear(&mut self) {
        self.assemblers.clear();
    }
}
