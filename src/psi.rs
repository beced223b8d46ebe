//! Program Specific Information (PSI) tables.
//!
//! This module provides reassembly and parsing of the PSI tables the
//! demuxer understands:
//! - PAT (Program Association Table)
//! - PMT (Program Map Table)
//!
//! Sections may straddle transport packets; [`PsiAssembler`] handles the
//! pointer field and length-driven framing, and every parsed section is
//! CRC-32 checked before use.

use crate::error::{DemuxError, Result};

/// PAT table ID.
pub const TABLE_ID_PAT: u8 = 0x00;

/// PMT table ID.
pub const TABLE_ID_PMT: u8 = 0x02;

/// CRC-32 polynomial used in MPEG-TS (ISO/IEC 13818-1).
const CRC32_POLY: u32 = 0x04C11DB7;

const fn crc32_shift(value: u32) -> u32 {
    if value & 0x8000_0000 != 0 {
        (value << 1) ^ CRC32_POLY
    } else {
        value << 1
    }
}

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut index = 0;
    while index < 256 {
        let mut entry = (index as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            entry = crc32_shift(entry);
            bit += 1;
        }
        table[index] = entry;
        index += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = build_crc32_table();

/// Calculate CRC-32 for PSI sections.
///
/// MSB-first, initial value `0xFFFFFFFF`, no final XOR.
pub fn calculate_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ (byte as u32)) as usize & 0xFF;
        crc = (crc << 8) ^ CRC32_TABLE[index];
    }
    crc
}

/// Verify the trailing CRC-32 of a complete section.
///
/// The last 4 bytes carry the expected value big-endian; the CRC is
/// computed over everything before them, including the section header.
pub fn verify_crc32(section: &[u8]) -> Result<()> {
    if section.len() < 4 {
        return Err(DemuxError::invalid_psi("Section too short for CRC"));
    }

    let crc_offset = section.len() - 4;
    let expected = u32::from_be_bytes([
        section[crc_offset],
        section[crc_offset + 1],
        section[crc_offset + 2],
        section[crc_offset + 3],
    ]);
    let actual = calculate_crc32(&section[..crc_offset]);

    if expected != actual {
        return Err(DemuxError::CrcMismatch { expected, actual });
    }
    Ok(())
}

/// MPEG-TS stream types carried in PMT entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamType {
    /// MPEG-1 Video.
    Mpeg1Video = 0x01,
    /// MPEG-2 Video.
    Mpeg2Video = 0x02,
    /// MPEG-1 Audio.
    Mpeg1Audio = 0x03,
    /// MPEG-2 Audio.
    Mpeg2Audio = 0x04,
    /// Private sections.
    PrivateSections = 0x05,
    /// Private PES data.
    PrivateData = 0x06,
    /// AAC ADTS.
    AacAdts = 0x0F,
    /// MPEG-4 Visual.
    Mpeg4Visual = 0x10,
    /// AAC LATM.
    AacLatm = 0x11,
    /// H.264/AVC video.
    H264 = 0x1B,
    /// H.265/HEVC video.
    H265 = 0x24,
    /// AC-3 audio (ATSC).
    Ac3 = 0x81,
    /// E-AC-3 audio.
    Eac3 = 0x87,
}

impl StreamType {
    /// Create from raw value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(StreamType::Mpeg1Video),
            0x02 => Some(StreamType::Mpeg2Video),
            0x03 => Some(StreamType::Mpeg1Audio),
            0x04 => Some(StreamType::Mpeg2Audio),
            0x05 => Some(StreamType::PrivateSections),
            0x06 => Some(StreamType::PrivateData),
            0x0F => Some(StreamType::AacAdts),
            0x10 => Some(StreamType::Mpeg4Visual),
            0x11 => Some(StreamType::AacLatm),
            0x1B => Some(StreamType::H264),
            0x24 => Some(StreamType::H265),
            0x81 => Some(StreamType::Ac3),
            0x87 => Some(StreamType::Eac3),
            _ => None,
        }
    }

    /// Check if this is a video stream type.
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Video
                | StreamType::Mpeg2Video
                | StreamType::Mpeg4Visual
                | StreamType::H264
                | StreamType::H265
        )
    }

    /// Check if this is an audio stream type.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Audio
                | StreamType::Mpeg2Audio
                | StreamType::AacAdts
                | StreamType::AacLatm
                | StreamType::Ac3
                | StreamType::Eac3
        )
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamType::Mpeg1Video => "MPEG-1 Video",
            StreamType::Mpeg2Video => "MPEG-2 Video",
            StreamType::Mpeg1Audio => "MPEG-1 Audio",
            StreamType::Mpeg2Audio => "MPEG-2 Audio",
            StreamType::PrivateSections => "Private Sections",
            StreamType::PrivateData => "Private Data",
            StreamType::AacAdts => "AAC",
            StreamType::Mpeg4Visual => "MPEG-4 Visual",
            StreamType::AacLatm => "AAC-LATM",
            StreamType::H264 => "H.264/AVC",
            StreamType::H265 => "H.265/HEVC",
            StreamType::Ac3 => "AC-3",
            StreamType::Eac3 => "E-AC-3",
        }
    }
}

/// PSI section header common to all table types.
#[derive(Debug, Clone)]
pub struct PsiHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator (long form when set).
    pub section_syntax_indicator: bool,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension (transport stream ID for PAT, program number for
    /// PMT).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

impl PsiHeader {
    /// Parse a PSI section header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 3 {
            return Err(DemuxError::invalid_psi("Section too short for header"));
        }

        let table_id = data[0];
        let section_syntax_indicator = (data[1] & 0x80) != 0;
        let section_length = ((data[1] as u16 & 0x0F) << 8) | (data[2] as u16);

        if !section_syntax_indicator {
            // Short form without the extended header.
            return Ok(Self {
                table_id,
                section_syntax_indicator,
                section_length,
                table_id_extension: 0,
                version_number: 0,
                current_next: true,
                section_number: 0,
                last_section_number: 0,
            });
        }

        if data.len() < 8 {
            return Err(DemuxError::invalid_psi("Section too short for long header"));
        }

        Ok(Self {
            table_id,
            section_syntax_indicator,
            section_length,
            table_id_extension: u16::from_be_bytes([data[3], data[4]]),
            version_number: (data[5] >> 1) & 0x1F,
            current_next: (data[5] & 0x01) != 0,
            section_number: data[6],
            last_section_number: data[7],
        })
    }

    /// Total section size including the 3 header bytes before the length
    /// field cutoff.
    pub fn section_size(&self) -> usize {
        3 + self.section_length as usize
    }
}

/// Validate a complete section's framing and CRC.
///
/// Returns the parsed header and the table body: the bytes between the
/// long header and the CRC trailer.
fn section_body(section: &[u8]) -> Result<(PsiHeader, &[u8])> {
    let header = PsiHeader::parse(section)?;

    let section_end = header.section_size();
    if section.len() < section_end {
        return Err(DemuxError::invalid_psi("Section truncated"));
    }

    verify_crc32(&section[..section_end])?;

    if section_end < 8 + 4 {
        return Err(DemuxError::invalid_psi("Section too short for table body"));
    }

    Ok((header, &section[8..section_end - 4]))
}

/// Program entry in a PAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    /// Program number (0 denotes the NIT).
    pub program_number: u16,
    /// PID of the program's PMT, or of the NIT for program number 0.
    pub pid: u16,
}

/// Program Association Table (PAT).
#[derive(Debug, Clone)]
pub struct Pat {
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next: bool,
    /// Program entries in section order.
    pub programs: Vec<PatEntry>,
}

impl Pat {
    /// Parse a PAT from a complete section (header through CRC).
    pub fn parse(section: &[u8]) -> Result<Self> {
        let (header, body) = section_body(section)?;

        if header.table_id != TABLE_ID_PAT {
            return Err(DemuxError::invalid_pat(format!(
                "Expected table ID 0x00, got 0x{:02X}",
                header.table_id
            )));
        }

        let mut programs = Vec::new();
        let mut entries = body;
        while entries.len() >= 4 {
            programs.push(PatEntry {
                program_number: u16::from_be_bytes([entries[0], entries[1]]),
                pid: ((entries[2] as u16 & 0x1F) << 8) | (entries[3] as u16),
            });
            entries = &entries[4..];
        }

        Ok(Self {
            transport_stream_id: header.table_id_extension,
            version_number: header.version_number,
            current_next: header.current_next,
            programs,
        })
    }

    /// PMT PID for a program number (never the NIT entry).
    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == program_number && p.program_number != 0)
            .map(|p| p.pid)
    }

    /// All program numbers, skipping the NIT entry.
    pub fn program_numbers(&self) -> Vec<u16> {
        self.programs
            .iter()
            .filter(|p| p.program_number != 0)
            .map(|p| p.program_number)
            .collect()
    }
}

/// Elementary stream entry in a PMT.
#[derive(Debug, Clone)]
pub struct PmtStream {
    /// Stream type.
    pub stream_type: u8,
    /// Elementary stream PID.
    pub elementary_pid: u16,
    /// ES info descriptor bytes.
    pub descriptors: Vec<u8>,
}

impl PmtStream {
    /// Check if this is a video stream.
    pub fn is_video(&self) -> bool {
        StreamType::from_u8(self.stream_type)
            .map(|st| st.is_video())
            .unwrap_or(false)
    }

    /// Check if this is an audio stream.
    pub fn is_audio(&self) -> bool {
        StreamType::from_u8(self.stream_type)
            .map(|st| st.is_audio())
            .unwrap_or(false)
    }
}

/// Program Map Table (PMT).
#[derive(Debug, Clone)]
pub struct Pmt {
    /// Program number.
    pub program_number: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next: bool,
    /// PCR PID.
    pub pcr_pid: u16,
    /// Program-level descriptor bytes.
    pub program_info: Vec<u8>,
    /// Elementary streams in section order.
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    /// Parse a PMT from a complete section (header through CRC).
    pub fn parse(section: &[u8]) -> Result<Self> {
        let (header, body) = section_body(section)?;

        if header.table_id != TABLE_ID_PMT {
            return Err(DemuxError::invalid_pmt(format!(
                "Expected table ID 0x02, got 0x{:02X}",
                header.table_id
            )));
        }

        if body.len() < 4 {
            return Err(DemuxError::invalid_pmt("PMT too short"));
        }

        let pcr_pid = ((body[0] as u16 & 0x1F) << 8) | (body[1] as u16);
        let program_info_length =
            (((body[2] as u16 & 0x0F) << 8) | (body[3] as u16)) as usize;

        let rest = &body[4..];
        if program_info_length > rest.len() {
            return Err(DemuxError::invalid_pmt(
                "Program info extends beyond section",
            ));
        }
        let program_info = rest[..program_info_length].to_vec();

        let mut streams = Vec::new();
        let mut cursor = &rest[program_info_length..];
        while cursor.len() >= 5 {
            let stream_type = cursor[0];
            let elementary_pid = ((cursor[1] as u16 & 0x1F) << 8) | (cursor[2] as u16);
            let es_info_length =
                (((cursor[3] as u16 & 0x0F) << 8) | (cursor[4] as u16)) as usize;

            if 5 + es_info_length > cursor.len() {
                return Err(DemuxError::invalid_pmt("ES info extends beyond section"));
            }

            streams.push(PmtStream {
                stream_type,
                elementary_pid,
                descriptors: cursor[5..5 + es_info_length].to_vec(),
            });
            cursor = &cursor[5 + es_info_length..];
        }

        Ok(Self {
            program_number: header.table_id_extension,
            version_number: header.version_number,
            current_next: header.current_next,
            pcr_pid,
            program_info,
            streams,
        })
    }

    /// Stream entry for an elementary PID.
    pub fn stream_info(&self, pid: u16) -> Option<&PmtStream> {
        self.streams.iter().find(|s| s.elementary_pid == pid)
    }

    /// Elementary PIDs carrying a given stream type.
    pub fn pids_by_type(&self, stream_type: u8) -> Vec<u16> {
        self.streams
            .iter()
            .filter(|s| s.stream_type == stream_type)
            .map(|s| s.elementary_pid)
            .collect()
    }

    /// All elementary PIDs in section order.
    pub fn all_pids(&self) -> Vec<u16> {
        self.streams.iter().map(|s| s.elementary_pid).collect()
    }
}

/// PSI section accumulator.
///
/// Reassembles sections that straddle transport packets. A payload unit
/// start discards any partial section and re-arms on the byte the pointer
/// field designates; continuation payloads append. The section is complete
/// when `3 + section_length` bytes are buffered.
#[derive(Debug, Default)]
pub struct PsiAssembler {
    buffer: Vec<u8>,
    expected_length: Option<usize>,
    synced: bool,
}

impl PsiAssembler {
    /// Create a new, empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the idle state; the next PUSI re-arms accumulation.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_length = None;
        self.synced = false;
    }

    /// Feed one packet's payload.
    ///
    /// Returns the complete section once `3 + section_length` bytes have
    /// accumulated. Payloads arriving before any PUSI are ignored.
    pub fn push(&mut self, payload: &[u8], payload_unit_start: bool) -> Option<Vec<u8>> {
        let mut data = payload;

        if payload_unit_start {
            // A new section begins; drop any partial one.
            self.reset();

            if data.is_empty() {
                return None;
            }

            let pointer = data[0] as usize;
            data = &data[1..];
            if pointer >= data.len() {
                return None;
            }
            data = &data[pointer..];

            self.synced = true;
        }

        if !self.synced {
            return None;
        }

        self.buffer.extend_from_slice(data);

        if self.expected_length.is_none() && self.buffer.len() >= 3 {
            let section_length =
                (((self.buffer[1] as usize) & 0x0F) << 8) | self.buffer[2] as usize;
            self.expected_length = Some(3 + section_length);
        }

        if let Some(expected) = self.expected_length {
            if self.buffer.len() >= expected {
                let section = self.buffer[..expected].to_vec();
                self.reset();
                return Some(section);
            }
        }

        None
    }
}
