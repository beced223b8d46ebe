//! MPEG Transport Stream packet codec.
//!
//! This module provides types for working with 188-byte MPEG-TS packets:
//! header parsing, adaptation field handling (including PCR and transport
//! private data) and the validity predicate the demuxer relies on for
//! synchronization.

use crate::error::{DemuxError, Result};

/// MPEG-TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// MPEG-TS sync byte value.
pub const SYNC_BYTE: u8 = 0x47;

/// PAT (Program Association Table) PID.
pub const PID_PAT: u16 = 0x0000;

/// CAT (Conditional Access Table) PID.
pub const PID_CAT: u16 = 0x0001;

/// TSDT (Transport Stream Description Table) PID.
pub const PID_TSDT: u16 = 0x0002;

/// Null packet PID.
pub const PID_NULL: u16 = 0x1FFF;

/// Maximum valid PID value.
pub const PID_MAX: u16 = 0x1FFF;

/// Check whether a PID carries system information (PAT, CAT, TSDT) or null
/// stuffing. System PIDs are never routed to iteration assembly.
pub fn is_system_pid(pid: u16) -> bool {
    pid == PID_PAT || pid == PID_CAT || pid == PID_TSDT || pid == PID_NULL
}

/// Adaptation field control values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationFieldControl {
    /// Reserved for future use (invalid in a conforming stream).
    Reserved,
    /// Payload only.
    PayloadOnly,
    /// Adaptation field only.
    AdaptationOnly,
    /// Adaptation field followed by payload.
    AdaptationAndPayload,
}

impl AdaptationFieldControl {
    /// Parse from 2-bit value.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => AdaptationFieldControl::Reserved,
            1 => AdaptationFieldControl::PayloadOnly,
            2 => AdaptationFieldControl::AdaptationOnly,
            3 => AdaptationFieldControl::AdaptationAndPayload,
            _ => unreachable!(),
        }
    }

    /// Convert to 2-bit value.
    pub fn to_bits(self) -> u8 {
        match self {
            AdaptationFieldControl::Reserved => 0,
            AdaptationFieldControl::PayloadOnly => 1,
            AdaptationFieldControl::AdaptationOnly => 2,
            AdaptationFieldControl::AdaptationAndPayload => 3,
        }
    }

    /// Check if the packet carries an adaptation field.
    pub fn has_adaptation_field(self) -> bool {
        matches!(
            self,
            AdaptationFieldControl::AdaptationOnly
                | AdaptationFieldControl::AdaptationAndPayload
        )
    }

    /// Check if the packet carries payload.
    pub fn has_payload(self) -> bool {
        matches!(
            self,
            AdaptationFieldControl::PayloadOnly
                | AdaptationFieldControl::AdaptationAndPayload
        )
    }
}

/// Scrambling control values.
///
/// Scrambled packets are reported as such but never descrambled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScramblingControl {
    /// Not scrambled.
    #[default]
    NotScrambled,
    /// Reserved.
    Reserved,
    /// User defined (even key).
    UserDefinedEven,
    /// User defined (odd key).
    UserDefinedOdd,
}

impl ScramblingControl {
    /// Parse from 2-bit value.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ScramblingControl::NotScrambled,
            1 => ScramblingControl::Reserved,
            2 => ScramblingControl::UserDefinedEven,
            3 => ScramblingControl::UserDefinedOdd,
            _ => unreachable!(),
        }
    }
}

/// Program Clock Reference (PCR).
///
/// A PCR is a 42-bit value encoded in 6 bytes: a 33-bit base counting at
/// 90 kHz plus a 9-bit extension counting 27 MHz subdivisions. The full
/// 27 MHz value is `base * 300 + extension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pcr {
    /// 33-bit base value (90 kHz clock).
    pub base: u64,
    /// 9-bit extension (27 MHz subdivisions, 0..300).
    pub extension: u16,
}

impl Pcr {
    /// PCR clock frequency (27 MHz).
    pub const CLOCK_RATE: u64 = 27_000_000;

    /// PCR base clock frequency (90 kHz).
    pub const BASE_CLOCK_RATE: u64 = 90_000;

    /// Create a new PCR from base and extension.
    ///
    /// Values are stored unmasked so [`is_valid`] stays meaningful for
    /// out-of-range input.
    ///
    /// [`is_valid`]: Pcr::is_valid
    pub fn new(base: u64, extension: u16) -> Self {
        Self { base, extension }
    }

    /// Create a PCR from a 27 MHz tick count.
    pub fn from_27mhz(value: u64) -> Self {
        Self::new(value / 300, (value % 300) as u16)
    }

    /// Full PCR value in 27 MHz ticks.
    pub fn to_27mhz(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    /// PCR value in 90 kHz ticks (PTS/DTS compatible).
    pub fn to_90khz(&self) -> u64 {
        self.base
    }

    /// PCR value in seconds.
    pub fn to_seconds(&self) -> f64 {
        self.to_27mhz() as f64 / Self::CLOCK_RATE as f64
    }

    /// Check that base and extension are in range (base below 2^33,
    /// extension below 300).
    pub fn is_valid(&self) -> bool {
        self.base < (1u64 << 33) && self.extension < 300
    }

    /// Parse PCR from 6 bytes.
    ///
    /// Layout: bytes 0-3 carry base\[32:1\], byte 4 carries base\[0\], six
    /// reserved bits and extension\[8\], byte 5 carries extension\[7:0\].
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(DemuxError::invalid_adaptation_field("PCR requires 6 bytes"));
        }

        let base = ((data[0] as u64) << 25)
            | ((data[1] as u64) << 17)
            | ((data[2] as u64) << 9)
            | ((data[3] as u64) << 1)
            | ((data[4] as u64) >> 7);
        let extension = (((data[4] & 0x01) as u16) << 8) | (data[5] as u16);

        Ok(Self::new(base, extension))
    }

    /// Write PCR to 6 bytes.
    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        if data.len() < 6 {
            return Err(DemuxError::BufferOverflow("PCR requires 6 bytes".to_string()));
        }

        data[0] = (self.base >> 25) as u8;
        data[1] = (self.base >> 17) as u8;
        data[2] = (self.base >> 9) as u8;
        data[3] = (self.base >> 1) as u8;
        data[4] = ((self.base & 0x01) << 7) as u8 | 0x7E | ((self.extension >> 8) & 0x01) as u8;
        data[5] = (self.extension & 0xFF) as u8;

        Ok(())
    }
}

/// Adaptation field parsed from a TS packet.
#[derive(Debug, Clone, Default)]
pub struct AdaptationField {
    /// Adaptation field length (excluding the length byte itself).
    pub length: u8,
    /// Discontinuity indicator.
    pub discontinuity: bool,
    /// Random access indicator.
    pub random_access: bool,
    /// Elementary stream priority indicator.
    pub es_priority: bool,
    /// PCR flag.
    pub pcr_flag: bool,
    /// OPCR flag.
    pub opcr_flag: bool,
    /// Splicing point flag.
    pub splicing_point_flag: bool,
    /// Transport private data flag.
    pub transport_private_data_flag: bool,
    /// Adaptation field extension flag.
    pub extension_flag: bool,
    /// Program Clock Reference (if present).
    pub pcr: Option<Pcr>,
    /// Original Program Clock Reference (if present).
    pub opcr: Option<Pcr>,
    /// Splice countdown (if present).
    pub splice_countdown: Option<i8>,
    /// Transport private data bytes (if present).
    pub private_data: Option<Vec<u8>>,
}

impl AdaptationField {
    /// Parse an adaptation field.
    ///
    /// The `data` slice must start at the adaptation field length byte
    /// (packet byte 4). Every optional substructure must fit within
    /// `1 + adaptation_field_length` bytes or parsing fails.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(DemuxError::invalid_adaptation_field("Empty adaptation field"));
        }

        let length = data[0];
        if length == 0 {
            // A zero-length adaptation field is a single stuffing byte.
            return Ok(Self::default());
        }

        let end = 1 + length as usize;
        if end > data.len() {
            return Err(DemuxError::invalid_adaptation_field(format!(
                "Adaptation field length {} exceeds available {} bytes",
                length,
                data.len() - 1
            )));
        }

        let flags = data[1];
        let mut field = AdaptationField {
            length,
            discontinuity: (flags & 0x80) != 0,
            random_access: (flags & 0x40) != 0,
            es_priority: (flags & 0x20) != 0,
            pcr_flag: (flags & 0x10) != 0,
            opcr_flag: (flags & 0x08) != 0,
            splicing_point_flag: (flags & 0x04) != 0,
            transport_private_data_flag: (flags & 0x02) != 0,
            extension_flag: (flags & 0x01) != 0,
            pcr: None,
            opcr: None,
            splice_countdown: None,
            private_data: None,
        };

        let mut offset = 2;

        if field.pcr_flag {
            if offset + 6 > end {
                return Err(DemuxError::invalid_adaptation_field("Truncated PCR"));
            }
            field.pcr = Some(Pcr::parse(&data[offset..offset + 6])?);
            offset += 6;
        }

        if field.opcr_flag {
            if offset + 6 > end {
                return Err(DemuxError::invalid_adaptation_field("Truncated OPCR"));
            }
            field.opcr = Some(Pcr::parse(&data[offset..offset + 6])?);
            offset += 6;
        }

        if field.splicing_point_flag {
            if offset + 1 > end {
                return Err(DemuxError::invalid_adaptation_field(
                    "Truncated splice countdown",
                ));
            }
            field.splice_countdown = Some(data[offset] as i8);
            offset += 1;
        }

        if field.transport_private_data_flag {
            if offset + 1 > end {
                return Err(DemuxError::invalid_adaptation_field(
                    "Private data length byte missing",
                ));
            }
            let private_len = data[offset] as usize;
            offset += 1;
            if offset + private_len > end {
                return Err(DemuxError::invalid_adaptation_field(format!(
                    "Private data length {} exceeds adaptation field",
                    private_len
                )));
            }
            field.private_data = Some(data[offset..offset + private_len].to_vec());
            offset += private_len;
        }

        if field.extension_flag {
            if offset + 1 > end {
                return Err(DemuxError::invalid_adaptation_field(
                    "Extension length byte missing",
                ));
            }
            let ext_len = data[offset] as usize;
            if offset + 1 + ext_len > end {
                return Err(DemuxError::invalid_adaptation_field(
                    "Extension exceeds adaptation field",
                ));
            }
        }

        Ok(field)
    }

    /// Total size of the adaptation field including the length byte.
    pub fn total_size(&self) -> usize {
        self.length as usize + 1
    }

    /// Private data bytes, or an empty slice when absent.
    pub fn private_data_bytes(&self) -> &[u8] {
        self.private_data.as_deref().unwrap_or(&[])
    }
}

/// MPEG Transport Stream packet header.
#[derive(Debug, Clone)]
pub struct TsHeader {
    /// Transport error indicator.
    pub transport_error: bool,
    /// Payload unit start indicator.
    pub payload_unit_start: bool,
    /// Transport priority.
    pub transport_priority: bool,
    /// Packet Identifier (13 bits).
    pub pid: u16,
    /// Scrambling control.
    pub scrambling_control: ScramblingControl,
    /// Adaptation field control.
    pub adaptation_field_control: AdaptationFieldControl,
    /// Continuity counter (4 bits).
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 4;

    /// Create a new header with default values.
    pub fn new(pid: u16) -> Self {
        Self {
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: pid & PID_MAX,
            scrambling_control: ScramblingControl::NotScrambled,
            adaptation_field_control: AdaptationFieldControl::PayloadOnly,
            continuity_counter: 0,
        }
    }

    /// Parse header from 4 bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(DemuxError::PacketTooShort(data.len()));
        }

        if data[0] != SYNC_BYTE {
            return Err(DemuxError::InvalidSyncByte(data[0]));
        }

        Ok(Self {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: ((data[1] as u16 & 0x1F) << 8) | (data[2] as u16),
            scrambling_control: ScramblingControl::from_bits(data[3] >> 6),
            adaptation_field_control: AdaptationFieldControl::from_bits(data[3] >> 4),
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Write header to 4 bytes.
    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        if data.len() < Self::SIZE {
            return Err(DemuxError::BufferOverflow("Need 4 bytes for header".to_string()));
        }

        data[0] = SYNC_BYTE;
        data[1] = ((self.transport_error as u8) << 7)
            | ((self.payload_unit_start as u8) << 6)
            | ((self.transport_priority as u8) << 5)
            | ((self.pid >> 8) as u8 & 0x1F);
        data[2] = (self.pid & 0xFF) as u8;
        data[3] = ((self.adaptation_field_control.to_bits()) << 4)
            | (self.continuity_counter & 0x0F);

        Ok(())
    }
}

/// A complete, validated 188-byte MPEG Transport Stream packet.
///
/// [`TsPacket::parse`] enforces the full validity predicate the demuxer
/// synchronizes on: sync byte present, transport error indicator clear,
/// adaptation field control not reserved, and all adaptation field
/// substructures inside the 188-byte window.
#[derive(Debug, Clone)]
pub struct TsPacket {
    data: [u8; TS_PACKET_SIZE],
}

impl TsPacket {
    /// Parse and validate a packet from the first 188 bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < TS_PACKET_SIZE {
            return Err(DemuxError::PacketTooShort(data.len()));
        }

        let header = TsHeader::parse(data)?;

        if header.transport_error {
            return Err(DemuxError::TransportError(header.pid));
        }
        if header.adaptation_field_control == AdaptationFieldControl::Reserved {
            return Err(DemuxError::ReservedAdaptationControl(header.pid));
        }

        let mut packet_data = [0u8; TS_PACKET_SIZE];
        packet_data.copy_from_slice(&data[..TS_PACKET_SIZE]);
        let packet = Self { data: packet_data };

        // Reject packets whose adaptation field overruns the frame.
        let _ = packet.adaptation_field()?;

        Ok(packet)
    }

    /// Raw packet bytes.
    pub fn data(&self) -> &[u8; TS_PACKET_SIZE] {
        &self.data
    }

    /// Parse the 4-byte header.
    pub fn header(&self) -> Result<TsHeader> {
        TsHeader::parse(&self.data)
    }

    /// The 13-bit PID.
    pub fn pid(&self) -> u16 {
        ((self.data[1] as u16 & 0x1F) << 8) | (self.data[2] as u16)
    }

    /// Whether this is a null packet.
    pub fn is_null(&self) -> bool {
        self.pid() == PID_NULL
    }

    /// The 4-bit continuity counter.
    pub fn continuity_counter(&self) -> u8 {
        self.data[3] & 0x0F
    }

    /// Whether the payload unit start indicator is set.
    pub fn payload_unit_start(&self) -> bool {
        (self.data[1] & 0x40) != 0
    }

    /// The adaptation field control.
    pub fn adaptation_field_control(&self) -> AdaptationFieldControl {
        AdaptationFieldControl::from_bits(self.data[3] >> 4)
    }

    /// Whether the packet carries an adaptation field.
    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control().has_adaptation_field()
    }

    /// Whether the packet carries payload (per the adaptation field
    /// control; the payload slice may still be empty).
    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control().has_payload()
    }

    /// Parse the adaptation field if present.
    pub fn adaptation_field(&self) -> Result<Option<AdaptationField>> {
        if !self.has_adaptation_field() {
            return Ok(None);
        }
        Ok(Some(AdaptationField::parse(&self.data[4..])?))
    }

    /// The payload bytes: everything after the adaptation field (or after
    /// the header if none) up to byte 187. `None` when the packet carries
    /// no payload at all.
    pub fn payload(&self) -> Option<&[u8]> {
        if !self.has_payload() {
            return None;
        }

        let payload_start = if self.has_adaptation_field() {
            4 + 1 + self.data[4] as usize
        } else {
            4
        };

        if payload_start >= TS_PACKET_SIZE {
            None
        } else {
            Some(&self.data[payload_start..])
        }
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload().map_or(0, |p| p.len())
    }
}
