//! MPEG Transport Stream error types.
//!
//! This module provides error types specific to MPEG-TS demultiplexing.
//! Nothing in the hot path propagates these out of [`feed`]; they drive
//! local recovery (resynchronization, accumulator resets) and surface only
//! on the fallible parsing entry points.
//!
//! [`feed`]: crate::demuxer::TsDemuxer::feed

use thiserror::Error;

/// MPEG-TS specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxError {
    /// Invalid sync byte (expected 0x47).
    #[error("Invalid sync byte: expected 0x47, got 0x{0:02X}")]
    InvalidSyncByte(u8),

    /// Packet too short.
    #[error("Packet too short: expected 188 bytes, got {0}")]
    PacketTooShort(usize),

    /// Transport error indicator set.
    #[error("Transport error indicator set on PID {0}")]
    TransportError(u16),

    /// Reserved adaptation field control value.
    #[error("Reserved adaptation field control on PID {0}")]
    ReservedAdaptationControl(u16),

    /// Invalid adaptation field.
    #[error("Invalid adaptation field: {0}")]
    InvalidAdaptationField(String),

    /// Invalid PSI section.
    #[error("Invalid PSI section: {0}")]
    InvalidPsi(String),

    /// Invalid PAT (Program Association Table).
    #[error("Invalid PAT: {0}")]
    InvalidPat(String),

    /// Invalid PMT (Program Map Table).
    #[error("Invalid PMT: {0}")]
    InvalidPmt(String),

    /// Invalid PES packet.
    #[error("Invalid PES packet: {0}")]
    InvalidPes(String),

    /// CRC mismatch on a PSI section.
    #[error("CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    CrcMismatch {
        /// CRC stored in the section trailer.
        expected: u32,
        /// CRC computed over the section body.
        actual: u32,
    },

    /// Invalid PCR value.
    #[error("PCR error: {0}")]
    PcrError(String),

    /// Buffer overflow while writing.
    #[error("Buffer overflow: {0}")]
    BufferOverflow(String),
}

impl DemuxError {
    /// Create an invalid PSI error.
    pub fn invalid_psi(msg: impl Into<String>) -> Self {
        DemuxError::InvalidPsi(msg.into())
    }

    /// Create an invalid PAT error.
    pub fn invalid_pat(msg: impl Into<String>) -> Self {
        DemuxError::InvalidPat(msg.into())
    }

    /// Create an invalid PMT error.
    pub fn invalid_pmt(msg: impl Into<String>) -> Self {
        DemuxError::InvalidPmt(msg.into())
    }

    /// Create an invalid PES error.
    pub fn invalid_pes(msg: impl Into<String>) -> Self {
        DemuxError::InvalidPes(msg.into())
    }

    /// Create an invalid adaptation field error.
    pub fn invalid_adaptation_field(msg: impl Into<String>) -> Self {
        DemuxError::InvalidAdaptationField(msg.into())
    }
}

/// Result type for MPEG-TS operations.
pub type Result<T> = std::result::Result<T, DemuxError>;
