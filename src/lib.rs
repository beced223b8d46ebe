//! # tsdemux
//!
//! Resynchronizing MPEG-2 Transport Stream demultiplexer (ISO/IEC 13818-1).
//!
//! The demuxer consumes a byte stream that may be noisy — prefixed,
//! interleaved or suffixed with arbitrary data, including spurious sync
//! bytes — and produces, per PID, an ordered sequence of *iterations*:
//! payload-unit groupings whose bytes are segregated into normal
//! elementary-stream data and adaptation-field private data. PAT and PMT
//! are parsed so programs can be reported by program number, and PCR
//! carriage is tracked with wrap-aware 27 MHz arithmetic.
//!
//! ## Features
//!
//! - **Byte-level resynchronization**: sync points are validated with a
//!   3-packet cross-check, defending against framing loss and false
//!   0x47 bytes in garbage
//! - **188-byte packet parsing**: adaptation field handling including PCR,
//!   splice countdown and transport private data
//! - **Iteration assembly**: per-PID grouping driven by the payload unit
//!   start indicator and the 4-bit continuity counter
//! - **PAT/PMT parsing**: CRC-32 validated sections reassembled across
//!   packet boundaries
//! - **PES reassembly**: length-driven and unbounded packets, PTS/DTS
//!   decoding
//! - **PCR statistics**: interval averaging, jitter estimation,
//!   discontinuity detection and linear interpolation
//!
//! ## Example
//!
//! ```
//! use tsdemux::{PayloadType, TsDemuxer};
//!
//! let mut demuxer = TsDemuxer::new();
//!
//! // Feed arbitrary chunks; alignment does not matter.
//! # let chunk: &[u8] = &[];
//! demuxer.feed(chunk);
//!
//! for pid in demuxer.discovered_pids() {
//!     for info in demuxer.iterations_summary(pid) {
//!         let payload = demuxer.payload(pid, info.iteration_id, PayloadType::Normal);
//!         println!("PID {pid:#06x}: iteration {} carries {} bytes", info.iteration_id, payload.len());
//!     }
//! }
//! ```
//!
//! ## MPEG-TS structure
//!
//! A transport stream consists of fixed 188-byte packets:
//!
//! ```text
//! +------+------+------+------+----------------------------+
//! | Sync | TEI  | PUSI | TP   | Adaptation | Payload       |
//! | 0x47 | PID  |      | AFC  | Field      |               |
//! +------+------+------+------+----------------------------+
//!    1      2 bytes      1       0-183        0-184 bytes
//! ```
//!
//! - **Sync byte**: always 0x47
//! - **PID**: 13-bit packet identifier
//! - **PUSI**: payload unit start indicator, delimiting iterations
//! - **AFC**: adaptation field control
//!
//! ## Well-known PIDs
//!
//! | PID    | Description                     |
//! |--------|---------------------------------|
//! | 0x0000 | PAT (Program Association Table) |
//! | 0x0001 | CAT (Conditional Access Table)  |
//! | 0x0002 | TSDT                            |
//! | 0x1FFF | Null packets                    |
//!
//! System PIDs are routed to PSI handling only; they never produce
//! iterations.

pub mod buffer;
pub mod demuxer;
pub mod error;
pub mod packet;
pub mod pcr;
pub mod pes;
pub mod psi;
pub mod storage;
pub mod sync;

// Re-export main types
pub use buffer::{ByteBuffer, MAX_BUFFER_PACKETS, MAX_BUFFER_SIZE};
pub use demuxer::{PayloadBuffer, ProgramInfo, ProgramTable, TsDemuxer};
pub use error::{DemuxError, Result};
pub use packet::{
    is_system_pid, AdaptationField, AdaptationFieldControl, Pcr, ScramblingControl, TsHeader,
    TsPacket, PID_CAT, PID_MAX, PID_NULL, PID_PAT, PID_TSDT, SYNC_BYTE, TS_PACKET_SIZE,
};
pub use pcr::{PcrManager, PcrSample, PcrStats, PcrTracker};
pub use pes::{
    PesAssembler, PesHeader, PesManager, PesPacket, Timestamp, PES_START_CODE_PREFIX,
};
pub use psi::{
    calculate_crc32, verify_crc32, Pat, PatEntry, Pmt, PmtStream, PsiAssembler, PsiHeader,
    StreamType, TABLE_ID_PAT, TABLE_ID_PMT,
};
pub use storage::{
    IterationData, IterationInfo, PayloadSegment, PayloadType, StreamIterations, StreamStorage,
};
pub use sync::{belongs_to_same_iteration, Synchronizer, SYNC_VALIDATION_DEPTH};
