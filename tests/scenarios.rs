//! End-to-end demuxer scenarios over noisy synthetic streams.

mod common;

use common::{
    garbage, packet, psi_packet, sequence, single_program_pat, timestamp_bytes, video_audio_pmt,
    PacketConfig,
};
use tsdemux::{PayloadType, ProgramTable, TsDemuxer, MAX_BUFFER_SIZE, PID_PAT, TS_PACKET_SIZE};

#[test]
fn clean_stream_single_iteration() {
    let mut demuxer = TsDemuxer::new();
    demuxer.feed(&sequence(0x100, 5, 0, 0xAA));

    assert!(demuxer.is_synchronized());

    let pids = demuxer.discovered_pids();
    assert_eq!(pids.len(), 1);
    assert!(pids.contains(&0x100));

    let summaries = demuxer.iterations_summary(0x100);
    assert_eq!(summaries.len(), 1);
    let info = &summaries[0];
    assert_eq!(info.cc_start, 0);
    assert_eq!(info.cc_end, 4);
    assert_eq!(info.packet_count, 5);
    assert!(!info.has_discontinuity);

    let payload = demuxer.payload(0x100, info.iteration_id, PayloadType::Normal);
    assert!(!payload.is_empty());
    assert_eq!(payload.data[0], 0xAA);
}

#[test]
fn interleaved_pids_get_separate_streams() {
    let mut demuxer = TsDemuxer::new();

    let a = sequence(0x100, 3, 0, 0x11);
    let b = sequence(0x101, 3, 0, 0x22);

    let mut data = Vec::new();
    for i in 0..3 {
        data.extend_from_slice(&a[i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE]);
        data.extend_from_slice(&b[i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE]);
    }
    demuxer.feed(&data);

    let pids = demuxer.discovered_pids();
    assert_eq!(pids.len(), 2);
    assert!(pids.contains(&0x100));
    assert!(pids.contains(&0x101));

    for pid in [0x100u16, 0x101] {
        let summaries = demuxer.iterations_summary(pid);
        assert_eq!(summaries.len(), 1, "PID {pid:#06x}");
        assert_eq!(summaries[0].packet_count, 3, "PID {pid:#06x}");
    }
}

#[test]
fn garbage_prefix_then_valid_packets() {
    let mut demuxer = TsDemuxer::new();

    let mut data = garbage(200, 7, false);
    data.extend_from_slice(&sequence(0x100, 10, 0, 0x33));
    demuxer.feed(&data);

    assert!(demuxer.is_synchronized());
    assert!(!demuxer.iterations_summary(0x100).is_empty());
}

#[test]
fn system_pid_only_stream_discovers_nothing() {
    let mut demuxer = TsDemuxer::new();
    demuxer.feed(&sequence(PID_PAT, 5, 0, 0x00));

    assert!(demuxer.is_synchronized());
    assert!(demuxer.discovered_pids().is_empty());
}

#[test]
fn two_packets_do_not_synchronize() {
    let mut demuxer = TsDemuxer::new();
    demuxer.feed(&sequence(0x100, 2, 0, 0x00));

    assert!(!demuxer.is_synchronized());
    assert_eq!(demuxer.packets_processed(), 0);
}

#[test]
fn false_sync_bytes_never_synchronize() {
    let mut demuxer = TsDemuxer::new();

    // Ten sync bytes each opening an invalid frame: the TEI bit is forced
    // so no candidate parses, and the filler carries no 0x47.
    let mut data = Vec::new();
    for i in 0..10u32 {
        let mut frame = garbage(TS_PACKET_SIZE, 1000 + i, false);
        frame[0] = tsdemux::SYNC_BYTE;
        frame[1] |= 0x80;
        data.extend_from_slice(&frame);
    }
    demuxer.feed(&data);

    assert!(!demuxer.is_synchronized());
    assert!(demuxer.discovered_pids().is_empty());
}

#[test]
fn pat_pmt_program_reporting() {
    let mut demuxer = TsDemuxer::new();

    let pat_section = single_program_pat(1, 1, 0x100);
    let pmt_section = video_audio_pmt(1, 0x100, 0x100, 0x101);

    let mut data = Vec::new();
    // Tables repeat in real streams; the repetition also lets acquisition
    // chain on PID 0x0000.
    for cc in 0..3u8 {
        data.extend_from_slice(&psi_packet(PID_PAT, cc, &pat_section));
    }
    data.extend_from_slice(&psi_packet(0x100, 0, &pmt_section));
    data.extend_from_slice(&sequence(0x100, 3, 1, 0xAB));
    data.extend_from_slice(&sequence(0x101, 3, 0, 0xCD));
    demuxer.feed(&data);

    assert!(demuxer.pat().is_some());
    assert_eq!(demuxer.pat().unwrap().transport_stream_id, 1);
    assert!(demuxer.pmt(1).is_some());
    assert_eq!(demuxer.pmt(1).unwrap().pcr_pid, 0x100);

    let programs = demuxer.programs();
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].program_number, 1);
    assert_eq!(programs[0].stream_pids, vec![0x100, 0x101]);
    assert!(programs[0].total_payload_size > 0);
}

#[test]
fn cc_jump_with_discontinuity_flag() {
    let mut demuxer = TsDemuxer::new();

    let mut data = sequence(0x100, 3, 0, 0x00); // CC 0, 1, 2

    // Jump to CC 10 with the discontinuity indicator asserted.
    data.extend_from_slice(&packet(&PacketConfig {
        pid: 0x100,
        cc: 10,
        discontinuity: true,
        ..PacketConfig::default()
    }));
    data.extend_from_slice(&sequence(0x100, 2, 11, 0x00)); // CC 11, 12
    demuxer.feed(&data);

    assert!(demuxer.is_synchronized());
    assert_eq!(demuxer.packets_processed(), 6);

    let summaries = demuxer.iterations_summary(0x100);
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].has_discontinuity);
}

#[test]
fn cc_gap_without_flag_is_not_flagged() {
    let mut demuxer = TsDemuxer::new();

    let mut data = sequence(0x100, 3, 0, 0x00);
    data.extend_from_slice(&sequence(0x100, 3, 9, 0x00));
    // The gap breaks acquisition chaining if it lands inside the first
    // three packets, so feed the continuation separately.
    demuxer.feed(&data[..3 * TS_PACKET_SIZE]);
    demuxer.feed(&data[3 * TS_PACKET_SIZE..]);

    let summaries = demuxer.iterations_summary(0x100);
    assert_eq!(summaries.len(), 1);
    assert!(!summaries[0].has_discontinuity);
    assert_eq!(summaries[0].packet_count, 6);
}

#[test]
fn garbage_between_packets_resynchronizes() {
    let mut demuxer = TsDemuxer::new();

    let mut data = sequence(0x100, 4, 0, 0x00);
    data.extend_from_slice(&garbage(97, 42, false));
    data.extend_from_slice(&sequence(0x100, 4, 4, 0x00));
    demuxer.feed(&data);

    assert!(demuxer.is_synchronized());
    // All eight real packets make it into storage despite the noise.
    let total: usize = demuxer
        .iterations_summary(0x100)
        .iter()
        .map(|s| s.packet_count)
        .sum();
    assert_eq!(total, 8);
}

#[test]
fn buffer_occupancy_stays_bounded() {
    let mut demuxer = TsDemuxer::new();

    // Unsynchronizable noise accumulates in the buffer but never past the
    // cap.
    for i in 0..50u32 {
        demuxer.feed(&garbage(1000, i, true));
        assert!(demuxer.buffer_occupancy() <= MAX_BUFFER_SIZE);
    }
}

#[test]
fn payload_sizes_match_summaries() {
    let mut demuxer = TsDemuxer::new();

    let mut data = Vec::new();
    data.extend_from_slice(&packet(&PacketConfig {
        pid: 0x300,
        cc: 0,
        pusi: true,
        payload_fill: 0x55,
        private_data: Some(vec![9, 9, 9]),
        ..PacketConfig::default()
    }));
    data.extend_from_slice(&sequence(0x300, 2, 1, 0x55));
    demuxer.feed(&data);

    let summaries = demuxer.iterations_summary(0x300);
    assert_eq!(summaries.len(), 1);
    let info = &summaries[0];
    assert!(info.packet_count >= 1);

    let all = demuxer.all_payloads(0x300, info.iteration_id);
    let segment_total: usize = all.iter().map(|p| p.len()).sum();
    assert_eq!(
        segment_total,
        info.payload_normal_size + info.payload_private_size
    );
    assert_eq!(info.payload_private_size, 3);
}

#[test]
fn program_table_round_trip() {
    let mut table = ProgramTable::new();
    table.add_program(1, vec![0x100]);

    let mut data = Vec::new();
    for i in 0..3 {
        let a = sequence(0x100, 3, 0, 0x77);
        let b = sequence(0x200, 3, 0, 0x88);
        data.extend_from_slice(&a[i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE]);
        data.extend_from_slice(&b[i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE]);
    }

    // Table set, cleared, then fed: equivalent to a fresh demuxer with the
    // same table.
    let mut reused = TsDemuxer::new();
    reused.set_programs_table(&table);
    reused.feed(&sequence(0x100, 4, 0, 0x00));
    reused.clear_all();
    reused.feed(&data);

    let mut fresh = TsDemuxer::new();
    fresh.set_programs_table(&table);
    fresh.feed(&data);

    assert_eq!(reused.discovered_pids(), fresh.discovered_pids());
    let a = reused.iterations_summary(0x100);
    let b = fresh.iterations_summary(0x100);
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.packet_count, y.packet_count);
        assert_eq!(x.payload_normal_size, y.payload_normal_size);
        assert_eq!(x.cc_start, y.cc_start);
        assert_eq!(x.cc_end, y.cc_end);
        assert_eq!(x.has_discontinuity, y.has_discontinuity);
    }
}

#[test]
fn pes_header_reported_for_unit_start_iterations() {
    let mut demuxer = TsDemuxer::new();

    // First packet opens an unbounded video PES packet with a PTS.
    let mut first = packet(&PacketConfig {
        pid: 0x100,
        cc: 0,
        pusi: true,
        payload_fill: 0xAA,
        ..PacketConfig::default()
    });
    let mut pes = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x80, 0x05];
    pes.extend_from_slice(&timestamp_bytes(0x20, 90_000));
    first[4..4 + pes.len()].copy_from_slice(&pes);

    let mut data = first.to_vec();
    data.extend_from_slice(&sequence(0x100, 2, 1, 0xAA));
    demuxer.feed(&data);

    let summaries = demuxer.iterations_summary(0x100);
    assert_eq!(summaries.len(), 1);

    let header = demuxer.pes_header(0x100, summaries[0].iteration_id).unwrap();
    assert!(header.is_video());
    assert!(header.is_unbounded());
    assert_eq!(header.pts.unwrap().value, 90_000);
}

#[test]
fn pcr_stats_over_stream() {
    let mut demuxer = TsDemuxer::new();

    let mut data = Vec::new();
    for i in 0..6u8 {
        data.extend_from_slice(&packet(&PacketConfig {
            pid: 0x100,
            cc: i,
            pcr: Some(tsdemux::Pcr::from_27mhz(i as u64 * 40 * 27_000)),
            ..PacketConfig::default()
        }));
    }
    demuxer.feed(&data);

    assert_eq!(demuxer.pids_with_pcr(), vec![0x100]);

    let stats = demuxer.pcr_stats(0x100).unwrap();
    assert_eq!(stats.pcr_count, 6);
    assert!((stats.average_interval_ms - 40.0).abs() < 0.1);
    assert!(stats.max_jitter_ms < 0.1);
    assert!(!stats.discontinuity_detected);
    assert_eq!(stats.first_pcr.unwrap().to_27mhz(), 0);
    assert_eq!(stats.last_pcr.unwrap().to_27mhz(), 5 * 40 * 27_000);
}

#[test]
fn consecutive_iterations_chain_continuity() {
    let mut demuxer = TsDemuxer::new();

    let mut data = Vec::new();
    let mut cc = 0u8;
    for _ in 0..4 {
        data.extend_from_slice(&packet(&PacketConfig {
            pid: 0x100,
            cc,
            pusi: true,
            ..PacketConfig::default()
        }));
        cc = (cc + 1) % 16;
        for _ in 0..2 {
            data.extend_from_slice(&packet(&PacketConfig {
                pid: 0x100,
                cc,
                ..PacketConfig::default()
            }));
            cc = (cc + 1) % 16;
        }
    }
    demuxer.feed(&data);

    let summaries = demuxer.iterations_summary(0x100);
    assert_eq!(summaries.len(), 4);
    for pair in summaries.windows(2) {
        assert!(
            pair[1].cc_start == (pair[0].cc_end + 1) % 16 || pair[1].has_discontinuity,
            "iterations must chain CCs unless a discontinuity was flagged"
        );
    }
}
