//! PCR (Program Clock Reference) tracking and statistics.
//!
//! Each PID carrying PCR gets a tracker holding a bounded history of
//! samples. The tracker computes interval statistics with wrap-aware
//! 27 MHz arithmetic (the PCR wraps at 2^33 * 300 ticks), detects
//! discontinuities, estimates jitter against the nominal 40 ms cadence and
//! interpolates PCR values between samples.

use std::collections::{BTreeMap, VecDeque};

use tracing::warn;

use crate::packet::Pcr;

/// Maximum retained samples per PID; the oldest sample is dropped first.
pub const MAX_SAMPLES: usize = 1000;

/// Nominal PCR cadence in milliseconds.
pub const EXPECTED_PCR_INTERVAL_MS: f64 = 40.0;

/// Interval above which a PCR discontinuity is flagged.
pub const DISCONTINUITY_THRESHOLD_MS: f64 = 100.0;

/// Samples considered when refreshing the average interval.
const AVERAGE_WINDOW: usize = 100;

/// One PCR observation.
#[derive(Debug, Clone, Copy)]
pub struct PcrSample {
    /// The PCR value.
    pub pcr: Pcr,
    /// Global packet number at which the PCR was observed.
    pub packet_number: u64,
    /// Continuity counter of the carrying packet.
    pub continuity_counter: u8,
}

/// PCR statistics for one PID.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcrStats {
    /// PID of the stream.
    pub pid: u16,
    /// Number of PCRs currently retained.
    pub pcr_count: usize,
    /// First retained PCR value.
    pub first_pcr: Option<Pcr>,
    /// Most recent PCR value.
    pub last_pcr: Option<Pcr>,
    /// Average PCR interval in milliseconds over recent samples.
    pub average_interval_ms: f64,
    /// Maximum jitter against the nominal 40 ms cadence.
    pub max_jitter_ms: f64,
    /// Whether a PCR discontinuity was observed.
    pub discontinuity_detected: bool,
}

/// Wrap-aware difference between two PCRs in 27 MHz ticks.
///
/// The PCR counter wraps at `2^33 * 300`; differences are folded into the
/// nearest half-range.
pub fn pcr_difference(pcr1: Pcr, pcr2: Pcr) -> i64 {
    const PCR_MAX: i64 = (1i64 << 33) * 300;

    let mut diff = pcr2.to_27mhz() as i64 - pcr1.to_27mhz() as i64;
    if diff > PCR_MAX / 2 {
        diff -= PCR_MAX;
    } else if diff < -PCR_MAX / 2 {
        diff += PCR_MAX;
    }
    diff
}

/// Wrap-aware PCR difference in milliseconds.
pub fn pcr_difference_ms(pcr1: Pcr, pcr2: Pcr) -> f64 {
    pcr_difference(pcr1, pcr2) as f64 / 27_000.0
}

/// PCR history and statistics for a single PID.
#[derive(Debug)]
pub struct PcrTracker {
    pid: u16,
    samples: VecDeque<PcrSample>,
    average_interval_ms: f64,
    max_jitter_ms: f64,
    discontinuity_detected: bool,
}

impl PcrTracker {
    /// Create a tracker for a PID.
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            average_interval_ms: 0.0,
            max_jitter_ms: 0.0,
            discontinuity_detected: false,
        }
    }

    /// Record a PCR observation.
    pub fn add(&mut self, pcr: Pcr, packet_number: u64, continuity_counter: u8) {
        let sample = PcrSample {
            pcr,
            packet_number,
            continuity_counter,
        };

        if let Some(last) = self.samples.back() {
            let interval = pcr_difference_ms(last.pcr, pcr);

            if interval < 0.0 || interval > DISCONTINUITY_THRESHOLD_MS {
                if !self.discontinuity_detected {
                    warn!(pid = self.pid, interval_ms = interval, "PCR discontinuity");
                }
                self.discontinuity_detected = true;
            } else {
                let jitter = (interval - EXPECTED_PCR_INTERVAL_MS).abs();
                if jitter > self.max_jitter_ms {
                    self.max_jitter_ms = jitter;
                }
            }
        }

        self.samples.push_back(sample);
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }

        self.update_average();
    }

    /// Current statistics.
    pub fn stats(&self) -> PcrStats {
        PcrStats {
            pid: self.pid,
            pcr_count: self.samples.len(),
            first_pcr: self.samples.front().map(|s| s.pcr),
            last_pcr: self.samples.back().map(|s| s.pcr),
            average_interval_ms: self.average_interval_ms,
            max_jitter_ms: self.max_jitter_ms,
            discontinuity_detected: self.discontinuity_detected,
        }
    }

    /// Most recent PCR.
    pub fn last_pcr(&self) -> Option<Pcr> {
        self.samples.back().map(|s| s.pcr)
    }

    /// Whether a discontinuity was observed.
    pub fn has_discontinuity(&self) -> bool {
        self.discontinuity_detected
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &PcrSample> {
        self.samples.iter()
    }

    /// Interpolated PCR for a packet number.
    ///
    /// With samples bracketing the target, the value is linearly
    /// interpolated in 27 MHz ticks (rounded). Beyond the last sample,
    /// the rate of the last two samples extrapolates forward. Anything
    /// else is "not available".
    pub fn interpolate(&self, packet_number: u64) -> Option<Pcr> {
        if self.samples.len() < 2 {
            return None;
        }

        let mut before: Option<&PcrSample> = None;
        let mut after: Option<&PcrSample> = None;
        for sample in &self.samples {
            if sample.packet_number <= packet_number {
                before = Some(sample);
            } else {
                after = Some(sample);
                break;
            }
        }

        if let (Some(before), Some(after)) = (before, after) {
            let total_packets = after.packet_number - before.packet_number;
            if total_packets == 0 {
                return Some(before.pcr);
            }

            let ratio = (packet_number - before.packet_number) as f64 / total_packets as f64;
            let diff = pcr_difference(before.pcr, after.pcr);
            let interpolated =
                (before.pcr.to_27mhz() as i64 + (diff as f64 * ratio).round() as i64) as u64;

            return Some(Pcr::from_27mhz(interpolated));
        }

        // Past the last sample: extrapolate at the rate of the final two.
        if let Some(before) = before {
            let n = self.samples.len();
            let s1 = &self.samples[n - 2];
            let s2 = &self.samples[n - 1];
            debug_assert_eq!(s2.packet_number, before.packet_number);

            let interval_ms = pcr_difference_ms(s1.pcr, s2.pcr);
            let packet_diff = s2.packet_number - s1.packet_number;
            if packet_diff == 0 || interval_ms <= 0.0 {
                return None;
            }

            let ms_per_packet = interval_ms / packet_diff as f64;
            let extrapolation_ms = ms_per_packet * (packet_number - s2.packet_number) as f64;
            let extrapolated =
                s2.pcr.to_27mhz() + (extrapolation_ms * 27_000.0).round() as u64;

            return Some(Pcr::from_27mhz(extrapolated));
        }

        None
    }

    /// Drop all history.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.average_interval_ms = 0.0;
        self.max_jitter_ms = 0.0;
        self.discontinuity_detected = false;
    }

    fn update_average(&mut self) {
        if self.samples.len() < 2 {
            return;
        }

        let window = self.samples.len().min(AVERAGE_WINDOW);
        let start = self.samples.len() - window;

        let mut total = 0.0;
        let mut valid = 0usize;
        for i in start..self.samples.len() - 1 {
            let interval = pcr_difference_ms(self.samples[i].pcr, self.samples[i + 1].pcr);
            if interval > 0.0 && interval < DISCONTINUITY_THRESHOLD_MS {
                total += interval;
                valid += 1;
            }
        }

        if valid > 0 {
            self.average_interval_ms = total / valid as f64;
        }
    }
}

/// Multiplexes PCR trackers by PID.
#[derive(Debug, Default)]
pub struct PcrManager {
    trackers: BTreeMap<u16, PcrTracker>,
}

impl PcrManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a PCR observation for a PID.
    pub fn add(&mut self, pid: u16, pcr: Pcr, packet_number: u64, continuity_counter: u8) {
        self.trackers
            .entry(pid)
            .or_insert_with(|| PcrTracker::new(pid))
            .add(pcr, packet_number, continuity_counter);
    }

    /// Tracker for a PID, if any PCR has been seen on it.
    pub fn tracker(&self, pid: u16) -> Option<&PcrTracker> {
        self.trackers.get(&pid)
    }

    /// Statistics for every PID carrying PCR.
    pub fn all_stats(&self) -> Vec<PcrStats> {
        self.trackers.values().map(|t| t.stats()).collect()
    }

    /// PIDs with PCR data, ascending.
    pub fn pids_with_pcr(&self) -> Vec<u16> {
        self.trackers.keys().copied().collect()
    }

    /// Drop all trackers.
    pub fn clear(&mut self) {
        self.trackers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// PCR advancing `ms` milliseconds from zero.
    fn pcr_at_ms(ms: f64) -> Pcr {
        Pcr::from_27mhz((ms * 27_000.0) as u64)
    }

    #[test]
    fn test_difference_simple() {
        let a = Pcr::new(1000, 0);
        let b = Pcr::new(1000, 150);
        assert_eq!(pcr_difference(a, b), 150);
        assert_eq!(pcr_difference(b, a), -150);
    }

    #[test]
    fn test_difference_wraparound() {
        let max_27mhz = (1u64 << 33) * 300;
        let near_wrap = Pcr::from_27mhz(max_27mhz - 1000);
        let after_wrap = Pcr::from_27mhz(500);

        assert_eq!(pcr_difference(near_wrap, after_wrap), 1500);
        assert_eq!(pcr_difference(after_wrap, near_wrap), -1500);
    }

    #[test]
    fn test_tracker_average_interval() {
        let mut tracker = PcrTracker::new(0x100);
        for i in 0..10 {
            tracker.add(pcr_at_ms(i as f64 * 40.0), i * 20, (i % 16) as u8);
        }

        let stats = tracker.stats();
        assert_eq!(stats.pcr_count, 10);
        assert!((stats.average_interval_ms - 40.0).abs() < 0.01);
        assert!(stats.max_jitter_ms < 0.01);
        assert!(!stats.discontinuity_detected);
        assert_eq!(stats.first_pcr.unwrap().to_27mhz(), 0);
    }

    #[test]
    fn test_tracker_jitter() {
        let mut tracker = PcrTracker::new(0x100);
        tracker.add(pcr_at_ms(0.0), 0, 0);
        tracker.add(pcr_at_ms(40.0), 20, 1);
        tracker.add(pcr_at_ms(95.0), 40, 2); // 55 ms interval, 15 ms jitter

        let stats = tracker.stats();
        assert!((stats.max_jitter_ms - 15.0).abs() < 0.01);
        assert!(!stats.discontinuity_detected);
    }

    #[test]
    fn test_tracker_discontinuity_on_large_interval() {
        let mut tracker = PcrTracker::new(0x100);
        tracker.add(pcr_at_ms(0.0), 0, 0);
        tracker.add(pcr_at_ms(250.0), 20, 1); // > 100 ms

        assert!(tracker.has_discontinuity());
    }

    #[test]
    fn test_tracker_discontinuity_on_backwards_jump() {
        let mut tracker = PcrTracker::new(0x100);
        tracker.add(pcr_at_ms(100.0), 0, 0);
        tracker.add(pcr_at_ms(60.0), 20, 1);

        assert!(tracker.has_discontinuity());
    }

    #[test]
    fn test_tracker_bounded_history() {
        let mut tracker = PcrTracker::new(0x100);
        for i in 0..(MAX_SAMPLES as u64 + 100) {
            tracker.add(pcr_at_ms(i as f64 * 40.0), i, (i % 16) as u8);
        }

        let stats = tracker.stats();
        assert_eq!(stats.pcr_count, MAX_SAMPLES);
        // The first 100 samples were dropped.
        assert_eq!(
            stats.first_pcr.unwrap().to_27mhz(),
            (100.0 * 40.0 * 27_000.0) as u64
        );
    }

    #[test]
    fn test_interpolation_between_samples() {
        let mut tracker = PcrTracker::new(0x100);
        tracker.add(Pcr::from_27mhz(0), 0, 0);
        tracker.add(Pcr::from_27mhz(1_000_000), 100, 1);

        let mid = tracker.interpolate(50).unwrap();
        assert_eq!(mid.to_27mhz(), 500_000);

        let quarter = tracker.interpolate(25).unwrap();
        assert_eq!(quarter.to_27mhz(), 250_000);
    }

    #[test]
    fn test_interpolation_at_sample() {
        let mut tracker = PcrTracker::new(0x100);
        tracker.add(Pcr::from_27mhz(100), 10, 0);
        tracker.add(Pcr::from_27mhz(200), 20, 1);

        assert_eq!(tracker.interpolate(10).unwrap().to_27mhz(), 100);
    }

    #[test]
    fn test_extrapolation_past_last_sample() {
        let mut tracker = PcrTracker::new(0x100);
        tracker.add(pcr_at_ms(0.0), 0, 0);
        tracker.add(pcr_at_ms(40.0), 100, 1);

        // 0.4 ms per packet; 50 packets past the last sample.
        let extrapolated = tracker.interpolate(150).unwrap();
        let expected = (60.0 * 27_000.0) as u64;
        assert_eq!(extrapolated.to_27mhz(), expected);
    }

    #[test]
    fn test_interpolation_unavailable() {
        let mut tracker = PcrTracker::new(0x100);
        assert!(tracker.interpolate(10).is_none());

        tracker.add(Pcr::from_27mhz(100), 10, 0);
        assert!(tracker.interpolate(5).is_none());

        // Before the first sample, with two samples present.
        tracker.add(Pcr::from_27mhz(200), 20, 1);
        assert!(tracker.interpolate(5).is_none());
    }

    #[test]
    fn test_tracker_clear() {
        let mut tracker = PcrTracker::new(0x100);
        tracker.add(pcr_at_ms(0.0), 0, 0);
        tracker.add(pcr_at_ms(300.0), 20, 1);
        assert!(tracker.has_discontinuity());

        tracker.clear();
        let stats = tracker.stats();
        assert_eq!(stats.pcr_count, 0);
        assert!(!stats.discontinuity_detected);
        assert!(stats.last_pcr.is_none());
    }

    #[test]
    fn test_manager_multiplexing() {
        let mut manager = PcrManager::new();
        manager.add(0x100, pcr_at_ms(0.0), 0, 0);
        manager.add(0x100, pcr_at_ms(40.0), 10, 1);
        manager.add(0x200, pcr_at_ms(10.0), 5, 0);

        assert_eq!(manager.pids_with_pcr(), vec![0x100, 0x200]);
        assert_eq!(manager.tracker(0x100).unwrap().stats().pcr_count, 2);
        assert_eq!(manager.tracker(0x200).unwrap().stats().pcr_count, 1);
        assert!(manager.tracker(0x300).is_none());

        let all = manager.all_stats();
        assert_eq!(all.len(), 2);

        manager.clear();
        assert!(manager.pids_with_pcr().is_empty());
    }
}
