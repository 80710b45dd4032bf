//! RTP send counters and RTCP receiver-report aggregation.

use gstreamer as gst;

/// One receiver report block, as surfaced by the RTP session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    pub fraction_lost: u8,
    pub packets_lost: i32,
    pub ext_highest_seq: u32,
    pub jitter: u32,
    pub lsr: u32,
    pub dlsr: u32,
    pub round_trip: u64,
}

/// Send-side counters plus the last merged receiver report. Guarded by
/// the stats mutex owned by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RtpStats {
    /// Live counters fed by the payloader pad probe
    pub sent_bytes: u64,
    pub sent_packets: u64,
    /// Snapshot state of the periodic sampler
    pub last_sent_bytes: u64,
    pub last_seqnum: u32,
    /// Receiver-side view from RTCP
    pub fraction_lost: u8,
    pub cumulative_lost: i32,
    pub max_seqnum: u32,
    pub jitter: u32,
    pub lsr: u32,
    pub dlsr: u32,
    pub rtt: u64,
    /// Set by the first receiver report
    pub rtcp_enabled: bool,
}

/// What one sampler tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsDelta {
    pub bytes: u64,
    pub packets_estimate: u32,
}

impl RtpStats {
    pub fn merge_receiver_report(&mut self, rb: ReceiverReport) {
        self.fraction_lost = rb.fraction_lost;
        self.cumulative_lost = rb.packets_lost;
        self.max_seqnum = rb.ext_highest_seq;
        self.jitter = rb.jitter;
        self.lsr = rb.lsr;
        self.dlsr = rb.dlsr;
        self.rtt = rb.round_trip;
        self.rtcp_enabled = true;
    }

    /// Record one sampler tick: current payloader seqnum plus the byte
    /// counter accumulated by the pad probe. Returns the deltas since
    /// the previous tick.
    pub fn sample(&mut self, seqnum: u32) -> StatsDelta {
        let bytes = self.sent_bytes.saturating_sub(self.last_sent_bytes);
        let packets_estimate = seqnum.wrapping_sub(self.last_seqnum);
        self.last_sent_bytes = self.sent_bytes;
        self.last_seqnum = seqnum;
        StatsDelta {
            bytes,
            packets_estimate,
        }
    }
}

/// Pull the receiver-report fields out of an RTPSource `stats`
/// structure. Returns None until the source has seen an RTCP report.
pub fn report_from_structure(s: &gst::StructureRef) -> Option<ReceiverReport> {
    let fraction_lost = s.get::<u32>("rb-fractionlost").ok()?;
    Some(ReceiverReport {
        fraction_lost: fraction_lost as u8,
        packets_lost: s.get::<i32>("rb-packetslost").unwrap_or(0),
        ext_highest_seq: s.get::<u32>("rb-exthighestseq").unwrap_or(0),
        jitter: s.get::<u32>("rb-jitter").unwrap_or(0),
        lsr: s.get::<u32>("rb-lsr").unwrap_or(0),
        dlsr: s.get::<u32>("rb-dlsr").unwrap_or(0),
        round_trip: s.get::<u64>("rb-round-trip").unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_report_enables_rtcp() {
        let mut stats = RtpStats::default();
        assert!(!stats.rtcp_enabled);
        stats.merge_receiver_report(ReceiverReport {
            fraction_lost: 3,
            packets_lost: 17,
            ext_highest_seq: 5_000,
            jitter: 42,
            lsr: 1,
            dlsr: 2,
            round_trip: 900,
        });
        assert!(stats.rtcp_enabled);
        assert_eq!(stats.fraction_lost, 3);
        assert_eq!(stats.cumulative_lost, 17);
        assert_eq!(stats.max_seqnum, 5_000);
        assert_eq!(stats.rtt, 900);
    }

    #[test]
    fn sample_reports_deltas_since_last_tick() {
        let mut stats = RtpStats::default();
        stats.sent_bytes = 10_000;
        let d = stats.sample(100);
        assert_eq!(d.bytes, 10_000);
        assert_eq!(d.packets_estimate, 100);

        stats.sent_bytes = 25_000;
        let d = stats.sample(160);
        assert_eq!(d.bytes, 15_000);
        assert_eq!(d.packets_estimate, 60);
    }

    #[test]
    fn sample_handles_seqnum_wraparound() {
        let mut stats = RtpStats::default();
        stats.sample(u32::MAX - 1);
        let d = stats.sample(2);
        assert_eq!(d.packets_estimate, 4);
    }

    #[test]
    fn later_reports_overwrite_earlier() {
        let mut stats = RtpStats::default();
        stats.merge_receiver_report(ReceiverReport {
            fraction_lost: 10,
            ..Default::default()
        });
        stats.merge_receiver_report(ReceiverReport {
            fraction_lost: 0,
            jitter: 5,
            ..Default::default()
        });
        assert_eq!(stats.fraction_lost, 0);
        assert_eq!(stats.jitter, 5);
        assert!(stats.rtcp_enabled);
    }
}
