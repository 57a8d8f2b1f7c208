//! Per-stream counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::frame::FrameOutcome;

/// Point-in-time copy of a stream's counters.
///
/// Counters are cumulative across restarts of the same runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames admitted into the queue
    pub frames_accepted: u64,
    /// Frames whose packets were all sent
    pub frames_transmitted: u64,
    /// Frames refused at admission
    pub frames_rejected: u64,
    /// Frames dropped on drain timeout or shutdown
    pub frames_abandoned: u64,
    /// Frames lost to a fatal transport error
    pub frames_failed: u64,
    /// RTP packets handed to the transport
    pub packets_sent: u64,
    /// Bytes handed to the transport, RTP headers included
    pub bytes_sent: u64,
    /// Transient send failures that were retried
    pub send_retries: u64,
}

impl StreamStats {
    /// Frames that have been accepted but not yet released.
    pub fn frames_in_flight(&self) -> u64 {
        self.frames_accepted.saturating_sub(
            self.frames_transmitted + self.frames_abandoned + self.frames_failed,
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    frames_accepted: AtomicU64,
    frames_transmitted: AtomicU64,
    frames_rejected: AtomicU64,
    frames_abandoned: AtomicU64,
    frames_failed: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_retries: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn accepted(&self) {
        self.frames_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn released(&self, outcome: FrameOutcome) {
        let counter = match outcome {
            FrameOutcome::Transmitted => &self.frames_transmitted,
            FrameOutcome::Rejected => &self.frames_rejected,
            FrameOutcome::Abandoned => &self.frames_abandoned,
            FrameOutcome::Failed => &self.frames_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_sent(&self, bytes: usize, retries: u32) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        if retries > 0 {
            self.send_retries
                .fetch_add(u64::from(retries), Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> StreamStats {
        StreamStats {
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_transmitted: self.frames_transmitted.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_abandoned: self.frames_abandoned.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_retries: self.send_retries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_counters() {
        let recorder = StatsRecorder::default();
        for _ in 0..4 {
            recorder.accepted();
        }
        recorder.released(FrameOutcome::Transmitted);
        recorder.released(FrameOutcome::Abandoned);
        recorder.released(FrameOutcome::Failed);
        recorder.released(FrameOutcome::Rejected);
        recorder.packet_sent(100, 2);
        recorder.packet_sent(50, 0);

        let stats = recorder.snapshot();
        assert_eq!(stats.frames_accepted, 4);
        assert_eq!(stats.frames_transmitted, 1);
        assert_eq!(stats.frames_abandoned, 1);
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.bytes_sent, 150);
        assert_eq!(stats.send_retries, 2);
        assert_eq!(stats.frames_in_flight(), 1);
    }
}
