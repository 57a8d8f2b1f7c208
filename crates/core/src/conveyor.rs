//! Frame admission and the per-stream transmit worker.
//!
//! Producers on any thread push [`Frame`]s into a bounded queue; a single
//! worker per running stream pops them, packetizes, and writes the packets
//! to the transport. Every frame is released exactly once with the
//! [`FrameOutcome`] that describes how it left the pipeline.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::StreamKind;
use crate::config::{RetryPolicy, StreamConfig};
use crate::error::{InvalidReason, Result, RuntimeError};
use crate::frame::{Frame, FrameOutcome};
use crate::media::Packetizer;
use crate::runtime::{DrainSignal, Lifecycle, RuntimeState};
use crate::stats::StatsRecorder;
use crate::transport::{MediaTransport, send_with_retry};

pub(crate) type SharedPacketizer = Arc<Mutex<Box<dyn Packetizer>>>;

/// Release `frame` as [`FrameOutcome::Rejected`] and hand back `err`.
pub(crate) fn reject(
    kind: StreamKind,
    frame: Frame,
    stats: &StatsRecorder,
    err: RuntimeError,
) -> RuntimeError {
    tracing::debug!(kind = %kind, len = frame.len(), error = %err, "frame rejected");
    stats.released(FrameOutcome::Rejected);
    frame.finish(FrameOutcome::Rejected);
    err
}

pub(crate) fn validate(frame: &Frame, config: &StreamConfig) -> Result<()> {
    if frame.is_empty() {
        return Err(RuntimeError::invalid(InvalidReason::EmptyFrame));
    }
    if frame.len() > config.max_frame_len {
        return Err(RuntimeError::invalid(InvalidReason::FrameTooLarge {
            len: frame.len(),
            max: config.max_frame_len,
        }));
    }
    Ok(())
}

/// Queue `frame`, waiting at most the admission timeout for space.
///
/// On failure the frame is handed back untouched so the caller can release
/// it after dropping any locks it holds.
pub(crate) fn admit(
    kind: StreamKind,
    sender: &Sender<Frame>,
    frame: Frame,
    config: &StreamConfig,
) -> std::result::Result<(), (Frame, RuntimeError)> {
    match sender.send_timeout(frame, config.admission_timeout) {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(frame)) => {
            tracing::warn!(kind = %kind, capacity = config.queue_capacity, "frame queue full");
            Err((frame, RuntimeError::QueueFull(kind)))
        }
        Err(SendTimeoutError::Disconnected(frame)) => {
            Err((frame, RuntimeError::TransportUnavailable(kind)))
        }
    }
}

enum Transmit {
    Sent,
    Empty,
    DrainExpired,
}

/// Owns the receiving end of the queue and the transport for one session.
pub(crate) struct Worker {
    pub(crate) kind: StreamKind,
    pub(crate) generation: u64,
    pub(crate) rx: Receiver<Frame>,
    pub(crate) transport: Box<dyn MediaTransport>,
    pub(crate) packetizer: SharedPacketizer,
    pub(crate) timestamp_increment: u32,
    pub(crate) retry: RetryPolicy,
    pub(crate) lifecycle: Arc<RwLock<Lifecycle>>,
    pub(crate) drained: Arc<DrainSignal>,
    pub(crate) stats: Arc<StatsRecorder>,
}

impl Worker {
    /// Transmit until the queue closes, the drain deadline passes, or the
    /// transport fails. A draining session is `Terminated` on exit.
    pub(crate) fn run(mut self) {
        tracing::debug!(kind = %self.kind, generation = self.generation, "transmit worker started");

        while let Ok(frame) = self.rx.recv() {
            if self.drain_expired() {
                self.release(frame, FrameOutcome::Abandoned);
                self.release_remaining(FrameOutcome::Abandoned);
                break;
            }

            match self.transmit(&frame) {
                Ok(Transmit::Sent) => self.release(frame, FrameOutcome::Transmitted),
                Ok(Transmit::Empty) => {
                    tracing::warn!(kind = %self.kind, len = frame.len(), "frame produced no RTP packets");
                    self.release(frame, FrameOutcome::Abandoned);
                }
                Ok(Transmit::DrainExpired) => {
                    self.release(frame, FrameOutcome::Abandoned);
                    self.release_remaining(FrameOutcome::Abandoned);
                    break;
                }
                Err(e) => {
                    tracing::error!(kind = %self.kind, error = %e, "transport failed");
                    self.release(frame, FrameOutcome::Failed);
                    self.fail();
                    break;
                }
            }
        }

        let finished = self.lifecycle.write().finish_drain(self.generation);
        if finished {
            self.drained.notify();
        }
        tracing::debug!(kind = %self.kind, generation = self.generation, "transmit worker exiting");
    }

    fn transmit(&mut self, frame: &Frame) -> Result<Transmit> {
        let packets = self
            .packetizer
            .lock()
            .packetize(frame.as_bytes(), self.timestamp_increment);
        if packets.is_empty() {
            return Ok(Transmit::Empty);
        }

        for packet in &packets {
            if self.drain_expired() {
                return Ok(Transmit::DrainExpired);
            }
            let delivered = send_with_retry(self.transport.as_mut(), packet, &self.retry)?;
            self.stats.packet_sent(delivered.bytes, delivered.retries);
        }

        tracing::trace!(kind = %self.kind, packets = packets.len(), "frame transmitted");
        Ok(Transmit::Sent)
    }

    fn drain_expired(&self) -> bool {
        let lifecycle = self.lifecycle.read();
        match lifecycle.drain_deadline {
            Some(deadline) if lifecycle.generation == self.generation => {
                let expired = Instant::now() >= deadline;
                if expired {
                    tracing::warn!(kind = %self.kind, "drain timeout, abandoning queued frames");
                }
                expired
            }
            _ => false,
        }
    }

    /// Move a running session to `Failed` and flush the queue.
    fn fail(&mut self) {
        let sender = {
            let mut lifecycle = self.lifecycle.write();
            if lifecycle.generation == self.generation && lifecycle.state == RuntimeState::Running {
                lifecycle.state = RuntimeState::Failed;
                lifecycle.sender.take()
            } else {
                None
            }
        };
        drop(sender);
        self.release_remaining(FrameOutcome::Failed);
    }

    fn release_remaining(&self, outcome: FrameOutcome) {
        let mut count = 0usize;
        for frame in self.rx.try_iter() {
            self.release(frame, outcome);
            count += 1;
        }
        if count > 0 {
            tracing::debug!(kind = %self.kind, count, ?outcome, "released queued frames");
        }
    }

    fn release(&self, frame: Frame, outcome: FrameOutcome) {
        self.stats.released(outcome);
        frame.finish(outcome);
    }
}
