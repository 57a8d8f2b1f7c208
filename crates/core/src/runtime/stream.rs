use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use super::{DrainSignal, Lifecycle, RuntimeState};
use crate::StreamKind;
use crate::address::SignallingAddress;
use crate::config::{RetryPolicy, StreamConfig};
use crate::conveyor::{self, SharedPacketizer, Worker};
use crate::error::{Result, RuntimeError};
use crate::frame::Frame;
use crate::media::packetizer_for;
use crate::params::{ParameterSet, ParameterSetChannel};
use crate::stats::{StatsRecorder, StreamStats};
use crate::transport::TransportConnector;

/// Transmission session for one [`StreamKind`].
///
/// Owns the frame queue, the worker thread and the packetizer of the
/// current session. All methods take `&self` and are safe to call from any
/// thread; at most one session is active at a time.
pub struct StreamRuntime {
    kind: StreamKind,
    config: StreamConfig,
    retry: RetryPolicy,
    lifecycle: Arc<RwLock<Lifecycle>>,
    drained: Arc<DrainSignal>,
    stats: Arc<StatsRecorder>,
}

impl StreamRuntime {
    pub fn new(kind: StreamKind, config: StreamConfig, retry: RetryPolicy) -> Self {
        Self {
            kind,
            config,
            retry,
            lifecycle: Arc::new(RwLock::new(Lifecycle::new())),
            drained: Arc::new(DrainSignal::default()),
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        self.lifecycle.read().state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.snapshot()
    }

    /// Connect to `address` and begin transmitting.
    ///
    /// Blocks until the session is `Running` or the attempt failed.
    /// The new packetizer is seeded from `parameter_sets` once the transport
    /// is up, so a configuration submitted while connecting is not lost.
    pub fn start(
        &self,
        address: Option<SignallingAddress>,
        connector: &dyn TransportConnector,
        parameter_sets: Option<&ParameterSetChannel>,
    ) -> Result<()> {
        let kind = self.kind;

        let (address, generation, previous) = {
            let mut lifecycle = self.lifecycle.write();
            if lifecycle.state.is_active() {
                return Err(RuntimeError::AlreadyRunning(kind));
            }
            let address = address.ok_or(RuntimeError::NotConfigured)?;
            lifecycle.state = RuntimeState::Connecting;
            lifecycle.generation += 1;
            lifecycle.drain_deadline = None;
            (address, lifecycle.generation, lifecycle.worker.take())
        };

        if let Some(handle) = previous {
            let _ = join_worker(kind, handle);
        }

        tracing::info!(kind = %kind, address = %address, "runtime connecting");
        let connected = connector.connect(kind, &address);

        let mut lifecycle = self.lifecycle.write();
        if lifecycle.generation != generation || lifecycle.state != RuntimeState::Connecting {
            tracing::info!(kind = %kind, "start cancelled by stop");
            return Err(RuntimeError::Cancelled(kind));
        }

        let transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(kind = %kind, error = %e, "transport connect failed");
                lifecycle.state = RuntimeState::Failed;
                return Err(e);
            }
        };

        let mut packetizer = packetizer_for(kind, &self.config);
        // Read under the write lock: a later submit finds this packetizer live.
        if let Some(params) = parameter_sets.and_then(ParameterSetChannel::latest) {
            packetizer.set_parameter_sets(&params);
        }
        let ssrc = packetizer.ssrc();
        let packetizer: SharedPacketizer = Arc::new(Mutex::new(packetizer));

        let (tx, rx) = crossbeam_channel::bounded(self.config.queue_capacity.max(1));
        let worker = Worker {
            kind,
            generation,
            rx,
            transport,
            packetizer: packetizer.clone(),
            timestamp_increment: self.config.timestamp_increment,
            retry: self.retry.clone(),
            lifecycle: self.lifecycle.clone(),
            drained: self.drained.clone(),
            stats: self.stats.clone(),
        };

        let handle = match thread::Builder::new()
            .name(format!("rtp-{kind}"))
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(kind = %kind, error = %e, "failed to spawn transmit worker");
                lifecycle.state = RuntimeState::Failed;
                return Err(e.into());
            }
        };

        lifecycle.state = RuntimeState::Running;
        lifecycle.sender = Some(tx);
        lifecycle.worker_thread = Some(handle.thread().id());
        lifecycle.worker = Some(handle);
        lifecycle.packetizer = Some(packetizer);

        tracing::info!(
            kind = %kind,
            ssrc = format_args!("{:#010X}", ssrc),
            queue_capacity = self.config.queue_capacity,
            "runtime running"
        );
        Ok(())
    }

    /// Stop the session.
    ///
    /// A running session drains: admission closes at once and queued frames
    /// keep transmitting until the drain timeout, after which the rest are
    /// abandoned. Returns once every frame has been released, including when
    /// another caller started the drain. No-op when idle or already
    /// terminated.
    ///
    /// Called from a release callback on the transmit worker, it closes
    /// admission and returns; the worker finishes the drain on its own.
    pub fn stop(&self) {
        let kind = self.kind;

        let (generation, sender, worker) = {
            let mut lifecycle = self.lifecycle.write();
            let state = lifecycle.state;
            match state {
                RuntimeState::Idle | RuntimeState::Terminated => return,
                RuntimeState::Connecting => {
                    tracing::info!(kind = %kind, "stop while connecting");
                    lifecycle.state = RuntimeState::Terminated;
                    return;
                }
                RuntimeState::Draining => {
                    let generation = lifecycle.generation;
                    let on_worker = lifecycle.on_worker_thread();
                    drop(lifecycle);
                    if !on_worker {
                        self.wait_for_drain(generation);
                    }
                    return;
                }
                RuntimeState::Running => {
                    lifecycle.drain_deadline = Instant::now().checked_add(self.config.drain_timeout);
                    tracing::info!(
                        kind = %kind,
                        queued = lifecycle.sender.as_ref().map_or(0, |s| s.len()),
                        "runtime draining"
                    );
                }
                RuntimeState::Failed => {}
            }
            lifecycle.state = RuntimeState::Draining;
            (
                lifecycle.generation,
                lifecycle.sender.take(),
                lifecycle.worker.take(),
            )
        };

        drop(sender);
        if let Some(handle) = worker {
            if let Err(handle) = join_worker(kind, handle) {
                // Left in `Draining`; the worker moves to `Terminated` on exit.
                self.lifecycle.write().worker = Some(handle);
                return;
            }
        }

        let finished = self.lifecycle.write().finish_drain(generation);
        if finished {
            self.drained.notify();
        }
        tracing::info!(kind = %kind, "runtime stopped");
    }

    fn wait_for_drain(&self, generation: u64) {
        tracing::debug!(kind = %self.kind, "waiting for drain in progress");
        self.drained.wait_while(|| {
            let lifecycle = self.lifecycle.read();
            lifecycle.generation == generation && lifecycle.state == RuntimeState::Draining
        });
    }

    /// Hand `frame` to the running session. `true` if accepted.
    ///
    /// A rejected frame is released before this returns.
    pub fn submit(&self, frame: Frame) -> bool {
        self.try_submit(frame).is_ok()
    }

    /// Like [`submit`](Self::submit), with the rejection reason.
    pub fn try_submit(&self, frame: Frame) -> Result<()> {
        let kind = self.kind;

        if let Err(e) = conveyor::validate(&frame, &self.config) {
            return Err(conveyor::reject(kind, frame, &self.stats, e));
        }

        // The guard is gone before any release callback runs.
        let admitted = {
            let lifecycle = self.lifecycle.read();
            match (lifecycle.state, &lifecycle.sender) {
                (RuntimeState::Running, Some(sender)) => {
                    conveyor::admit(kind, sender, frame, &self.config)
                }
                _ => Err((frame, RuntimeError::TransportUnavailable(kind))),
            }
        };

        match admitted {
            Ok(()) => {
                self.stats.accepted();
                Ok(())
            }
            Err((frame, e)) => Err(conveyor::reject(kind, frame, &self.stats, e)),
        }
    }

    /// Push out-of-band parameter sets into the live packetizer, if any.
    pub fn update_parameter_sets(&self, params: &ParameterSet) {
        let packetizer = self.lifecycle.read().packetizer.clone();
        if let Some(packetizer) = packetizer {
            packetizer.lock().set_parameter_sets(params);
        }
    }

    /// SDP media attributes of the most recent session's packetizer.
    pub fn media_attributes(&self) -> Option<Vec<String>> {
        let packetizer = self.lifecycle.read().packetizer.clone()?;
        let attributes = packetizer.lock().media_attributes();
        Some(attributes)
    }
}

impl Drop for StreamRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join the transmit worker, or hand the handle back when called on it.
fn join_worker(
    kind: StreamKind,
    handle: JoinHandle<()>,
) -> std::result::Result<(), JoinHandle<()>> {
    // A release callback running on the worker may call back into stop.
    if handle.thread().id() == thread::current().id() {
        tracing::warn!(kind = %kind, "stop called from transmit worker, not joining");
        return Err(handle);
    }
    if handle.join().is_err() {
        tracing::error!(kind = %kind, "transmit worker panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressRegistry;
    use crate::frame::FrameOutcome;
    use crate::transport::MediaTransport;
    use std::io;

    type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

    struct Recording(Sent);

    impl MediaTransport for Recording {
        fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
            self.0.lock().push(packet.to_vec());
            Ok(packet.len())
        }
    }

    struct RecordingConnector(Sent);

    impl TransportConnector for RecordingConnector {
        fn connect(
            &self,
            _kind: StreamKind,
            _address: &SignallingAddress,
        ) -> Result<Box<dyn MediaTransport>> {
            Ok(Box::new(Recording(self.0.clone())))
        }
    }

    fn address() -> Option<SignallingAddress> {
        let registry = AddressRegistry::new();
        registry.set(b"127.0.0.1:5004").unwrap();
        registry.current()
    }

    fn audio_runtime() -> StreamRuntime {
        StreamRuntime::new(StreamKind::Audio, StreamConfig::audio(), RetryPolicy::default())
    }

    #[test]
    fn starts_idle_and_rejects_frames() {
        let runtime = audio_runtime();
        assert_eq!(runtime.state(), RuntimeState::Idle);

        let (frame, rx) = Frame::with_completion(vec![1u8; 10]);
        let err = runtime.try_submit(frame).unwrap_err();
        assert!(matches!(err, RuntimeError::TransportUnavailable(StreamKind::Audio)));
        assert_eq!(rx.try_outcome(), Some(FrameOutcome::Rejected));
    }

    #[test]
    fn start_without_address_is_not_configured() {
        let runtime = audio_runtime();
        let connector = RecordingConnector(Sent::default());
        let err = runtime.start(None, &connector, None).unwrap_err();
        assert!(matches!(err, RuntimeError::NotConfigured));
        assert_eq!(runtime.state(), RuntimeState::Idle);
    }

    #[test]
    fn lifecycle_round_trip() {
        let sent = Sent::default();
        let connector = RecordingConnector(sent.clone());
        let runtime = audio_runtime();

        runtime.start(address(), &connector, None).unwrap();
        assert_eq!(runtime.state(), RuntimeState::Running);
        assert!(matches!(
            runtime.start(address(), &connector, None),
            Err(RuntimeError::AlreadyRunning(StreamKind::Audio))
        ));

        let (frame, rx) = Frame::with_completion(vec![0xAB; 40]);
        assert!(runtime.submit(frame));
        assert_eq!(rx.wait(), Some(FrameOutcome::Transmitted));

        runtime.stop();
        assert_eq!(runtime.state(), RuntimeState::Terminated);
        runtime.stop();
        assert_eq!(runtime.state(), RuntimeState::Terminated);

        assert_eq!(sent.lock().len(), 1);
        let stats = runtime.stats();
        assert_eq!(stats.frames_accepted, 1);
        assert_eq!(stats.frames_transmitted, 1);
        assert_eq!(stats.packets_sent, 1);

        runtime.start(address(), &connector, None).unwrap();
        assert_eq!(runtime.state(), RuntimeState::Running);
    }

    #[test]
    fn empty_frame_rejected_even_when_running() {
        let connector = RecordingConnector(Sent::default());
        let runtime = audio_runtime();
        runtime.start(address(), &connector, None).unwrap();

        let err = runtime.try_submit(Frame::new(Vec::<u8>::new())).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(runtime.stats().frames_rejected, 1);
    }

    #[test]
    fn video_packetizer_seeded_with_parameter_sets() {
        let connector = RecordingConnector(Sent::default());
        let runtime =
            StreamRuntime::new(StreamKind::Video, StreamConfig::video(), RetryPolicy::default());
        let channel = ParameterSetChannel::default();
        channel.submit(&[0x68, 0xce], &[0x67, 0x42, 0x00, 0x1f]).unwrap();

        assert!(runtime.media_attributes().is_none());
        runtime.start(address(), &connector, Some(&channel)).unwrap();

        let attributes = runtime.media_attributes().unwrap();
        assert_eq!(attributes[0], "a=rtpmap:96 H264/90000");
        assert!(attributes[1].contains("profile-level-id=42001f"));
    }
}
