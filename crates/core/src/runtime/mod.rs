//! Stream lifecycles and the owned top-level runtime.

mod media;
mod stream;

use std::fmt;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

pub use media::MediaRuntime;
pub use stream::StreamRuntime;

use crate::conveyor::SharedPacketizer;
use crate::frame::Frame;

/// Lifecycle of one [`StreamRuntime`].
///
/// ```text
/// Idle ─► Connecting ─► Running ─► Draining ─► Terminated
///              │            │          ▲
///              ▼            │          │ stop
///            Failed ◄───────┘          │
///              └───────────────────────┘
/// ```
///
/// `stop` from `Failed` passes through `Draining` while the worker flushes.
/// `Terminated` is only reached once the worker has released every frame.
/// `start` is accepted from `Idle`, `Failed` and `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeState {
    Idle,
    Connecting,
    Running,
    Draining,
    Terminated,
    Failed,
}

impl RuntimeState {
    /// Whether a session currently owns (or is acquiring) a transport.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Running | Self::Draining)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable session state shared by a runtime and its worker.
pub(crate) struct Lifecycle {
    pub(crate) state: RuntimeState,
    /// Bumped on every `start`; lets a worker ignore sessions it doesn't own.
    pub(crate) generation: u64,
    pub(crate) sender: Option<Sender<Frame>>,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) worker_thread: Option<ThreadId>,
    pub(crate) packetizer: Option<SharedPacketizer>,
    pub(crate) drain_deadline: Option<Instant>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: RuntimeState::Idle,
            generation: 0,
            sender: None,
            worker: None,
            worker_thread: None,
            packetizer: None,
            drain_deadline: None,
        }
    }

    pub(crate) fn on_worker_thread(&self) -> bool {
        self.worker_thread == Some(thread::current().id())
    }

    /// `Draining` to `Terminated` for session `generation`. `true` if moved.
    pub(crate) fn finish_drain(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.state == RuntimeState::Draining {
            self.state = RuntimeState::Terminated;
            self.drain_deadline = None;
            true
        } else {
            false
        }
    }
}

/// Wakes stoppers blocked on a drain that another caller started.
#[derive(Default)]
pub(crate) struct DrainSignal {
    lock: Mutex<()>,
    done: Condvar,
}

impl DrainSignal {
    /// Call after leaving `Draining`, with the lifecycle lock released.
    pub(crate) fn notify(&self) {
        let _guard = self.lock.lock();
        self.done.notify_all();
    }

    pub(crate) fn wait_while(&self, mut draining: impl FnMut() -> bool) {
        let mut guard = self.lock.lock();
        while draining() {
            self.done.wait(&mut guard);
        }
    }
}
